//! Event channels feeding the consensus actor.
//!
//! One typed channel per event family, merged at the actor with
//! `tokio::select!`. The node holds an [`EventSender`]; the engine consumes
//! the matching [`EventReceivers`].

use ember_wire::{Address, Message};
use futures::channel::mpsc;
use tracing::warn;

use crate::types::Request;

/// An internal replay of a message that was buffered as future.
#[derive(Debug)]
pub(crate) struct BacklogEvent {
    pub(crate) src: Address,
    pub(crate) msg: Message,
}

/// Producer half of the engine's event mux. Cloneable; safe to use from any
/// thread. Posting to a stopped engine is a no-op.
#[derive(Clone, Debug)]
pub struct EventSender {
    requests: mpsc::UnboundedSender<Request>,
    messages: mpsc::UnboundedSender<Vec<u8>>,
    final_committed: mpsc::UnboundedSender<u64>,
}

impl EventSender {
    /// Hand a locally built proposal to consensus for ordering.
    pub fn post_request(&self, request: Request) {
        if self.requests.unbounded_send(request).is_err() {
            warn!("Dropping request event: engine stopped");
        }
    }

    /// Deliver a raw consensus message received from a peer.
    pub fn post_message(&self, payload: Vec<u8>) {
        if self.messages.unbounded_send(payload).is_err() {
            warn!("Dropping message event: engine stopped");
        }
    }

    /// Announce that the chain finalized `sequence`.
    pub fn post_final_committed(&self, sequence: u64) {
        if self.final_committed.unbounded_send(sequence).is_err() {
            warn!("Dropping final-committed event: engine stopped");
        }
    }
}

/// Consumer half of the engine's event mux.
pub struct EventReceivers {
    pub(crate) requests: mpsc::UnboundedReceiver<Request>,
    pub(crate) messages: mpsc::UnboundedReceiver<Vec<u8>>,
    pub(crate) final_committed: mpsc::UnboundedReceiver<u64>,
}

/// Create the event mux: the sender side goes to the node, the receiver side
/// to the engine.
pub fn event_channel() -> (EventSender, EventReceivers) {
    let (requests_tx, requests_rx) = mpsc::unbounded();
    let (messages_tx, messages_rx) = mpsc::unbounded();
    let (final_committed_tx, final_committed_rx) = mpsc::unbounded();
    (
        EventSender {
            requests: requests_tx,
            messages: messages_tx,
            final_committed: final_committed_tx,
        },
        EventReceivers {
            requests: requests_rx,
            messages: messages_rx,
            final_committed: final_committed_rx,
        },
    )
}
