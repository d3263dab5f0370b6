#![warn(missing_docs)]
//! A PBFT consensus engine for a permissioned chain.
//!
//! The engine drives one validator through the three-phase protocol:
//! AcceptRequest → Preprepared → Prepared → Committed, with a round-change
//! sub-protocol for liveness and a light-proposal sub-protocol that ships
//! transaction digests instead of bodies and reconstructs them from the local
//! pool.
//!
//! The engine is an active component running as a single-threaded actor. The
//! node feeds it through the event mux ([`event_channel`]): locally built
//! proposals, raw peer messages, and final-committed notifications. Timeouts
//! and backlog replays are self-generated. Everything else — signing, block
//! verification and execution, the transaction pool, the transport, and chain
//! insertion — is reached through the [`types::Backend`] trait; the backend
//! holds no reference to engine internals.
//!
//! Out-of-order arrivals are absorbed by a per-sender priority backlog and
//! replayed as the state machine advances, so a commit arriving before its
//! preprepare is buffered, not lost.

pub mod config;
pub mod events;
pub mod metrics;
#[allow(missing_docs)]
pub mod types;
pub mod validator_set;

mod backlog;
mod commit;
mod engine;
mod light;
mod message_set;
mod prepare;
mod preprepare;
mod round_change;
mod round_state;

pub use config::PbftConfig;
pub use engine::Engine;
pub use events::{event_channel, EventReceivers, EventSender};

#[cfg(test)]
pub(crate) mod test_utils;
