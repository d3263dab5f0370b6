//! The consensus core: a single-threaded actor driving the three-phase
//! protocol for one validator.
//!
//! All protocol state lives in [`Core`] and is only touched from the actor
//! task; the node talks to it through the event mux and the [`Engine`]
//! handle. The actor multiplexes local proposal requests, peer messages,
//! backlog replays, timer fires, and final-committed notifications, and calls
//! out to the [`Backend`] for crypto, verification, transport, and chain
//! insertion.

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ember_wire::{
    Address,
    LightPreprepare,
    Message,
    MissedReq,
    MissedResp,
    MsgCode,
    Preprepare,
    Subject,
    View,
    B256,
};
use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::backlog::{Backlog, BacklogStatus};
use crate::config::PbftConfig;
use crate::events::{BacklogEvent, EventReceivers};
use crate::metrics::{
    register_metrics,
    PBFT_CONSENSUS_SECONDS,
    PBFT_ROUND,
    PBFT_SEQUENCE,
    PBFT_SEQUENCE_ADVANCES,
    PBFT_TIMEOUTS,
};
use crate::round_change::RoundChangeSet;
use crate::round_state::RoundState;
use crate::types::{Backend, ConsensusError, ProtocolError, Request, State};
use crate::validator_set::ValidatorSet;

/// Queries the execution pipeline is allowed to make while the actor runs.
#[derive(Debug, Default)]
pub(crate) struct EngineStatus {
    is_proposer: AtomicBool,
    pending_proposal: Mutex<Option<B256>>,
}

impl EngineStatus {
    fn set_is_proposer(&self, is_proposer: bool) {
        self.is_proposer.store(is_proposer, Ordering::Relaxed);
    }

    fn set_pending_proposal(&self, pending: Option<B256>) {
        *self.pending_proposal.lock().expect("status lock poisoned") = pending;
    }
}

/// Handle to a running consensus actor.
pub struct Engine {
    status: Arc<EngineStatus>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), ConsensusError>>,
}

impl Engine {
    /// Spawn the consensus actor. The node keeps the matching
    /// [`crate::events::EventSender`] and feeds it proposals, peer messages,
    /// and final-committed notifications.
    pub fn start<B: Backend>(
        backend: Arc<B>,
        config: PbftConfig,
        receivers: EventReceivers,
    ) -> Engine {
        register_metrics();
        let status = Arc::new(EngineStatus::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let core = Core::new(backend, config, Arc::clone(&status));
        let task = tokio::spawn(core.run(receivers, shutdown_rx));
        Engine { status, shutdown: Some(shutdown_tx), task }
    }

    /// Stop the actor: cancel timers, drain the handler, and wait for it to
    /// exit.
    pub async fn stop(mut self) -> Result<(), ConsensusError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await.map_err(|err| ConsensusError::Task(err.to_string()))?
    }

    /// Whether this node is the proposer for the current view.
    pub fn is_proposer(&self) -> bool {
        self.status.is_proposer.load(Ordering::Relaxed)
    }

    /// Whether `pending_hash` identifies the proposal currently awaiting
    /// ordering. Useful to the execution pipeline as the earliest check
    /// against propagated blocks racing our own proposal.
    pub fn is_current_proposal(&self, pending_hash: B256) -> bool {
        self.status.pending_proposal.lock().expect("status lock poisoned").as_ref()
            == Some(&pending_hash)
    }
}

/// A stored local request waiting for its sequence; smallest block number
/// surfaces first.
#[derive(Debug)]
struct PendingRequest {
    request: Request,
    insertion: u64,
}

impl PendingRequest {
    fn key(&self) -> Reverse<(u64, u64)> {
        Reverse((self.request.proposal.number(), self.insertion))
    }
}

impl PartialEq for PendingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PendingRequest {}

impl PartialOrd for PendingRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

pub(crate) struct Core<B: Backend> {
    pub(crate) config: PbftConfig,
    pub(crate) address: Address,
    pub(crate) state: State,
    pub(crate) backend: Arc<B>,
    pub(crate) validator_set: ValidatorSet,
    pub(crate) waiting_for_round_change: bool,
    pub(crate) current: Option<RoundState>,
    pub(crate) backlog: Backlog,
    pub(crate) round_change_set: RoundChangeSet,
    pending_requests: Mutex<BinaryHeap<PendingRequest>>,
    pending_insertions: u64,

    backlog_tx: mpsc::UnboundedSender<BacklogEvent>,
    timeout_tx: mpsc::UnboundedSender<()>,
    internal_rx: Option<(mpsc::UnboundedReceiver<BacklogEvent>, mpsc::UnboundedReceiver<()>)>,

    round_change_timer: Option<JoinHandle<()>>,
    future_preprepare_timer: Option<JoinHandle<()>>,

    status: Arc<EngineStatus>,
    /// Start of the consensus for the current sequence, from accepting a
    /// preprepare; observed when the sequence is caught up.
    pub(crate) consensus_started: Option<Instant>,
}

impl<B: Backend> Core<B> {
    pub(crate) fn new(backend: Arc<B>, config: PbftConfig, status: Arc<EngineStatus>) -> Self {
        let address = backend.address();
        let (backlog_tx, backlog_rx) = mpsc::unbounded();
        let (timeout_tx, timeout_rx) = mpsc::unbounded();
        let backlog = Backlog::new(address, config.backlog_capacity);
        Self {
            config,
            address,
            state: State::AcceptRequest,
            backend,
            validator_set: ValidatorSet::new(Vec::new()),
            waiting_for_round_change: false,
            current: None,
            backlog,
            round_change_set: RoundChangeSet::new(ValidatorSet::new(Vec::new())),
            pending_requests: Mutex::new(BinaryHeap::new()),
            pending_insertions: 0,
            backlog_tx,
            timeout_tx,
            internal_rx: Some((backlog_rx, timeout_rx)),
            round_change_timer: None,
            future_preprepare_timer: None,
            status,
            consensus_started: None,
        }
    }

    /// The actor loop. Runs until the shutdown signal fires or every event
    /// channel closes.
    #[instrument(skip_all, fields(address = %self.address))]
    pub(crate) async fn run(
        mut self,
        mut receivers: EventReceivers,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<(), ConsensusError> {
        let (mut backlog_rx, mut timeout_rx) =
            self.internal_rx.take().ok_or(ConsensusError::ChannelClosed("internal"))?;

        // Start from the sequence after the last committed proposal.
        self.start_new_round(0).await;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(request) = receivers.requests.next() => {
                    self.on_request_event(request).await;
                }
                Some(payload) = receivers.messages.next() => {
                    self.on_message_event(&payload).await;
                }
                Some(event) = backlog_rx.next() => {
                    self.on_backlog_event(event).await;
                }
                Some(()) = timeout_rx.next() => {
                    self.handle_timeout().await;
                }
                Some(sequence) = receivers.final_committed.next() => {
                    self.handle_final_committed(sequence).await;
                }
                else => break,
            }
        }

        self.stop_timers();
        self.current = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event entry points
    // ------------------------------------------------------------------

    async fn on_request_event(&mut self, request: Request) {
        match self.handle_request(&request).await {
            Ok(()) => {}
            Err(ProtocolError::FutureMessage) => self.store_request(request),
            Err(err) => debug!(%err, "Dropping request"),
        }
    }

    async fn on_message_event(&mut self, payload: &[u8]) {
        match self.handle_msg(payload).await {
            Ok((msg, src, true)) => {
                self.forward(msg, src).await;
            }
            Ok(_) => {}
            Err(err) => trace!(%err, "Message not processed"),
        }
    }

    async fn on_backlog_event(&mut self, event: BacklogEvent) {
        // Replays skip the signature recheck; it passed when first received.
        match self.handle_checked_msg(&event.msg, event.src).await {
            Ok(true) => {
                let payload = event.msg.payload();
                self.backend.broadcast(&self.validator_set, event.msg.address, payload).await;
            }
            Ok(false) => {}
            Err(err) => trace!(%err, "Backlog replay not processed"),
        }
    }

    // ------------------------------------------------------------------
    // Message plumbing
    // ------------------------------------------------------------------

    /// Decode a raw payload, verify its signature, and dispatch it. Returns
    /// the message, its sender, and whether it should be forwarded onward.
    pub(crate) async fn handle_msg(
        &mut self,
        payload: &[u8],
    ) -> Result<(Message, Address, bool), ProtocolError> {
        let msg = match Message::decode(payload) {
            Ok(msg) => msg,
            Err(err) => {
                error!(%err, "Failed to decode message from payload");
                return Err(ProtocolError::FailedDecode(err));
            }
        };

        let signer = self
            .backend
            .check_signature(&msg.payload_no_sig(), &msg.signature)
            .map_err(|err| ProtocolError::Backend(err.to_string()))?;
        if signer != msg.address {
            error!(%signer, claimed = %msg.address, "Message signer mismatch");
            return Err(ProtocolError::UnauthorizedAddress(msg.address));
        }
        if !self.validator_set.contains(msg.address) {
            error!(address = %msg.address, "Invalid address in message");
            return Err(ProtocolError::UnauthorizedAddress(msg.address));
        }

        let src = msg.address;
        let forward = self.handle_checked_msg(&msg, src).await?;
        Ok((msg, src, forward))
    }

    /// Dispatch a decoded, signature-checked message. A `FutureMessage`
    /// outcome parks the message in the backlog. `Ok(true)` asks the caller
    /// to forward the message to its remaining targets.
    pub(crate) async fn handle_checked_msg(
        &mut self,
        msg: &Message,
        src: Address,
    ) -> Result<bool, ProtocolError> {
        let result = match msg.code {
            MsgCode::Preprepare => {
                // A light-mode node redistributes light proposals instead.
                self.handle_preprepare(msg, src).await.map(|()| !self.config.light_mode)
            }
            MsgCode::Prepare => self.handle_prepare(msg, src).await.map(|()| true),
            MsgCode::Commit => self.handle_commit(msg, src).await.map(|()| true),
            MsgCode::RoundChange => self.handle_round_change(msg, src).await.map(|()| true),
            MsgCode::LightPreprepare if self.config.light_mode => {
                self.handle_light_prepare(msg, src).await.map(|()| true)
            }
            MsgCode::GetMissedTxs if self.config.light_mode => {
                self.handle_get_missed_txs(msg, src).await.map(|()| false)
            }
            MsgCode::MissedTxs if self.config.light_mode => {
                self.handle_missed_txs(msg, src).await.map(|()| false)
            }
            code => {
                error!(%code, "Invalid message");
                Err(ProtocolError::InvalidMessage)
            }
        };

        if matches!(result, Err(ProtocolError::FutureMessage)) {
            if let Ok(view) = peek_view(msg) {
                self.backlog.store(src, view, msg.clone());
            }
        }
        result
    }

    /// Re-send `msg` to the forward targets it still owes, shrinking its
    /// forward list to whatever remains unreachable from here.
    async fn forward(&self, mut msg: Message, src: Address) -> bool {
        if msg.forward_nodes.is_empty() {
            return false;
        }
        let targets: Vec<Address> = msg
            .forward_nodes
            .iter()
            .copied()
            .filter(|addr| {
                let known = self.validator_set.contains(*addr);
                if !known {
                    warn!(from = %src, address = %addr, "invalid forward node");
                }
                known
            })
            .collect();
        let (peers, remaining) = self.backend.forward_route(&targets);
        if peers.is_empty() {
            return false;
        }
        msg.forward_nodes = remaining;
        let hash = msg.hash();
        self.backend.broadcast_to(&peers, hash, msg.payload()).await;
        true
    }

    /// Sign `msg` as ourselves and return its wire payload. Commits pick up
    /// a committed seal over the conclusion hash.
    pub(crate) fn finalize_message(&self, msg: &mut Message) -> Result<Vec<u8>, ProtocolError> {
        msg.address = self.address;
        msg.committed_seal = Vec::new();
        if msg.code == MsgCode::Commit {
            if let Some(conclusion) = self.current.as_ref().and_then(RoundState::conclusion) {
                let seal = ember_wire::committed_seal_input(conclusion.hash());
                msg.committed_seal = self
                    .backend
                    .sign(&seal)
                    .map_err(|err| ProtocolError::Backend(err.to_string()))?;
            }
        }
        let data = msg.payload_no_sig();
        msg.signature =
            self.backend.sign(&data).map_err(|err| ProtocolError::Backend(err.to_string()))?;
        Ok(msg.payload())
    }

    /// Gossip `msg` to the validator set through the forwarding transport.
    pub(crate) async fn broadcast(&mut self, msg: &mut Message) {
        let (peers, remaining) = self.backend.forward_route(self.validator_set.list());
        msg.forward_nodes = remaining;
        let payload = match self.finalize_message(msg) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, code = %msg.code, "Failed to finalize message");
                return;
            }
        };
        let hash = msg.hash();
        self.backend.broadcast_to(&peers, hash, payload).await;
    }

    /// Sign `msg` and send it to `targets` only.
    pub(crate) async fn send(&mut self, msg: &mut Message, targets: &[Address]) {
        let payload = match self.finalize_message(msg) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, code = %msg.code, "Failed to finalize message");
                return;
            }
        };
        self.backend.send(targets, payload).await;
    }

    // ------------------------------------------------------------------
    // View admission
    // ------------------------------------------------------------------

    /// Classify a message view against the current view: accept, future, or
    /// old. Round changes compare on sequence only so lagging rounds can
    /// still coordinate.
    pub(crate) fn check_message(&self, code: MsgCode, view: View) -> Result<(), ProtocolError> {
        let Some(current) = &self.current else {
            return Err(ProtocolError::FutureMessage);
        };
        let current_view = current.view();

        if code == MsgCode::RoundChange {
            if view.sequence > current_view.sequence {
                return Err(ProtocolError::FutureMessage);
            }
            if view < current_view {
                return Err(ProtocolError::OldMessage);
            }
            return Ok(());
        }

        if view > current_view {
            return Err(ProtocolError::FutureMessage);
        }
        if view < current_view {
            return Err(ProtocolError::OldMessage);
        }
        if self.waiting_for_round_change {
            return Err(ProtocolError::FutureMessage);
        }

        if self.state == State::AcceptRequest {
            if code.is_light() && !self.config.light_mode {
                return Err(ProtocolError::InvalidMessage);
            }
            match code {
                // Only a proposal can move us out of AcceptRequest; votes for
                // it are future until then.
                MsgCode::Prepare | MsgCode::Commit => return Err(ProtocolError::FutureMessage),
                MsgCode::GetMissedTxs => return Err(ProtocolError::FutureMessage),
                _ => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Local requests
    // ------------------------------------------------------------------

    pub(crate) async fn handle_request(&mut self, request: &Request) -> Result<(), ProtocolError> {
        self.check_request(request)?;
        if let Some(current) = self.current.as_mut() {
            current.pending_request = Some(request.clone());
        }
        self.refresh_status();
        if self.state == State::AcceptRequest {
            self.send_preprepare(request).await;
        }
        Ok(())
    }

    fn check_request(&self, request: &Request) -> Result<(), ProtocolError> {
        let Some(current) = &self.current else {
            return Err(ProtocolError::FutureMessage);
        };
        let number = request.proposal.number();
        if number < current.sequence() {
            return Err(ProtocolError::OldMessage);
        }
        if number > current.sequence() {
            return Err(ProtocolError::FutureMessage);
        }
        Ok(())
    }

    fn store_request(&mut self, request: Request) {
        trace!(number = request.proposal.number(), "Store future request");
        let insertion = self.pending_insertions;
        self.pending_insertions += 1;
        self.pending_requests
            .lock()
            .expect("pending requests lock poisoned")
            .push(PendingRequest { request, insertion });
    }

    async fn process_pending_requests(&mut self) {
        loop {
            let pending = {
                let mut queue =
                    self.pending_requests.lock().expect("pending requests lock poisoned");
                match queue.pop() {
                    Some(pending) => pending,
                    None => return,
                }
            };
            match self.check_request(&pending.request) {
                Err(ProtocolError::OldMessage) => {
                    trace!(number = pending.request.proposal.number(), "Drop old pending request");
                }
                Err(ProtocolError::FutureMessage) => {
                    self.pending_requests
                        .lock()
                        .expect("pending requests lock poisoned")
                        .push(pending);
                    return;
                }
                Err(err) => {
                    debug!(%err, "Skip pending request");
                }
                Ok(()) => {
                    if self.backend.has_bad_proposal(pending.request.proposal.pending_hash()) {
                        debug!("Skip pending request with a rejected proposal");
                        continue;
                    }
                    if let Err(err) = self.handle_request(&pending.request).await {
                        debug!(%err, "Pending request not handled");
                    }
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Round lifecycle
    // ------------------------------------------------------------------

    /// Enter a new view. `round == 0` starts the sequence after the last
    /// committed proposal; a non-zero round re-runs the current sequence
    /// after a round change.
    pub(crate) async fn start_new_round(&mut self, round: u64) {
        let (last_proposal, last_proposer) = self.backend.last_proposal();
        let mut round_change = false;

        match &self.current {
            None => {
                trace!("Start to the initial round");
            }
            Some(current) if last_proposal.number() >= current.sequence() => {
                let advanced = last_proposal.number() - current.sequence() + 1;
                metrics::counter!(PBFT_SEQUENCE_ADVANCES).increment(advanced);
                if let Some(started) = self.consensus_started.take() {
                    metrics::histogram!(PBFT_CONSENSUS_SECONDS)
                        .record(started.elapsed().as_secs_f64());
                }
                trace!(
                    number = last_proposal.number(),
                    hash = %last_proposal.pending_hash(),
                    "Catch up latest proposal"
                );
            }
            Some(current) if last_proposal.number() + 1 == current.sequence() => {
                if round == 0 {
                    // Same sequence and round; nothing to do.
                    return;
                }
                if round < current.round() {
                    warn!(
                        seq = last_proposal.number(),
                        new_round = round,
                        old_round = current.round(),
                        "New round should not be smaller than current round"
                    );
                    return;
                }
                round_change = true;
            }
            Some(current) => {
                warn!(
                    last = last_proposal.number(),
                    current = current.sequence(),
                    "New sequence should be larger than current sequence"
                );
                return;
            }
        }

        let new_view = if round_change {
            View::new(round, self.current_sequence())
        } else {
            self.validator_set = self.backend.validators(&last_proposal);
            View::new(0, last_proposal.number() + 1)
        };

        // Votes for abandoned rounds are useless now.
        self.round_change_set = RoundChangeSet::new(self.validator_set.clone());
        self.update_round_state(new_view, round_change);
        self.validator_set.calc_proposer(last_proposer, new_view.round);
        self.waiting_for_round_change = false;
        self.set_state(State::AcceptRequest).await;

        if round_change && self.is_proposer() {
            let request = match &self.current {
                // Locked: re-propose the locked proposal.
                Some(current) if current.is_hash_locked() => {
                    current.proposal().map(|proposal| Request { proposal })
                }
                Some(current) => current.pending_request.clone(),
                None => None,
            };
            if let Some(request) = request {
                self.send_preprepare(&request).await;
            }
        }
        self.new_round_change_timer();
        self.refresh_status();
        metrics::gauge!(PBFT_SEQUENCE).set(new_view.sequence as f64);
        metrics::gauge!(PBFT_ROUND).set(new_view.round as f64);

        debug!(
            new_round = new_view.round,
            new_seq = new_view.sequence,
            new_proposer = %self.validator_set.proposer(),
            size = self.validator_set.size(),
            is_proposer = self.is_proposer(),
            "New round"
        );
    }

    /// Replace the round state for `view`. On a round change a hash-locked
    /// node carries its locked proposal, prepares, and pending request into
    /// the new round; an unlocked node keeps only the pending request.
    pub(crate) fn update_round_state(&mut self, view: View, round_change: bool) {
        self.current = Some(match self.current.take() {
            Some(previous) if round_change => previous.next_round(view, &self.validator_set),
            _ => RoundState::new(view, &self.validator_set),
        });
    }

    /// Move the state machine, then replay whatever the move unblocked.
    pub(crate) fn set_state(&mut self, state: State) -> BoxFuture<'_, ()> {
        async move {
            if self.state != state {
                trace!(from = %self.state, to = %state, "State changed");
                self.state = state;
            }
            if state == State::AcceptRequest {
                self.process_pending_requests().await;
            }
            self.process_backlog();
        }
        .boxed()
    }

    /// Push every now-current backlog message back through the event loop.
    pub(crate) fn process_backlog(&self) {
        let ready = self.backlog.drain_ready(&self.validator_set, |code, view| {
            match self.check_message(code, view) {
                Ok(()) => BacklogStatus::Current,
                Err(ProtocolError::FutureMessage) => BacklogStatus::Future,
                Err(_) => BacklogStatus::Old,
            }
        });
        for (src, msg) in ready {
            trace!(%src, code = %msg.code, "Post backlog event");
            if self.backlog_tx.unbounded_send(BacklogEvent { src, msg }).is_err() {
                warn!("Backlog replay dropped: engine stopping");
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers and timeouts
    // ------------------------------------------------------------------

    pub(crate) fn new_round_change_timer(&mut self) {
        self.stop_timers();
        let round = self.current_round();
        let timeout = self.config.round_change_timeout(round);
        let timeout_tx = self.timeout_tx.clone();
        self.round_change_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!(?timeout, round, "timeout, send view change");
            let _ = timeout_tx.unbounded_send(());
        }));
    }

    pub(crate) fn stop_future_preprepare_timer(&mut self) {
        if let Some(timer) = self.future_preprepare_timer.take() {
            timer.abort();
        }
    }

    fn stop_timers(&mut self) {
        self.stop_future_preprepare_timer();
        if let Some(timer) = self.round_change_timer.take() {
            timer.abort();
        }
    }

    /// Park `msg` until the proposal's timestamp is close enough, then replay
    /// it through the backlog path.
    pub(crate) fn schedule_future_preprepare(
        &mut self,
        src: Address,
        msg: Message,
        wait: std::time::Duration,
    ) {
        self.stop_future_preprepare_timer();
        let backlog_tx = self.backlog_tx.clone();
        self.future_preprepare_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = backlog_tx.unbounded_send(BacklogEvent { src, msg });
        }));
    }

    async fn handle_timeout(&mut self) {
        // Let the sealer shrink the next block before we change rounds.
        self.backend.on_timeout();
        metrics::counter!(PBFT_TIMEOUTS).increment(1);

        // If not already waiting, F+1 round-change messages ahead of us mark
        // a round worth jumping to directly.
        if !self.waiting_for_round_change {
            if let Some(max_round) = self.round_change_set.max_round(self.validator_set.f() + 1) {
                if max_round > self.current_round() {
                    self.send_round_change(max_round).await;
                    return;
                }
            }
        }

        let (last_proposal, _) = self.backend.last_proposal();
        if last_proposal.number() >= self.current_sequence() {
            trace!(
                number = last_proposal.number(),
                "round change timeout, catch up latest sequence"
            );
            self.start_new_round(0).await;
        } else {
            self.send_next_round_change().await;
        }
    }

    async fn handle_final_committed(&mut self, sequence: u64) {
        if sequence >= self.current_sequence() {
            trace!(sequence, "Received a final committed proposal");
            self.start_new_round(0).await;
        }
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// Enter Committed and hand the conclusion with its seals to the chain.
    /// An insertion failure releases the lock and votes for the next round.
    pub(crate) async fn commit(&mut self) {
        self.set_state(State::Committed).await;

        let decided = self.current.as_ref().and_then(|current| {
            current.conclusion().map(|conclusion| {
                let seals: Vec<Vec<u8>> =
                    current.commits.values().map(|msg| msg.committed_seal.clone()).collect();
                (conclusion.clone(), seals)
            })
        });
        let Some((conclusion, seals)) = decided else {
            return;
        };

        match self.backend.commit(conclusion.clone(), seals).await {
            Ok(()) => {
                metrics::counter!(crate::metrics::PBFT_COMMITS).increment(1);
                self.backend
                    .on_commit(conclusion.number(), conclusion.block().transactions.len());
                info!(
                    number = conclusion.number(),
                    hash = %conclusion.hash(),
                    "Committed"
                );
            }
            Err(err) => {
                error!(
                    %err,
                    conclusion = %conclusion.hash(),
                    num = conclusion.number(),
                    "Commit Failed"
                );
                // Unlock block when insertion fails.
                if let Some(current) = self.current.as_mut() {
                    current.unlock_hash();
                }
                self.send_next_round_change().await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Views and status
    // ------------------------------------------------------------------

    pub(crate) fn current_view(&self) -> View {
        self.current.as_ref().map(RoundState::view).unwrap_or(View::new(0, 0))
    }

    pub(crate) fn current_round(&self) -> u64 {
        self.current_view().round
    }

    pub(crate) fn current_sequence(&self) -> u64 {
        self.current_view().sequence
    }

    pub(crate) fn is_proposer(&self) -> bool {
        self.validator_set.is_proposer(self.address)
    }

    pub(crate) fn refresh_status(&self) {
        self.status.set_is_proposer(self.is_proposer());
        self.status.set_pending_proposal(
            self.current
                .as_ref()
                .and_then(|current| current.pending_request.as_ref())
                .map(|request| request.proposal.pending_hash()),
        );
    }
}

#[cfg(test)]
impl<B: Backend> Core<B> {
    /// Drain and handle internally queued backlog replays; in production the
    /// actor loop does this.
    pub(crate) async fn replay_backlog_events(&mut self) {
        let Some((mut backlog_rx, timeout_rx)) = self.internal_rx.take() else {
            return;
        };
        while let Ok(Some(event)) = backlog_rx.try_next() {
            let _ = self.handle_checked_msg(&event.msg, event.src).await;
        }
        self.internal_rx = Some((backlog_rx, timeout_rx));
    }
}

/// Extract the view of a message without fully dispatching it; used to key
/// the backlog.
pub(crate) fn peek_view(msg: &Message) -> Result<View, ProtocolError> {
    let view = match msg.code {
        MsgCode::Preprepare => Preprepare::decode(&msg.msg)?.view,
        MsgCode::LightPreprepare => LightPreprepare::decode(&msg.msg)?.view,
        MsgCode::GetMissedTxs => MissedReq::decode(&msg.msg)?.view,
        MsgCode::MissedTxs => MissedResp::decode(&msg.msg)?.view,
        _ => Subject::decode(&msg.msg)?.view,
    };
    Ok(view)
}
