//! Types for interfacing between the consensus core and the node.

use std::time::Duration;

use async_trait::async_trait;
use ember_wire::{Address, Conclusion, LightBlock, MissedTx, Proposal, Transaction, B256};

use crate::validator_set::ValidatorSet;

/// The phase of the three-phase protocol a validator is in for the current
/// view. Ordering follows protocol progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Waiting for a proposal (and, as proposer, for a local request).
    AcceptRequest,
    /// Accepted a proposal; collecting prepares.
    Preprepared,
    /// Prepare quorum reached; hash locked; collecting commits.
    Prepared,
    /// Commit quorum reached; the conclusion was handed to the backend.
    Committed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::AcceptRequest => "Accept request",
            State::Preprepared => "Preprepared",
            State::Prepared => "Prepared",
            State::Committed => "Committed",
        };
        f.write_str(name)
    }
}

/// A local proposal handed to consensus for ordering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// The proposal; always a full block.
    pub proposal: Proposal,
}

/// Per-message protocol outcomes. The dispatcher routes on these: future
/// messages go to the backlog, old and invalid ones are dropped.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProtocolError {
    /// Malformed, unsupported, or out-of-protocol message.
    #[error("invalid message")]
    InvalidMessage,
    /// Message view is behind the current view.
    #[error("old message")]
    OldMessage,
    /// Message view is ahead of the current view.
    #[error("future message")]
    FutureMessage,
    /// Sender is not in the current validator set.
    #[error("unauthorized address: {0}")]
    UnauthorizedAddress(Address),
    /// Preprepare signed by someone other than the view's proposer.
    #[error("message does not come from the proposer")]
    NotFromProposer,
    /// Prepare/commit subject differs from the locally computed one.
    #[error("inconsistent subject")]
    InconsistentSubject,
    /// Payload bytes did not decode.
    #[error("failed to decode payload: {0}")]
    FailedDecode(#[from] ember_wire::WireError),
    /// A missed-tx request arrived but no completed proposal is held.
    #[error("no completed proposal for this round")]
    NonexistentProposal,
    /// A light payload arrived where a full one is required.
    #[error("proposal is not complete")]
    IncompleteProposal,
    /// The backend rejected the proposal.
    #[error("proposal verification failed: {0}")]
    Verify(String),
    /// The backend failed a signing or transport call.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Verification outcome for a proposal, distinguishing the retryable
/// future-timestamp case from real rejections.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VerifyError {
    /// The proposal's timestamp is ahead of local time by `wait`.
    #[error("block is from the future (wait {wait:?})")]
    FutureBlock {
        /// How long until the timestamp becomes valid.
        wait: Duration,
    },
    /// The proposal is invalid.
    #[error("invalid proposal: {0}")]
    Invalid(String),
}

/// Failures of backend calls that are not protocol outcomes.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BackendError {
    /// Signing failed.
    #[error("signing failed: {0}")]
    Sign(String),
    /// Signature recovery/verification failed.
    #[error("bad signature: {0}")]
    BadSignature(String),
    /// Chain insertion failed.
    #[error("commit failed: {0}")]
    Commit(String),
    /// Transaction-pool interaction failed.
    #[error("tx pool failure: {0}")]
    TxPool(String),
}

/// Errors that terminate the engine rather than a single message.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// The event channels closed while the engine was running.
    #[error("event channel closed: {0}")]
    ChannelClosed(&'static str),
    /// The engine task panicked or was aborted.
    #[error("engine task failed: {0}")]
    Task(String),
}

/// Interface for consensus to call out to the node.
///
/// The backend owns crypto, the chain, the transaction pool, and the
/// transport; the core owns nothing but protocol state. Calls are assumed
/// not to be cancel safe.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// This node's validator address.
    fn address(&self) -> Address;

    /// Sign `data` with the validator key.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, BackendError>;

    /// Recover and verify the signer of `data` from `signature`.
    fn check_signature(&self, data: &[u8], signature: &[u8]) -> Result<Address, BackendError>;

    /// The validator set in effect after `conclusion`.
    fn validators(&self, conclusion: &Conclusion) -> ValidatorSet;

    /// Verify `proposal`. With `verify_body` the block is executed and its
    /// conclusion returned; header-only verification returns `None`.
    async fn verify(
        &self,
        proposal: &Proposal,
        verify_header: bool,
        verify_body: bool,
    ) -> Result<Option<Conclusion>, VerifyError>;

    /// Insert the decided conclusion into the chain along with the committed
    /// seals collected from the commit messages.
    async fn commit(&self, conclusion: Conclusion, seals: Vec<Vec<u8>>)
        -> Result<(), BackendError>;

    /// The last committed conclusion and its proposer.
    fn last_proposal(&self) -> (Conclusion, Address);

    /// Gossip `payload` to the whole validator set on behalf of `sender`.
    async fn broadcast(&self, validators: &ValidatorSet, sender: Address, payload: Vec<u8>);

    /// Send `payload` to specific validators only.
    async fn send(&self, targets: &[Address], payload: Vec<u8>);

    /// Send `payload`, identified by `hash` for dedup, to connected peers.
    async fn broadcast_to(&self, peers: &[Address], hash: B256, payload: Vec<u8>);

    /// Split `validators` into directly connected peers and the remainder
    /// that must be reached by forwarding.
    fn forward_route(&self, validators: &[Address]) -> (Vec<Address>, Vec<Address>);

    /// Fill `light` from the local transaction pool. Returns whether the
    /// block is now complete and the slots still missing.
    async fn fill_light_proposal(
        &self,
        light: &mut LightBlock,
    ) -> Result<(bool, Vec<MissedTx>), BackendError>;

    /// Record that `peer` already holds `txs`, suppressing re-gossip.
    fn mark_transactions_known(&self, peer: Address, txs: &[Transaction]);

    /// Whether `pending_hash` belongs to a proposal this node has rejected.
    fn has_bad_proposal(&self, pending_hash: B256) -> bool;

    /// Sealer adjustment hook, called on every round-change timeout.
    fn on_timeout(&self);

    /// Sealer adjustment hook, called after a successful commit.
    fn on_commit(&self, block_number: u64, tx_count: usize);
}
