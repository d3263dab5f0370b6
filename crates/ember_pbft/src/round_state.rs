//! Per-view accumulator: the accepted proposal, vote sets, and the hash lock.

#[cfg(test)]
#[path = "round_state_test.rs"]
mod round_state_test;

use ember_wire::{
    Conclusion,
    LightBlock,
    LightPreprepare,
    Preprepare,
    Proposal,
    Subject,
    View,
    B256,
};

use crate::message_set::MessageSet;
use crate::types::Request;
use crate::validator_set::ValidatorSet;

/// State accumulated for a single (sequence, round).
///
/// Created on every new round; when a round change happens while the node is
/// hash locked, the locked proposal, the prepare set, and the pending request
/// are carried into the replacement (see `Core::update_round_state`).
#[derive(Debug)]
pub(crate) struct RoundState {
    view: View,
    preprepare: Option<Preprepare>,
    light_prepare: Option<LightPreprepare>,
    conclusion: Option<Conclusion>,
    pub(crate) prepares: MessageSet,
    pub(crate) commits: MessageSet,
    locked_hash: Option<B256>,
    pub(crate) pending_request: Option<Request>,
}

impl RoundState {
    /// Fresh state for `view`, nothing carried over.
    pub(crate) fn new(view: View, validator_set: &ValidatorSet) -> Self {
        Self {
            view,
            preprepare: None,
            light_prepare: None,
            conclusion: None,
            prepares: MessageSet::new(validator_set.clone()),
            commits: MessageSet::new(validator_set.clone()),
            locked_hash: None,
            pending_request: None,
        }
    }

    /// Successor state after a round change. A hash-locked node carries its
    /// lock, accepted proposal, and prepare set so it keeps voting for the
    /// locked value; otherwise only the pending request survives. Commits
    /// never carry: their seals are view-specific.
    pub(crate) fn next_round(self, view: View, validator_set: &ValidatorSet) -> Self {
        if self.is_hash_locked() {
            Self {
                view,
                preprepare: self.preprepare,
                light_prepare: None,
                conclusion: self.conclusion,
                prepares: self.prepares,
                commits: MessageSet::new(validator_set.clone()),
                locked_hash: self.locked_hash,
                pending_request: self.pending_request,
            }
        } else {
            Self { pending_request: self.pending_request, ..Self::new(view, validator_set) }
        }
    }

    pub(crate) fn view(&self) -> View {
        self.view
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.view.sequence
    }

    pub(crate) fn round(&self) -> u64 {
        self.view.round
    }

    /// The accepted proposal, if any.
    pub(crate) fn proposal(&self) -> Option<Proposal> {
        self.preprepare.as_ref().map(|p| Proposal::Full(p.proposal.clone()))
    }

    pub(crate) fn preprepare(&self) -> Option<&Preprepare> {
        self.preprepare.as_ref()
    }

    pub(crate) fn set_preprepare(&mut self, preprepare: Preprepare, conclusion: Option<Conclusion>) {
        self.preprepare = Some(preprepare);
        self.conclusion = conclusion;
    }

    /// The executed form of the accepted proposal; present once body
    /// verification ran.
    pub(crate) fn conclusion(&self) -> Option<&Conclusion> {
        self.conclusion.as_ref()
    }

    pub(crate) fn set_light_prepare(&mut self, light_prepare: LightPreprepare) {
        self.light_prepare = Some(light_prepare);
    }

    pub(crate) fn light_proposal(&self) -> Option<&LightBlock> {
        self.light_prepare.as_ref().map(|lp| &lp.proposal)
    }

    pub(crate) fn light_prepare_mut(&mut self) -> Option<&mut LightPreprepare> {
        self.light_prepare.as_mut()
    }

    pub(crate) fn take_light_prepare(&mut self) -> Option<LightPreprepare> {
        self.light_prepare.take()
    }

    /// The subject of the accepted proposal in this view; `None` until a
    /// preprepare is accepted. The digest stays zero until execution.
    pub(crate) fn subject(&self) -> Option<Subject> {
        let preprepare = self.preprepare.as_ref()?;
        Some(Subject {
            view: self.view,
            pending: preprepare.proposal.pending_hash(),
            digest: self.conclusion.as_ref().map(Conclusion::hash).unwrap_or(B256::ZERO),
        })
    }

    /// Record the current proposal's pending hash as locked. A no-op without
    /// an accepted proposal.
    pub(crate) fn lock_hash(&mut self) {
        if let Some(preprepare) = &self.preprepare {
            self.locked_hash = Some(preprepare.proposal.pending_hash());
        }
    }

    /// Clear the lock; only done when a commit fails.
    pub(crate) fn unlock_hash(&mut self) {
        self.locked_hash = None;
    }

    pub(crate) fn is_hash_locked(&self) -> bool {
        self.locked_hash.is_some()
    }

    pub(crate) fn locked_hash(&self) -> Option<B256> {
        self.locked_hash
    }

    /// Size of the union of prepare and commit senders. A commit implies a
    /// prepare, so commit-only senders count toward the prepare quorum, but a
    /// validator present in both sets counts once.
    pub(crate) fn prepare_or_commit_size(&self) -> usize {
        let commit_only =
            self.commits.values().filter(|msg| !self.prepares.contains(msg.address)).count();
        self.prepares.size() + commit_only
    }
}
