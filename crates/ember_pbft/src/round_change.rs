//! The round-change sub-protocol: the per-round vote pool and the handlers
//! that drive catch-up and new-round entry.

#[cfg(test)]
#[path = "round_change_test.rs"]
mod round_change_test;

use std::collections::HashMap;
use std::sync::Mutex;

use ember_wire::{Address, Message, MsgCode, Subject, View, B256};
use tracing::{trace, warn};

use crate::engine::Core;
use crate::message_set::MessageSet;
use crate::types::{Backend, ProtocolError};
use crate::validator_set::ValidatorSet;

/// Round-change votes, one [`MessageSet`] per target round.
///
/// Mutation happens on the consensus actor; the mutex is kept as a
/// correctness belt because the set outlives individual rounds.
#[derive(Debug)]
pub(crate) struct RoundChangeSet {
    validator_set: ValidatorSet,
    round_changes: Mutex<HashMap<u64, MessageSet>>,
}

impl RoundChangeSet {
    pub(crate) fn new(validator_set: ValidatorSet) -> Self {
        Self { validator_set, round_changes: Mutex::new(HashMap::new()) }
    }

    /// Record a round-change vote for `round`; returns the new vote count.
    pub(crate) fn add(&self, round: u64, msg: Message) -> Result<usize, ProtocolError> {
        let mut round_changes = self.round_changes.lock().expect("round change lock poisoned");
        let set = round_changes
            .entry(round)
            .or_insert_with(|| MessageSet::new(self.validator_set.clone()));
        set.add(msg)?;
        Ok(set.size())
    }

    /// Drop votes for rounds below `round`, and empty pools.
    pub(crate) fn clear(&self, round: u64) {
        let mut round_changes = self.round_changes.lock().expect("round change lock poisoned");
        round_changes.retain(|&r, set| r >= round && set.size() > 0);
    }

    /// Votes recorded for `round`.
    pub(crate) fn count(&self, round: u64) -> usize {
        let round_changes = self.round_changes.lock().expect("round change lock poisoned");
        round_changes.get(&round).map_or(0, MessageSet::size)
    }

    /// The largest round holding at least `num` votes.
    pub(crate) fn max_round(&self, num: usize) -> Option<u64> {
        let round_changes = self.round_changes.lock().expect("round change lock poisoned");
        round_changes.iter().filter(|(_, set)| set.size() >= num).map(|(&r, _)| r).max()
    }
}

impl<B: Backend> Core<B> {
    /// Vote to leave the current round.
    pub(crate) async fn send_next_round_change(&mut self) {
        let round = self.current_round();
        self.send_round_change(round + 1).await;
    }

    /// Vote to move to `round`; enters the catch-up state and broadcasts a
    /// round-change message. The own vote counts toward the thresholds.
    pub(crate) async fn send_round_change(&mut self, round: u64) {
        let current_view = self.current_view();
        if current_view.round >= round {
            warn!(
                old_round = current_view.round,
                new_round = round,
                "Cannot send round change for a smaller or equal round"
            );
            return;
        }
        self.catch_up_round(View::new(round, current_view.sequence));

        let subject = Subject {
            view: View::new(round, current_view.sequence),
            pending: B256::ZERO,
            digest: B256::ZERO,
        };
        let mut msg = Message::new(MsgCode::RoundChange, subject.encode());
        self.broadcast(&mut msg).await;
        // The broadcast skips ourselves; record the vote directly.
        if let Err(err) = self.round_change_set.add(round, msg) {
            warn!(%err, "Failed to record own round change");
        }
    }

    /// Move the local view to `view` while waiting for the network to agree
    /// on the new round. The hash lock (if any) survives.
    pub(crate) fn catch_up_round(&mut self, view: View) {
        let current_view = self.current_view();
        if view.round > current_view.round {
            metrics::counter!(crate::metrics::PBFT_ROUND_ADVANCES)
                .increment(view.round - current_view.round);
        }
        self.waiting_for_round_change = true;
        self.update_round_state(view, true);
        self.round_change_set.clear(view.round);
        self.new_round_change_timer();
        metrics::gauge!(crate::metrics::PBFT_ROUND).set(view.round as f64);

        trace!(new_round = view.round, new_seq = view.sequence, "Catch up round");
    }

    pub(crate) async fn handle_round_change(
        &mut self,
        msg: &Message,
        src: Address,
    ) -> Result<(), ProtocolError> {
        let subject = Subject::decode(&msg.msg).map_err(ProtocolError::FailedDecode)?;
        self.check_message(MsgCode::RoundChange, subject.view)?;

        let current_view = self.current_view();
        let round = subject.view.round;
        let count = self.round_change_set.add(round, msg.clone())?;
        trace!(%src, round, count, "Accepted round change");

        // F+1 votes for a higher round mean at least one honest validator is
        // there already; catch up.
        if round > current_view.round && count >= self.validator_set.f() + 1 {
            self.send_round_change(round).await;
        }
        // With a confirmation quorum at the round we are waiting on, enter
        // the new view.
        if self.waiting_for_round_change
            && round == self.current_round()
            && self.round_change_set.count(round) >= self.validator_set.confirmations()
        {
            self.start_new_round(round).await;
        }
        Ok(())
    }
}
