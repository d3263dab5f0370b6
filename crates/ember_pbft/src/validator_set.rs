//! The ordered validator set with deterministic proposer selection.

#[cfg(test)]
#[path = "validator_set_test.rs"]
mod validator_set_test;

use ember_wire::Address;

/// An ordered snapshot of the validator set for one epoch, plus the proposer
/// chosen for the current view.
///
/// Proposer selection is round robin over the sorted set, seeded by the
/// previous proposer and advanced by the round number, so every honest node
/// derives the same proposer for a given (sequence, round).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorSet {
    validators: Vec<Address>,
    proposer: Address,
}

impl ValidatorSet {
    /// Build a set from `validators`; duplicates are dropped and the order is
    /// canonicalized by sorting. The initial proposer is the first entry.
    pub fn new(mut validators: Vec<Address>) -> Self {
        validators.sort_unstable();
        validators.dedup();
        let proposer = validators.first().copied().unwrap_or(Address::ZERO);
        Self { validators, proposer }
    }

    /// Number of validators.
    pub fn size(&self) -> usize {
        self.validators.len()
    }

    /// The validators in canonical order.
    pub fn list(&self) -> &[Address] {
        &self.validators
    }

    /// Whether `address` is a member.
    pub fn contains(&self, address: Address) -> bool {
        self.validators.binary_search(&address).is_ok()
    }

    /// Position of `address` in the canonical order.
    pub fn index_of(&self, address: Address) -> Option<usize> {
        self.validators.binary_search(&address).ok()
    }

    /// The proposer for the current view.
    pub fn proposer(&self) -> Address {
        self.proposer
    }

    /// Whether `address` is the current proposer.
    pub fn is_proposer(&self, address: Address) -> bool {
        !self.validators.is_empty() && self.proposer == address
    }

    /// Pick the proposer for `round`, rotating from `last_proposer`.
    pub fn calc_proposer(&mut self, last_proposer: Address, round: u64) {
        if self.validators.is_empty() {
            return;
        }
        let offset = match self.index_of(last_proposer) {
            Some(index) => index as u64 + 1,
            None => 0,
        };
        let pick = (offset + round) % self.validators.len() as u64;
        self.proposer = self.validators[pick as usize];
    }

    /// Maximum number of faulty validators the set tolerates.
    pub fn f(&self) -> usize {
        self.validators.len().saturating_sub(1) / 3
    }

    /// Votes required to prepare or commit: `⌈2N/3⌉`.
    pub fn confirmations(&self) -> usize {
        (2 * self.validators.len()).div_ceil(3)
    }
}
