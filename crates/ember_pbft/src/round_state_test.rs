use ember_wire::{MsgCode, Preprepare, View, B256};

use super::RoundState;
use crate::test_utils::{conclude, peer_message, proposal_block, validators};
use crate::validator_set::ValidatorSet;

fn valset() -> ValidatorSet {
    ValidatorSet::new(validators())
}

fn prepared_state() -> (RoundState, B256) {
    let view = View::new(0, 1);
    let mut state = RoundState::new(view, &valset());
    let block = proposal_block(1, 2);
    let pending = block.pending_hash();
    let conclusion = conclude(&block);
    state.set_preprepare(Preprepare { view, proposal: block }, Some(conclusion));
    (state, pending)
}

#[test]
fn subject_is_absent_before_a_proposal() {
    let state = RoundState::new(View::new(0, 1), &valset());
    assert!(state.subject().is_none());
    assert!(state.proposal().is_none());
    assert!(!state.is_hash_locked());
}

#[test]
fn subject_digest_is_zero_until_execution() {
    let view = View::new(0, 1);
    let mut state = RoundState::new(view, &valset());
    let block = proposal_block(1, 1);
    state.set_preprepare(Preprepare { view, proposal: block.clone() }, None);

    let subject = state.subject().unwrap();
    assert_eq!(subject.view, view);
    assert_eq!(subject.pending, block.pending_hash());
    assert!(subject.digest.is_zero());
}

#[test]
fn lock_records_the_pending_hash() {
    let (mut state, pending) = prepared_state();
    assert!(!state.is_hash_locked());
    state.lock_hash();
    assert_eq!(state.locked_hash(), Some(pending));
    state.unlock_hash();
    assert!(!state.is_hash_locked());
}

#[test]
fn lock_without_a_proposal_is_a_no_op() {
    let mut state = RoundState::new(View::new(0, 1), &valset());
    state.lock_hash();
    assert!(!state.is_hash_locked());
}

#[test]
fn prepare_or_commit_size_counts_the_sender_union() {
    let (mut state, _) = prepared_state();
    let a = validators()[0];
    let b = validators()[1];
    let c = validators()[2];
    state.prepares.add(peer_message(MsgCode::Prepare, Vec::new(), a, None)).unwrap();
    state.prepares.add(peer_message(MsgCode::Prepare, Vec::new(), b, None)).unwrap();
    state.commits.add(peer_message(MsgCode::Commit, Vec::new(), b, None)).unwrap();
    state.commits.add(peer_message(MsgCode::Commit, Vec::new(), c, None)).unwrap();
    // a, b from prepares; b counts once; c is commit-only.
    assert_eq!(state.prepare_or_commit_size(), 3);
}

#[test]
fn round_change_carries_lock_and_prepares() {
    let (mut state, pending) = prepared_state();
    state.prepares.add(peer_message(MsgCode::Prepare, Vec::new(), validators()[0], None)).unwrap();
    state.commits.add(peer_message(MsgCode::Commit, Vec::new(), validators()[2], None)).unwrap();
    state.lock_hash();

    let next = state.next_round(View::new(1, 1), &valset());
    assert_eq!(next.view(), View::new(1, 1));
    assert_eq!(next.locked_hash(), Some(pending));
    assert!(next.preprepare().is_some());
    assert_eq!(next.prepares.size(), 1);
    // Commit seals are view-specific and never carry.
    assert_eq!(next.commits.size(), 0);
    // The carried subject speaks for the new view.
    assert_eq!(next.subject().unwrap().view, View::new(1, 1));
}

#[test]
fn round_change_without_a_lock_keeps_only_the_pending_request() {
    let (mut state, _) = prepared_state();
    state.pending_request = Some(crate::types::Request {
        proposal: ember_wire::Proposal::Full(proposal_block(1, 1)),
    });
    state.prepares.add(peer_message(MsgCode::Prepare, Vec::new(), validators()[0], None)).unwrap();

    let next = state.next_round(View::new(1, 1), &valset());
    assert!(next.pending_request.is_some());
    assert!(next.preprepare().is_none());
    assert_eq!(next.prepares.size(), 0);
    assert!(!next.is_hash_locked());
}
