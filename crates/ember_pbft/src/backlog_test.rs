use ember_wire::{Address, Message, MsgCode, View};

use super::{Backlog, BacklogStatus};
use crate::test_utils::validators;
use crate::validator_set::ValidatorSet;

fn own() -> Address {
    validators()[0]
}

fn sender() -> Address {
    validators()[1]
}

fn message(code: MsgCode) -> Message {
    let mut msg = Message::new(code, Vec::new());
    msg.address = sender();
    msg
}

/// Drain with everything considered current.
fn drain_all(backlog: &Backlog) -> Vec<MsgCode> {
    backlog
        .drain_ready(&ValidatorSet::new(validators()), |_, _| BacklogStatus::Current)
        .into_iter()
        .map(|(_, msg)| msg.code)
        .collect()
}

#[test]
fn replays_in_priority_order_within_a_view() {
    let backlog = Backlog::new(own(), 16);
    let view = View::new(0, 2);
    backlog.store(sender(), view, message(MsgCode::Prepare));
    backlog.store(sender(), view, message(MsgCode::Commit));
    backlog.store(sender(), view, message(MsgCode::Preprepare));

    // Preprepare unblocks the round, then commits outrank prepares.
    assert_eq!(
        drain_all(&backlog),
        vec![MsgCode::Preprepare, MsgCode::Commit, MsgCode::Prepare]
    );
}

#[test]
fn lower_sequences_come_first() {
    let backlog = Backlog::new(own(), 16);
    backlog.store(sender(), View::new(0, 3), message(MsgCode::Preprepare));
    backlog.store(sender(), View::new(5, 2), message(MsgCode::Commit));
    assert_eq!(drain_all(&backlog), vec![MsgCode::Commit, MsgCode::Preprepare]);
}

#[test]
fn round_changes_ignore_their_round() {
    let backlog = Backlog::new(own(), 16);
    backlog.store(sender(), View::new(9, 2), message(MsgCode::RoundChange));
    backlog.store(sender(), View::new(0, 2), message(MsgCode::Preprepare));
    // Same sequence: the round change's round-9 view does not penalize it.
    assert_eq!(drain_all(&backlog), vec![MsgCode::RoundChange, MsgCode::Preprepare]);
}

#[test]
fn queue_stalls_at_the_first_future_message() {
    let backlog = Backlog::new(own(), 16);
    backlog.store(sender(), View::new(0, 2), message(MsgCode::Preprepare));
    backlog.store(sender(), View::new(0, 3), message(MsgCode::Preprepare));

    let ready = backlog.drain_ready(&ValidatorSet::new(validators()), |_, view| {
        if view.sequence <= 2 {
            BacklogStatus::Current
        } else {
            BacklogStatus::Future
        }
    });
    assert_eq!(ready.len(), 1);
    // The future message stays put for the next advance.
    assert_eq!(backlog.len(sender()), 1);
}

#[test]
fn old_messages_are_dropped_on_drain() {
    let backlog = Backlog::new(own(), 16);
    backlog.store(sender(), View::new(0, 2), message(MsgCode::Prepare));
    let ready =
        backlog.drain_ready(&ValidatorSet::new(validators()), |_, _| BacklogStatus::Old);
    assert!(ready.is_empty());
    assert_eq!(backlog.len(sender()), 0);
}

#[test]
fn messages_from_self_are_rejected() {
    let backlog = Backlog::new(own(), 16);
    backlog.store(own(), View::new(0, 2), message(MsgCode::Prepare));
    assert_eq!(backlog.len(own()), 0);
}

#[test]
fn queues_of_removed_validators_are_discarded() {
    let backlog = Backlog::new(own(), 16);
    let outsider = Address([0x55; 20]);
    backlog.store(outsider, View::new(0, 2), message(MsgCode::Prepare));
    assert_eq!(backlog.len(outsider), 1);
    let ready =
        backlog.drain_ready(&ValidatorSet::new(validators()), |_, _| BacklogStatus::Current);
    assert!(ready.is_empty());
    assert_eq!(backlog.len(outsider), 0);
}

#[test]
fn capacity_evicts_the_lowest_priority_entry() {
    let backlog = Backlog::new(own(), 2);
    backlog.store(sender(), View::new(0, 5), message(MsgCode::Prepare));
    backlog.store(sender(), View::new(0, 4), message(MsgCode::Prepare));
    // Full. A higher-priority (lower sequence) message pushes out sequence 5.
    backlog.store(sender(), View::new(0, 3), message(MsgCode::Prepare));
    assert_eq!(backlog.len(sender()), 2);

    let mut seen = Vec::new();
    backlog.drain_ready(&ValidatorSet::new(validators()), |_, view| {
        seen.push(view.sequence);
        BacklogStatus::Current
    });
    assert_eq!(seen, vec![3, 4]);

    // And an incoming message that is itself the lowest priority is dropped.
    let backlog = Backlog::new(own(), 1);
    backlog.store(sender(), View::new(0, 1), message(MsgCode::Prepare));
    backlog.store(sender(), View::new(0, 9), message(MsgCode::Prepare));
    assert_eq!(backlog.len(sender()), 1);
    let ready = backlog.drain_ready(&ValidatorSet::new(validators()), |_, view| {
        assert_eq!(view.sequence, 1);
        BacklogStatus::Current
    });
    assert_eq!(ready.len(), 1);
}
