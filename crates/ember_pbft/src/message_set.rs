//! A validator-indexed message container, deduplicated by sender.

#[cfg(test)]
#[path = "message_set_test.rs"]
mod message_set_test;

use std::collections::HashMap;

use ember_wire::{Address, Message};

use crate::types::ProtocolError;
use crate::validator_set::ValidatorSet;

/// Messages keyed by sender, bound to a validator-set snapshot. Holds at most
/// one message per validator; a later message from the same sender replaces
/// the earlier one in place. Iteration follows insertion order.
#[derive(Clone, Debug)]
pub(crate) struct MessageSet {
    validator_set: ValidatorSet,
    messages: Vec<Message>,
    by_sender: HashMap<Address, usize>,
}

impl MessageSet {
    pub(crate) fn new(validator_set: ValidatorSet) -> Self {
        Self { validator_set, messages: Vec::new(), by_sender: HashMap::new() }
    }

    /// Insert `msg`, rejecting senders outside the validator set.
    pub(crate) fn add(&mut self, msg: Message) -> Result<(), ProtocolError> {
        let sender = msg.address;
        if !self.validator_set.contains(sender) {
            return Err(ProtocolError::UnauthorizedAddress(sender));
        }
        match self.by_sender.get(&sender) {
            Some(&index) => self.messages[index] = msg,
            None => {
                self.by_sender.insert(sender, self.messages.len());
                self.messages.push(msg);
            }
        }
        Ok(())
    }

    pub(crate) fn size(&self) -> usize {
        self.messages.len()
    }

    /// The stored messages in insertion order.
    pub(crate) fn values(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub(crate) fn contains(&self, sender: Address) -> bool {
        self.by_sender.contains_key(&sender)
    }
}
