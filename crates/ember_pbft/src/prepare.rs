//! Prepare: the first voting phase.

use ember_wire::{Address, Message, MsgCode, Subject};
use tracing::{trace, warn};

use crate::engine::Core;
use crate::types::{Backend, ProtocolError, State};

impl<B: Backend> Core<B> {
    /// Broadcast a prepare over the accepted proposal and count our own vote.
    pub(crate) async fn send_prepare(&mut self) {
        let Some(subject) = self.current.as_ref().and_then(|current| current.subject()) else {
            return;
        };
        let mut msg = Message::new(MsgCode::Prepare, subject.encode());
        self.broadcast(&mut msg).await;
        if let Err(err) = self.accept_prepare(msg) {
            warn!(%err, "Failed to record own prepare");
        }
        self.check_and_prepare(&subject).await;
    }

    pub(crate) async fn handle_prepare(
        &mut self,
        msg: &Message,
        src: Address,
    ) -> Result<(), ProtocolError> {
        let prepare = Subject::decode(&msg.msg)?;
        self.check_message(MsgCode::Prepare, prepare.view)?;
        // Passing verification while hash locked implies the vote is for the
        // locked block, since only that proposal was accepted this view.
        self.verify_prepare(&prepare, src)?;
        self.accept_prepare(msg.clone())?;
        self.check_and_prepare(&prepare).await;
        Ok(())
    }

    /// A prepare must match our subject exactly, field by field.
    fn verify_prepare(&self, prepare: &Subject, src: Address) -> Result<(), ProtocolError> {
        let subject = self.current.as_ref().and_then(|current| current.subject());
        if subject != Some(*prepare) {
            warn!(
                from = %src,
                expected = ?subject,
                got = ?prepare,
                "Inconsistent subjects between PREPARE and proposal"
            );
            return Err(ProtocolError::InconsistentSubject);
        }
        Ok(())
    }

    fn accept_prepare(&mut self, msg: Message) -> Result<(), ProtocolError> {
        let Some(current) = self.current.as_mut() else {
            return Err(ProtocolError::FutureMessage);
        };
        trace!(from = %msg.address, "accept prepare msg");
        current.prepares.add(msg)
    }

    /// Move to Prepared once enough validators prepared (or we are locked on
    /// this very digest), lock the hash, and vote to commit.
    pub(crate) async fn check_and_prepare(&mut self, prepare: &Subject) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        let locked_vote =
            current.is_hash_locked() && Some(prepare.digest) == current.locked_hash();
        let quorum = current.prepare_or_commit_size() >= self.validator_set.confirmations();
        if (locked_vote || quorum) && self.state < State::Prepared {
            if let Some(current) = self.current.as_mut() {
                current.lock_hash();
            }
            self.set_state(State::Prepared).await;
            self.send_commit().await;
        }
    }
}
