//! Commit: the second voting phase and the hand-off to the chain.

use ember_wire::{Address, Message, MsgCode, Subject, View, B256};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{trace, warn};

use crate::engine::Core;
use crate::types::{Backend, ProtocolError, State};

impl<B: Backend> Core<B> {
    /// Broadcast a commit over the accepted proposal and count our own vote.
    pub(crate) async fn send_commit(&mut self) {
        let Some(subject) = self.current.as_ref().and_then(|current| current.subject()) else {
            return;
        };
        self.broadcast_commit(subject, true).await;
    }

    /// Re-announce a commit for an already decided block, for the benefit of
    /// a validator still stuck on that sequence.
    pub(crate) async fn send_commit_for_old_block(
        &mut self,
        view: View,
        pending: B256,
        digest: B256,
    ) {
        let subject = Subject { view, pending, digest };
        self.broadcast_commit(subject, false).await;
    }

    async fn broadcast_commit(&mut self, commit: Subject, fresh: bool) {
        let mut msg = Message::new(MsgCode::Commit, commit.encode());
        self.broadcast(&mut msg).await;
        // A fresh commit counts toward our own quorum; the old-block variant
        // must not touch the current round.
        if fresh {
            if let Err(err) = self.accept_commit(msg) {
                warn!(%err, "Failed to record own commit");
            }
            self.check_and_commit(&commit).await;
        }
    }

    pub(crate) async fn handle_commit(
        &mut self,
        msg: &Message,
        src: Address,
    ) -> Result<(), ProtocolError> {
        let commit = Subject::decode(&msg.msg)?;
        self.check_message(MsgCode::Commit, commit.view)?;
        self.verify_commit(&commit, src)?;
        self.accept_commit(msg.clone())?;
        self.check_and_commit(&commit).await;
        Ok(())
    }

    /// A commit must match our subject exactly, field by field.
    fn verify_commit(&self, commit: &Subject, src: Address) -> Result<(), ProtocolError> {
        let subject = self.current.as_ref().and_then(|current| current.subject());
        if subject != Some(*commit) {
            warn!(
                from = %src,
                expected = ?subject,
                got = ?commit,
                "Inconsistent subjects between commit and proposal"
            );
            return Err(ProtocolError::InconsistentSubject);
        }
        Ok(())
    }

    fn accept_commit(&mut self, msg: Message) -> Result<(), ProtocolError> {
        let Some(current) = self.current.as_mut() else {
            return Err(ProtocolError::FutureMessage);
        };
        trace!(from = %msg.address, "accept commit msg");
        current.commits.add(msg)
    }

    /// Commit once the quorum is in. Below Prepared, a commit can still help
    /// reach the prepare quorum: a hash-locked peer may send commits without
    /// us ever seeing its prepares.
    pub(crate) fn check_and_commit<'a>(&'a mut self, commit: &'a Subject) -> BoxFuture<'a, ()> {
        async move {
            let commits = self.current.as_ref().map_or(0, |current| current.commits.size());
            if commits >= self.validator_set.confirmations() && self.state < State::Committed {
                // Lock here as well: the state may skip Prepared and jump
                // straight to Committed.
                if let Some(current) = self.current.as_mut() {
                    current.lock_hash();
                }
                self.commit().await;
                return;
            }
            if self.state < State::Prepared {
                self.check_and_prepare(commit).await;
            }
        }
        .boxed()
    }
}
