//! Preprepare: proposing and accepting the proposal for a view.

use ember_wire::{Address, Message, MsgCode, Preprepare, Proposal, View};
use tracing::{debug, trace, warn};

use crate::engine::Core;
use crate::types::{Backend, ProtocolError, Request, State, VerifyError};

impl<B: Backend> Core<B> {
    /// As proposer, broadcast `request` as the proposal for the current view
    /// and accept it locally. In light mode the digest-only form goes out
    /// instead.
    pub(crate) async fn send_preprepare(&mut self, request: &Request) {
        let proposer_for = self.current_sequence() == request.proposal.number();
        if !proposer_for || !self.is_proposer() {
            return;
        }
        if self.config.light_mode {
            self.send_light_prepare(request).await;
            return;
        }
        let Some(block) = request.proposal.as_full() else {
            warn!("Refusing to propose an incomplete proposal");
            return;
        };
        let view = self.current_view();
        let preprepare = Preprepare { view, proposal: block.clone() };
        debug!(number = block.number(), hash = %block.pending_hash(), "Send preprepare");
        let mut msg = Message::new(MsgCode::Preprepare, preprepare.encode());
        self.broadcast(&mut msg).await;
        self.accept_own_proposal(preprepare).await;
    }

    /// Execute our own proposal and run it through the acceptance path the
    /// peers will use.
    pub(crate) async fn accept_own_proposal(&mut self, preprepare: Preprepare) {
        let proposal = Proposal::Full(preprepare.proposal.clone());
        match self.backend.verify(&proposal, false, true).await {
            Ok(conclusion) => {
                let _ = self.check_and_accept_preprepare(preprepare, conclusion).await;
            }
            Err(err) => {
                warn!(%err, "Failed to execute own proposal");
                self.send_next_round_change().await;
            }
        }
    }

    pub(crate) async fn handle_preprepare(
        &mut self,
        msg: &Message,
        src: Address,
    ) -> Result<(), ProtocolError> {
        let preprepare = Preprepare::decode(&msg.msg).map_err(ProtocolError::FailedDecode)?;

        if let Err(err) = self.check_preprepare_msg(
            MsgCode::Preprepare,
            src,
            preprepare.view,
            preprepare.proposal.number(),
        ) {
            if err == ProtocolError::OldMessage {
                self.maybe_commit_for_old_block(&preprepare).await;
            }
            return Err(err);
        }

        let proposal = Proposal::Full(preprepare.proposal.clone());
        let conclusion = match self.backend.verify(&proposal, true, true).await {
            Ok(conclusion) => conclusion,
            Err(VerifyError::FutureBlock { wait }) => {
                if wait > self.config.block_period {
                    // Too early to judge; retry once the timestamp is close.
                    warn!(?wait, "Proposed block will be committed in the future");
                    self.schedule_future_preprepare(src, msg.clone(), wait);
                    return Ok(());
                }
                // Within the block-period tolerance; accept unexecuted.
                None
            }
            Err(err) => {
                warn!(%err, "Failed to verify proposal");
                self.send_next_round_change().await;
                return Err(ProtocolError::Verify(err.to_string()));
            }
        };

        self.check_and_accept_preprepare(preprepare, conclusion).await
    }

    /// Shared admission for full and light preprepares: right view, right
    /// proposer, proposal number matching the sequence.
    pub(crate) fn check_preprepare_msg(
        &self,
        code: MsgCode,
        src: Address,
        view: View,
        proposal_number: u64,
    ) -> Result<(), ProtocolError> {
        self.check_message(code, view)?;
        if !self.validator_set.is_proposer(src) {
            warn!(from = %src, "Ignore preprepare messages from non-proposer");
            return Err(ProtocolError::NotFromProposer);
        }
        if proposal_number != view.sequence {
            warn!(
                number = proposal_number,
                sequence = view.sequence,
                "Preprepare proposal number does not match its view"
            );
            return Err(ProtocolError::InvalidMessage);
        }
        Ok(())
    }

    /// Accept `preprepare` and move to Preprepared. A hash-locked node only
    /// accepts its locked proposal; anything else asks for a new round.
    pub(crate) async fn check_and_accept_preprepare(
        &mut self,
        preprepare: Preprepare,
        conclusion: Option<ember_wire::Conclusion>,
    ) -> Result<(), ProtocolError> {
        if self.state != State::AcceptRequest {
            return Ok(());
        }
        let pending_hash = preprepare.proposal.pending_hash();
        let locked_hash = self.current.as_ref().and_then(|current| current.locked_hash());

        if let Some(locked) = locked_hash {
            if pending_hash != locked {
                warn!(
                    %pending_hash,
                    %locked,
                    "Proposal does not match the locked hash"
                );
                self.send_next_round_change().await;
                return Err(ProtocolError::InconsistentSubject);
            }
        }

        self.accept_preprepare(preprepare, conclusion);
        self.set_state(State::Preprepared).await;
        self.send_prepare().await;

        // A locked node may already hold a commit quorum from the previous
        // round's stragglers; Prepared can be skipped.
        if locked_hash.is_some() {
            if let Some(subject) = self.current.as_ref().and_then(|current| current.subject()) {
                self.check_and_commit(&subject).await;
            }
        }
        Ok(())
    }

    fn accept_preprepare(
        &mut self,
        preprepare: Preprepare,
        conclusion: Option<ember_wire::Conclusion>,
    ) {
        trace!(view = %preprepare.view, "Accept preprepare");
        self.consensus_started = Some(std::time::Instant::now());
        if let Some(current) = self.current.as_mut() {
            current.set_preprepare(preprepare, conclusion);
        }
    }

    /// An old preprepare for a sequence we already committed: remind the
    /// lagging proposer with a commit for that block so it can finalize.
    async fn maybe_commit_for_old_block(&mut self, preprepare: &Preprepare) {
        let (last_proposal, _) = self.backend.last_proposal();
        if preprepare.view.sequence <= last_proposal.number()
            && last_proposal.pending_hash() == preprepare.proposal.pending_hash()
        {
            trace!(
                sequence = preprepare.view.sequence,
                "Re-announce commit for an already decided proposal"
            );
            self.send_commit_for_old_block(
                preprepare.view,
                last_proposal.pending_hash(),
                last_proposal.hash(),
            )
            .await;
        }
    }
}
