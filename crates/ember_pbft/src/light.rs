//! The light-proposal sub-protocol: digest-only proposals, body fill from the
//! local pool, and the missed-transaction round trip.

#[cfg(test)]
#[path = "light_test.rs"]
mod light_test;

use ember_wire::{
    Address,
    LightBlock,
    LightPreprepare,
    Message,
    MissedReq,
    MissedResp,
    MissedTx,
    MsgCode,
    Preprepare,
    Proposal,
    Transaction,
};
use tracing::{debug, trace, warn};

use crate::engine::Core;
use crate::types::{Backend, ProtocolError, Request, State, VerifyError};

impl<B: Backend> Core<B> {
    /// As proposer in light mode: broadcast the digest-only form of
    /// `request` and accept the full proposal locally.
    pub(crate) async fn send_light_prepare(&mut self, request: &Request) {
        let Some(block) = request.proposal.as_full() else {
            warn!("Refusing to propose an incomplete proposal");
            return;
        };
        let view = self.current_view();
        let light = LightPreprepare { view, proposal: LightBlock::from_block(block) };
        debug!(
            number = block.number(),
            txs = block.transactions.len(),
            "Send light preprepare"
        );
        let mut msg = Message::new(MsgCode::LightPreprepare, light.encode());
        self.broadcast(&mut msg).await;

        // We hold the bodies already; skip the fill machinery entirely.
        let preprepare = Preprepare { view, proposal: block.clone() };
        self.accept_own_proposal(preprepare).await;
    }

    /// Stage 1: verify the header, then reconstruct the body from the local
    /// pool. Misses are requested from the proposer; a full reconstruction
    /// drops straight into stage 2.
    pub(crate) async fn handle_light_prepare(
        &mut self,
        msg: &Message,
        src: Address,
    ) -> Result<(), ProtocolError> {
        let mut light = LightPreprepare::decode(&msg.msg).map_err(|err| {
            warn!(%err, "Failed to decode light preprepare");
            ProtocolError::FailedDecode(err)
        })?;

        self.check_preprepare_msg(
            MsgCode::LightPreprepare,
            src,
            light.view,
            light.proposal.number(),
        )?;

        // Header only; the body is not here yet.
        match self.backend.verify(&Proposal::Light(light.proposal.clone()), true, false).await {
            Ok(_) => {}
            Err(VerifyError::FutureBlock { wait }) => {
                if wait > self.config.block_period {
                    warn!(?wait, "Proposed block will be committed in the future");
                    self.schedule_future_preprepare(src, msg.clone(), wait);
                    return Ok(());
                }
            }
            Err(err) => {
                warn!(%err, "Failed to verify light proposal header");
                self.send_next_round_change().await;
                return Err(ProtocolError::Verify(err.to_string()));
            }
        }

        if self.state != State::AcceptRequest {
            return Ok(());
        }

        // An empty block has nothing to fill.
        if light.proposal.tx_digests().is_empty() {
            let full = light.into_full().map_err(|_| ProtocolError::IncompleteProposal)?;
            return self.handle_light_prepare2(full, src).await;
        }

        let (filled, missed) = match self.backend.fill_light_proposal(&mut light.proposal).await {
            Ok(result) => result,
            Err(err) => {
                warn!(%err, "Failed to fill light proposal");
                self.send_next_round_change().await;
                return Err(ProtocolError::Backend(err.to_string()));
            }
        };

        let covered = 100.0
            - 100.0 * missed.len() as f64 / light.proposal.tx_digests().len() as f64;
        trace!(percent = covered, "light block transaction covered");

        if filled {
            let full = light.into_full().map_err(|_| ProtocolError::IncompleteProposal)?;
            return self.handle_light_prepare2(full, src).await;
        }

        // Park the partially filled proposal and chase the misses.
        if let Some(current) = self.current.as_mut() {
            current.set_light_prepare(light);
        }
        self.request_missed_txs(&missed, src).await;
        Ok(())
    }

    /// Stage 2: the body is complete; verify it and accept.
    pub(crate) async fn handle_light_prepare2(
        &mut self,
        preprepare: Preprepare,
        _src: Address,
    ) -> Result<(), ProtocolError> {
        match self.backend.verify(&Proposal::Full(preprepare.proposal.clone()), false, true).await
        {
            Ok(conclusion) => self.check_and_accept_preprepare(preprepare, conclusion).await,
            Err(err) => {
                warn!(%err, "Failed to verify light proposal body");
                self.send_next_round_change().await;
                Err(ProtocolError::Verify(err.to_string()))
            }
        }
    }

    async fn request_missed_txs(&mut self, missed: &[MissedTx], proposer: Address) {
        let req = MissedReq { view: self.current_view(), missed_txs: missed.to_vec() };
        trace!(to = %proposer, missed = missed.len(), "Request missed txs");
        let mut msg = Message::new(MsgCode::GetMissedTxs, req.encode());
        self.send(&mut msg, &[proposer]).await;
    }

    /// The proposer side of the round trip: look the bodies up in our own
    /// (complete) proposal and answer.
    pub(crate) async fn handle_get_missed_txs(
        &mut self,
        msg: &Message,
        src: Address,
    ) -> Result<(), ProtocolError> {
        let missed = MissedReq::decode(&msg.msg)?;
        if let Err(err) = self.check_message(MsgCode::GetMissedTxs, missed.view) {
            trace!(%err, view = %missed.view, missed = missed.missed_txs.len(),
                "GetMissedTxs not admissible");
            return Err(err);
        }

        let Some(proposal) = self.current.as_ref().and_then(|current| current.proposal()) else {
            warn!("nonexistent completed proposal");
            return Err(ProtocolError::NonexistentProposal);
        };
        let Some(block) = proposal.as_full().cloned() else {
            return Err(ProtocolError::IncompleteProposal);
        };
        let txs = block.fetch_missed_txs(&missed.missed_txs)?;
        self.response_missed_txs(txs, src).await;
        Ok(())
    }

    async fn response_missed_txs(&mut self, txs: Vec<Transaction>, requester: Address) {
        let resp = MissedResp { view: self.current_view(), transactions: txs };
        // The requester holds these bodies once this lands; never re-gossip
        // them there.
        self.backend.mark_transactions_known(requester, &resp.transactions);
        trace!(to = %requester, txs = resp.transactions.len(), "Respond missed txs");
        let mut msg = Message::new(MsgCode::MissedTxs, resp.encode());
        self.send(&mut msg, &[requester]).await;
    }

    /// The requester side: fill the parked light proposal and, once whole,
    /// enter stage 2.
    pub(crate) async fn handle_missed_txs(
        &mut self,
        msg: &Message,
        src: Address,
    ) -> Result<(), ProtocolError> {
        let missed = MissedResp::decode(&msg.msg)?;
        if let Err(err) = self.check_message(MsgCode::MissedTxs, missed.view) {
            trace!(%err, view = %missed.view, "MissedTxs not admissible");
            return Err(err);
        }

        let Some(current) = self.current.as_mut() else {
            return Err(ProtocolError::FutureMessage);
        };
        let Some(light) = current.light_prepare_mut() else {
            warn!(view = %missed.view, "local light proposal was lost");
            return Ok(());
        };
        if light.proposal.completed() {
            warn!(view = %missed.view, "local light proposal was already completed");
            return Ok(());
        }
        light.proposal.fill_missed_txs(missed.transactions)?;
        if !light.proposal.completed() {
            return Ok(());
        }

        let light = current.take_light_prepare().ok_or(ProtocolError::IncompleteProposal)?;
        let full = light.into_full().map_err(|_| ProtocolError::IncompleteProposal)?;
        self.handle_light_prepare2(full, src).await
    }
}
