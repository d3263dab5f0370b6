use std::sync::Arc;

use assert_matches::assert_matches;
use ember_wire::{
    Address,
    LightBlock,
    LightPreprepare,
    MissedReq,
    MissedResp,
    MsgCode,
    Proposal,
    Transaction,
    View,
};

use crate::config::PbftConfig;
use crate::engine::{Core, EngineStatus};
use crate::test_utils::{peer_payload, proposal_block, validators, TestBackend};
use crate::types::{ProtocolError, Request, State};

fn light_config() -> PbftConfig {
    PbftConfig { light_mode: true, ..Default::default() }
}

fn proposer() -> Address {
    validators()[0]
}

async fn light_core(address: Address) -> (Core<TestBackend>, Arc<TestBackend>) {
    let backend = Arc::new(TestBackend::new(address));
    let mut core =
        Core::new(Arc::clone(&backend), light_config(), Arc::new(EngineStatus::default()));
    core.start_new_round(0).await;
    (core, backend)
}

#[tokio::test]
async fn proposer_broadcasts_digests_and_accepts_its_own_body() {
    let (mut core, backend) = light_core(proposer()).await;
    let block = proposal_block(1, 3);
    core.handle_request(&Request { proposal: Proposal::Full(block.clone()) }).await.unwrap();

    let sent = backend.sent(MsgCode::LightPreprepare);
    assert_eq!(sent.len(), 1);
    let light = LightPreprepare::decode(&sent[0].msg).unwrap();
    assert_eq!(light.proposal.tx_digests().len(), 3);
    assert_eq!(light.proposal.pending_hash(), block.pending_hash());
    // No full preprepare goes out in light mode.
    assert!(backend.sent(MsgCode::Preprepare).is_empty());
    assert_eq!(core.state, State::Preprepared);
}

#[tokio::test]
async fn fully_pooled_proposal_skips_the_round_trip() {
    let (mut core, backend) = light_core(validators()[1]).await;
    let block = proposal_block(1, 2);
    for tx in &block.transactions {
        backend.add_pool_tx(tx.clone());
    }
    let light = LightPreprepare {
        view: View::new(0, 1),
        proposal: LightBlock::from_block(&block),
    };
    let payload = peer_payload(MsgCode::LightPreprepare, light.encode(), proposer(), None);
    core.handle_msg(&payload).await.unwrap();

    assert_eq!(core.state, State::Preprepared);
    assert!(backend.sent(MsgCode::GetMissedTxs).is_empty());
    assert_eq!(backend.sent(MsgCode::Prepare).len(), 1);
}

#[tokio::test]
async fn empty_proposal_needs_no_fill() {
    let (mut core, backend) = light_core(validators()[1]).await;
    let block = proposal_block(1, 0);
    let light = LightPreprepare {
        view: View::new(0, 1),
        proposal: LightBlock::from_block(&block),
    };
    let payload = peer_payload(MsgCode::LightPreprepare, light.encode(), proposer(), None);
    core.handle_msg(&payload).await.unwrap();
    assert_eq!(core.state, State::Preprepared);
    assert!(backend.sent(MsgCode::GetMissedTxs).is_empty());
}

#[tokio::test]
async fn missing_bodies_are_requested_from_the_proposer() {
    let (mut core, backend) = light_core(validators()[1]).await;
    let block = proposal_block(1, 3);
    // The pool knows the first and last transaction; the middle one is new.
    backend.add_pool_tx(block.transactions[0].clone());
    backend.add_pool_tx(block.transactions[2].clone());

    let light = LightPreprepare {
        view: View::new(0, 1),
        proposal: LightBlock::from_block(&block),
    };
    let payload = peer_payload(MsgCode::LightPreprepare, light.encode(), proposer(), None);
    core.handle_msg(&payload).await.unwrap();

    // Still waiting: the proposal is parked and the miss is on the wire.
    assert_eq!(core.state, State::AcceptRequest);
    assert!(core.current.as_ref().unwrap().light_proposal().is_some());
    let requests = backend.outbound();
    let sent = backend.sent(MsgCode::GetMissedTxs);
    assert_eq!(sent.len(), 1);
    let req = MissedReq::decode(&sent[0].msg).unwrap();
    assert_eq!(req.view, View::new(0, 1));
    assert_eq!(req.missed_txs.len(), 1);
    assert_eq!(req.missed_txs[0].index, 1);
    assert_eq!(req.missed_txs[0].hash, block.transactions[1].hash());
    // Sent point-to-point to the proposer, not gossiped.
    assert_matches!(
        &requests[requests.len() - 1],
        crate::test_utils::Outbound::Send { targets, .. } if targets == &vec![proposer()]
    );
}

#[tokio::test]
async fn missed_txs_response_completes_the_proposal() {
    let (mut core, backend) = light_core(validators()[1]).await;
    let block = proposal_block(1, 3);
    backend.add_pool_tx(block.transactions[0].clone());
    backend.add_pool_tx(block.transactions[2].clone());
    let light = LightPreprepare {
        view: View::new(0, 1),
        proposal: LightBlock::from_block(&block),
    };
    let payload = peer_payload(MsgCode::LightPreprepare, light.encode(), proposer(), None);
    core.handle_msg(&payload).await.unwrap();
    assert_eq!(core.state, State::AcceptRequest);

    let resp = MissedResp {
        view: View::new(0, 1),
        transactions: vec![block.transactions[1].clone()],
    };
    let payload = peer_payload(MsgCode::MissedTxs, resp.encode(), proposer(), None);
    core.handle_msg(&payload).await.unwrap();

    // Reconstructed, verified, accepted.
    assert_eq!(core.state, State::Preprepared);
    let subject = core.current.as_ref().unwrap().subject().unwrap();
    assert_eq!(subject.pending, block.pending_hash());
    assert_eq!(backend.sent(MsgCode::Prepare).len(), 1);
}

#[tokio::test]
async fn proposer_answers_missed_tx_requests() {
    let (mut core, backend) = light_core(proposer()).await;
    let block = proposal_block(1, 3);
    core.handle_request(&Request { proposal: Proposal::Full(block.clone()) }).await.unwrap();
    backend.clear_outbound();

    let requester = validators()[1];
    let req = MissedReq {
        view: View::new(0, 1),
        missed_txs: vec![ember_wire::MissedTx { index: 1, hash: block.transactions[1].hash() }],
    };
    let payload = peer_payload(MsgCode::GetMissedTxs, req.encode(), requester, None);
    core.handle_msg(&payload).await.unwrap();

    let sent = backend.sent(MsgCode::MissedTxs);
    assert_eq!(sent.len(), 1);
    let resp = MissedResp::decode(&sent[0].msg).unwrap();
    assert_eq!(resp.transactions, vec![block.transactions[1].clone()]);
    // The requester is marked as holding those bodies now.
    let known = backend.known_txs.lock().unwrap();
    assert_eq!(*known, vec![(requester, vec![block.transactions[1].hash()])]);
}

#[tokio::test]
async fn missed_tx_request_without_a_proposal_is_refused() {
    let (mut core, _backend) = light_core(validators()[1]).await;
    // Force past AcceptRequest admission: requests are future there.
    let req = MissedReq { view: View::new(0, 1), missed_txs: Vec::new() };
    let payload = peer_payload(MsgCode::GetMissedTxs, req.encode(), validators()[2], None);
    assert_matches!(core.handle_msg(&payload).await, Err(ProtocolError::FutureMessage));
}

#[tokio::test]
async fn stray_missed_txs_response_is_ignored() {
    let (mut core, _backend) = light_core(validators()[1]).await;
    let resp = MissedResp {
        view: View::new(0, 1),
        transactions: vec![Transaction::new(vec![0x01])],
    };
    let payload = peer_payload(MsgCode::MissedTxs, resp.encode(), proposer(), None);
    // No light proposal is parked; the response is dropped without error.
    assert_matches!(core.handle_msg(&payload).await, Ok((_, _, false)));
    assert_eq!(core.state, State::AcceptRequest);
}

#[tokio::test]
async fn light_messages_need_light_mode() {
    let backend = Arc::new(TestBackend::new(validators()[1]));
    let mut core = Core::new(
        Arc::clone(&backend),
        PbftConfig::default(),
        Arc::new(EngineStatus::default()),
    );
    core.start_new_round(0).await;

    let block = proposal_block(1, 1);
    let light = LightPreprepare {
        view: View::new(0, 1),
        proposal: LightBlock::from_block(&block),
    };
    let payload = peer_payload(MsgCode::LightPreprepare, light.encode(), proposer(), None);
    assert_matches!(core.handle_msg(&payload).await, Err(ProtocolError::InvalidMessage));
}

#[tokio::test]
async fn light_node_does_not_forward_full_preprepares() {
    let (mut core, _backend) = light_core(validators()[1]).await;
    let block = proposal_block(1, 1);
    let preprepare = ember_wire::Preprepare { view: View::new(0, 1), proposal: block };
    let payload = peer_payload(MsgCode::Preprepare, preprepare.encode(), proposer(), None);
    let (_, _, forward) = core.handle_msg(&payload).await.unwrap();
    assert!(!forward);
}
