use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ember_wire::{
    keccak256,
    Address,
    Block,
    Conclusion,
    LightBlock,
    Message,
    MissedTx,
    MsgCode,
    Proposal,
    Transaction,
    B256,
};
use lazy_static::lazy_static;
use mockall::mock;

use crate::types::{Backend, BackendError, VerifyError};
use crate::validator_set::ValidatorSet;

lazy_static! {
    /// Four distinct validator addresses, sorted; index 0 is the round-0
    /// proposer when the last proposer is `last_proposer()`.
    static ref VALIDATORS: Vec<Address> = (1u8..=4).map(|i| Address([i; 20])).collect();
}

pub(crate) fn validators() -> Vec<Address> {
    VALIDATORS.clone()
}

pub(crate) fn last_proposer() -> Address {
    Address([4u8; 20])
}

/// The deterministic test "signature": signer address followed by a keyed
/// digest over the data. Recoverable and forgery-evident, no real crypto.
pub(crate) fn sign_as(signer: Address, data: &[u8]) -> Vec<u8> {
    let mut tag = signer.as_bytes().to_vec();
    tag.extend_from_slice(data);
    let mut sig = signer.as_bytes().to_vec();
    sig.extend_from_slice(keccak256(&tag).as_bytes());
    sig
}

pub(crate) fn recover(data: &[u8], signature: &[u8]) -> Result<Address, BackendError> {
    if signature.len() != 52 {
        return Err(BackendError::BadSignature("bad length".to_string()));
    }
    let signer = Address::from_slice(&signature[..20])
        .map_err(|err| BackendError::BadSignature(err.to_string()))?;
    if sign_as(signer, data) != signature {
        return Err(BackendError::BadSignature("digest mismatch".to_string()));
    }
    Ok(signer)
}

/// The executed form of `block` under the test execution model.
pub(crate) fn conclude(block: &Block) -> Conclusion {
    let mut data = block.pending_hash().as_bytes().to_vec();
    data.extend_from_slice(b"executed");
    Conclusion::new(block.clone(), keccak256(&data))
}

pub(crate) fn genesis() -> Conclusion {
    conclude(&Block::new(0, B256::ZERO, 0, Vec::new()))
}

/// A block proposing `sequence` with `n_txs` distinct transactions.
pub(crate) fn proposal_block(sequence: u64, n_txs: usize) -> Block {
    let txs = (0..n_txs)
        .map(|i| Transaction::new(vec![i as u8, sequence as u8, 0x5a]))
        .collect();
    Block::new(sequence, genesis().hash(), 1_700_000_000 + sequence, txs)
}

/// Build the signed wire payload of a consensus message from `signer`.
/// Commits get a committed seal over `seal_digest`.
pub(crate) fn peer_payload(
    code: MsgCode,
    payload: Vec<u8>,
    signer: Address,
    seal_digest: Option<B256>,
) -> Vec<u8> {
    let msg = peer_message(code, payload, signer, seal_digest);
    msg.payload()
}

pub(crate) fn peer_message(
    code: MsgCode,
    payload: Vec<u8>,
    signer: Address,
    seal_digest: Option<B256>,
) -> Message {
    let mut msg = Message::new(code, payload);
    msg.address = signer;
    if let Some(digest) = seal_digest {
        msg.committed_seal = sign_as(signer, &ember_wire::committed_seal_input(digest));
    }
    msg.signature = sign_as(signer, &msg.payload_no_sig());
    msg
}

/// Everything the engine pushed toward the outside world.
#[derive(Debug, Clone)]
pub(crate) enum Outbound {
    /// Forward-routed gossip (`broadcast_to`).
    Broadcast { peers: Vec<Address>, payload: Vec<u8> },
    /// Valset-wide gossip of a replayed message (`broadcast`).
    Gossip { payload: Vec<u8> },
    /// Targeted send.
    Send { targets: Vec<Address>, payload: Vec<u8> },
}

impl Outbound {
    pub(crate) fn message(&self) -> Message {
        let payload = match self {
            Outbound::Broadcast { payload, .. } => payload,
            Outbound::Gossip { payload } => payload,
            Outbound::Send { payload, .. } => payload,
        };
        Message::decode(payload).expect("outbound payload decodes")
    }
}

/// A stateful in-memory backend: deterministic signatures, an executing
/// verifier, a transaction pool, and a recording transport.
pub(crate) struct TestBackend {
    pub(crate) own_address: Address,
    pub(crate) validator_list: Vec<Address>,
    pub(crate) last: Mutex<(Conclusion, Address)>,
    pub(crate) outbound: Mutex<Vec<Outbound>>,
    pub(crate) committed: Mutex<Vec<(Conclusion, Vec<Vec<u8>>)>>,
    pub(crate) pool: Mutex<HashMap<B256, Transaction>>,
    pub(crate) known_txs: Mutex<Vec<(Address, Vec<B256>)>>,
    pub(crate) verify_override: Mutex<Option<VerifyError>>,
    pub(crate) fail_commit: AtomicBool,
    pub(crate) timeouts: AtomicUsize,
    pub(crate) commit_hook_calls: Mutex<Vec<(u64, usize)>>,
}

impl TestBackend {
    pub(crate) fn new(own_address: Address) -> Self {
        Self {
            own_address,
            validator_list: validators(),
            last: Mutex::new((genesis(), last_proposer())),
            outbound: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            pool: Mutex::new(HashMap::new()),
            known_txs: Mutex::new(Vec::new()),
            verify_override: Mutex::new(None),
            fail_commit: AtomicBool::new(false),
            timeouts: AtomicUsize::new(0),
            commit_hook_calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn outbound(&self) -> Vec<Outbound> {
        self.outbound.lock().unwrap().clone()
    }

    /// Outbound messages of `code`, decoded.
    pub(crate) fn sent(&self, code: MsgCode) -> Vec<Message> {
        self.outbound()
            .iter()
            .map(Outbound::message)
            .filter(|msg| msg.code == code)
            .collect()
    }

    pub(crate) fn clear_outbound(&self) {
        self.outbound.lock().unwrap().clear();
    }

    pub(crate) fn add_pool_tx(&self, tx: Transaction) {
        self.pool.lock().unwrap().insert(tx.hash(), tx);
    }

    pub(crate) fn set_verify_error(&self, err: VerifyError) {
        *self.verify_override.lock().unwrap() = Some(err);
    }

    pub(crate) fn set_last(&self, conclusion: Conclusion, proposer: Address) {
        *self.last.lock().unwrap() = (conclusion, proposer);
    }
}

#[async_trait]
impl Backend for TestBackend {
    fn address(&self) -> Address {
        self.own_address
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, BackendError> {
        Ok(sign_as(self.own_address, data))
    }

    fn check_signature(&self, data: &[u8], signature: &[u8]) -> Result<Address, BackendError> {
        recover(data, signature)
    }

    fn validators(&self, _conclusion: &Conclusion) -> ValidatorSet {
        ValidatorSet::new(self.validator_list.clone())
    }

    async fn verify(
        &self,
        proposal: &Proposal,
        _verify_header: bool,
        verify_body: bool,
    ) -> Result<Option<Conclusion>, VerifyError> {
        if let Some(err) = self.verify_override.lock().unwrap().take() {
            return Err(err);
        }
        if !verify_body {
            return Ok(None);
        }
        match proposal {
            Proposal::Full(block) => Ok(Some(conclude(block))),
            Proposal::Light(_) => Err(VerifyError::Invalid("light body".to_string())),
        }
    }

    async fn commit(
        &self,
        conclusion: Conclusion,
        seals: Vec<Vec<u8>>,
    ) -> Result<(), BackendError> {
        if self.fail_commit.load(Ordering::Relaxed) {
            return Err(BackendError::Commit("insertion failed".to_string()));
        }
        self.committed.lock().unwrap().push((conclusion.clone(), seals));
        *self.last.lock().unwrap() = (conclusion, self.own_address);
        Ok(())
    }

    fn last_proposal(&self) -> (Conclusion, Address) {
        self.last.lock().unwrap().clone()
    }

    async fn broadcast(&self, _validators: &ValidatorSet, _sender: Address, payload: Vec<u8>) {
        self.outbound.lock().unwrap().push(Outbound::Gossip { payload });
    }

    async fn send(&self, targets: &[Address], payload: Vec<u8>) {
        self.outbound.lock().unwrap().push(Outbound::Send { targets: targets.to_vec(), payload });
    }

    async fn broadcast_to(&self, peers: &[Address], _hash: B256, payload: Vec<u8>) {
        self.outbound.lock().unwrap().push(Outbound::Broadcast { peers: peers.to_vec(), payload });
    }

    fn forward_route(&self, validators: &[Address]) -> (Vec<Address>, Vec<Address>) {
        // Fully connected: everyone is a direct peer, nothing to forward.
        (validators.to_vec(), Vec::new())
    }

    async fn fill_light_proposal(
        &self,
        light: &mut LightBlock,
    ) -> Result<(bool, Vec<MissedTx>), BackendError> {
        let pool = self.pool.lock().unwrap();
        for missed in light.missing() {
            if let Some(tx) = pool.get(&missed.hash) {
                light
                    .set_tx(missed.index as usize, tx.clone())
                    .map_err(|err| BackendError::TxPool(err.to_string()))?;
            }
        }
        Ok((light.completed(), light.missing()))
    }

    fn mark_transactions_known(&self, peer: Address, txs: &[Transaction]) {
        self.known_txs
            .lock()
            .unwrap()
            .push((peer, txs.iter().map(Transaction::hash).collect()));
    }

    fn has_bad_proposal(&self, _pending_hash: B256) -> bool {
        false
    }

    fn on_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn on_commit(&self, block_number: u64, tx_count: usize) {
        self.commit_hook_calls.lock().unwrap().push((block_number, tx_count));
    }
}

mock! {
    pub(crate) EngineBackend {}

    #[async_trait]
    impl Backend for EngineBackend {
        fn address(&self) -> Address;
        fn sign(&self, data: &[u8]) -> Result<Vec<u8>, BackendError>;
        fn check_signature(&self, data: &[u8], signature: &[u8]) -> Result<Address, BackendError>;
        fn validators(&self, conclusion: &Conclusion) -> ValidatorSet;
        async fn verify(
            &self,
            proposal: &Proposal,
            verify_header: bool,
            verify_body: bool,
        ) -> Result<Option<Conclusion>, VerifyError>;
        async fn commit(
            &self,
            conclusion: Conclusion,
            seals: Vec<Vec<u8>>,
        ) -> Result<(), BackendError>;
        fn last_proposal(&self) -> (Conclusion, Address);
        async fn broadcast(&self, validators: &ValidatorSet, sender: Address, payload: Vec<u8>);
        async fn send(&self, targets: &[Address], payload: Vec<u8>);
        async fn broadcast_to(&self, peers: &[Address], hash: B256, payload: Vec<u8>);
        fn forward_route(&self, validators: &[Address]) -> (Vec<Address>, Vec<Address>);
        async fn fill_light_proposal(
            &self,
            light: &mut LightBlock,
        ) -> Result<(bool, Vec<MissedTx>), BackendError>;
        fn mark_transactions_known(&self, peer: Address, txs: &[Transaction]);
        fn has_bad_proposal(&self, pending_hash: B256) -> bool;
        fn on_timeout(&self);
        fn on_commit(&self, block_number: u64, tx_count: usize);
    }
}
