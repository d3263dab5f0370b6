//! The signed message envelope and per-code payloads.

#[cfg(test)]
#[path = "message_test.rs"]
mod message_test;

use std::fmt;
use std::sync::OnceLock;

use prost::Message as _;

use crate::converters::WireError;
use crate::primitives::{keccak256, Address, B256};
use crate::proposal::{Block, LightBlock, MissedTx, Transaction};
use crate::proto;

/// A consensus attempt for one block height: the sequence being decided and
/// the retry round within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct View {
    /// Attempt number within the sequence; increases on round change.
    pub round: u64,
    /// Block number being decided.
    pub sequence: u64,
}

impl View {
    /// View for `sequence` at `round`.
    pub fn new(round: u64, sequence: u64) -> Self {
        Self { round, sequence }
    }
}

// Sequence dominates; round breaks ties.
impl Ord for View {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence.cmp(&other.sequence).then(self.round.cmp(&other.round))
    }
}

impl PartialOrd for View {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{round: {}, sequence: {}}}", self.round, self.sequence)
    }
}

/// Message codes carried in the envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum MsgCode {
    /// Proposer's full proposal for a view.
    Preprepare = 0x00,
    /// First-phase vote over the proposal subject.
    Prepare = 0x01,
    /// Second-phase vote, carries a committed seal.
    Commit = 0x02,
    /// Vote to abandon the current round.
    RoundChange = 0x03,
    /// Proposer's digest-only proposal.
    LightPreprepare = 0x10,
    /// Request for transaction bodies missing from a light proposal.
    GetMissedTxs = 0x11,
    /// Bodies answering a [`MsgCode::GetMissedTxs`].
    MissedTxs = 0x12,
}

impl MsgCode {
    /// Whether this code belongs to the light-proposal sub-protocol.
    pub fn is_light(&self) -> bool {
        matches!(self, MsgCode::LightPreprepare | MsgCode::GetMissedTxs | MsgCode::MissedTxs)
    }
}

/// The signed envelope every consensus message travels in.
///
/// `signature` covers the encoding of the envelope with the signature field
/// emptied (see [`Message::payload_no_sig`]); `committed_seal` is only
/// non-empty on [`MsgCode::Commit`] and signs the conclusion hash under the
/// commit domain tag ([`committed_seal_input`]). `forward_nodes` lists the
/// validators the sender could not reach directly and expects receivers to
/// forward to.
#[derive(Clone)]
pub struct Message {
    /// Payload discriminator.
    pub code: MsgCode,
    /// Encoded payload; shape depends on `code`.
    pub msg: Vec<u8>,
    /// Claimed sender; must match the signature's recovered signer.
    pub address: Address,
    /// Signature over [`Message::payload_no_sig`].
    pub signature: Vec<u8>,
    /// Seal over the conclusion hash; commits only.
    pub committed_seal: Vec<u8>,
    /// Validators still owed this message by the forwarding transport.
    pub forward_nodes: Vec<Address>,
    hash: OnceLock<B256>,
}

impl Message {
    /// An unsigned envelope for `code` wrapping an encoded payload.
    pub fn new(code: MsgCode, msg: Vec<u8>) -> Self {
        Self {
            code,
            msg,
            address: Address::ZERO,
            signature: Vec::new(),
            committed_seal: Vec::new(),
            forward_nodes: Vec::new(),
            hash: OnceLock::new(),
        }
    }

    /// The full wire encoding.
    pub fn payload(&self) -> Vec<u8> {
        proto::Msg::from(self.clone()).encode_to_vec()
    }

    /// The wire encoding with the signature and forward list emptied; this is
    /// what the sender signs and what receivers verify. `forward_nodes` is
    /// excluded because forwarders rewrite it after the original signature is
    /// made.
    pub fn payload_no_sig(&self) -> Vec<u8> {
        let mut wire = proto::Msg::from(self.clone());
        wire.signature = Vec::new();
        wire.forward_nodes = Vec::new();
        wire.encode_to_vec()
    }

    /// Decode an envelope from its wire encoding.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let wire = proto::Msg::decode(payload)?;
        Message::try_from(wire)
    }

    /// Identity of this message for gossip dedup; cached after first use.
    /// Covers everything except `forward_nodes`, so the same message keeps
    /// one identity along its whole forwarding path.
    pub fn hash(&self) -> B256 {
        *self.hash.get_or_init(|| {
            let mut wire = proto::Msg::from(self.clone());
            wire.forward_nodes = Vec::new();
            keccak256(&wire.encode_to_vec())
        })
    }
}

// The lazy hash cache is excluded from equality on purpose.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.msg == other.msg
            && self.address == other.address
            && self.signature == other.signature
            && self.committed_seal == other.committed_seal
            && self.forward_nodes == other.forward_nodes
    }
}

impl Eq for Message {}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("code", &self.code)
            .field("address", &self.address)
            .field("len", &self.msg.len())
            .finish()
    }
}

/// Input to the committed-seal signature: the conclusion hash followed by the
/// commit message code.
pub fn committed_seal_input(conclusion_hash: B256) -> Vec<u8> {
    let mut buf = Vec::with_capacity(33);
    buf.extend_from_slice(conclusion_hash.as_bytes());
    buf.push(MsgCode::Commit as u8);
    buf
}

/// Payload of [`MsgCode::Preprepare`]: the view and the full proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preprepare {
    /// View the proposal is for.
    pub view: View,
    /// The proposed block, bodies included.
    pub proposal: Block,
}

impl Preprepare {
    /// Encode for the wire.
    pub fn encode(&self) -> Vec<u8> {
        proto::Preprepare::from(self.clone()).encode_to_vec()
    }

    /// Decode from the wire.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        Preprepare::try_from(proto::Preprepare::decode(payload)?)
    }
}

/// Payload of [`MsgCode::LightPreprepare`]: same shape as [`Preprepare`] with
/// a digest-only body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightPreprepare {
    /// View the proposal is for.
    pub view: View,
    /// The proposed block, digests only.
    pub proposal: LightBlock,
}

impl LightPreprepare {
    /// Encode for the wire.
    pub fn encode(&self) -> Vec<u8> {
        proto::LightPreprepare::from(self.clone()).encode_to_vec()
    }

    /// Decode from the wire.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        LightPreprepare::try_from(proto::LightPreprepare::decode(payload)?)
    }

    /// Promote to a full preprepare once the light block is complete.
    pub fn into_full(self) -> Result<Preprepare, WireError> {
        Ok(Preprepare { view: self.view, proposal: self.proposal.into_full()? })
    }
}

/// Payload of [`MsgCode::Prepare`] and [`MsgCode::Commit`], and of
/// [`MsgCode::RoundChange`] with both hashes zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subject {
    /// View the vote is cast in.
    pub view: View,
    /// Pending (pre-execution) hash of the proposal.
    pub pending: B256,
    /// Conclusion (post-execution) hash; zero before execution.
    pub digest: B256,
}

impl Subject {
    /// Encode for the wire.
    pub fn encode(&self) -> Vec<u8> {
        proto::Subject::from(*self).encode_to_vec()
    }

    /// Decode from the wire.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        Subject::try_from(proto::Subject::decode(payload)?)
    }
}

/// Payload of [`MsgCode::GetMissedTxs`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissedReq {
    /// View the requester is filling a light proposal for.
    pub view: View,
    /// The missing slots.
    pub missed_txs: Vec<MissedTx>,
}

impl MissedReq {
    /// Encode for the wire.
    pub fn encode(&self) -> Vec<u8> {
        proto::MissedReq::from(self.clone()).encode_to_vec()
    }

    /// Decode from the wire.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        MissedReq::try_from(proto::MissedReq::decode(payload)?)
    }
}

/// Payload of [`MsgCode::MissedTxs`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MissedResp {
    /// View the response belongs to.
    pub view: View,
    /// The requested bodies, in request order.
    pub transactions: Vec<Transaction>,
}

impl MissedResp {
    /// Standard two-field encoding.
    pub fn encode(&self) -> Vec<u8> {
        proto::MissedResp::from(self.clone()).encode_to_vec()
    }

    /// Decode the standard form.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        MissedResp::try_from(proto::MissedResp::decode(payload)?)
    }

    /// Offset encoding: the length-delimited transactions blob followed by
    /// the view. Lets a streaming decoder hand the blob off without copying.
    pub fn encode_offset(&self) -> Vec<u8> {
        let txs = proto::Transactions {
            transactions: self.transactions.iter().map(|tx| tx.payload().to_vec()).collect(),
        };
        let mut buf = txs.encode_length_delimited_to_vec();
        buf.extend_from_slice(&proto::View::from(self.view).encode_to_vec());
        buf
    }

    /// Decode the offset form; the split is found from the transactions
    /// blob's length delimiter.
    pub fn decode_offset(payload: &[u8]) -> Result<Self, WireError> {
        let mut buf = payload;
        let len = prost::encoding::decode_varint(&mut buf)?;
        let len = usize::try_from(len).map_err(|_| WireError::TruncatedPayload)?;
        if len > buf.len() {
            return Err(WireError::TruncatedPayload);
        }
        let (tx_bytes, view_bytes) = buf.split_at(len);
        if view_bytes.is_empty() {
            return Err(WireError::MissingField { field: "view" });
        }
        let txs = proto::Transactions::decode(tx_bytes)?;
        let view = View::from(proto::View::decode(view_bytes)?);
        Ok(MissedResp {
            view,
            transactions: txs.transactions.into_iter().map(Transaction::new).collect(),
        })
    }
}
