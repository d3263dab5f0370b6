//! Mapping between domain types and the raw [`crate::proto`] structs, plus
//! the error type shared across the crate.
//!
//! Encoding (domain → proto) is infallible; decoding validates hash lengths,
//! required fields, and message codes.

#[cfg(test)]
#[path = "converters_test.rs"]
mod converters_test;

use crate::message::{
    LightPreprepare,
    Message,
    MissedReq,
    MissedResp,
    MsgCode,
    Preprepare,
    Subject,
    View,
};
use crate::primitives::{Address, B256};
use crate::proposal::{Block, BlockHeader, LightBlock, MissedTx, Transaction};
use crate::proto;

/// Everything that can go wrong turning wire bytes into domain values, or
/// reconstructing light-proposal bodies.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum WireError {
    /// Protobuf-level decode failure.
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),
    /// A required message field was absent.
    #[error("missing field: {field}")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },
    /// A fixed-size field arrived with the wrong length.
    #[error("invalid length for {field}: got {got} bytes")]
    InvalidLength {
        /// Name of the offending field.
        field: &'static str,
        /// Length observed on the wire.
        got: usize,
    },
    /// The envelope carried an unassigned message code.
    #[error("unknown message code: {0:#x}")]
    UnknownCode(u32),
    /// A hex string failed to parse.
    #[error("invalid hex string")]
    InvalidHex,
    /// A missed-tx entry named a slot whose digest does not match.
    #[error("missed tx mismatch at index {index}")]
    MissedTxMismatch {
        /// The offending body slot.
        index: u64,
    },
    /// A missed-tx response carried a body matching no open slot.
    #[error("transaction {hash} matches no missing slot")]
    UnexpectedTransaction {
        /// Digest of the unexpected body.
        hash: B256,
    },
    /// A light block was promoted before all slots were filled.
    #[error("light block still has unfilled transactions")]
    IncompleteLightBlock,
    /// An offset-encoded payload ended before its declared length.
    #[error("payload shorter than its length prefix")]
    TruncatedPayload,
}

fn require_view(view: Option<proto::View>, field: &'static str) -> Result<View, WireError> {
    view.map(View::from).ok_or(WireError::MissingField { field })
}

fn hash_field(bytes: &[u8], field: &'static str) -> Result<B256, WireError> {
    B256::from_slice(bytes).map_err(|_| WireError::InvalidLength { field, got: bytes.len() })
}

impl From<View> for proto::View {
    fn from(view: View) -> Self {
        proto::View { round: view.round, sequence: view.sequence }
    }
}

impl From<proto::View> for View {
    fn from(view: proto::View) -> Self {
        View { round: view.round, sequence: view.sequence }
    }
}

impl From<Message> for proto::Msg {
    fn from(msg: Message) -> Self {
        proto::Msg {
            code: u32::from(msg.code as u8),
            msg: msg.msg,
            address: msg.address.as_bytes().to_vec(),
            signature: msg.signature,
            committed_seal: msg.committed_seal,
            forward_nodes: msg.forward_nodes.iter().map(|a| a.as_bytes().to_vec()).collect(),
        }
    }
}

impl TryFrom<proto::Msg> for Message {
    type Error = WireError;

    fn try_from(wire: proto::Msg) -> Result<Self, Self::Error> {
        let code = u8::try_from(wire.code)
            .ok()
            .and_then(MsgCode::from_repr)
            .ok_or(WireError::UnknownCode(wire.code))?;
        let address = Address::from_slice(&wire.address)
            .map_err(|_| WireError::InvalidLength { field: "address", got: wire.address.len() })?;
        let forward_nodes = wire
            .forward_nodes
            .iter()
            .map(|bytes| Address::from_slice(bytes))
            .collect::<Result<Vec<_>, _>>()?;
        let mut msg = Message::new(code, wire.msg);
        msg.address = address;
        msg.signature = wire.signature;
        msg.committed_seal = wire.committed_seal;
        msg.forward_nodes = forward_nodes;
        Ok(msg)
    }
}

impl From<Subject> for proto::Subject {
    fn from(subject: Subject) -> Self {
        proto::Subject {
            view: Some(subject.view.into()),
            pending: subject.pending.as_bytes().to_vec(),
            digest: subject.digest.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<proto::Subject> for Subject {
    type Error = WireError;

    fn try_from(wire: proto::Subject) -> Result<Self, Self::Error> {
        Ok(Subject {
            view: require_view(wire.view, "subject.view")?,
            pending: hash_field(&wire.pending, "subject.pending")?,
            digest: hash_field(&wire.digest, "subject.digest")?,
        })
    }
}

impl From<BlockHeader> for proto::BlockHeader {
    fn from(header: BlockHeader) -> Self {
        proto::BlockHeader {
            number: header.number,
            parent_hash: header.parent_hash.as_bytes().to_vec(),
            tx_root: header.tx_root.as_bytes().to_vec(),
            timestamp: header.timestamp,
            extra: header.extra,
        }
    }
}

impl TryFrom<proto::BlockHeader> for BlockHeader {
    type Error = WireError;

    fn try_from(wire: proto::BlockHeader) -> Result<Self, Self::Error> {
        Ok(BlockHeader {
            number: wire.number,
            parent_hash: hash_field(&wire.parent_hash, "header.parent_hash")?,
            tx_root: hash_field(&wire.tx_root, "header.tx_root")?,
            timestamp: wire.timestamp,
            extra: wire.extra,
        })
    }
}

impl From<Block> for proto::Block {
    fn from(block: Block) -> Self {
        proto::Block {
            header: Some(block.header.into()),
            transactions: block.transactions.iter().map(|tx| tx.payload().to_vec()).collect(),
        }
    }
}

impl TryFrom<proto::Block> for Block {
    type Error = WireError;

    fn try_from(wire: proto::Block) -> Result<Self, Self::Error> {
        let header: BlockHeader =
            wire.header.ok_or(WireError::MissingField { field: "block.header" })?.try_into()?;
        let transactions = wire.transactions.into_iter().map(Transaction::new).collect();
        Ok(Block { header, transactions })
    }
}

impl From<LightBlock> for proto::LightBlock {
    fn from(light: LightBlock) -> Self {
        proto::LightBlock {
            tx_digests: light.tx_digests().iter().map(|d| d.as_bytes().to_vec()).collect(),
            header: Some(light.header.into()),
        }
    }
}

impl TryFrom<proto::LightBlock> for LightBlock {
    type Error = WireError;

    fn try_from(wire: proto::LightBlock) -> Result<Self, Self::Error> {
        let header: BlockHeader =
            wire.header.ok_or(WireError::MissingField { field: "block.header" })?.try_into()?;
        let tx_digests = wire
            .tx_digests
            .iter()
            .map(|bytes| hash_field(bytes, "block.tx_digest"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LightBlock::from_parts(header, tx_digests))
    }
}

impl From<Preprepare> for proto::Preprepare {
    fn from(preprepare: Preprepare) -> Self {
        proto::Preprepare {
            view: Some(preprepare.view.into()),
            proposal: Some(preprepare.proposal.into()),
        }
    }
}

impl TryFrom<proto::Preprepare> for Preprepare {
    type Error = WireError;

    fn try_from(wire: proto::Preprepare) -> Result<Self, Self::Error> {
        Ok(Preprepare {
            view: require_view(wire.view, "preprepare.view")?,
            proposal: wire
                .proposal
                .ok_or(WireError::MissingField { field: "preprepare.proposal" })?
                .try_into()?,
        })
    }
}

impl From<LightPreprepare> for proto::LightPreprepare {
    fn from(preprepare: LightPreprepare) -> Self {
        proto::LightPreprepare {
            view: Some(preprepare.view.into()),
            proposal: Some(preprepare.proposal.into()),
        }
    }
}

impl TryFrom<proto::LightPreprepare> for LightPreprepare {
    type Error = WireError;

    fn try_from(wire: proto::LightPreprepare) -> Result<Self, Self::Error> {
        Ok(LightPreprepare {
            view: require_view(wire.view, "preprepare.view")?,
            proposal: wire
                .proposal
                .ok_or(WireError::MissingField { field: "preprepare.proposal" })?
                .try_into()?,
        })
    }
}

impl From<MissedTx> for proto::MissedTx {
    fn from(missed: MissedTx) -> Self {
        proto::MissedTx { index: missed.index, hash: missed.hash.as_bytes().to_vec() }
    }
}

impl TryFrom<proto::MissedTx> for MissedTx {
    type Error = WireError;

    fn try_from(wire: proto::MissedTx) -> Result<Self, Self::Error> {
        Ok(MissedTx { index: wire.index, hash: hash_field(&wire.hash, "missed_tx.hash")? })
    }
}

impl From<MissedReq> for proto::MissedReq {
    fn from(req: MissedReq) -> Self {
        proto::MissedReq {
            view: Some(req.view.into()),
            missed_txs: req.missed_txs.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<proto::MissedReq> for MissedReq {
    type Error = WireError;

    fn try_from(wire: proto::MissedReq) -> Result<Self, Self::Error> {
        Ok(MissedReq {
            view: require_view(wire.view, "missed_req.view")?,
            missed_txs: wire
                .missed_txs
                .into_iter()
                .map(MissedTx::try_from)
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

impl From<MissedResp> for proto::MissedResp {
    fn from(resp: MissedResp) -> Self {
        proto::MissedResp {
            view: Some(resp.view.into()),
            transactions: resp.transactions.iter().map(|tx| tx.payload().to_vec()).collect(),
        }
    }
}

impl TryFrom<proto::MissedResp> for MissedResp {
    type Error = WireError;

    fn try_from(wire: proto::MissedResp) -> Result<Self, Self::Error> {
        Ok(MissedResp {
            view: require_view(wire.view, "missed_resp.view")?,
            transactions: wire.transactions.into_iter().map(Transaction::new).collect(),
        })
    }
}
