#![warn(missing_docs)]
//! Wire types for the Ember PBFT consensus protocol.
//!
//! This crate defines the data model shared between validators: primitive
//! hashes and addresses, block and transaction shapes, the signed message
//! envelope, and the per-code payloads (preprepares, subjects, missed-tx
//! requests and responses).
//!
//! Encoding is protobuf via [`prost`]; field tags follow the normative field
//! order of the protocol so independently written nodes agree byte-for-byte.
//! Domain types live here with their invariants; the raw `prost` structs are
//! kept separate in [`proto`] and mapped through [`converters`].

pub mod converters;
pub mod message;
pub mod primitives;
pub mod proposal;
#[allow(missing_docs)]
pub mod proto;

pub use converters::WireError;
pub use message::{
    committed_seal_input,
    LightPreprepare,
    Message,
    MissedReq,
    MissedResp,
    MsgCode,
    Preprepare,
    Subject,
    View,
};
pub use primitives::{keccak256, Address, B256};
pub use proposal::{Block, BlockHeader, Conclusion, LightBlock, MissedTx, Proposal, Transaction};
