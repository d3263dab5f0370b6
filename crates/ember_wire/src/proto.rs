//! Raw protobuf shapes for the consensus wire format.
//!
//! These structs are the encoding layer only. Field tags are normative: they
//! encode the protocol's field order. Domain types in the rest of the crate
//! are mapped to and from these through [`crate::converters`].

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct View {
    #[prost(uint64, tag = "1")]
    pub round: u64,
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Msg {
    #[prost(uint32, tag = "1")]
    pub code: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub msg: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub address: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub signature: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub committed_seal: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "6")]
    pub forward_nodes: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Subject {
    #[prost(message, optional, tag = "1")]
    pub view: Option<View>,
    #[prost(bytes = "vec", tag = "2")]
    pub pending: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub digest: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct BlockHeader {
    #[prost(uint64, tag = "1")]
    pub number: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub parent_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub tx_root: Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub timestamp: u64,
    #[prost(bytes = "vec", tag = "5")]
    pub extra: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Block {
    #[prost(message, optional, tag = "1")]
    pub header: Option<BlockHeader>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub transactions: Vec<Vec<u8>>,
}

/// A block body replaced by the ordered list of transaction digests.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct LightBlock {
    #[prost(message, optional, tag = "1")]
    pub header: Option<BlockHeader>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub tx_digests: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Preprepare {
    #[prost(message, optional, tag = "1")]
    pub view: Option<View>,
    #[prost(message, optional, tag = "2")]
    pub proposal: Option<Block>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct LightPreprepare {
    #[prost(message, optional, tag = "1")]
    pub view: Option<View>,
    #[prost(message, optional, tag = "2")]
    pub proposal: Option<LightBlock>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MissedTx {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MissedReq {
    #[prost(message, optional, tag = "1")]
    pub view: Option<View>,
    #[prost(message, repeated, tag = "2")]
    pub missed_txs: Vec<MissedTx>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct MissedResp {
    #[prost(message, optional, tag = "1")]
    pub view: Option<View>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub transactions: Vec<Vec<u8>>,
}

/// Bare transaction list, used by the offset form of [`MissedResp`] where the
/// transactions blob is length-delimited and the view rides behind it.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Transactions {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub transactions: Vec<Vec<u8>>,
}
