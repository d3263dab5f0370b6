//! Blocks, light blocks, and the proposal variants consensus decides on.

#[cfg(test)]
#[path = "proposal_test.rs"]
mod proposal_test;

use prost::Message as _;

use crate::converters::WireError;
use crate::primitives::{keccak256, B256};
use crate::proto;

/// An opaque transaction body. The digest is fixed at construction and is the
/// identity used by light proposals and the missed-tx protocol.
#[derive(Clone, PartialEq, Eq)]
pub struct Transaction {
    payload: Vec<u8>,
    hash: B256,
}

impl Transaction {
    /// Wrap raw transaction bytes.
    pub fn new(payload: Vec<u8>) -> Self {
        let hash = keccak256(&payload);
        Self { payload, hash }
    }

    /// The transaction digest.
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// The raw body bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transaction({})", self.hash)
    }
}

/// A transaction missing from a partially filled light block: its position in
/// the body and its digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissedTx {
    /// Position of the transaction in the block body.
    pub index: u64,
    /// Digest of the missing transaction.
    pub hash: B256,
}

/// The consensus-relevant part of a block header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number; the sequence being decided.
    pub number: u64,
    /// Hash of the parent conclusion.
    pub parent_hash: B256,
    /// Digest over the ordered transaction digests.
    pub tx_root: B256,
    /// Proposer-assigned timestamp, seconds.
    pub timestamp: u64,
    /// Consensus extra data (seals land here after commit).
    pub extra: Vec<u8>,
}

impl BlockHeader {
    /// The pending hash: the pre-execution identity of a proposal carrying
    /// this header.
    pub fn pending_hash(&self) -> B256 {
        let encoded = proto::BlockHeader::from(self.clone()).encode_to_vec();
        keccak256(&encoded)
    }
}

/// A full block: header plus transaction bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,
    /// Ordered transaction bodies.
    pub transactions: Vec<Transaction>,
}

/// Digest over an ordered list of transaction digests.
pub(crate) fn tx_root(digests: impl Iterator<Item = B256>) -> B256 {
    let mut buf = Vec::new();
    for digest in digests {
        buf.extend_from_slice(digest.as_bytes());
    }
    keccak256(&buf)
}

impl Block {
    /// Build a block over `transactions`, deriving the header's tx root.
    pub fn new(
        number: u64,
        parent_hash: B256,
        timestamp: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        let root = tx_root(transactions.iter().map(Transaction::hash));
        Self {
            header: BlockHeader {
                number,
                parent_hash,
                tx_root: root,
                timestamp,
                extra: Vec::new(),
            },
            transactions,
        }
    }

    /// The sequence number this block decides.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// The pre-execution identity of this block.
    pub fn pending_hash(&self) -> B256 {
        self.header.pending_hash()
    }

    /// Return the bodies of the requested transactions. Every entry must name
    /// an in-range slot whose digest matches; a mismatch means the requester
    /// and this node disagree on the body and nothing is returned.
    pub fn fetch_missed_txs(&self, missed: &[MissedTx]) -> Result<Vec<Transaction>, WireError> {
        let mut txs = Vec::with_capacity(missed.len());
        for m in missed {
            let index = usize::try_from(m.index)
                .map_err(|_| WireError::MissedTxMismatch { index: m.index })?;
            let tx = self
                .transactions
                .get(index)
                .ok_or(WireError::MissedTxMismatch { index: m.index })?;
            if tx.hash() != m.hash {
                return Err(WireError::MissedTxMismatch { index: m.index });
            }
            txs.push(tx.clone());
        }
        Ok(txs)
    }
}

/// A block whose body is the ordered list of transaction digests. Bodies are
/// filled in from the local pool and from [`MissedTx`] responses until
/// [`LightBlock::completed`] holds, then promoted with
/// [`LightBlock::into_full`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightBlock {
    /// Block header; identical to the full block's header.
    pub header: BlockHeader,
    tx_digests: Vec<B256>,
    filled: Vec<Option<Transaction>>,
}

impl LightBlock {
    /// The light rendition of `block`: same header, digests instead of
    /// bodies.
    pub fn from_block(block: &Block) -> Self {
        let tx_digests: Vec<B256> = block.transactions.iter().map(Transaction::hash).collect();
        let filled = vec![None; tx_digests.len()];
        Self { header: block.header.clone(), tx_digests, filled }
    }

    pub(crate) fn from_parts(header: BlockHeader, tx_digests: Vec<B256>) -> Self {
        let filled = vec![None; tx_digests.len()];
        Self { header, tx_digests, filled }
    }

    /// The sequence number this block decides.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// The pre-execution identity; equal to the full block's pending hash.
    pub fn pending_hash(&self) -> B256 {
        self.header.pending_hash()
    }

    /// The ordered transaction digests.
    pub fn tx_digests(&self) -> &[B256] {
        &self.tx_digests
    }

    /// Whether every body slot is filled.
    pub fn completed(&self) -> bool {
        self.filled.iter().all(Option::is_some)
    }

    /// The still-missing slots, in body order.
    pub fn missing(&self) -> Vec<MissedTx> {
        self.filled
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| MissedTx { index: index as u64, hash: self.tx_digests[index] })
            .collect()
    }

    /// Fill slot `index` with `tx`. Rejects out-of-range slots and digest
    /// mismatches; refilling an occupied slot with the same body is a no-op.
    pub fn set_tx(&mut self, index: usize, tx: Transaction) -> Result<(), WireError> {
        let expected = self
            .tx_digests
            .get(index)
            .ok_or(WireError::MissedTxMismatch { index: index as u64 })?;
        if tx.hash() != *expected {
            return Err(WireError::MissedTxMismatch { index: index as u64 });
        }
        self.filled[index] = Some(tx);
        Ok(())
    }

    /// Fill the open slots from a missed-tx response. Transactions are matched
    /// to slots by digest; bodies that match no open slot are rejected.
    pub fn fill_missed_txs(&mut self, txs: Vec<Transaction>) -> Result<(), WireError> {
        for tx in txs {
            let slot = self
                .filled
                .iter()
                .enumerate()
                .position(|(index, slot)| slot.is_none() && self.tx_digests[index] == tx.hash())
                .ok_or(WireError::UnexpectedTransaction { hash: tx.hash() })?;
            self.filled[slot] = Some(tx);
        }
        Ok(())
    }

    /// Promote to a full block. Errors while any slot is unfilled.
    pub fn into_full(self) -> Result<Block, WireError> {
        let mut transactions = Vec::with_capacity(self.filled.len());
        for slot in self.filled {
            transactions.push(slot.ok_or(WireError::IncompleteLightBlock)?);
        }
        Ok(Block { header: self.header, transactions })
    }
}

/// A proposal as carried by consensus: either a full block or a light block
/// still being reconstructed. The light→full transition is a tagged-variant
/// promotion, never a cast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Proposal {
    /// Block with all transaction bodies.
    Full(Block),
    /// Block carrying digests; bodies filled from the pool.
    Light(LightBlock),
}

impl Proposal {
    /// The sequence number this proposal decides.
    pub fn number(&self) -> u64 {
        match self {
            Proposal::Full(block) => block.number(),
            Proposal::Light(light) => light.number(),
        }
    }

    /// The pre-execution identity of this proposal.
    pub fn pending_hash(&self) -> B256 {
        match self {
            Proposal::Full(block) => block.pending_hash(),
            Proposal::Light(light) => light.pending_hash(),
        }
    }

    /// The full block, if this proposal carries complete bodies.
    pub fn as_full(&self) -> Option<&Block> {
        match self {
            Proposal::Full(block) => Some(block),
            Proposal::Light(_) => None,
        }
    }
}

/// An executed proposal: the block plus its post-execution hash, the identity
/// that committed seals sign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conclusion {
    block: Block,
    hash: B256,
}

impl Conclusion {
    /// Pair an executed `block` with its post-execution `hash`.
    pub fn new(block: Block, hash: B256) -> Self {
        Self { block, hash }
    }

    /// The sequence number this conclusion decided.
    pub fn number(&self) -> u64 {
        self.block.number()
    }

    /// The pre-execution identity of the underlying block.
    pub fn pending_hash(&self) -> B256 {
        self.block.pending_hash()
    }

    /// The post-execution hash; what committed seals sign.
    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// The executed block.
    pub fn block(&self) -> &Block {
        &self.block
    }
}
