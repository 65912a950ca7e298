//! Decoded log entries.

use crate::codec::{EmbeddedIndex, NodeRecord};
use crate::node::TreeNode;
use bytes::Bytes;
use trellis_common::{Result, Seq, TrellisError};

/// One decoded log entry.
///
/// Allocated lazily on first dereference within a batch and owned by
/// that batch's block cache, so every key and child reference pointing
/// at the same entry shares a single decode. The entry's own `key`
/// resolves key references into this entry without another log read.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    seq: Seq,
    key: Bytes,
    value: Option<Bytes>,
    index: IndexState,
}

/// Embedded index blob, inflated on first node access. The raw bytes
/// are dropped once decoded.
#[derive(Debug, Clone)]
enum IndexState {
    Raw(Bytes),
    Inflated(EmbeddedIndex),
}

impl BlockEntry {
    pub(crate) fn from_record(seq: Seq, record: NodeRecord) -> Self {
        Self {
            seq,
            key: record.key,
            value: record.value,
            index: IndexState::Raw(record.index),
        }
    }

    /// Seq of the log entry this block was decoded from.
    pub fn seq(&self) -> Seq {
        self.seq
    }

    /// Key written by this entry.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Value written by this entry, if any.
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    /// Materializes the tree node at `offset` of this entry's embedded
    /// index. Each call produces a fresh node view backed by this entry.
    pub(crate) fn tree_node(&mut self, offset: u64) -> Result<TreeNode> {
        self.inflate()?;
        let IndexState::Inflated(index) = &self.index else {
            return Err(TrellisError::invariant("index not inflated"));
        };
        let level = index.levels.get(offset as usize).ok_or_else(|| {
            TrellisError::corrupt(
                self.seq,
                format!(
                    "node offset {} out of range ({} levels)",
                    offset,
                    index.levels.len()
                ),
            )
        })?;
        Ok(TreeNode::from_level(self.seq, level))
    }

    fn inflate(&mut self) -> Result<()> {
        if let IndexState::Raw(raw) = &self.index {
            let decoded = EmbeddedIndex::decode(raw, self.seq)?;
            self.index = IndexState::Inflated(decoded);
        }
        Ok(())
    }
}
