//! In-memory block log.

use crate::BlockLog;
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use trellis_common::{Result, Seq, TrellisError};

/// Block log kept entirely in memory.
///
/// Used for tests and ephemeral trees. Cloning produces another handle
/// to the same record sequence, so a tree can be "reopened" over the
/// same log by constructing a new tree from a clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    records: Arc<RwLock<Vec<Bytes>>>,
}

impl MemoryLog {
    /// Creates a new empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all records at seq >= `len`.
    ///
    /// Simulates a crash that lost the tail of the log.
    pub fn truncate(&self, len: Seq) {
        self.records.write().truncate(len as usize);
    }
}

impl BlockLog for MemoryLog {
    async fn ready(&self) -> Result<()> {
        Ok(())
    }

    fn length(&self) -> Seq {
        self.records.read().len() as Seq
    }

    async fn read(&self, seq: Seq) -> Result<Bytes> {
        let records = self.records.read();
        records
            .get(seq as usize)
            .cloned()
            .ok_or(TrellisError::SeqOutOfRange {
                seq,
                length: records.len() as Seq,
            })
    }

    async fn append(&self, payload: Bytes) -> Result<Seq> {
        let mut records = self.records.write();
        let seq = records.len() as Seq;
        records.push(payload);
        Ok(seq)
    }
}
