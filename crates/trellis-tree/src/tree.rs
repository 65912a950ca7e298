//! Tree facade over a block log.

use crate::batch::Batch;
use crate::block::BlockEntry;
use crate::codec::NodeRecord;
use crate::stream::ReadStream;
use bytes::Bytes;
use trellis_common::{Result, Seq};
use trellis_log::BlockLog;

/// Fixed payload of the header entry at seq 0. Only its existence is
/// significant; it is never decoded as a node record.
pub(crate) const HEADER_PAYLOAD: &[u8] = b"trellis-header\0";

/// Ordered key-value index embedded in an append-only block log.
///
/// Every put appends exactly one log entry carrying the written
/// `(key, value)` pair plus a re-serialized snapshot of the tree nodes
/// the put changed; unchanged subtrees stay addressed in older entries.
/// The current root is always node 0 of the last entry's index.
///
/// Reads may run concurrently with each other and with one writer.
/// Writes must be serialized by the caller: a put captures the log
/// length as the seq its entry must land at, and a second concurrent
/// put breaks that invariant.
pub struct Tree<L: BlockLog> {
    log: L,
}

impl<L: BlockLog> Tree<L> {
    /// Wraps a block log. No I/O happens until the first operation.
    pub fn new(log: L) -> Self {
        Self { log }
    }

    /// Returns the underlying log.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Consumes the tree, returning the underlying log.
    pub fn into_log(self) -> L {
        self.log
    }

    /// Ensures the log is open and carries the header entry. Idempotent;
    /// called implicitly by every operation.
    pub async fn ready(&self) -> Result<()> {
        self.log.ready().await?;
        if self.log.length() == 0 {
            self.log.append(Bytes::from_static(HEADER_PAYLOAD)).await?;
            tracing::debug!("wrote header entry to empty log");
        }
        Ok(())
    }

    /// Point lookup. Returns the log entry whose key matches, or `None`.
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<BlockEntry>> {
        self.ready().await?;
        let mut batch = Batch::new(self);
        batch.get(key.as_ref()).await
    }

    /// Inserts `key` with `value`, overwriting an equal key. Appends
    /// exactly one log entry.
    pub async fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        self.ready().await?;
        let mut batch = Batch::new(self);
        batch.put(key.as_ref(), value.as_ref()).await
    }

    /// Opens a lazy in-order scan over all keys.
    pub async fn read_stream(&self) -> Result<ReadStream<'_, L>> {
        self.ready().await?;
        Ok(ReadStream::new(self))
    }

    pub(crate) fn batch(&self) -> Batch<'_, L> {
        Batch::new(self)
    }

    /// Reads and decodes the log entry at `seq`.
    pub(crate) async fn read_block(&self, seq: Seq) -> Result<BlockEntry> {
        let raw = self.log.read(seq).await?;
        let record = NodeRecord::decode(&raw, seq)?;
        Ok(BlockEntry::from_record(seq, record))
    }
}
