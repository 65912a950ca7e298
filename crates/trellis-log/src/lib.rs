//! Append-only block log for Trellis.
//!
//! A block log is a sequence of immutable byte records addressed by a
//! monotonically assigned sequence number. Records can only be appended;
//! existing records never change. The tree layer stores one record per
//! write and reads historical records by seq.

pub mod file;
pub mod memory;

pub use file::FileLog;
pub use memory::MemoryLog;

use bytes::Bytes;
use trellis_common::{Result, Seq};

/// Contract the tree layer consumes from its backing log.
///
/// Implementations guarantee:
/// - `length` is monotonically non-decreasing;
/// - `append` assigns `seq = length_before` and increments `length`;
/// - `read(seq)` for `seq < length` returns the exact bytes appended.
///
/// All futures are expected to be driven on a single task; the tree
/// layer performs no intrinsic parallelism.
#[allow(async_fn_in_trait)]
pub trait BlockLog {
    /// Ensures the backing storage is open and `length` is readable.
    /// Idempotent.
    async fn ready(&self) -> Result<()>;

    /// Number of appended records.
    fn length(&self) -> Seq;

    /// Reads the raw record at `seq`.
    async fn read(&self, seq: Seq) -> Result<Bytes>;

    /// Appends one record and returns its assigned seq.
    async fn append(&self, payload: Bytes) -> Result<Seq>;
}
