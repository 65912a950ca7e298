//! Copy-on-write B-tree embedded in an append-only block log.
//!
//! The log is the only storage: clients append immutable records and
//! read them back by sequence number. Trellis layers an ordered
//! key-value index on top by embedding a serialized tree snapshot in
//! every entry it appends:
//!
//! ```text
//! put(key, value)
//!   └─ walk root -> leaf          (lazy refs into historical entries)
//!   └─ insert + split             (classical B-tree, fan-out 4)
//!   └─ rebuild the changed spine  (unchanged subtrees stay put)
//!   └─ append ONE entry: { key, value, index of changed nodes }
//! ```
//!
//! The root of the current tree is always node 0 of the last entry's
//! embedded index, so opening a tree is just opening the log. Reads
//! walk the logical tree while every node is a partially decoded
//! reference into some historical entry; a per-operation block cache
//! keeps each entry decoded at most once per operation.

pub mod batch;
pub mod block;
pub mod codec;
pub mod node;
pub mod stream;
pub mod tree;

pub use batch::Batch;
pub use block::BlockEntry;
pub use codec::{EmbeddedIndex, Level, NodeRecord};
pub use stream::ReadStream;
pub use tree::Tree;
