//! Core type aliases.

/// Sequence number of an entry in the append-only block log.
///
/// Seqs are assigned monotonically starting at 0 (the header entry) and
/// address one immutable record each. Every pointer inside an embedded
/// tree index is ultimately a seq, possibly paired with an offset into
/// that entry's decoded index.
pub type Seq = u64;
