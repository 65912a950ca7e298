//! In-memory B-tree nodes and the lazy references they are built from.
//!
//! A node loaded from the log starts as pure references: each key is a
//! seq pointing at the log entry that carries the key bytes, and each
//! child is a `(seq, offset)` pair pointing into some entry's embedded
//! index. References resolve on first use through the operation's
//! [`Batch`](crate::batch::Batch) and stay resolved for the node's
//! lifetime. Nodes created during a put ("fresh" nodes) hold their
//! children directly and are serialized into the entry the put appends.

use crate::batch::Batch;
use crate::codec::Level;
use bytes::Bytes;
use std::cmp::Ordering;
use trellis_common::{Result, Seq, TrellisError};
use trellis_log::BlockLog;

/// Maximum children per node. A node accumulates up to
/// `MAX_CHILDREN - 1` keys; the insert that would give it
/// `MAX_CHILDREN` keys triggers a split before the entry is written.
pub(crate) const MAX_CHILDREN: usize = 4;

/// Lazy pointer to the key bytes carried by a log entry.
#[derive(Debug, Clone)]
pub struct KeyRef {
    pub(crate) seq: Seq,
    pub(crate) cached: Option<Bytes>,
}

impl KeyRef {
    /// Unresolved reference to the key of entry `seq`.
    pub(crate) fn new(seq: Seq) -> Self {
        Self { seq, cached: None }
    }

    /// Reference with the key bytes already known (the key being put).
    pub(crate) fn resolved(seq: Seq, key: Bytes) -> Self {
        Self {
            seq,
            cached: Some(key),
        }
    }

    /// Returns the key bytes, reading the referenced entry on first use.
    pub(crate) async fn resolve<L: BlockLog>(&mut self, batch: &mut Batch<'_, L>) -> Result<Bytes> {
        if let Some(key) = &self.cached {
            return Ok(key.clone());
        }
        let key = batch.key_at(self.seq).await?;
        self.cached = Some(key.clone());
        Ok(key)
    }
}

/// Lazy pointer to a subtree: the node at `offset` of the embedded
/// index carried by entry `seq`.
#[derive(Debug)]
pub struct ChildRef {
    pub(crate) seq: Seq,
    pub(crate) offset: u64,
    pub(crate) node: Option<Box<TreeNode>>,
}

impl ChildRef {
    /// Reference decoded from an embedded index.
    pub(crate) fn from_index(seq: Seq, offset: u64) -> Self {
        Self {
            seq,
            offset,
            node: None,
        }
    }

    /// Reference to a node created during the current put. The
    /// placeholder `(0, 0)` address is never dereferenced; the node is
    /// re-addressed when the changed spine is serialized.
    pub(crate) fn fresh(node: TreeNode) -> Self {
        Self {
            seq: 0,
            offset: 0,
            node: Some(Box::new(node)),
        }
    }
}

/// One in-memory B-tree node.
#[derive(Debug)]
pub struct TreeNode {
    /// Seq of the log entry this node was loaded from (or, for fresh
    /// nodes, the entry the current put will append).
    pub(crate) block_seq: Seq,
    pub(crate) keys: Vec<KeyRef>,
    pub(crate) children: Vec<ChildRef>,
    /// Set when the node differs from its on-log form; only changed
    /// nodes are re-serialized into the next entry's index.
    pub(crate) changed: bool,
}

impl TreeNode {
    /// Fresh empty node, marked changed.
    pub(crate) fn create(block_seq: Seq) -> Self {
        Self {
            block_seq,
            keys: Vec::new(),
            children: Vec::new(),
            changed: true,
        }
    }

    /// Node view of one level of a decoded embedded index.
    pub(crate) fn from_level(block_seq: Seq, level: &Level) -> Self {
        Self {
            block_seq,
            keys: level.keys.iter().copied().map(KeyRef::new).collect(),
            children: level
                .children
                .iter()
                .map(|&(seq, offset)| ChildRef::from_index(seq, offset))
                .collect(),
            changed: false,
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Seq of the entry carrying the i-th key's bytes.
    pub(crate) fn key_seq(&self, i: usize) -> Result<Seq> {
        self.keys
            .get(i)
            .map(|key| key.seq)
            .ok_or_else(|| TrellisError::invariant(format!("key index {i} out of range")))
    }

    /// Resolves the i-th key, caching the bytes in its slot.
    pub(crate) async fn key_bytes<L: BlockLog>(
        &mut self,
        i: usize,
        batch: &mut Batch<'_, L>,
    ) -> Result<Bytes> {
        let key = self
            .keys
            .get_mut(i)
            .ok_or_else(|| TrellisError::invariant(format!("key index {i} out of range")))?;
        key.resolve(batch).await
    }

    /// Binary search over this node's keys, materializing only the
    /// midpoints actually compared. Returns `(index, found)`: the match
    /// position, or the insertion position for `key`.
    pub(crate) async fn find<L: BlockLog>(
        &mut self,
        key: &[u8],
        batch: &mut Batch<'_, L>,
    ) -> Result<(usize, bool)> {
        let mut lo = 0usize;
        let mut hi = self.keys.len();

        while lo < hi {
            let mid = (lo + hi) / 2;
            let mid_key = self.key_bytes(mid, batch).await?;
            match mid_key.as_ref().cmp(key) {
                Ordering::Equal => return Ok((mid, true)),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }

        Ok((lo, false))
    }

    /// Replaces the key at position `i`. The caller guarantees the
    /// replacement compares equal to the key it replaces.
    pub(crate) fn set_key(&mut self, i: usize, keyref: KeyRef) -> Result<()> {
        let slot = self
            .keys
            .get_mut(i)
            .ok_or_else(|| TrellisError::invariant(format!("key index {i} out of range")))?;
        *slot = keyref;
        self.changed = true;
        Ok(())
    }

    /// Inserts `keyref` in key order; an equal key is overwritten in
    /// place. When `child` is given it becomes the right sibling of the
    /// inserted key. Returns true iff the node does NOT need to split.
    pub(crate) async fn insert_key<L: BlockLog>(
        &mut self,
        keyref: KeyRef,
        child: Option<TreeNode>,
        batch: &mut Batch<'_, L>,
    ) -> Result<bool> {
        let mut keyref = keyref;
        let key = keyref.resolve(batch).await?;
        let (idx, found) = self.find(key.as_ref(), batch).await?;

        if found {
            self.set_key(idx, keyref)?;
            return Ok(true);
        }

        self.keys.insert(idx, keyref);
        if let Some(node) = child {
            self.children.insert(idx + 1, ChildRef::fresh(node));
        }
        self.changed = true;
        Ok(self.keys.len() < MAX_CHILDREN)
    }

    /// Splits a full node. The last `keys.len() / 2` keys move to the
    /// returned right sibling (in order), the next key popped becomes
    /// the median to promote, and internal nodes move the matching
    /// `keys.len() / 2 + 1` children. Self keeps the remainder.
    pub(crate) fn split(&mut self) -> Result<(KeyRef, TreeNode)> {
        if self.keys.len() < 2 {
            return Err(TrellisError::invariant(format!(
                "split of a node with {} keys",
                self.keys.len()
            )));
        }

        let half = self.keys.len() / 2;
        let mut right = TreeNode::create(self.block_seq);
        right.keys = self.keys.split_off(self.keys.len() - half);
        let median = self
            .keys
            .pop()
            .ok_or_else(|| TrellisError::invariant("split produced no median"))?;

        if !self.children.is_empty() {
            if self.children.len() < half + 1 {
                return Err(TrellisError::invariant(format!(
                    "split with {} children for {} keys",
                    self.children.len(),
                    self.keys.len()
                )));
            }
            right.children = self.children.split_off(self.children.len() - (half + 1));
        }

        self.changed = true;
        Ok((median, right))
    }

    /// Detaches the i-th child as an owned node, resolving it through
    /// `batch` if the slot is unresolved. The walker re-attaches spine
    /// nodes when it unwinds.
    pub(crate) async fn take_child<L: BlockLog>(
        &mut self,
        i: usize,
        batch: &mut Batch<'_, L>,
    ) -> Result<TreeNode> {
        let child = self
            .children
            .get_mut(i)
            .ok_or_else(|| TrellisError::invariant(format!("child index {i} out of range")))?;
        match child.node.take() {
            Some(node) => Ok(*node),
            None => batch.tree_node(child.seq, child.offset).await,
        }
    }

    /// Re-attaches a previously detached child node to its slot.
    pub(crate) fn put_child(&mut self, i: usize, node: TreeNode) -> Result<()> {
        let child = self
            .children
            .get_mut(i)
            .ok_or_else(|| TrellisError::invariant(format!("child index {i} out of range")))?;
        child.node = Some(Box::new(node));
        Ok(())
    }

    /// Serializes this node and every changed descendant into `slots`,
    /// the level list of the entry that will be appended at `new_seq`.
    ///
    /// The node reserves its slot before recursing, so the root of the
    /// rebuild always lands at offset 0. Children that were never
    /// resolved, or whose node is unchanged, keep their existing
    /// `(seq, offset)` address; changed children are re-addressed into
    /// the new entry.
    pub(crate) fn build_index(&mut self, slots: &mut Vec<Option<Level>>, new_seq: Seq) -> usize {
        let slot = slots.len();
        slots.push(None);

        let mut children = Vec::with_capacity(self.children.len());
        for child in &mut self.children {
            match child.node.as_deref_mut() {
                Some(node) if node.changed => {
                    let offset = node.build_index(slots, new_seq) as u64;
                    children.push((new_seq, offset));
                }
                _ => children.push((child.seq, child.offset)),
            }
        }

        let keys = self.keys.iter().map(|key| key.seq).collect();
        slots[slot] = Some(Level { keys, children });
        slot
    }
}
