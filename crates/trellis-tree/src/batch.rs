//! Per-operation scratchpad: the block cache and the get/put walks.
//!
//! A batch lives for exactly one operation. Its block cache guarantees
//! that a log entry is read and decoded at most once per operation, and
//! that every key or child reference pointing into the same historical
//! entry shares one decoded index.

use crate::block::BlockEntry;
use crate::codec::{EmbeddedIndex, Level, NodeRecord};
use crate::node::{ChildRef, KeyRef, TreeNode};
use crate::tree::Tree;
use bytes::Bytes;
use std::collections::HashMap;
use trellis_common::{Result, Seq, TrellisError};
use trellis_log::BlockLog;

/// Single-operation scratchpad over a tree.
pub struct Batch<'a, L: BlockLog> {
    tree: &'a Tree<L>,
    blocks: HashMap<Seq, BlockEntry>,
}

impl<'a, L: BlockLog> Batch<'a, L> {
    pub(crate) fn new(tree: &'a Tree<L>) -> Self {
        Self {
            tree,
            blocks: HashMap::new(),
        }
    }

    /// Returns the cached block for `seq`, reading and decoding the log
    /// entry on first access within this batch.
    pub(crate) async fn block(&mut self, seq: Seq) -> Result<&mut BlockEntry> {
        if !self.blocks.contains_key(&seq) {
            let entry = self.tree.read_block(seq).await?;
            self.blocks.insert(seq, entry);
        }
        self.blocks
            .get_mut(&seq)
            .ok_or_else(|| TrellisError::invariant("block cache lost an entry"))
    }

    /// Key bytes carried by the entry at `seq`.
    pub(crate) async fn key_at(&mut self, seq: Seq) -> Result<Bytes> {
        Ok(self.block(seq).await?.key().clone())
    }

    /// Materializes the node at `offset` of the entry at `seq`.
    pub(crate) async fn tree_node(&mut self, seq: Seq, offset: u64) -> Result<TreeNode> {
        self.block(seq).await?.tree_node(offset)
    }

    /// Loads the current root, or `None` for an empty tree. The root is
    /// always node 0 of the last entry's index; the log length captured
    /// here fixes the snapshot this operation sees.
    pub(crate) async fn root(&mut self) -> Result<Option<TreeNode>> {
        let length = self.tree.log().length();
        if length < 2 {
            return Ok(None);
        }
        Ok(Some(self.tree_node(length - 1, 0).await?))
    }

    /// Point lookup. The value of a match lives in the log entry the
    /// matching key reference points at.
    pub async fn get(&mut self, key: &[u8]) -> Result<Option<BlockEntry>> {
        let Some(mut node) = self.root().await? else {
            return Ok(None);
        };

        loop {
            let (idx, found) = node.find(key, self).await?;
            if found {
                let seq = node.key_seq(idx)?;
                return Ok(Some(self.block(seq).await?.clone()));
            }
            if node.is_leaf() {
                return Ok(None);
            }
            node = node.take_child(idx, self).await?;
        }
    }

    /// Insert or overwrite. Appends exactly one log entry carrying the
    /// payload and the re-serialized changed spine.
    pub async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let seq = self.tree.log().length();
        let target = KeyRef::resolved(seq, Bytes::copy_from_slice(key));
        let value = Bytes::copy_from_slice(value);

        let Some(mut node) = self.root().await? else {
            // First key: a single-level tree.
            let index = EmbeddedIndex {
                levels: vec![Level {
                    keys: vec![seq],
                    children: vec![],
                }],
            };
            return self.append_entry(key, value, &index, seq).await;
        };

        // Walk to the leaf, stacking the internal spine. Spine nodes
        // are rewritten regardless, so they are marked changed on push.
        let mut stack: Vec<(TreeNode, usize)> = Vec::new();
        while !node.is_leaf() {
            let (idx, found) = node.find(key, self).await?;
            if found {
                // Existing key at an internal node: overwrite in place,
                // nothing below this node changes.
                node.set_key(idx, target)?;
                return self.rebuild_and_append(node, stack, key, value, seq).await;
            }
            node.changed = true;
            let child = node.take_child(idx, self).await?;
            stack.push((node, idx));
            node = child;
        }

        let mut done = node.insert_key(target, None, self).await?;

        // Split propagation: push medians up the spine until a parent
        // absorbs one, or the root itself splits.
        while !done {
            let (median, right) = node.split()?;
            match stack.pop() {
                None => {
                    let mut root = TreeNode::create(seq);
                    root.keys.push(median);
                    root.children.push(ChildRef::fresh(node));
                    root.children.push(ChildRef::fresh(right));
                    node = root;
                    done = true;
                }
                Some((mut parent, idx)) => {
                    parent.put_child(idx, node)?;
                    done = parent.insert_key(median, Some(right), self).await?;
                    node = parent;
                }
            }
        }

        self.rebuild_and_append(node, stack, key, value, seq).await
    }

    /// Re-attaches the remaining spine, serializes every changed node
    /// into a fresh index, and appends this put's entry.
    async fn rebuild_and_append(
        &mut self,
        node: TreeNode,
        mut stack: Vec<(TreeNode, usize)>,
        key: &[u8],
        value: Bytes,
        seq: Seq,
    ) -> Result<()> {
        let mut node = node;
        while let Some((mut parent, idx)) = stack.pop() {
            parent.put_child(idx, node)?;
            node = parent;
        }

        let mut slots = Vec::new();
        node.build_index(&mut slots, seq);
        let levels = slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| TrellisError::invariant("unfilled index slot")))
            .collect::<Result<Vec<Level>>>()?;

        self.append_entry(key, value, &EmbeddedIndex { levels }, seq)
            .await
    }

    /// Appends the entry for this put. The entry must land at the seq
    /// captured when the operation started; every fresh reference in the
    /// index was stamped with it.
    async fn append_entry(
        &mut self,
        key: &[u8],
        value: Bytes,
        index: &EmbeddedIndex,
        expected_seq: Seq,
    ) -> Result<()> {
        let record = NodeRecord {
            key: Bytes::copy_from_slice(key),
            value: Some(value),
            index: index.encode(),
        };
        let assigned = self.tree.log().append(record.encode()).await?;
        if assigned != expected_seq {
            return Err(TrellisError::invariant(format!(
                "append landed at seq {assigned}, expected {expected_seq}; concurrent writer?"
            )));
        }
        Ok(())
    }
}
