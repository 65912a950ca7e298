//! In-order range scan over the whole tree.

use crate::batch::Batch;
use crate::block::BlockEntry;
use crate::node::TreeNode;
use crate::tree::Tree;
use trellis_common::Result;
use trellis_log::BlockLog;

/// One level of the in-order walk.
///
/// The step counter `i` interleaves children and keys in the pattern
/// child 0, key 0, child 1, key 1, ..., child K: an even `i` descends
/// into child `i >> 1` (on internal nodes), an odd `i` emits key
/// `i >> 1`. The frame is popped once `i >> 1` passes the last key.
struct Frame {
    node: TreeNode,
    i: usize,
}

/// Lazy, in-order, finite stream of the log entries whose keys are in
/// the tree. Each entry is yielded once, keys strictly ascending.
///
/// The stream owns a batch of its own, so the scan sees the snapshot
/// current at the first `next` call and decodes each log entry at most
/// once. Not restartable; request a new stream to scan again.
pub struct ReadStream<'a, L: BlockLog> {
    batch: Batch<'a, L>,
    stack: Vec<Frame>,
    started: bool,
    done: bool,
}

impl<'a, L: BlockLog> ReadStream<'a, L> {
    pub(crate) fn new(tree: &'a Tree<L>) -> Self {
        Self {
            batch: Batch::new(tree),
            stack: Vec::new(),
            started: false,
            done: false,
        }
    }

    /// Yields the next entry in key order, or `None` when the scan is
    /// exhausted. Any error loading a block aborts the stream.
    pub async fn next(&mut self) -> Result<Option<BlockEntry>> {
        if self.done {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            if let Some(root) = self.batch.root().await? {
                self.stack.push(Frame { node: root, i: 0 });
            }
        }

        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.done = true;
                return Ok(None);
            };

            if frame.i & 1 == 1 {
                let key_idx = frame.i >> 1;
                if key_idx >= frame.node.keys.len() {
                    self.stack.pop();
                    continue;
                }
                frame.i += 1;
                let seq = frame.node.key_seq(key_idx)?;
                let entry = match self.batch.block(seq).await {
                    Ok(entry) => entry.clone(),
                    Err(err) => {
                        self.done = true;
                        return Err(err);
                    }
                };
                return Ok(Some(entry));
            }

            let child_idx = frame.i >> 1;
            if frame.node.is_leaf() {
                // No child to visit; fall through to the key step.
                if child_idx >= frame.node.keys.len() {
                    self.stack.pop();
                    continue;
                }
                frame.i += 1;
                continue;
            }

            if child_idx >= frame.node.children.len() {
                self.stack.pop();
                continue;
            }
            frame.i += 1;
            let child = match frame.node.take_child(child_idx, &mut self.batch).await {
                Ok(child) => child,
                Err(err) => {
                    self.done = true;
                    return Err(err);
                }
            };
            self.stack.push(Frame { node: child, i: 0 });
        }
    }

    /// Drains the remaining entries into a vector.
    pub async fn collect(mut self) -> Result<Vec<BlockEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
