//! Disk-based B-tree over index blocks.
//!
//! Keys are 64-bit integers and each entry carries a single position. Both
//! trees in the cache file use this code: the main index maps key hashes to
//! data blocks and the free list maps range sizes to range offsets.
//!
//! Nodes hold at most `branch` entries. An insert that overflows a node
//! splits it around the median and pushes the median into the parent; a
//! delete that drops a non-root node below `branch / 2` entries borrows one
//! entry from a sibling or merges with it.
//!
//! Nodes carry no parent pointers. Every descent records a path of
//! [`Frame`]s from the root, and structural changes walk back up that path.

use crate::storage::error::StorageError;
use crate::storage::index::{IndexBlock, IndexEntry, NO_BLOCK};
use crate::storage::store::{BlockStore, Tree};

/// Deepest descent accepted before the tree is treated as corrupt.
///
/// A well-formed tree with a branch factor of at least four never comes
/// close; reaching it means a damaged file contains a cycle.
pub const MAX_DEPTH: usize = 64;

/// One step of a root-to-node path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Position of the ancestor.
    pub node: u64,
    /// Child slot taken within it (`entries.len()` for the tail).
    pub index: usize,
}

/// Where a key lives, or would live, in a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Found(usize),
    Vacant(usize),
}

/// Result of descending the tree for a key.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Ancestors of `node`, root first.
    pub path: Vec<Frame>,
    /// Node where the search stopped.
    pub node: u64,
    pub slot: Slot,
}

/// A B-tree stored in a [`BlockStore`].
pub struct BTree<'a> {
    store: &'a mut BlockStore,
    tree: Tree,
}

impl<'a> BTree<'a> {
    pub const fn new(store: &'a mut BlockStore, tree: Tree) -> Self {
        Self { store, tree }
    }

    #[must_use]
    pub const fn root(&self) -> u64 {
        self.store.root(self.tree)
    }

    /// Descend from the root until the key is found or a leaf is reached.
    pub fn find(&mut self, key: i64) -> Result<Lookup, StorageError> {
        let mut path = Vec::new();
        let mut pos = self.root();
        loop {
            let node = self.store.index(pos)?;
            let slot = match node.search(key) {
                Ok(index) => Slot::Found(index),
                Err(index) => {
                    let child = node.child_at(index);
                    if child == NO_BLOCK {
                        Slot::Vacant(index)
                    } else {
                        path.push(Frame { node: pos, index });
                        if path.len() > MAX_DEPTH {
                            return Err(too_deep(self.tree, pos));
                        }
                        pos = child;
                        continue;
                    }
                }
            };
            return Ok(Lookup {
                path,
                node: pos,
                slot,
            });
        }
    }

    /// Position stored under `key`.
    pub fn get(&mut self, key: i64) -> Result<Option<u64>, StorageError> {
        let lookup = self.find(key)?;
        match lookup.slot {
            Slot::Found(index) => Ok(Some(self.store.index(lookup.node)?.entries[index].target)),
            Slot::Vacant(_) => Ok(None),
        }
    }

    /// Insert or overwrite `key`.
    ///
    /// Returns the position previously stored under the key.
    pub fn insert(&mut self, key: i64, target: u64) -> Result<Option<u64>, StorageError> {
        let Lookup { path, node, slot } = self.find(key)?;
        let block = self.store.index_mut(node)?;
        match slot {
            Slot::Found(index) => {
                let previous = std::mem::replace(&mut block.entries[index].target, target);
                Ok(Some(previous))
            }
            Slot::Vacant(index) => {
                if !block.is_leaf() {
                    return Err(StorageError::Corrupted(format!(
                        "{}: non-leaf index block {node} has an empty child slot",
                        self.tree.name()
                    )));
                }
                block.entries.insert(index, IndexEntry::leaf(key, target));
                self.split_upwards(node, path)?;
                Ok(None)
            }
        }
    }

    /// Remove `key`, returning the position stored under it.
    pub fn remove(&mut self, key: i64) -> Result<Option<u64>, StorageError> {
        let Lookup {
            mut path,
            node,
            slot,
        } = self.find(key)?;
        let Slot::Found(index) = slot else {
            return Ok(None);
        };

        let removed = self.store.index_mut(node)?.entries.remove(index);
        if removed.child == NO_BLOCK {
            self.rebalance(node, path)?;
        } else {
            // Replace the separator with its in-order predecessor, the highest
            // entry of the subtree to its left.
            path.push(Frame { node, index });
            let leaf = self.highest_leaf(removed.child, &mut path)?;
            let mut predecessor = self.store.index_mut(leaf)?.entries.pop().ok_or_else(|| {
                StorageError::Corrupted(format!(
                    "{}: leaf index block {leaf} is empty",
                    self.tree.name()
                ))
            })?;
            predecessor.child = removed.child;
            self.store.index_mut(node)?.entries.insert(index, predecessor);
            self.rebalance(leaf, path)?;
        }
        Ok(Some(removed.target))
    }

    /// Entry with the highest key, if the tree is not empty.
    pub fn last(&mut self) -> Result<Option<IndexEntry>, StorageError> {
        let mut path = Vec::new();
        let leaf = self.highest_leaf(self.root(), &mut path)?;
        Ok(self.store.index(leaf)?.entries.last().copied())
    }

    /// Number of entries in the tree.
    pub fn count(&mut self) -> Result<usize, StorageError> {
        let mut count = 0;
        let mut pending = vec![(self.root(), 0usize)];
        while let Some((pos, depth)) = pending.pop() {
            if depth > MAX_DEPTH {
                return Err(too_deep(self.tree, pos));
            }
            let node = self.store.index(pos)?;
            count += node.entries.len();
            if !node.is_leaf() {
                pending.extend(
                    node.entries
                        .iter()
                        .map(|e| e.child)
                        .chain(std::iter::once(node.tail))
                        .map(|child| (child, depth + 1)),
                );
            }
        }
        Ok(count)
    }

    /// Follow tail pointers from `pos` down to a leaf, extending `path`.
    fn highest_leaf(&mut self, mut pos: u64, path: &mut Vec<Frame>) -> Result<u64, StorageError> {
        loop {
            let node = self.store.index(pos)?;
            if node.is_leaf() {
                return Ok(pos);
            }
            let frame = Frame {
                node: pos,
                index: node.entries.len(),
            };
            pos = node.tail;
            path.push(frame);
            if path.len() > MAX_DEPTH {
                return Err(too_deep(self.tree, pos));
            }
        }
    }

    /// Split overfull nodes from `pos` up towards the root.
    fn split_upwards(&mut self, mut pos: u64, mut path: Vec<Frame>) -> Result<(), StorageError> {
        let branch = self.store.branch_factor();
        loop {
            let node = self.store.index_mut(pos)?;
            if node.entries.len() <= branch {
                return Ok(());
            }

            let split_at = node.entries.len() / 2;
            let mut median = node.entries.remove(split_at);
            let sibling = IndexBlock {
                entries: node.entries.split_off(split_at),
                tail: node.tail,
            };
            node.tail = median.child;
            median.child = pos;
            let sibling_pos = self.store.create_index(sibling);
            tracing::debug!(
                "{}: split index block {pos}, upper half moved to {sibling_pos}",
                self.tree.name()
            );

            let Some(frame) = path.pop() else {
                let root = self.store.create_index(IndexBlock {
                    entries: vec![median],
                    tail: sibling_pos,
                });
                self.store.set_root(self.tree, root);
                return Ok(());
            };

            let parent = self.store.index_mut(frame.node)?;
            let previous = parent.set_child(frame.index, sibling_pos);
            if previous != pos {
                return Err(broken_link(self.tree, frame, pos, previous));
            }
            parent.entries.insert(frame.index, median);
            pos = frame.node;
        }
    }

    /// Restore the minimum fill of `pos` after an entry was taken from it.
    fn rebalance(&mut self, mut pos: u64, mut path: Vec<Frame>) -> Result<(), StorageError> {
        let branch = self.store.branch_factor();
        let min = self.store.min_entries();
        loop {
            let (len, tail) = {
                let node = self.store.index(pos)?;
                (node.entries.len(), node.tail)
            };

            let Some(frame) = path.pop() else {
                // The root may hold any number of entries, but an empty
                // non-leaf root is replaced by its only child.
                if len == 0 && tail != NO_BLOCK {
                    self.store.set_root(self.tree, tail);
                    self.store.release_index(pos)?;
                    tracing::debug!("{}: tree height shrank", self.tree.name());
                }
                return Ok(());
            };
            if len >= min {
                return Ok(());
            }

            let (left, right) = {
                let parent = self.store.index(frame.node)?;
                let found = parent.child_at(frame.index);
                if found != pos {
                    return Err(broken_link(self.tree, frame, pos, found));
                }
                let left = frame.index.checked_sub(1).map(|i| parent.child_at(i));
                let right = (frame.index < parent.entries.len())
                    .then(|| parent.child_at(frame.index + 1));
                (left, right)
            };

            if let Some(left) = left {
                let left_len = self.store.index(left)?.entries.len();
                if left_len > min {
                    return self.rotate_from_left(frame, left, pos);
                }
                if left_len + len < branch {
                    self.merge(frame.node, frame.index - 1, left, pos)?;
                    pos = frame.node;
                    continue;
                }
            }
            if let Some(right) = right {
                let right_len = self.store.index(right)?.entries.len();
                if right_len > min {
                    return self.rotate_from_right(frame, pos, right);
                }
                if right_len + len < branch {
                    self.merge(frame.node, frame.index, pos, right)?;
                    pos = frame.node;
                    continue;
                }
            }
            return Err(StorageError::Unsupported(format!(
                "{}: cannot rebalance index block {pos} with {len} entries",
                self.tree.name()
            )));
        }
    }

    /// Move the last entry of `left` up into the parent and the separator
    /// down into the front of `pos`.
    fn rotate_from_left(&mut self, frame: Frame, left: u64, pos: u64) -> Result<(), StorageError> {
        let left_block = self.store.index_mut(left)?;
        let mut moved = left_block
            .entries
            .pop()
            .ok_or_else(|| empty_sibling(self.tree, left))?;
        let left_tail = std::mem::replace(&mut left_block.tail, moved.child);
        moved.child = left;

        let parent = self.store.index_mut(frame.node)?;
        let mut separator = std::mem::replace(&mut parent.entries[frame.index - 1], moved);
        separator.child = left_tail;

        self.store.index_mut(pos)?.entries.insert(0, separator);
        tracing::trace!("{}: rotated entry from {left} into {pos}", self.tree.name());
        Ok(())
    }

    /// Move the first entry of `right` up into the parent and the separator
    /// down onto the end of `pos`.
    fn rotate_from_right(&mut self, frame: Frame, pos: u64, right: u64) -> Result<(), StorageError> {
        let right_block = self.store.index_mut(right)?;
        if right_block.entries.is_empty() {
            return Err(empty_sibling(self.tree, right));
        }
        let mut moved = right_block.entries.remove(0);
        let moved_child = std::mem::replace(&mut moved.child, pos);

        let parent = self.store.index_mut(frame.node)?;
        let mut separator = std::mem::replace(&mut parent.entries[frame.index], moved);

        let node = self.store.index_mut(pos)?;
        separator.child = std::mem::replace(&mut node.tail, moved_child);
        node.entries.push(separator);
        tracing::trace!("{}: rotated entry from {right} into {pos}", self.tree.name());
        Ok(())
    }

    /// Fold `right` and the separator between them into `left`.
    ///
    /// `separator` indexes the parent entry whose child is `left`.
    fn merge(
        &mut self,
        parent: u64,
        separator: usize,
        left: u64,
        right: u64,
    ) -> Result<(), StorageError> {
        let right_block = self.store.release_index(right)?;

        let parent_block = self.store.index_mut(parent)?;
        let mut entry = parent_block.entries.remove(separator);
        let previous = parent_block.set_child(separator, left);
        if previous != right {
            let frame = Frame {
                node: parent,
                index: separator,
            };
            return Err(broken_link(self.tree, frame, right, previous));
        }

        let left_block = self.store.index_mut(left)?;
        entry.child = left_block.tail;
        left_block.entries.push(entry);
        left_block.entries.extend(right_block.entries);
        left_block.tail = right_block.tail;
        tracing::debug!("{}: merged index block {right} into {left}", self.tree.name());
        Ok(())
    }
}

fn too_deep(tree: Tree, pos: u64) -> StorageError {
    StorageError::Corrupted(format!(
        "{}: descent passed {MAX_DEPTH} levels at index block {pos}",
        tree.name()
    ))
}

fn broken_link(tree: Tree, frame: Frame, expected: u64, found: u64) -> StorageError {
    StorageError::Corrupted(format!(
        "{}: slot {} of index block {} points at {found}, expected {expected}",
        tree.name(),
        frame.index,
        frame.node
    ))
}

fn empty_sibling(tree: Tree, pos: u64) -> StorageError {
    StorageError::Corrupted(format!("{}: sibling index block {pos} is empty", tree.name()))
}
