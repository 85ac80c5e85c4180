//! Structural verification of the cache file.
//!
//! Walks both trees from their roots straight off disk, bypassing the block
//! cache, and checks:
//! - every non-root index block holds between `branch / 2` and `branch`
//!   entries
//! - a block is a leaf exactly when its tail and all its child pointers are
//!   zero
//! - keys ascend strictly and stay within the bounds implied by ancestors
//! - no two known spans of the file overlap (header, index blocks, data
//!   blocks, free ranges)
//!
//! Nothing is written.

use std::collections::HashSet;

use crate::btree::MAX_DEPTH;
use crate::storage::header::{HEADER_DISK_SIZE, HEADER_POS};
use crate::storage::index::{IndexBlock, NO_BLOCK};
use crate::storage::{BlockStore, StorageError, Tree};

/// A region of the file claimed by one structure.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Span {
    pos: u64,
    len: u64,
    label: String,
}

/// Collects spans and problems during a walk.
struct Verifier<'a> {
    store: &'a mut BlockStore,
    branch: usize,
    spans: Vec<Span>,
    visited: HashSet<u64>,
    problems: Vec<String>,
}

/// Check the structure of the file behind `store`.
///
/// Returns every problem found, in walk order. An empty list means the file
/// is consistent.
pub fn verify(store: &mut BlockStore) -> Result<Vec<String>, StorageError> {
    let header = store.read_header()?;
    let branch = store.branch_factor();
    let mut verifier = Verifier {
        store,
        branch,
        spans: vec![Span {
            pos: HEADER_POS,
            len: HEADER_DISK_SIZE,
            label: "header block".to_string(),
        }],
        visited: HashSet::new(),
        problems: Vec::new(),
    };

    if usize::from(header.branch_factor) != branch {
        verifier.problems.push(format!(
            "header records branch factor {} but {branch} is configured",
            header.branch_factor
        ));
    }
    verifier.walk(Tree::Main, header.main_root, Bounds::default(), 0);
    verifier.walk(Tree::FreeList, header.free_list_root, Bounds::default(), 0);
    verifier.check_overlaps();
    Ok(verifier.problems)
}

/// Exclusive key bounds inherited from ancestors.
#[derive(Debug, Clone, Copy, Default)]
struct Bounds {
    lower: Option<i64>,
    upper: Option<i64>,
}

impl Bounds {
    fn admits(self, key: i64) -> bool {
        self.lower.is_none_or(|lower| key > lower) && self.upper.is_none_or(|upper| key < upper)
    }
}

impl Verifier<'_> {
    fn walk(&mut self, tree: Tree, pos: u64, bounds: Bounds, depth: usize) {
        let label = format!("{} IndexBlock {pos}", tree.name());
        if depth > MAX_DEPTH {
            self.problems
                .push(format!("{label} lies deeper than {MAX_DEPTH} levels"));
            return;
        }
        if !self.visited.insert(pos) {
            self.problems.push(format!("{label} is reachable twice"));
            return;
        }
        let node = match self.store.read_index_block(pos) {
            Ok(node) => node,
            Err(e) => {
                self.problems.push(format!("{label} could not be read: {e}"));
                return;
            }
        };
        self.spans.push(Span {
            pos,
            len: IndexBlock::disk_size(self.branch),
            label: label.clone(),
        });

        let is_root = depth == 0;
        let len = node.entries.len();
        if !is_root && len < self.branch / 2 {
            self.problems.push(format!(
                "too few entries found in {label}: {len}, expected at least {}",
                self.branch / 2
            ));
        }
        if len > self.branch {
            self.problems.push(format!(
                "too many entries found in {label}: {len}, expected at most {}",
                self.branch
            ));
        }

        let is_leaf = node.is_leaf();
        let mut lower = bounds.lower;
        for entry in &node.entries {
            if (entry.child == NO_BLOCK) != is_leaf {
                self.problems.push(format!(
                    "mismatched leaf/non-leaf entry for key {} in {label}",
                    entry.key
                ));
            }
            let entry_bounds = Bounds {
                lower,
                upper: bounds.upper,
            };
            if !entry_bounds.admits(entry.key) {
                self.problems.push(format!(
                    "key {} in {label} is out of order or outside its range",
                    entry.key
                ));
            }
            self.target_span(tree, entry.key, entry.target, &label);
            if entry.child != NO_BLOCK {
                let child_bounds = Bounds {
                    lower,
                    upper: Some(entry.key),
                };
                self.walk(tree, entry.child, child_bounds, depth + 1);
            }
            lower = Some(entry.key);
        }
        if !is_leaf {
            if node.entries.is_empty() && !is_root {
                self.problems
                    .push(format!("{label} has a tail but no entries"));
            }
            let tail_bounds = Bounds {
                lower,
                upper: bounds.upper,
            };
            self.walk(tree, node.tail, tail_bounds, depth + 1);
        }
    }

    /// Record the span an entry's target points at.
    fn target_span(&mut self, tree: Tree, key: i64, target: u64, owner: &str) {
        match tree {
            Tree::Main => match self.store.read_data_block(target) {
                Ok(block) => self.spans.push(Span {
                    pos: target,
                    len: block.disk_size(),
                    label: format!("DataBlock {target} (key {key})"),
                }),
                Err(e) => self.problems.push(format!(
                    "DataBlock {target} referenced by {owner} could not be read: {e}"
                )),
            },
            Tree::FreeList => {
                let Ok(size) = u64::try_from(key) else {
                    self.problems
                        .push(format!("negative free range size {key} in {owner}"));
                    return;
                };
                let end = self.store.end();
                if target.saturating_add(size) > end {
                    self.problems.push(format!(
                        "free range {target}+{size} extends past end of file ({end})"
                    ));
                }
                self.spans.push(Span {
                    pos: target,
                    len: size,
                    label: format!("free range {target}+{size}"),
                });
            }
        }
    }

    fn check_overlaps(&mut self) {
        self.spans.sort_by_key(|span| span.pos);
        for pair in self.spans.windows(2) {
            let (first, second) = (&pair[0], &pair[1]);
            if first.pos + first.len > second.pos {
                self.problems
                    .push(format!("{} overlaps with {}", first.label, second.label));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::BTree;
    use crate::storage::index::IndexEntry;
    use crate::storage::{DataBlock, OpenState, allocator};
    use tempfile::{TempDir, tempdir};

    fn create_test_store() -> (TempDir, BlockStore) {
        let dir = tempdir().expect("create temp dir");
        let mut store = BlockStore::open(&dir.path().join("cache.bin"), 4, 8).expect("open");
        assert_eq!(store.load().expect("load"), OpenState::Created);
        (dir, store)
    }

    fn put_value(store: &mut BlockStore, key: i64, value: &[u8]) -> u64 {
        let block = DataBlock::new(value.to_vec()).expect("block");
        let pos = allocator::allocate(store, block.disk_size()).expect("allocate");
        store.put_data(pos, block);
        BTree::new(store, Tree::Main).insert(key, pos).expect("insert");
        pos
    }

    #[test]
    fn test_verify_fresh_file() {
        let (_dir, mut store) = create_test_store();
        assert_eq!(verify(&mut store).expect("verify"), Vec::<String>::new());
    }

    #[test]
    fn test_verify_populated_file() {
        let (_dir, mut store) = create_test_store();
        for key in 0..40 {
            put_value(&mut store, key * 7, b"value");
        }
        for key in 0..10 {
            let pos = BTree::new(&mut store, Tree::Main)
                .remove(key * 7)
                .expect("remove")
                .expect("present");
            let size = store.data(pos).expect("data").disk_size();
            allocator::free(&mut store, pos, size).expect("free");
        }
        store.flush().expect("flush");
        assert_eq!(verify(&mut store).expect("verify"), Vec::<String>::new());
    }

    #[test]
    fn test_verify_reports_out_of_order_keys() {
        let (_dir, mut store) = create_test_store();
        let a = put_value(&mut store, 1, b"a");
        let b = put_value(&mut store, 2, b"b");
        let root = store.root(Tree::Main);
        store.index_mut(root).expect("root").entries =
            vec![IndexEntry::leaf(2, b), IndexEntry::leaf(1, a)];
        store.flush().expect("flush");

        let problems = verify(&mut store).expect("verify");
        assert!(problems.iter().any(|p| p.contains("out of order")), "{problems:?}");
    }

    #[test]
    fn test_verify_reports_overlap() {
        let (_dir, mut store) = create_test_store();
        let pos = put_value(&mut store, 1, b"some value");
        // A free range claiming the live data block.
        allocator::free(&mut store, pos, 4).expect("free");
        store.flush().expect("flush");

        let problems = verify(&mut store).expect("verify");
        assert!(problems.iter().any(|p| p.contains("overlaps")), "{problems:?}");
    }

    #[test]
    fn test_verify_reports_underfull_node() {
        let (_dir, mut store) = create_test_store();
        for key in 0..5 {
            put_value(&mut store, key, b"v");
        }
        // Root now has one entry and two leaves of two; starve the left leaf.
        let root = store.root(Tree::Main);
        let left = store.index(root).expect("root").entries[0].child;
        store.index_mut(left).expect("leaf").entries.truncate(1);
        store.flush().expect("flush");

        let problems = verify(&mut store).expect("verify");
        assert!(problems.iter().any(|p| p.contains("too few entries")), "{problems:?}");
    }

    #[test]
    fn test_verify_reports_unreadable_data_block() {
        let (_dir, mut store) = create_test_store();
        put_value(&mut store, 1, b"v");
        let root = store.root(Tree::Main);
        store.index_mut(root).expect("root").entries[0].target = root;
        store.flush().expect("flush");

        let problems = verify(&mut store).expect("verify");
        assert!(problems.iter().any(|p| p.contains("could not be read")), "{problems:?}");
    }
}
