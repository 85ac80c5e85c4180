//! B-tree algorithms shared by the main index and the free list.

mod tree;

pub use tree::{BTree, Frame, Lookup, MAX_DEPTH, Slot};
