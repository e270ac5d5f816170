//! B+Tree index stored in 1KB blocks.
//!
//! Internal nodes hold separator keys and child block addresses; leaves hold
//! keys with record offsets and are chained left to right for range scans.
//! Child `i` of an internal node covers keys in `(keys[i-1], keys[i]]`.

mod key;
mod node;
mod tree;

pub use key::Key;
pub use node::{
    Corruption, InternalNode, LeafNode, MAX_ENTRIES, MAX_KEY_SIZE, NODE_HEADER_SIZE, Node, NodeError, NodeType,
    VALUE_SIZE, max_fanout, max_leaf_entries,
};
pub use tree::{BPlusTree, InsertOutcome, TreeConfig, TreeError, TreeStats};
