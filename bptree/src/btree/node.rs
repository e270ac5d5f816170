//! B+Tree node types and their block encoding.
//!
//! Every node fills exactly one 1KB block:
//!
//! ```text
//! [is_leaf:1][key_count:1][value_count:1][next_leaf:8][parent:8][keys][values]
//! ```
//!
//! Keys are stored back to back, `key_count * key_size` bytes, followed by
//! `value_count` big-endian u64 values. The rest of the block is zero.

#![allow(clippy::cast_possible_truncation)]

use crate::btree::key::Key;
use crate::storage::{Address, BLOCK_SIZE, Block, NULL_ADDRESS};

/// Size of the fixed node header in bytes.
pub const NODE_HEADER_SIZE: usize = 19;

/// Size of a stored value (record offset or child address).
pub const VALUE_SIZE: usize = 8;

/// Largest key size for which a node header and one key fit a block.
pub const MAX_KEY_SIZE: usize = BLOCK_SIZE - NODE_HEADER_SIZE;

/// Upper bound on keys and values per node.
///
/// The counts are stored in single bytes and were historically read as
/// signed, so anything above 127 cannot be relied on.
pub const MAX_ENTRIES: usize = 127;

mod offsets {
    pub const IS_LEAF: usize = 0;
    pub const KEY_COUNT: usize = 1;
    pub const VALUE_COUNT: usize = 2;
    pub const NEXT_LEAF: usize = 3;
    pub const PARENT: usize = 11;
    pub const DATA: usize = 19;
}

/// Maximum number of children of an internal node for a key size.
///
/// `m * 8 + (m - 1) * key_size + 19 <= 1024`. Zero for key sizes above
/// [`MAX_KEY_SIZE`].
#[must_use]
pub const fn max_fanout(key_size: usize) -> usize {
    if key_size > MAX_KEY_SIZE {
        return 0;
    }
    let m = (BLOCK_SIZE - NODE_HEADER_SIZE + key_size) / (VALUE_SIZE + key_size);
    if m > MAX_ENTRIES { MAX_ENTRIES } else { m }
}

/// Maximum number of key/value pairs of a leaf for a key size.
///
/// `l * (8 + key_size) + 19 <= 1024`. Zero for key sizes above
/// [`MAX_KEY_SIZE`].
#[must_use]
pub const fn max_leaf_entries(key_size: usize) -> usize {
    if key_size > MAX_KEY_SIZE {
        return 0;
    }
    let l = (BLOCK_SIZE - NODE_HEADER_SIZE) / (VALUE_SIZE + key_size);
    if l > MAX_ENTRIES { MAX_ENTRIES } else { l }
}

/// Bytes needed to encode a node with the given counts.
#[must_use]
pub const fn encoded_size(key_count: usize, value_count: usize, key_size: usize) -> usize {
    NODE_HEADER_SIZE + key_count * key_size + value_count * VALUE_SIZE
}

/// Node type discriminant, stored in the first byte of the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Internal = 0,
    Leaf = 1,
}

impl TryFrom<u8> for NodeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Internal),
            1 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// An internal (non-leaf) node.
///
/// Stores N keys and N+1 child addresses. `children[i]` covers keys in
/// `(keys[i-1], keys[i]]`; the last child covers everything above the last
/// key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    /// Block this node lives in.
    pub address: Address,
    /// Parent block, `NULL_ADDRESS` for the root.
    pub parent: Address,
    /// Keys in sorted order.
    pub keys: Vec<Key>,
    /// Child addresses. `children.len()` == `keys.len()` + 1
    pub children: Vec<Address>,
}

impl InternalNode {
    /// Create an internal node with one separator and two children.
    #[must_use]
    pub fn with_children(
        address: Address,
        left_child: Address,
        key: Key,
        right_child: Address,
    ) -> Self {
        Self {
            address,
            parent: NULL_ADDRESS,
            keys: vec![key],
            children: vec![left_child, right_child],
        }
    }

    /// Index of the child whose range covers `key`: the first key `>= key`,
    /// or the last child when `key` is above every key.
    #[must_use]
    pub fn child_index(&self, key: &Key) -> usize {
        self.keys.partition_point(|k| k < key)
    }

    /// Address of the child whose range covers `key`.
    #[must_use]
    pub fn child_for(&self, key: &Key) -> Address {
        self.children[self.child_index(key)]
    }

    /// Insert a separator produced by splitting the child at `left_child`
    /// into `left_child` and `right_child`.
    pub fn insert_separator(&mut self, key: Key, left_child: Address, right_child: Address) {
        let idx = self.child_index(&key);
        self.keys.insert(idx, key);
        self.children[idx] = left_child;
        self.children.insert(idx + 1, right_child);
    }

    /// Split the node, returning the promoted key and the new right node.
    ///
    /// The promoted key leaves both halves. The left half always keeps at
    /// least one key.
    #[must_use]
    pub fn split(&mut self, right_address: Address) -> (Key, Self) {
        let mid = (self.keys.len() / 2).max(1);

        let right_keys: Vec<Key> = self.keys.drain(mid + 1..).collect();
        let right_children: Vec<Address> = self.children.drain(mid + 1..).collect();

        // The last remaining key is the median.
        let median = self.keys.remove(mid);

        let right = Self {
            address: right_address,
            parent: self.parent,
            keys: right_keys,
            children: right_children,
        };

        (median, right)
    }
}

/// A leaf node.
///
/// Stores key/record-offset pairs and the address of the next leaf in key
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Block this node lives in.
    pub address: Address,
    /// Parent block, `NULL_ADDRESS` for the root.
    pub parent: Address,
    /// Next leaf in the chain, `NULL_ADDRESS` for the last leaf.
    pub next_leaf: Address,
    /// Keys in sorted order.
    pub keys: Vec<Key>,
    /// Record offsets, parallel to `keys`.
    pub values: Vec<u64>,
}

impl LeafNode {
    /// Create a new empty leaf.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::new() in a struct literal
    pub fn new(address: Address, parent: Address) -> Self {
        Self {
            address,
            parent,
            next_leaf: NULL_ADDRESS,
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Find the index where a key is (Ok) or would be inserted (Err).
    pub fn find_index(&self, key: &Key) -> Result<usize, usize> {
        self.keys.binary_search(key)
    }

    /// Get the value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<u64> {
        self.find_index(key).ok().map(|i| self.values[i])
    }

    /// Insert a pair in key order.
    ///
    /// Returns `false` without touching the node if the key already exists.
    pub fn insert(&mut self, key: Key, value: u64) -> bool {
        match self.find_index(&key) {
            Ok(_) => false,
            Err(i) => {
                self.keys.insert(i, key);
                self.values.insert(i, value);
                true
            }
        }
    }

    /// Split the node, returning the separator key and the new right leaf.
    ///
    /// The left half keeps `[..len/2]`, the right half gets the rest and is
    /// linked between this leaf and its old successor. The separator is the
    /// largest key left behind, so it routes to this leaf.
    #[must_use]
    pub fn split(&mut self, right_address: Address) -> (Key, Self) {
        let mid = (self.keys.len() / 2).max(1);

        let right = Self {
            address: right_address,
            parent: self.parent,
            next_leaf: self.next_leaf,
            keys: self.keys.drain(mid..).collect(),
            values: self.values.drain(mid..).collect(),
        };
        self.next_leaf = right_address;

        let separator = self.keys[mid - 1].clone();
        (separator, right)
    }
}

/// A tree node of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    #[must_use]
    pub const fn node_type(&self) -> NodeType {
        match self {
            Self::Internal(_) => NodeType::Internal,
            Self::Leaf(_) => NodeType::Leaf,
        }
    }

    #[must_use]
    pub const fn address(&self) -> Address {
        match self {
            Self::Internal(node) => node.address,
            Self::Leaf(node) => node.address,
        }
    }

    #[must_use]
    pub const fn parent(&self) -> Address {
        match self {
            Self::Internal(node) => node.parent,
            Self::Leaf(node) => node.parent,
        }
    }

    pub const fn set_parent(&mut self, parent: Address) {
        match self {
            Self::Internal(node) => node.parent = parent,
            Self::Leaf(node) => node.parent = parent,
        }
    }

    #[must_use]
    pub fn keys(&self) -> &[Key] {
        match self {
            Self::Internal(node) => &node.keys,
            Self::Leaf(node) => &node.keys,
        }
    }

    /// Encode the node into a block.
    pub fn to_block(&self, key_size: usize) -> Result<Block, NodeError> {
        let (node_type, next_leaf, parent, keys, values) = match self {
            Self::Internal(node) => (
                NodeType::Internal,
                NULL_ADDRESS,
                node.parent,
                &node.keys,
                &node.children,
            ),
            Self::Leaf(node) => (
                NodeType::Leaf,
                node.next_leaf,
                node.parent,
                &node.keys,
                &node.values,
            ),
        };

        if keys.len() > MAX_ENTRIES
            || values.len() > MAX_ENTRIES
            || encoded_size(keys.len(), values.len(), key_size) > BLOCK_SIZE
        {
            return Err(NodeError::DoesNotFit {
                key_count: keys.len(),
                value_count: values.len(),
            });
        }

        let mut block = Block::new();
        block.write_u8(offsets::IS_LEAF, node_type as u8);
        block.write_u8(offsets::KEY_COUNT, keys.len() as u8);
        block.write_u8(offsets::VALUE_COUNT, values.len() as u8);
        block.write_u64(offsets::NEXT_LEAF, next_leaf);
        block.write_u64(offsets::PARENT, parent);

        let mut offset = offsets::DATA;
        for key in keys {
            if key.len() != key_size {
                return Err(NodeError::KeyWidth {
                    expected: key_size,
                    actual: key.len(),
                });
            }
            block.write_bytes(offset, key.as_bytes());
            offset += key_size;
        }
        for &value in values {
            block.write_u64(offset, value);
            offset += VALUE_SIZE;
        }

        Ok(block)
    }

    /// Decode the node stored in `block`, which was read from `address`.
    ///
    /// A block that was never written (all header fields zero) decodes as an
    /// empty leaf. Older index files leave the first root block that way
    /// until the first insert. It is the one block that does not re-encode
    /// to itself: the leaf flag is set on the way back.
    pub fn from_block(block: &Block, address: Address, key_size: usize) -> Result<Self, NodeError> {
        let flag = block.read_u8(offsets::IS_LEAF);
        let node_type =
            NodeType::try_from(flag).map_err(|_| NodeError::Corrupt(Corruption::Flag(flag)))?;
        let key_count = usize::from(block.read_u8(offsets::KEY_COUNT));
        let value_count = usize::from(block.read_u8(offsets::VALUE_COUNT));
        let next_leaf = block.read_u64(offsets::NEXT_LEAF);
        let parent = block.read_u64(offsets::PARENT);

        if encoded_size(key_count, value_count, key_size) > BLOCK_SIZE {
            return Err(NodeError::Corrupt(Corruption::Overrun {
                key_count,
                value_count,
            }));
        }

        let counts_match = match node_type {
            NodeType::Leaf => key_count == value_count,
            NodeType::Internal => value_count == key_count + 1 || value_count + key_count == 0,
        };
        if !counts_match {
            return Err(NodeError::Corrupt(Corruption::Counts {
                node_type,
                key_count,
                value_count,
            }));
        }

        let mut offset = offsets::DATA;
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(Key::from_bytes(block.read_bytes(offset, key_size)));
            offset += key_size;
        }
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            values.push(block.read_u64(offset));
            offset += VALUE_SIZE;
        }

        let node = match node_type {
            NodeType::Internal if values.is_empty() => Self::Leaf(LeafNode::new(address, parent)),
            NodeType::Internal => Self::Internal(InternalNode {
                address,
                parent,
                keys,
                children: values,
            }),
            NodeType::Leaf => Self::Leaf(LeafNode {
                address,
                parent,
                next_leaf,
                keys,
                values,
            }),
        };

        Ok(node)
    }
}

/// Ways a block can fail to decode as a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    /// Leaf flag is neither 0 nor 1.
    Flag(u8),
    /// Keys and values would run past the end of the block.
    Overrun { key_count: usize, value_count: usize },
    /// Key and value counts do not fit the node type.
    Counts {
        node_type: NodeType,
        key_count: usize,
        value_count: usize,
    },
}

/// Errors that can occur when working with nodes.
#[derive(Debug)]
pub enum NodeError {
    /// Block does not hold a well-formed node.
    Corrupt(Corruption),
    /// Node has too many entries to encode.
    DoesNotFit { key_count: usize, value_count: usize },
    /// Key width differs from the index key size.
    KeyWidth { expected: usize, actual: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Corrupt(Corruption::Flag(flag)) => write!(f, "corrupt block: leaf flag {flag}"),
            Self::Corrupt(Corruption::Overrun {
                key_count,
                value_count,
            }) => write!(
                f,
                "corrupt block: {key_count} keys and {value_count} values overrun the block"
            ),
            Self::Corrupt(Corruption::Counts {
                node_type,
                key_count,
                value_count,
            }) => write!(
                f,
                "corrupt block: {node_type:?} node with {key_count} keys and {value_count} values"
            ),
            Self::DoesNotFit {
                key_count,
                value_count,
            } => write!(
                f,
                "node with {key_count} keys and {value_count} values does not fit a block"
            ),
            Self::KeyWidth { expected, actual } => {
                write!(f, "key width {actual} does not match key size {expected}")
            }
        }
    }
}

impl std::error::Error for NodeError {}
