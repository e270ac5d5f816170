//! Disk-resident B+Tree over an index file.
//!
//! Nodes refer to each other only by block address. Every operation reads
//! the nodes it needs straight from the file and writes back the ones it
//! changes; the only state kept between calls is the decoded root, tagged
//! with the header generation it was read at.
//!
//! Structural changes are written children first, then the parent, then
//! the header. An interrupted split therefore leaves the tree reachable
//! from the last root recorded in the header.

use std::path::Path;

use crate::btree::key::Key;
use crate::btree::node::{
    InternalNode, LeafNode, MAX_KEY_SIZE, Node, NodeError, max_fanout, max_leaf_entries,
};
use crate::storage::{
    Address, BLOCK_SIZE_U64, BlockFile, FileError, IndexHeader, NULL_ADDRESS,
};

/// Capacity settings of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeConfig {
    key_size: usize,
    max_fanout: usize,
    max_leaf: usize,
}

impl TreeConfig {
    /// Smallest fan-out that lets an internal split leave a key on each side.
    pub const MIN_FANOUT: usize = 3;
    /// Smallest leaf capacity that lets a leaf split leave a key on each side.
    pub const MIN_LEAF: usize = 2;

    /// Largest capacities a block can hold for `key_size`.
    pub fn for_key_size(key_size: usize) -> Result<Self, TreeError> {
        Self::with_capacities(key_size, max_fanout(key_size), max_leaf_entries(key_size))
    }

    /// Explicit capacities, at most what a block can hold.
    ///
    /// Small capacities force splits early, which is useful in tests.
    pub fn with_capacities(
        key_size: usize,
        max_fanout: usize,
        max_leaf: usize,
    ) -> Result<Self, TreeError> {
        if !(1..=MAX_KEY_SIZE).contains(&key_size) {
            return Err(TreeError::InvalidConfig(format!(
                "key size {key_size} outside 1..={MAX_KEY_SIZE}"
            )));
        }
        let fanout_limit = self::max_fanout(key_size);
        if !(Self::MIN_FANOUT..=fanout_limit).contains(&max_fanout) {
            return Err(TreeError::InvalidConfig(format!(
                "fan-out {max_fanout} outside {}..={fanout_limit} for key size {key_size}",
                Self::MIN_FANOUT
            )));
        }
        let leaf_limit = max_leaf_entries(key_size);
        if !(Self::MIN_LEAF..=leaf_limit).contains(&max_leaf) {
            return Err(TreeError::InvalidConfig(format!(
                "leaf capacity {max_leaf} outside {}..={leaf_limit} for key size {key_size}",
                Self::MIN_LEAF
            )));
        }

        Ok(Self {
            key_size,
            max_fanout,
            max_leaf,
        })
    }

    /// Width of every key in bytes.
    #[must_use]
    pub const fn key_size(&self) -> usize {
        self.key_size
    }

    /// Maximum children of an internal node (m).
    #[must_use]
    pub const fn max_fanout(&self) -> usize {
        self.max_fanout
    }

    /// Maximum pairs in a leaf (l).
    #[must_use]
    pub const fn max_leaf(&self) -> usize {
        self.max_leaf
    }
}

/// Result of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The pair was added.
    Inserted,
    /// The key was already present; nothing was written.
    DuplicateKey,
}

/// Shape of a tree, as reported by [`BPlusTree::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    pub height: usize,
    pub internal_nodes: usize,
    pub leaves: usize,
    pub keys: usize,
}

/// A node waiting to be visited by [`BPlusTree::check`], with the key range
/// its parent allows.
struct Pending {
    address: Address,
    parent: Address,
    lower: Option<Key>,
    upper: Option<Key>,
    depth: usize,
}

impl Pending {
    /// Check the parent address and key order of `node` against what its
    /// parent expects.
    fn verify(&self, node: &Node) -> Result<(), TreeError> {
        if node.parent() != self.parent {
            return Err(invariant(format!(
                "node {} records parent {}, expected {}",
                self.address,
                node.parent(),
                self.parent
            )));
        }

        let keys = node.keys();
        if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(invariant(format!("keys of node {} out of order", self.address)));
        }
        let out_of_range = keys.iter().any(|k| {
            self.lower.as_ref().is_some_and(|lower| k <= lower)
                || self.upper.as_ref().is_some_and(|upper| k > upper)
        });
        if out_of_range {
            return Err(invariant(format!(
                "node {} holds keys outside its range",
                self.address
            )));
        }
        Ok(())
    }
}

/// Root node cached together with the header generation it was read at.
#[derive(Debug)]
struct CachedRoot {
    generation: u64,
    node: Node,
}

/// A B+Tree backed by an index file.
#[derive(Debug)]
pub struct BPlusTree {
    file: BlockFile,
    config: TreeConfig,
    root: Option<CachedRoot>,
}

impl BPlusTree {
    /// Create a new index file with an empty root leaf.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, source_file: &str, config: TreeConfig) -> Result<Self, TreeError> {
        let header = IndexHeader::new(source_file, config.key_size as u64);
        let file = BlockFile::create(path, &header)?;
        Self::initialize(file, &header, config)
    }

    /// Create a new index file, replacing any file already at `path`.
    pub fn create_truncate(
        path: &Path,
        source_file: &str,
        config: TreeConfig,
    ) -> Result<Self, TreeError> {
        let header = IndexHeader::new(source_file, config.key_size as u64);
        let file = BlockFile::create_truncate(path, &header)?;
        Self::initialize(file, &header, config)
    }

    fn initialize(
        file: BlockFile,
        header: &IndexHeader,
        config: TreeConfig,
    ) -> Result<Self, TreeError> {
        let mut tree = Self {
            file,
            config,
            root: None,
        };

        tree.write_node(&Node::Leaf(LeafNode::new(header.root_address, NULL_ADDRESS)))?;
        tree.file.sync()?;

        tracing::info!(
            "created index {} (key size {}, m={}, l={})",
            tree.file.path().display(),
            config.key_size,
            config.max_fanout,
            config.max_leaf
        );

        Ok(tree)
    }

    /// Open an existing index with the largest capacities its key size allows.
    pub fn open(path: &Path) -> Result<Self, TreeError> {
        let mut file = BlockFile::open(path)?;
        let header = file.read_header()?;
        let key_size = usize::try_from(header.key_size).map_err(|_| {
            TreeError::InvalidConfig(format!("key size {} out of range", header.key_size))
        })?;
        let config = TreeConfig::for_key_size(key_size)?;

        Ok(Self {
            file,
            config,
            root: None,
        })
    }

    /// Open an existing index with explicit capacities.
    pub fn open_with_config(path: &Path, config: TreeConfig) -> Result<Self, TreeError> {
        let mut file = BlockFile::open(path)?;
        let header = file.read_header()?;
        if header.key_size != config.key_size as u64 {
            return Err(TreeError::InvalidConfig(format!(
                "index key size {} does not match configured {}",
                header.key_size, config.key_size
            )));
        }

        Ok(Self {
            file,
            config,
            root: None,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Read the current header.
    pub fn header(&mut self) -> Result<IndexHeader, TreeError> {
        Ok(self.file.read_header()?)
    }

    /// Sync all writes to disk.
    pub fn sync(&self) -> Result<(), TreeError> {
        Ok(self.file.sync()?)
    }

    /// Look up the record offset stored for `key`.
    pub fn find(&mut self, key: &Key) -> Result<Option<u64>, TreeError> {
        self.check_key(key)?;
        let header = self.file.read_header()?;
        let Some(root) = self.load_root(&header)? else {
            return Ok(None);
        };

        let leaf = self.find_leaf(root, key)?;
        Ok(leaf.get(key))
    }

    /// Insert a key/record-offset pair.
    ///
    /// An existing key is never overwritten: the call reports
    /// [`InsertOutcome::DuplicateKey`] and writes nothing.
    pub fn insert(&mut self, key: Key, value: u64) -> Result<InsertOutcome, TreeError> {
        self.check_key(&key)?;
        let mut header = self.file.read_header()?;

        let mut leaf = match self.load_root(&header)? {
            Some(root) => self.find_leaf(root, &key)?,
            None => {
                let address = allocate(&mut header);
                header.root_address = address;
                tracing::debug!("allocated first root leaf at {address}");
                LeafNode::new(address, NULL_ADDRESS)
            }
        };

        if !leaf.insert(key, value) {
            tracing::debug!("rejected duplicate key in leaf {}", leaf.address);
            return Ok(InsertOutcome::DuplicateKey);
        }

        if leaf.keys.len() > self.config.max_leaf {
            self.split_and_propagate(Node::Leaf(leaf), &mut header)?;
        } else {
            self.write_node(&Node::Leaf(leaf))?;
        }

        header.generation += 1;
        self.file.write_header(&header)?;
        self.root = None;

        Ok(InsertOutcome::Inserted)
    }

    /// Collect up to `n` record offsets in key order starting at `start`.
    ///
    /// When `start` is present the scan begins at it and follows the leaf
    /// chain. When it is absent the result holds at most one offset: that of
    /// the next larger key in the leaf `start` routes to. The chain is not
    /// followed in that case.
    pub fn traverse_leaf_nodes(&mut self, start: &Key, n: usize) -> Result<Vec<u64>, TreeError> {
        self.check_key(start)?;
        let header = self.file.read_header()?;
        let Some(root) = self.load_root(&header)? else {
            return Ok(Vec::new());
        };

        let mut leaf = self.find_leaf(root, start)?;
        let mut index = match leaf.find_index(start) {
            Ok(index) => index,
            Err(index) => {
                return Ok(leaf
                    .values
                    .get(index)
                    .copied()
                    .filter(|_| n > 0)
                    .into_iter()
                    .collect());
            }
        };

        let mut offsets = Vec::new();
        while offsets.len() < n {
            if index < leaf.values.len() {
                offsets.push(leaf.values[index]);
                index += 1;
            } else if leaf.next_leaf == NULL_ADDRESS {
                break;
            } else {
                leaf = self.read_leaf(leaf.next_leaf)?;
                index = 0;
            }
        }

        Ok(offsets)
    }

    /// All pairs in leaf-chain order.
    pub fn leaf_chain(&mut self) -> Result<Vec<(Key, u64)>, TreeError> {
        let mut entries = Vec::new();
        let Some(mut leaf) = self.leftmost_leaf()? else {
            return Ok(entries);
        };

        loop {
            entries.extend(leaf.keys.into_iter().zip(leaf.values));
            if leaf.next_leaf == NULL_ADDRESS {
                return Ok(entries);
            }
            leaf = self.read_leaf(leaf.next_leaf)?;
        }
    }

    /// Count the keys by walking the leaf chain.
    pub fn len(&mut self) -> Result<usize, TreeError> {
        let mut count = 0;
        let Some(mut leaf) = self.leftmost_leaf()? else {
            return Ok(0);
        };

        loop {
            count += leaf.keys.len();
            if leaf.next_leaf == NULL_ADDRESS {
                return Ok(count);
            }
            leaf = self.read_leaf(leaf.next_leaf)?;
        }
    }

    /// Whether the tree holds no keys.
    pub fn is_empty(&mut self) -> Result<bool, TreeError> {
        Ok(self.len()? == 0)
    }

    /// Number of levels, 0 for a tree without a root.
    pub fn height(&mut self) -> Result<usize, TreeError> {
        let header = self.file.read_header()?;
        let Some(mut node) = self.load_root(&header)? else {
            return Ok(0);
        };

        let mut height = 1;
        while let Node::Internal(internal) = node {
            node = self.read_node(internal.children[0])?;
            height += 1;
        }
        Ok(height)
    }

    /// Walk the whole tree and verify its structure.
    ///
    /// Checks key order and bounds, fan-out, parent addresses, uniform leaf
    /// depth and that the leaf chain visits every leaf left to right.
    pub fn check(&mut self) -> Result<TreeStats, TreeError> {
        let header = self.file.read_header()?;
        let Some(root) = self.load_root(&header)? else {
            return Ok(TreeStats::default());
        };
        if root.parent() != NULL_ADDRESS {
            return Err(invariant(format!("root {} has parent {}", root.address(), root.parent())));
        }

        let mut stats = TreeStats::default();
        let mut leaf_depth = None;
        let mut leaves_in_order = Vec::new();
        let mut stack = vec![Pending {
            address: root.address(),
            parent: NULL_ADDRESS,
            lower: None,
            upper: None,
            depth: 1,
        }];

        while let Some(pending) = stack.pop() {
            let node = self.read_node(pending.address)?;
            pending.verify(&node)?;

            match node {
                Node::Leaf(leaf) => {
                    if leaf.keys.len() > self.config.max_leaf {
                        return Err(invariant(format!("leaf {} over capacity", leaf.address)));
                    }
                    if *leaf_depth.get_or_insert(pending.depth) != pending.depth {
                        return Err(invariant(format!("leaf {} at uneven depth", leaf.address)));
                    }
                    stats.leaves += 1;
                    stats.keys += leaf.keys.len();
                    leaves_in_order.push(leaf.address);
                }
                Node::Internal(internal) => {
                    if internal.children.len() != internal.keys.len() + 1
                        || internal.children.len() > self.config.max_fanout
                        || internal.keys.is_empty()
                    {
                        return Err(invariant(format!(
                            "internal node {} has {} keys and {} children",
                            internal.address,
                            internal.keys.len(),
                            internal.children.len()
                        )));
                    }
                    stats.internal_nodes += 1;

                    // Reverse so the leftmost child is visited first.
                    for (i, &child) in internal.children.iter().enumerate().rev() {
                        let lower = if i == 0 {
                            pending.lower.clone()
                        } else {
                            Some(internal.keys[i - 1].clone())
                        };
                        let upper = internal
                            .keys
                            .get(i)
                            .cloned()
                            .or_else(|| pending.upper.clone());
                        stack.push(Pending {
                            address: child,
                            parent: internal.address,
                            lower,
                            upper,
                            depth: pending.depth + 1,
                        });
                    }
                }
            }
        }

        stats.height = leaf_depth.unwrap_or(0);
        self.check_leaf_chain(&leaves_in_order)?;

        Ok(stats)
    }

    /// Follow the leaf chain from the first leaf and compare it with the
    /// leaves found by walking the tree.
    fn check_leaf_chain(&mut self, leaves_in_order: &[Address]) -> Result<(), TreeError> {
        let mut chain = Vec::with_capacity(leaves_in_order.len());
        let mut next = leaves_in_order.first().copied().unwrap_or(NULL_ADDRESS);
        while next != NULL_ADDRESS && chain.len() <= leaves_in_order.len() {
            chain.push(next);
            next = self.read_leaf(next)?.next_leaf;
        }
        if chain != leaves_in_order {
            return Err(invariant("leaf chain does not match tree order".to_string()));
        }
        Ok(())
    }

    /// Split an over-capacity node and push the separator upward until some
    /// ancestor absorbs it or a new root is created.
    ///
    /// Allocations advance `header.next_free`; a new root updates
    /// `header.root_address`. The caller persists the header.
    fn split_and_propagate(
        &mut self,
        overflowing: Node,
        header: &mut IndexHeader,
    ) -> Result<(), TreeError> {
        let mut node = overflowing;

        loop {
            let right_address = allocate(header);
            let (separator, mut left, mut right) = match node {
                Node::Leaf(mut leaf) => {
                    let (separator, right) = leaf.split(right_address);
                    (separator, Node::Leaf(leaf), Node::Leaf(right))
                }
                Node::Internal(mut internal) => {
                    let (median, right) = internal.split(right_address);
                    for &child in &right.children {
                        self.set_parent(child, right_address)?;
                    }
                    (median, Node::Internal(internal), Node::Internal(right))
                }
            };
            tracing::debug!(
                "split {:?} node {} into {} + {} at {separator:?}",
                left.node_type(),
                left.address(),
                left.address(),
                right_address
            );

            let parent_address = left.parent();
            if parent_address == NULL_ADDRESS {
                let root_address = allocate(header);
                left.set_parent(root_address);
                right.set_parent(root_address);
                let root =
                    InternalNode::with_children(root_address, left.address(), separator, right_address);

                self.write_node(&right)?;
                self.write_node(&left)?;
                self.write_node(&Node::Internal(root))?;
                header.root_address = root_address;

                tracing::debug!("new root at {root_address}");
                return Ok(());
            }

            let Node::Internal(mut parent) = self.read_node(parent_address)? else {
                return Err(invariant(format!("parent {parent_address} is a leaf")));
            };
            parent.insert_separator(separator, left.address(), right_address);

            self.write_node(&right)?;
            self.write_node(&left)?;

            if parent.children.len() <= self.config.max_fanout {
                return self.write_node(&Node::Internal(parent));
            }
            node = Node::Internal(parent);
        }
    }

    /// Rewrite the parent address of the node at `address`.
    fn set_parent(&mut self, address: Address, parent: Address) -> Result<(), TreeError> {
        let mut node = self.read_node(address)?;
        node.set_parent(parent);
        self.write_node(&node)
    }

    /// Decode the root named by `header`, reusing the cached copy when the
    /// header generation has not moved.
    fn load_root(&mut self, header: &IndexHeader) -> Result<Option<Node>, TreeError> {
        if header.root_address == NULL_ADDRESS {
            self.root = None;
            return Ok(None);
        }

        if let Some(cached) = &self.root
            && cached.generation == header.generation
            && cached.node.address() == header.root_address
        {
            return Ok(Some(cached.node.clone()));
        }

        let node = self.read_node(header.root_address)?;
        self.root = Some(CachedRoot {
            generation: header.generation,
            node: node.clone(),
        });
        Ok(Some(node))
    }

    /// Descend from `node` to the leaf whose range covers `key`.
    fn find_leaf(&mut self, mut node: Node, key: &Key) -> Result<LeafNode, TreeError> {
        loop {
            match node {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Internal(internal) => node = self.read_node(internal.child_for(key))?,
            }
        }
    }

    fn leftmost_leaf(&mut self) -> Result<Option<LeafNode>, TreeError> {
        let header = self.file.read_header()?;
        let Some(mut node) = self.load_root(&header)? else {
            return Ok(None);
        };

        loop {
            match node {
                Node::Leaf(leaf) => return Ok(Some(leaf)),
                Node::Internal(internal) => node = self.read_node(internal.children[0])?,
            }
        }
    }

    fn read_node(&mut self, address: Address) -> Result<Node, TreeError> {
        let block = self.file.read_block(address)?;
        Ok(Node::from_block(&block, address, self.config.key_size)?)
    }

    fn read_leaf(&mut self, address: Address) -> Result<LeafNode, TreeError> {
        match self.read_node(address)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(invariant(format!("block {address} in leaf chain is not a leaf"))),
        }
    }

    fn write_node(&mut self, node: &Node) -> Result<(), TreeError> {
        let block = node.to_block(self.config.key_size)?;
        Ok(self.file.write_block(node.address(), &block)?)
    }

    const fn check_key(&self, key: &Key) -> Result<(), TreeError> {
        if key.len() != self.config.key_size {
            return Err(TreeError::KeySize {
                expected: self.config.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }
}

/// Take the block at the free cursor.
const fn allocate(header: &mut IndexHeader) -> Address {
    let address = header.next_free;
    header.next_free += BLOCK_SIZE_U64;
    address
}

const fn invariant(message: String) -> TreeError {
    TreeError::Invariant(message)
}

/// Errors that can occur during tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// File I/O error.
    File(FileError),
    /// Node encode/decode error.
    Node(NodeError),
    /// Unusable capacities or key size.
    InvalidConfig(String),
    /// Key width differs from the index key size.
    KeySize { expected: usize, actual: usize },
    /// The on-disk tree violates a structural invariant.
    Invariant(String),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::InvalidConfig(msg) => write!(f, "invalid tree config: {msg}"),
            Self::KeySize { expected, actual } => {
                write!(f, "key is {actual} bytes, index expects {expected}")
            }
            Self::Invariant(msg) => write!(f, "tree invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::InvalidConfig(_) | Self::KeySize { .. } | Self::Invariant(_) => None,
        }
    }
}

impl From<FileError> for TreeError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<NodeError> for TreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::node::Corruption;
    use crate::storage::Block;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use tempfile::tempdir;

    fn create_test_index() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.idx");
        (dir, path)
    }

    fn tiny_config(key_size: usize) -> TreeConfig {
        TreeConfig::with_capacities(key_size, 3, 2).expect("valid config")
    }

    fn key5(s: &str) -> Key {
        Key::normalize(s, 5)
    }

    fn numbered_key(i: usize) -> Key {
        Key::normalize(&format!("key{i:06}"), 10)
    }

    /// The three-fruit tree from the design notes: key size 5, l = 2.
    fn fruit_tree(path: &Path) -> BPlusTree {
        let mut tree = BPlusTree::create(path, "fruit.txt", tiny_config(5)).expect("create tree");
        for (k, v) in [("apple", 10), ("grape", 20), ("kiwi", 30)] {
            assert_eq!(tree.insert(key5(k), v).expect("insert"), InsertOutcome::Inserted);
        }
        tree
    }

    #[test]
    fn test_config_derived_from_key_size() {
        let config = TreeConfig::for_key_size(15).expect("valid");
        assert_eq!(config.max_fanout(), 44);
        assert_eq!(config.max_leaf(), 43);
        assert_eq!(config.key_size(), 15);
    }

    #[test]
    fn test_config_rejects_bad_capacities() {
        assert!(TreeConfig::with_capacities(0, 3, 2).is_err());
        assert!(TreeConfig::with_capacities(5, 2, 2).is_err());
        assert!(TreeConfig::with_capacities(5, 3, 1).is_err());
        assert!(TreeConfig::with_capacities(5, 200, 2).is_err());
        assert!(TreeConfig::with_capacities(5, 3, 200).is_err());
        assert!(TreeConfig::for_key_size(600).is_err());
    }

    #[test]
    fn test_config_rejects_huge_key_sizes() {
        assert!(matches!(
            TreeConfig::for_key_size(usize::MAX),
            Err(TreeError::InvalidConfig(_))
        ));
        assert!(matches!(
            TreeConfig::for_key_size(usize::MAX - 1000),
            Err(TreeError::InvalidConfig(_))
        ));
        assert!(TreeConfig::for_key_size(MAX_KEY_SIZE + 1).is_err());
        assert!(TreeConfig::with_capacities(usize::MAX, 3, 2).is_err());
    }

    #[test]
    fn test_open_header_with_huge_key_size() {
        let (_dir, path) = create_test_index();
        let header = IndexHeader::new("src.txt", u64::MAX);
        drop(BlockFile::create(&path, &header).expect("create file"));

        assert!(matches!(
            BPlusTree::open(&path),
            Err(TreeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_empty_tree() {
        let (_dir, path) = create_test_index();
        let mut tree = BPlusTree::create(&path, "src.txt", tiny_config(5)).expect("create");

        assert_eq!(tree.find(&key5("apple")).expect("find"), None);
        assert!(tree.traverse_leaf_nodes(&key5("apple"), 3).expect("traverse").is_empty());
        assert_eq!(tree.len().expect("len"), 0);
        assert_eq!(tree.height().expect("height"), 1);
        assert_eq!(tree.check().expect("check").keys, 0);
    }

    #[test]
    fn test_split_creates_internal_root() {
        let (_dir, path) = create_test_index();
        let mut tree = fruit_tree(&path);

        let header = tree.header().expect("header");
        let Node::Internal(root) = tree.read_node(header.root_address).expect("root") else {
            panic!("root should be internal after the split");
        };
        assert_eq!(root.keys.len(), 1);
        assert_eq!(root.children.len(), 2);
        assert_eq!(tree.height().expect("height"), 2);

        assert_eq!(tree.find(&key5("kiwi")).expect("find"), Some(30));
        assert_eq!(tree.find(&key5("apple")).expect("find"), Some(10));
        assert_eq!(tree.find(&key5("grape")).expect("find"), Some(20));
        assert_eq!(tree.find(&key5("mango")).expect("find"), None);
    }

    #[test]
    fn test_split_allocates_from_free_cursor() {
        let (_dir, path) = create_test_index();
        let mut tree = fruit_tree(&path);

        let header = tree.header().expect("header");
        // Leaf at 1024 kept, right leaf at 2048, new root at 3072.
        assert_eq!(header.root_address, 3072);
        assert_eq!(header.next_free, 4096);
        assert_eq!(header.generation, 3);
    }

    #[test]
    fn test_traverse_follows_leaf_chain() {
        let (_dir, path) = create_test_index();
        let mut tree = fruit_tree(&path);

        assert_eq!(
            tree.traverse_leaf_nodes(&key5("apple"), 2).expect("traverse"),
            vec![10, 20]
        );
        assert_eq!(
            tree.traverse_leaf_nodes(&key5("apple"), 10).expect("traverse"),
            vec![10, 20, 30]
        );
        assert_eq!(
            tree.traverse_leaf_nodes(&key5("grape"), 1).expect("traverse"),
            vec![20]
        );
        assert!(tree.traverse_leaf_nodes(&key5("apple"), 0).expect("traverse").is_empty());
    }

    #[test]
    fn test_traverse_absent_key_returns_next_in_leaf() {
        let (_dir, path) = create_test_index();
        let mut tree = fruit_tree(&path);

        assert_eq!(
            tree.traverse_leaf_nodes(&key5("banana"), 2).expect("traverse"),
            vec![20]
        );
        assert_eq!(
            tree.traverse_leaf_nodes(&key5("aaaaa"), 5).expect("traverse"),
            vec![10]
        );
        assert!(tree.traverse_leaf_nodes(&key5("zebra"), 2).expect("traverse").is_empty());
        assert!(tree.traverse_leaf_nodes(&key5("banana"), 0).expect("traverse").is_empty());
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let (_dir, path) = create_test_index();
        let mut tree = fruit_tree(&path);
        let before = tree.header().expect("header");

        assert_eq!(
            tree.insert(key5("grape"), 999).expect("insert"),
            InsertOutcome::DuplicateKey
        );

        assert_eq!(tree.find(&key5("grape")).expect("find"), Some(20));
        assert_eq!(tree.header().expect("header"), before);
        assert_eq!(tree.len().expect("len"), 3);
    }

    #[test]
    fn test_wrong_key_width_rejected() {
        let (_dir, path) = create_test_index();
        let mut tree = fruit_tree(&path);

        let result = tree.find(&Key::normalize("apple", 8));
        assert!(matches!(
            result,
            Err(TreeError::KeySize {
                expected: 5,
                actual: 8
            })
        ));
        assert!(tree.insert(Key::normalize("a", 4), 1).is_err());
    }

    #[test]
    fn test_random_order_inserts_keep_invariants() {
        let (_dir, path) = create_test_index();
        let mut tree = BPlusTree::create(&path, "src.txt", tiny_config(10)).expect("create");

        let mut order: Vec<usize> = (0..400).collect();
        order.shuffle(&mut StdRng::seed_from_u64(7));

        for (step, &i) in order.iter().enumerate() {
            assert_eq!(
                tree.insert(numbered_key(i), i as u64 * 100).expect("insert"),
                InsertOutcome::Inserted
            );
            if step % 50 == 0 {
                tree.check().expect("invariants hold mid-way");
            }
        }

        let stats = tree.check().expect("invariants hold");
        assert_eq!(stats.keys, 400);
        assert!(stats.height >= 5, "tiny capacities should build a deep tree");

        for i in 0..400 {
            assert_eq!(
                tree.find(&numbered_key(i)).expect("find"),
                Some(i as u64 * 100),
                "mismatch at {i}"
            );
        }
        assert_eq!(tree.find(&numbered_key(400)).expect("find"), None);
    }

    #[test]
    fn test_leaf_chain_is_complete_and_sorted() {
        let (_dir, path) = create_test_index();
        let mut tree = BPlusTree::create(&path, "src.txt", tiny_config(10)).expect("create");

        let mut order: Vec<usize> = (0..150).collect();
        order.shuffle(&mut StdRng::seed_from_u64(11));
        for &i in &order {
            tree.insert(numbered_key(i), i as u64).expect("insert");
        }

        let entries = tree.leaf_chain().expect("leaf chain");
        let expected: Vec<(Key, u64)> = (0..150).map(|i| (numbered_key(i), i as u64)).collect();
        assert_eq!(entries, expected);
        assert_eq!(tree.len().expect("len"), 150);
    }

    #[test]
    fn test_sequential_and_reverse_inserts() {
        for reverse in [false, true] {
            let (_dir, path) = create_test_index();
            let mut tree = BPlusTree::create(&path, "src.txt", tiny_config(10)).expect("create");

            let mut order: Vec<usize> = (0..200).collect();
            if reverse {
                order.reverse();
            }
            for &i in &order {
                tree.insert(numbered_key(i), i as u64).expect("insert");
            }

            assert_eq!(tree.check().expect("check").keys, 200);
            assert_eq!(
                tree.traverse_leaf_nodes(&numbered_key(50), 5).expect("traverse"),
                vec![50, 51, 52, 53, 54]
            );
        }
    }

    #[test]
    fn test_many_inserts_with_full_capacity() {
        let (_dir, path) = create_test_index();
        let config = TreeConfig::for_key_size(10).expect("config");
        let mut tree = BPlusTree::create(&path, "src.txt", config).expect("create");

        let mut order: Vec<usize> = (0..5000).collect();
        order.shuffle(&mut StdRng::seed_from_u64(3));
        for &i in &order {
            tree.insert(numbered_key(i), i as u64).expect("insert");
        }

        let stats = tree.check().expect("check");
        assert_eq!(stats.keys, 5000);
        assert_eq!(stats.height, 3);
        for i in (0..5000).step_by(37) {
            assert_eq!(tree.find(&numbered_key(i)).expect("find"), Some(i as u64));
        }
    }

    #[test]
    fn test_persistence() {
        let (_dir, path) = create_test_index();

        {
            let mut tree = BPlusTree::create(&path, "src.txt", tiny_config(10)).expect("create");
            for i in 0..100 {
                tree.insert(numbered_key(i), i as u64).expect("insert");
            }
            tree.sync().expect("sync");
        }

        {
            let mut tree = BPlusTree::open_with_config(&path, tiny_config(10)).expect("open");
            for i in 0..100 {
                assert_eq!(tree.find(&numbered_key(i)).expect("find"), Some(i as u64));
            }
            tree.insert(numbered_key(100), 100).expect("insert after reopen");
            assert_eq!(tree.check().expect("check").keys, 101);
        }

        {
            let mut tree = BPlusTree::open(&path).expect("open with derived capacities");
            assert_eq!(tree.config().key_size(), 10);
            assert_eq!(tree.header().expect("header").source_file, "src.txt");
            assert_eq!(tree.find(&numbered_key(100)).expect("find"), Some(100));
        }
    }

    #[test]
    fn test_open_with_mismatched_key_size() {
        let (_dir, path) = create_test_index();
        drop(fruit_tree(&path));

        assert!(matches!(
            BPlusTree::open_with_config(&path, tiny_config(6)),
            Err(TreeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_root_cache_sees_other_handle_changes() {
        let (_dir, path) = create_test_index();
        let mut reader = fruit_tree(&path);
        assert_eq!(reader.find(&key5("peach")).expect("find"), None);

        {
            let mut writer = BPlusTree::open_with_config(&path, tiny_config(5)).expect("open");
            writer.insert(key5("peach"), 40).expect("insert");
            writer.insert(key5("plum"), 50).expect("insert");
        }

        assert_eq!(reader.find(&key5("peach")).expect("find"), Some(40));
        assert_eq!(reader.find(&key5("plum")).expect("find"), Some(50));
    }

    #[test]
    fn test_header_without_root() {
        let (_dir, path) = create_test_index();
        let header = IndexHeader {
            source_file: "src.txt".to_string(),
            key_size: 5,
            root_address: NULL_ADDRESS,
            next_free: 1024,
            generation: 0,
        };
        drop(BlockFile::create(&path, &header).expect("create file"));

        let mut tree = BPlusTree::open_with_config(&path, tiny_config(5)).expect("open");
        assert_eq!(tree.find(&key5("apple")).expect("find"), None);
        assert_eq!(tree.height().expect("height"), 0);

        tree.insert(key5("apple"), 10).expect("insert");
        let header = tree.header().expect("header");
        assert_eq!(header.root_address, 1024);
        assert_eq!(header.next_free, 2048);
        assert_eq!(tree.find(&key5("apple")).expect("find"), Some(10));
    }

    #[test]
    fn test_corrupt_root_is_reported() {
        let (_dir, path) = create_test_index();
        drop(fruit_tree(&path));

        {
            let mut file = BlockFile::open(&path).expect("open file");
            let root_address = file.read_header().expect("header").root_address;
            let mut block = Block::new();
            block.write_u8(0, 9);
            file.write_block(root_address, &block).expect("write");
        }

        let mut tree = BPlusTree::open_with_config(&path, tiny_config(5)).expect("open");
        assert!(matches!(
            tree.find(&key5("apple")),
            Err(TreeError::Node(NodeError::Corrupt(Corruption::Flag(9))))
        ));
    }

    #[test]
    fn test_check_detects_stale_parent() {
        let (_dir, path) = create_test_index();
        let mut tree = fruit_tree(&path);

        tree.set_parent(2048, 1024).expect("corrupt parent");
        assert!(matches!(tree.check(), Err(TreeError::Invariant(_))));
    }
}
