//! Index header structure and serialization.
//!
//! The header occupies block 0 and carries the metadata the tree needs to
//! find its root and allocate new blocks.

use crate::storage::block::{Address, BLOCK_SIZE_U64, Block, NULL_ADDRESS, is_node_address};

/// Width of the source filename field.
pub const SOURCE_NAME_LEN: usize = 256;

/// Address of the first node block (right after the header).
pub const FIRST_NODE_ADDRESS: Address = BLOCK_SIZE_U64;

/// Header field offsets.
mod offsets {
    pub const SOURCE_NAME: usize = 0;
    pub const KEY_SIZE: usize = 256;
    pub const ROOT_ADDRESS: usize = 264;
    pub const NEXT_FREE: usize = 272;
    // Zero in files written before the counter existed.
    pub const GENERATION: usize = 280;
    // 288-1023: reserved
}

/// Metadata stored in the header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    /// Name of the record file the index was built from (informational).
    pub source_file: String,
    /// Width of every key in bytes.
    pub key_size: u64,
    /// Address of the root node, `NULL_ADDRESS` before the first root exists.
    pub root_address: Address,
    /// Allocator cursor: the address the next new block will get.
    pub next_free: Address,
    /// Bumped on every successful insert so cached roots can be invalidated.
    pub generation: u64,
}

impl IndexHeader {
    /// Create a header for a fresh index whose root is the empty leaf at
    /// `FIRST_NODE_ADDRESS`.
    #[must_use]
    pub fn new(source_file: impl Into<String>, key_size: u64) -> Self {
        Self {
            source_file: source_file.into(),
            key_size,
            root_address: FIRST_NODE_ADDRESS,
            next_free: FIRST_NODE_ADDRESS + BLOCK_SIZE_U64,
            generation: 0,
        }
    }

    /// Serialize the header to a block.
    pub fn to_block(&self) -> Result<Block, HeaderError> {
        let name = self.source_file.as_bytes();
        if name.len() > SOURCE_NAME_LEN {
            return Err(HeaderError::SourceNameTooLong(name.len()));
        }

        let mut block = Block::new();
        block.write_bytes(offsets::SOURCE_NAME, name);
        block.write_u64(offsets::KEY_SIZE, self.key_size);
        block.write_u64(offsets::ROOT_ADDRESS, self.root_address);
        block.write_u64(offsets::NEXT_FREE, self.next_free);
        block.write_u64(offsets::GENERATION, self.generation);
        Ok(block)
    }

    /// Deserialize a header from a block.
    pub fn from_block(block: &Block) -> Result<Self, HeaderError> {
        let raw_name = block.read_bytes(offsets::SOURCE_NAME, SOURCE_NAME_LEN);
        let name_len = raw_name
            .iter()
            .rposition(|&b| b != 0 && b != b' ')
            .map_or(0, |i| i + 1);
        let source_file = String::from_utf8_lossy(&raw_name[..name_len]).into_owned();

        let key_size = block.read_u64(offsets::KEY_SIZE);
        if key_size == 0 {
            return Err(HeaderError::InvalidKeySize(key_size));
        }

        let root_address = block.read_u64(offsets::ROOT_ADDRESS);
        if root_address != NULL_ADDRESS && !is_node_address(root_address) {
            return Err(HeaderError::InvalidRootAddress(root_address));
        }

        let next_free = block.read_u64(offsets::NEXT_FREE);
        if !is_node_address(next_free) || next_free <= root_address {
            return Err(HeaderError::InvalidNextFree(next_free));
        }

        Ok(Self {
            source_file,
            key_size,
            root_address,
            next_free,
            generation: block.read_u64(offsets::GENERATION),
        })
    }
}

/// Errors that can occur when reading or writing the header.
#[derive(Debug)]
pub enum HeaderError {
    /// Source filename does not fit the 256-byte field.
    SourceNameTooLong(usize),
    /// Key size of zero.
    InvalidKeySize(u64),
    /// Root address is not a node block.
    InvalidRootAddress(u64),
    /// Free cursor is not a node block past the root.
    InvalidNextFree(u64),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceNameTooLong(len) => {
                write!(f, "source filename too long: {len} bytes (max {SOURCE_NAME_LEN})")
            }
            Self::InvalidKeySize(size) => write!(f, "invalid key size: {size}"),
            Self::InvalidRootAddress(addr) => write!(f, "invalid root address: {addr}"),
            Self::InvalidNextFree(addr) => write!(f, "invalid free block offset: {addr}"),
        }
    }
}

impl std::error::Error for HeaderError {}
