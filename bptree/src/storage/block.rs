//! Block type and constants for the index file.
//!
//! The index file is a sequence of 1KB blocks. Block 0 holds the header,
//! every other block holds exactly one tree node.

/// Block size in bytes (1KB).
pub const BLOCK_SIZE: usize = 1024;

/// Block size as u64 for offset calculations.
pub const BLOCK_SIZE_U64: u64 = BLOCK_SIZE as u64;

/// A block address: the byte offset of the block in the index file.
///
/// Address 0 is the header block, so 0 doubles as "no block" in node
/// fields (no parent, no next leaf).
pub type Address = u64;

/// Sentinel for "no block".
pub const NULL_ADDRESS: Address = 0;

/// A raw block buffer.
///
/// Multi-byte integers are stored big-endian.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    data: Box<[u8; BLOCK_SIZE]>,
}

impl Block {
    /// Create a new zeroed block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; BLOCK_SIZE]),
        }
    }

    /// Get the raw block data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.data
    }

    /// Get mutable access to the raw block data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u8 at the given offset.
    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    /// Write a u8 at the given offset.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a u64 (big-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_be_bytes(buf)
    }

    /// Write a u64 (big-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("first_19_bytes", &&self.data[..19])
            .finish_non_exhaustive()
    }
}

/// Whether `address` is a valid node block address (non-zero, block aligned).
#[must_use]
pub const fn is_node_address(address: Address) -> bool {
    address != NULL_ADDRESS && address % BLOCK_SIZE_U64 == 0
}
