//! Block storage for the index file.
//!
//! # File Format
//!
//! The index is a single file of 1KB blocks addressed by byte offset:
//!
//! - Block 0: header (source filename, key size, root address, free cursor)
//! - Blocks 1024, 2048, ...: one B+Tree node each
//!
//! # Usage
//!
//! ```ignore
//! use bptree::storage::{BlockFile, IndexHeader};
//!
//! let mut file = BlockFile::create(path, &IndexHeader::new("records.txt", 15))?;
//! let header = file.read_header()?;
//! let root = file.read_block(header.root_address)?;
//! ```

mod block;
mod file;
mod header;

pub use block::{Address, BLOCK_SIZE, BLOCK_SIZE_U64, Block, NULL_ADDRESS, is_node_address};
pub use file::{BlockFile, FileError};
pub use header::{FIRST_NODE_ADDRESS, HeaderError, IndexHeader, SOURCE_NAME_LEN};
