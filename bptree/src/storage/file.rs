//! Index file I/O operations.
//!
//! This module reads and writes whole blocks of the index file. There is no
//! buffering: every call goes straight to the file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::block::{Address, BLOCK_SIZE_U64, Block, NULL_ADDRESS, is_node_address};
use crate::storage::header::{HeaderError, IndexHeader};

/// An index file handle with block-level I/O operations.
#[derive(Debug)]
pub struct BlockFile {
    file: File,
    path: PathBuf,
    /// Current file length in bytes.
    file_size: u64,
}

impl BlockFile {
    /// Create a new index file at the given path.
    ///
    /// Writes `header` to block 0 and extends the file with zeroed blocks up
    /// to the header's free cursor. Returns an error if the file already
    /// exists.
    pub fn create(path: &Path, header: &IndexHeader) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        Self::initialize(file, path, header)
    }

    /// Create an index file, replacing any file already at `path`.
    pub fn create_truncate(path: &Path, header: &IndexHeader) -> Result<Self, FileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(FileError::Io)?;

        Self::initialize(file, path, header)
    }

    fn initialize(file: File, path: &Path, header: &IndexHeader) -> Result<Self, FileError> {
        let mut this = Self {
            file,
            path: path.to_path_buf(),
            file_size: 0,
        };

        this.write_header(header)?;
        this.file.set_len(header.next_free).map_err(FileError::Io)?;
        this.file_size = header.next_free;
        this.sync()?;

        Ok(this)
    }

    /// Open an existing index file and validate its header.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let file_size = file.metadata().map_err(FileError::Io)?.len();
        let mut this = Self {
            file,
            path: path.to_path_buf(),
            file_size,
        };

        // Fails on a truncated or foreign file.
        this.read_header()?;

        Ok(this)
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the file in bytes.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Read the header from block 0.
    pub fn read_header(&mut self) -> Result<IndexHeader, FileError> {
        let block = self.read_at(NULL_ADDRESS)?;
        IndexHeader::from_block(&block).map_err(FileError::Header)
    }

    /// Write the header to block 0.
    pub fn write_header(&mut self, header: &IndexHeader) -> Result<(), FileError> {
        let block = header.to_block().map_err(FileError::Header)?;
        self.write_at(NULL_ADDRESS, &block)
    }

    /// Read a node block.
    ///
    /// Returns an error if the address is not a node block or lies past the
    /// end of the file.
    pub fn read_block(&mut self, address: Address) -> Result<Block, FileError> {
        Self::check_node_address(address)?;
        self.read_at(address)
    }

    /// Write a node block, extending the file if the block lies past its end.
    pub fn write_block(&mut self, address: Address, block: &Block) -> Result<(), FileError> {
        Self::check_node_address(address)?;
        self.write_at(address, block)
    }

    /// Sync all pending writes to disk.
    pub fn sync(&self) -> Result<(), FileError> {
        self.file.sync_all().map_err(FileError::Io)
    }

    const fn check_node_address(address: Address) -> Result<(), FileError> {
        if !is_node_address(address) {
            return Err(FileError::InvalidAddress(address));
        }
        Ok(())
    }

    fn read_at(&mut self, address: Address) -> Result<Block, FileError> {
        if address + BLOCK_SIZE_U64 > self.file_size {
            return Err(FileError::OutOfBounds {
                address,
                file_size: self.file_size,
            });
        }

        let mut block = Block::new();
        self.file
            .seek(SeekFrom::Start(address))
            .map_err(FileError::Io)?;
        self.file
            .read_exact(block.as_bytes_mut())
            .map_err(FileError::Io)?;

        Ok(block)
    }

    fn write_at(&mut self, address: Address, block: &Block) -> Result<(), FileError> {
        self.file
            .seek(SeekFrom::Start(address))
            .map_err(FileError::Io)?;
        self.file
            .write_all(block.as_bytes())
            .map_err(FileError::Io)?;

        self.file_size = self.file_size.max(address + BLOCK_SIZE_U64);
        Ok(())
    }
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(PathBuf),
    /// Header error.
    Header(HeaderError),
    /// Address is not a node block (zero or not block aligned).
    InvalidAddress(Address),
    /// Block lies past the end of the file.
    OutOfBounds { address: Address, file_size: u64 },
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::InvalidAddress(address) => write!(f, "invalid block address: {address}"),
            Self::OutOfBounds { address, file_size } => {
                write!(
                    f,
                    "block {address} out of bounds (file size: {file_size})"
                )
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::AlreadyExists(_) | Self::InvalidAddress(_) | Self::OutOfBounds { .. } => None,
        }
    }
}
