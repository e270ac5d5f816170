//! An index file together with the record file it points into.
//!
//! `Index` ties a [`BPlusTree`] to the source file named in its header and
//! turns raw user keys into fixed-width tree keys.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::btree::{BPlusTree, InsertOutcome, Key, TreeConfig, TreeError};
use crate::records::{self, RecordError};
use crate::storage::FileError;

/// An open index.
#[derive(Debug)]
pub struct Index {
    tree: BPlusTree,
    source_path: PathBuf,
}

/// Result of [`Index::find`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindOutcome {
    Found { offset: u64, record: String },
    NotFound,
}

/// Result of [`Index::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The record was appended at `offset` and indexed.
    Inserted { offset: u64 },
    /// The key is already indexed; neither file was touched.
    AlreadyExists,
}

impl fmt::Display for FindOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found { offset, record } => write!(f, "At {offset}, record: {record}"),
            Self::NotFound => f.write_str("key not found"),
        }
    }
}

impl fmt::Display for InsertResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted { offset } => {
                write!(f, "insert succeeded and the record position is: {offset}")
            }
            Self::AlreadyExists => f.write_str("Key already exists"),
        }
    }
}

impl Index {
    /// Build a new index over `source_path`, replacing any index at
    /// `index_path`.
    ///
    /// The header records the file name of `source_path`. [`Index::open`]
    /// looks for that name next to the index file.
    /// Returns the index and the number of keys loaded.
    pub fn create(
        source_path: &Path,
        index_path: &Path,
        key_size: usize,
        key_width: usize,
    ) -> Result<(Self, usize), IndexError> {
        let source_name = source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| IndexError::InvalidSource(source_path.to_path_buf()))?;
        let config = TreeConfig::for_key_size(key_size)?;
        let records = records::load_source(source_path, key_width, key_size)?;

        let mut tree = BPlusTree::create_truncate(index_path, &source_name, config)?;
        let mut count = 0;
        for (key, offset) in records {
            if tree.insert(key, offset)? == InsertOutcome::Inserted {
                count += 1;
            }
        }
        tree.sync()?;

        tracing::info!(
            "indexed {count} keys of {} into {}",
            source_path.display(),
            index_path.display()
        );

        Ok((
            Self {
                tree,
                source_path: source_path.to_path_buf(),
            },
            count,
        ))
    }

    /// Open an existing index.
    ///
    /// The source file is the one named in the header, looked up next to
    /// the index file.
    pub fn open(index_path: &Path) -> Result<Self, IndexError> {
        if !index_path.is_file() {
            return Err(IndexError::Missing(index_path.to_path_buf()));
        }

        let mut tree = BPlusTree::open(index_path)?;
        let header = tree.header()?;
        let source_path = index_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(&header.source_file);

        Ok(Self { tree, source_path })
    }

    /// Path of the record file.
    #[must_use]
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Key width of the index.
    #[must_use]
    pub const fn key_size(&self) -> usize {
        self.tree.config().key_size()
    }

    /// Look up `raw_key` and read its record.
    pub fn find(&mut self, raw_key: &str) -> Result<FindOutcome, IndexError> {
        let key = self.key(raw_key);
        let Some(offset) = self.tree.find(&key)? else {
            return Ok(FindOutcome::NotFound);
        };

        let record = self.record_at(offset)?;
        Ok(FindOutcome::Found { offset, record })
    }

    /// Append `"<raw_key> <value>"` to the record file and index it.
    ///
    /// An indexed key is never overwritten.
    ///
    /// The record is appended before the tree is updated, since the tree
    /// stores its offset. If the tree insert fails the record stays in the
    /// source file without a key pointing at it, and a retry appends it
    /// again.
    pub fn insert(&mut self, raw_key: &str, value: &str) -> Result<InsertResult, IndexError> {
        let key = self.key(raw_key);
        if self.tree.find(&key)?.is_some() {
            tracing::warn!("rejected insert of existing key {key}");
            return Ok(InsertResult::AlreadyExists);
        }

        let offset = records::append_record(&self.source_path, raw_key, value)?;
        match self.tree.insert(key, offset)? {
            InsertOutcome::Inserted => Ok(InsertResult::Inserted { offset }),
            InsertOutcome::DuplicateKey => Ok(InsertResult::AlreadyExists),
        }
    }

    /// Read up to `count` records in key order starting at `raw_key`.
    ///
    /// An absent key yields at most the record of the next larger key.
    pub fn list(&mut self, raw_key: &str, count: usize) -> Result<Vec<String>, IndexError> {
        let key = self.key(raw_key);
        self.tree
            .traverse_leaf_nodes(&key, count)?
            .into_iter()
            .map(|offset| self.record_at(offset))
            .collect()
    }

    fn key(&self, raw_key: &str) -> Key {
        Key::normalize(raw_key, self.key_size())
    }

    fn record_at(&self, offset: u64) -> Result<String, IndexError> {
        records::read_record_at(&self.source_path, offset)?
            .ok_or(IndexError::DanglingOffset(offset))
    }
}

/// Errors that can occur during index operations.
#[derive(Debug)]
pub enum IndexError {
    /// No index file at the given path.
    Missing(PathBuf),
    /// Source path has no file name.
    InvalidSource(PathBuf),
    /// Tree error.
    Tree(TreeError),
    /// Record file error.
    Record(RecordError),
    /// The index points past the end of the record file.
    DanglingOffset(u64),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(_) => f.write_str("Please create index file first"),
            Self::InvalidSource(path) => write!(f, "invalid source file: {}", path.display()),
            Self::Tree(e) => write!(f, "index error: {e}"),
            Self::Record(e) => write!(f, "record file error: {e}"),
            Self::DanglingOffset(offset) => {
                write!(f, "no record at offset {offset} of the source file")
            }
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Tree(e) => Some(e),
            Self::Record(e) => Some(e),
            Self::Missing(_) | Self::InvalidSource(_) | Self::DanglingOffset(_) => None,
        }
    }
}

impl From<TreeError> for IndexError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<FileError> for IndexError {
    fn from(e: FileError) -> Self {
        Self::Tree(TreeError::File(e))
    }
}

impl From<RecordError> for IndexError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}
