// Request flow for one command line:
// 1. Parse the line into a `Command`
// 2. Open (or build) the `Index`, which reads the header for key size
//    and source file
// 3. Run the tree operation against the index file
// 4. Read matching records from the source file and format the result
//
// Layers, bottom up:
//  - storage: 1KB blocks and the header block
//  - btree: node codec and the tree engine
//  - records / index: source file access and the user-facing operations
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod btree;
pub mod command;
pub mod config;
pub mod index;
pub mod records;
pub mod storage;

pub use command::{Command, CommandError};
pub use config::{ConfigError, IndexConfig};
pub use index::{FindOutcome, Index, IndexError, InsertResult};
