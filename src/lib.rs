//! Metadata engine of a log-structured filesystem.
//!
//! Every update is an append. The on-disk indirection chain is
//!
//! ```text
//! checkpoint -> imap chunk -> inode -> directory / data block
//! ```
//!
//! and a transaction becomes visible only when the checkpoint that references
//! its imap chunk is appended.
#![cfg_attr(not(any(test, feature = "std")), no_std)]
extern crate alloc;

mod common;
pub mod block;
pub mod config;
pub mod device;
pub mod log_manager;
pub mod imap;
pub mod checkpoint;
pub mod directory;
pub mod operation;
pub mod transaction;
pub mod tx_engine;
pub mod recovery;
pub mod cleaner;
pub mod fsck;
pub mod snapshot;


pub use block::{Block, BlockKind, Checkpoint, DataBlock, DirEntry, DirectoryBlock, ImapChunk, Inode};
pub use common::{FileType, LfsError, LfsResult};
pub use config::LfsConfig;
pub use device::RamDevice;
#[cfg(feature = "std")]
pub use device::FileDevice;
pub use log_manager::{BlockDevice, LogManager};
pub use transaction::SharedLfs;
pub use tx_engine::Lfs;

/// Physical log address of a block.
pub type Addr = u32;
/// Inode number.
pub type Inum = u32;

/// Size of the payload area of every record.
pub const BLOCK_SIZE: usize = 4096;
/// Tag, payload and the CRC-32 of both.
pub const RECORD_SIZE: usize = 4 + BLOCK_SIZE + 4;

pub const NUM_IMAP_PTRS_IN_CR: usize = 256;
pub const NUM_INODES_PER_IMAP_CHUNK: usize = 16;
pub const NUM_INODE_PTRS: usize = 14;
pub const NUM_DIR_ENTRIES: usize = 128;
pub const MAX_INODES: usize = NUM_IMAP_PTRS_IN_CR * NUM_INODES_PER_IMAP_CHUNK;
/// Bytes reserved per name, NUL terminator included.
pub const DIR_NAME_LEN: usize = 28;
pub const MAX_NAME_LEN: usize = DIR_NAME_LEN - 1;

pub const ROOT_INODE: Inum = 0;
pub const ADDR_CHECKPOINT_BLOCK: Addr = 0;
/// Default capacity of the log in blocks.
pub const MAX_DISK_SIZE: usize = 1000;

/// On-disk sentinel for an absent address or inode number.
pub const ABSENT: i32 = -1;

#[macro_export]
macro_rules! i32 {
    ($x:expr) => {
        {
            let b = $x;
            i32::from_le_bytes([b[0], b[1], b[2], b[3]])
        }
    };
}
