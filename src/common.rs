use core::fmt;

use onlyerror::Error;
use serde::{Deserialize, Serialize};

use crate::{block::BlockKind, Addr, Inum};

pub type LfsResult<T> = Result<T, LfsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LfsError {
    #[error("log is full")]
    StoreFull,
    #[error("address {0} is outside the log")]
    InvalidAddress(Addr),
    #[error("inode {0} is not mapped")]
    UnknownInode(Inum),
    #[error("inode {0} is not a directory")]
    NotADirectory(Inum),
    #[error("entry already exists")]
    AlreadyExists,
    #[error("entry not found")]
    NotFound,
    #[error("directory {0} has no free slot")]
    DirectoryFull(Inum),
    #[error("no free inode numbers")]
    NoFreeInodes,
    #[error("invalid name")]
    InvalidName,
    #[error("name too long")]
    NameTooLong,
    #[error("no valid checkpoint in log")]
    NoCheckpoint,
    #[error("block {addr} is {found}, expected {expected}")]
    UnexpectedBlock {
        addr: Addr,
        expected: BlockKind,
        found: BlockKind,
    },
    #[error("record at {0} is corrupted")]
    Corrupted(Addr),
    #[error("device I/O error")]
    Io,
    #[error("checkpoint {0} appended but not flushed")]
    FlushFailed(Addr),
    #[error("invalid configuration")]
    InvalidConfig,
    #[error("malformed operation batch")]
    InvalidBatch,
    #[error("operation needs write access")]
    ReadOnly,
}

/// File type stored in an inode.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    Regular = 0,
    Directory = 1,
}

impl FileType {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(FileType::Regular),
            1 => Some(FileType::Directory),
            _ => None,
        }
    }

    pub fn is_dir(self) -> bool {
        self == FileType::Directory
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Regular => f.write_str("regular"),
            FileType::Directory => f.write_str("directory"),
        }
    }
}
