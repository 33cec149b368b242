//! Consistency checker.
//!
//! Re-derives the namespace from the log and reports everything that breaks
//! the invariants the engine relies on. The checker never writes.

use alloc::{collections::BTreeSet, string::String, vec::Vec};

use bitflags::bitflags;

use crate::{
    block::{Block, BlockKind},
    common::{FileType, LfsError, LfsResult},
    directory::{DOT, DOTDOT},
    imap::ImapCache,
    log_manager::BlockDevice,
    tx_engine::Lfs,
    Addr, Inum, NUM_IMAP_PTRS_IN_CR, NUM_INODES_PER_IMAP_CHUNK,
};

bitflags! {
    pub struct CheckFlags: u32 {
        /// Cache equals the chunks named by the live checkpoint, and every
        /// mapping names an inode block written before that checkpoint.
        const IMAP = 1 << 0;
        /// Directory inodes point at directory blocks, regular ones at data.
        const POINTERS = 1 << 1;
        /// "." and ".." of every directory.
        const DOT_ENTRIES = 1 << 2;
        /// No name twice in one directory.
        const UNIQUE_NAMES = 1 << 3;
        /// Every entry names a mapped inode.
        const ENTRIES = 1 << 4;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    ImapMismatch { inum: Inum, cached: Option<Addr>, logged: Option<Addr> },
    NotAnInode { inum: Inum, addr: Addr, found: BlockKind },
    AfterCheckpoint { inum: Inum, addr: Addr },
    BadPointer { inum: Inum, slot: usize, addr: Addr, found: Option<BlockKind> },
    BadDotEntry { dir: Inum, name: &'static str, found: Option<Inum> },
    DuplicateName { dir: Inum, name: String },
    DanglingEntry { dir: Inum, name: String, inum: Inum },
}

/// Runs the checks selected by `flags`.
///
/// Errors are returned only for failures that stop the walk itself, such as
/// device I/O; everything else is a [`Problem`].
pub fn check<D: BlockDevice>(fs: &Lfs<D>, flags: CheckFlags) -> LfsResult<Vec<Problem>> {
    let mut problems = Vec::new();
    if flags.contains(CheckFlags::IMAP) {
        check_imap(fs, &mut problems)?;
    }

    for (inum, addr) in fs.imap().live() {
        let inode = match fs.read_block(addr) {
            Ok(Block::Inode(inode)) => inode,
            Ok(other) => {
                if flags.contains(CheckFlags::IMAP) {
                    problems.push(Problem::NotAnInode { inum, addr, found: other.kind() });
                }
                continue;
            }
            Err(LfsError::InvalidAddress(_)) | Err(LfsError::Corrupted(_)) => continue,
            Err(err) => return Err(err),
        };

        let wanted = match inode.ftype {
            FileType::Directory => BlockKind::Directory,
            FileType::Regular => BlockKind::Data,
        };
        let mut names = BTreeSet::new();
        for (slot, ptr) in inode.blocks() {
            let block = match fs.read_block(ptr) {
                Ok(block) => block,
                Err(LfsError::InvalidAddress(_)) | Err(LfsError::Corrupted(_)) => {
                    if flags.contains(CheckFlags::POINTERS) {
                        problems.push(Problem::BadPointer { inum, slot, addr: ptr, found: None });
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };
            if block.kind() != wanted {
                if flags.contains(CheckFlags::POINTERS) {
                    problems.push(Problem::BadPointer { inum, slot, addr: ptr, found: Some(block.kind()) });
                }
                continue;
            }
            let Block::Directory(dir) = block else { continue };
            for entry in dir.live() {
                let Some(child) = entry.inum else { continue };
                let name = String::from_utf8_lossy(entry.name()).into_owned();
                if flags.contains(CheckFlags::ENTRIES) && fs.resolve(child).is_err() {
                    problems.push(Problem::DanglingEntry { dir: inum, name: name.clone(), inum: child });
                }
                if !names.insert(name.clone()) && flags.contains(CheckFlags::UNIQUE_NAMES) {
                    problems.push(Problem::DuplicateName { dir: inum, name });
                }
            }
        }

        if inode.ftype.is_dir() && flags.contains(CheckFlags::DOT_ENTRIES) {
            check_dots(fs, inum, &mut problems)?;
        }
    }
    Ok(problems)
}

fn check_imap<D: BlockDevice>(fs: &Lfs<D>, problems: &mut Vec<Problem>) -> LfsResult<()> {
    let cr_addr = fs.checkpoint().addr();
    for chunk in 0..NUM_IMAP_PTRS_IN_CR {
        let entries = fs.read_imap_chunk(chunk)?.map(|c| c.entries);
        for inum in ImapCache::chunk_range(chunk) {
            let cached = fs.resolve(inum).ok();
            let logged = entries.and_then(|entries| entries[inum as usize % NUM_INODES_PER_IMAP_CHUNK]);
            if cached != logged {
                problems.push(Problem::ImapMismatch { inum, cached, logged });
            }
            if let Some(addr) = cached {
                if addr >= cr_addr {
                    problems.push(Problem::AfterCheckpoint { inum, addr });
                }
            }
        }
    }
    Ok(())
}

fn check_dots<D: BlockDevice>(fs: &Lfs<D>, dir: Inum, problems: &mut Vec<Problem>) -> LfsResult<()> {
    let dot = fs.lookup(dir, DOT).ok();
    if dot != Some(dir) {
        problems.push(Problem::BadDotEntry { dir, name: DOT, found: dot });
    }
    let dotdot = fs.lookup(dir, DOTDOT).ok();
    let parent_is_dir = match dotdot {
        Some(parent) => fs.read_inode(parent).map(|inode| inode.ftype.is_dir()).unwrap_or(false),
        None => false,
    };
    if !parent_is_dir {
        problems.push(Problem::BadDotEntry { dir, name: DOTDOT, found: dotdot });
    }
    Ok(())
}
