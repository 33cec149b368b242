//! In-memory inode map.
//!
//! The cache is derived state: it always equals the union of the imap chunks
//! named by the live checkpoint, and is rebuilt from the log on mount.

use alloc::{vec, vec::Vec};
use core::ops::Range;

use crate::{
    block::ImapChunk,
    common::{LfsError, LfsResult},
    Addr, Inum, MAX_INODES, NUM_INODES_PER_IMAP_CHUNK,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapCache {
    entries: Vec<Option<Addr>>,
}

impl Default for ImapCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ImapCache {
    pub fn new() -> Self {
        Self {
            entries: vec![None; MAX_INODES],
        }
    }

    pub fn chunk_of(inum: Inum) -> usize {
        inum as usize / NUM_INODES_PER_IMAP_CHUNK
    }

    /// Inode numbers covered by `chunk`.
    pub fn chunk_range(chunk: usize) -> Range<Inum> {
        let start = (chunk * NUM_INODES_PER_IMAP_CHUNK) as Inum;
        start..start + NUM_INODES_PER_IMAP_CHUNK as Inum
    }

    pub fn resolve(&self, inum: Inum) -> LfsResult<Addr> {
        self.entries
            .get(inum as usize)
            .copied()
            .flatten()
            .ok_or(LfsError::UnknownInode(inum))
    }

    pub fn set(&mut self, inum: Inum, addr: Addr) -> LfsResult<()> {
        let slot = self
            .entries
            .get_mut(inum as usize)
            .ok_or(LfsError::UnknownInode(inum))?;
        *slot = Some(addr);
        Ok(())
    }

    /// Snapshot of the cached entries for `chunk`, ready to append.
    pub fn rebuild_chunk(&self, chunk: usize) -> ImapChunk {
        let start = chunk * NUM_INODES_PER_IMAP_CHUNK;
        let mut entries = [None; NUM_INODES_PER_IMAP_CHUNK];
        entries.copy_from_slice(&self.entries[start..start + NUM_INODES_PER_IMAP_CHUNK]);
        ImapChunk { entries }
    }

    /// Installs a chunk read from the log.
    pub fn load_chunk(&mut self, chunk: usize, imap_chunk: &ImapChunk) {
        let start = chunk * NUM_INODES_PER_IMAP_CHUNK;
        self.entries[start..start + NUM_INODES_PER_IMAP_CHUNK].copy_from_slice(&imap_chunk.entries);
    }

    /// Lowest unmapped inode number.
    pub fn allocate(&self) -> LfsResult<Inum> {
        self.entries
            .iter()
            .position(Option::is_none)
            .map(|inum| inum as Inum)
            .ok_or(LfsError::NoFreeInodes)
    }

    /// Mapped `(inum, address)` pairs in inode-number order.
    pub fn live(&self) -> impl Iterator<Item = (Inum, Addr)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(inum, addr)| addr.map(|addr| (inum as Inum, addr)))
    }

    pub fn clear(&mut self) {
        self.entries.fill(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_of() {
        assert_eq!(ImapCache::chunk_of(0), 0);
        assert_eq!(ImapCache::chunk_of(15), 0);
        assert_eq!(ImapCache::chunk_of(16), 1);
        assert_eq!(ImapCache::chunk_of(4095), 255);
        assert_eq!(ImapCache::chunk_range(2), 32..48);
    }

    #[test]
    fn test_resolve_unknown() {
        let mut imap = ImapCache::new();
        assert_eq!(imap.resolve(3), Err(LfsError::UnknownInode(3)));
        assert_eq!(imap.resolve(MAX_INODES as Inum), Err(LfsError::UnknownInode(4096)));
        assert_eq!(imap.set(MAX_INODES as Inum, 1), Err(LfsError::UnknownInode(4096)));
        imap.set(3, 40).unwrap();
        assert_eq!(imap.resolve(3), Ok(40));
    }

    #[test]
    fn test_rebuild_and_load_chunk() {
        let mut imap = ImapCache::new();
        imap.set(17, 5).unwrap();
        imap.set(31, 9).unwrap();
        imap.set(32, 11).unwrap();
        let chunk = imap.rebuild_chunk(1);
        assert_eq!(chunk.entries[1], Some(5));
        assert_eq!(chunk.entries[15], Some(9));
        assert_eq!(chunk.entries.iter().flatten().count(), 2);

        let mut fresh = ImapCache::new();
        fresh.load_chunk(1, &chunk);
        assert_eq!(fresh.live().collect::<Vec<_>>(), vec![(17, 5), (31, 9)]);
    }

    #[test]
    fn test_allocate_lowest_free() {
        let mut imap = ImapCache::new();
        assert_eq!(imap.allocate(), Ok(0));
        imap.set(0, 2).unwrap();
        imap.set(2, 8).unwrap();
        assert_eq!(imap.allocate(), Ok(1));
        for inum in 0..MAX_INODES as Inum {
            imap.set(inum, 1).unwrap();
        }
        assert_eq!(imap.allocate(), Err(LfsError::NoFreeInodes));
    }
}
