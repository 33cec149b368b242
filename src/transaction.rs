use alloc::vec::Vec;

use log::trace;
use spin::RwLock;

use crate::{
    block::{Block, ImapChunk},
    common::{FileType, LfsError, LfsResult},
    imap::ImapCache,
    log_manager::{BlockDevice, LogManager},
    operation::Operation,
    tx_engine::Lfs,
    Addr, Inum, NUM_INODES_PER_IMAP_CHUNK,
};

/// Blocks of one update, staged in append order.
///
/// Addresses are dense, so the address of every staged block is known before
/// anything is written: `base + position`. Imap updates are held here and
/// reach the cache only after the checkpoint append succeeds.
pub struct Transaction {
    pub id: u64,
    base: Addr,
    blocks: Vec<Block>,
    imap_updates: Vec<(Inum, Addr)>,
}

impl Transaction {
    pub fn new(id: u64, base: Addr) -> Self {
        Self {
            id,
            base,
            blocks: Vec::new(),
            imap_updates: Vec::new(),
        }
    }

    /// Queues `block`, returning the address it will be appended at.
    pub fn stage(&mut self, block: Block) -> Addr {
        let addr = self.base + self.blocks.len() as Addr;
        trace!("txn {}: stage {} at {}", self.id, block.kind(), addr);
        self.blocks.push(block);
        addr
    }

    pub fn map_inode(&mut self, inum: Inum, addr: Addr) {
        self.imap_updates.push((inum, addr));
    }

    /// `chunk` as it will read once this transaction commits.
    pub fn rebuild_chunk(&self, imap: &ImapCache, chunk: usize) -> ImapChunk {
        let mut imap_chunk = imap.rebuild_chunk(chunk);
        for &(inum, addr) in &self.imap_updates {
            if ImapCache::chunk_of(inum) == chunk {
                imap_chunk.entries[inum as usize % NUM_INODES_PER_IMAP_CHUNK] = Some(addr);
            }
        }
        imap_chunk
    }

    /// Distinct chunk indices touched by the staged imap updates.
    pub fn dirty_chunks(&self) -> Vec<usize> {
        let mut chunks: Vec<usize> = self.imap_updates.iter().map(|&(inum, _)| ImapCache::chunk_of(inum)).collect();
        chunks.sort_unstable();
        chunks.dedup();
        chunks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Appends every staged block. The checkpoint is not part of this.
    pub fn append_to<D: BlockDevice>(&self, log: &mut LogManager<D>) -> LfsResult<()> {
        for (i, block) in self.blocks.iter().enumerate() {
            let addr = log.append(block)?;
            if addr != self.base + i as Addr {
                log::error!("txn {}: block landed at {} instead of {}", self.id, addr, self.base + i as Addr);
                return Err(LfsError::Io);
            }
        }
        Ok(())
    }

    pub fn imap_updates(&self) -> &[(Inum, Addr)] {
        &self.imap_updates
    }
}

/// Engine behind a single global writer lock.
///
/// `create` holds the write lock for its whole transaction; lookups share the
/// read lock and therefore only ever see committed state.
pub struct SharedLfs<D: BlockDevice> {
    fs: RwLock<Lfs<D>>,
}

impl<D: BlockDevice> SharedLfs<D> {
    pub fn new(fs: Lfs<D>) -> Self {
        Self { fs: RwLock::new(fs) }
    }

    pub fn lookup(&self, parent: Inum, name: &str) -> LfsResult<Inum> {
        self.fs.read().lookup(parent, name)
    }

    pub fn create(&self, parent: Inum, ftype: FileType, name: &str) -> LfsResult<Inum> {
        self.fs.write().create(parent, ftype, name)
    }

    pub fn execute(&self, op: &Operation) -> LfsResult<Inum> {
        if op.is_read_only() {
            op.apply_read(&self.fs.read())
        } else {
            op.apply(&mut self.fs.write())
        }
    }

    /// Runs `f` against a consistent view of the engine.
    pub fn read<R>(&self, f: impl FnOnce(&Lfs<D>) -> R) -> R {
        f(&self.fs.read())
    }

    pub fn into_inner(self) -> Lfs<D> {
        self.fs.into_inner()
    }
}
