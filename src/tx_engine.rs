use alloc::{boxed::Box, string::String, vec::Vec};

use log::{debug, info, warn};

use crate::{
    block::{Block, Checkpoint, DataBlock, DirectoryBlock, ImapChunk, Inode},
    checkpoint::CheckpointRegion,
    common::{FileType, LfsError, LfsResult},
    config::LfsConfig,
    directory::validate_name,
    fsck::{self, CheckFlags},
    imap::ImapCache,
    log_manager::{BlockDevice, LogManager},
    recovery,
    transaction::Transaction,
    Addr, Inum, ADDR_CHECKPOINT_BLOCK, MAX_NAME_LEN, ROOT_INODE,
};

/// The filesystem context: block store, imap cache and checkpoint region.
///
/// All state is owned here and every operation goes through `&self` or
/// `&mut self`; wrap it in a [`SharedLfs`](crate::SharedLfs) for use from
/// several threads.
pub struct Lfs<D: BlockDevice> {
    log: LogManager<D>,
    imap: ImapCache,
    cr: CheckpointRegion,
    config: LfsConfig,
    next_txn_id: u64,
}

/// Where `create` will put the new entry.
struct FreeSlot {
    /// Pointer slot in the parent inode.
    pointer: usize,
    block: Box<DirectoryBlock>,
    entry: usize,
}

impl<D: BlockDevice> Lfs<D> {
    /// Writes an empty filesystem holding only the root directory.
    ///
    /// Layout: checkpoint at 0, root directory block at 1, root inode at 2,
    /// imap chunk 0 at 3 and the checkpoint committing them at 4.
    pub fn format(device: D, config: LfsConfig) -> LfsResult<Self> {
        config.validate()?;
        let mut log = LogManager::new(device, config.max_blocks)?;
        if !log.is_empty() {
            return Err(LfsError::AlreadyExists);
        }

        let cr_addr = log.append(&Block::Checkpoint(Box::new(Checkpoint::new(1))))?;
        debug_assert_eq!(cr_addr, ADDR_CHECKPOINT_BLOCK);
        let root_dir = log.append(&Block::Directory(DirectoryBlock::new(ROOT_INODE, ROOT_INODE)))?;
        let mut root = Inode::new(FileType::Directory, 0);
        root.pointers[0] = Some(root_dir);
        let root_addr = log.append(&Block::Inode(root))?;

        let mut imap = ImapCache::new();
        imap.set(ROOT_INODE, root_addr)?;
        let chunk = ImapCache::chunk_of(ROOT_INODE);
        let chunk_addr = log.append(&Block::ImapChunk(imap.rebuild_chunk(chunk)))?;

        let mut cr = CheckpointRegion::new(cr_addr, Checkpoint::new(1));
        cr.set_chunk_address(chunk, chunk_addr);
        cr.commit(&mut log)?;
        info!("formatted: root inode at {}, {} blocks", root_addr, log.len());

        Ok(Self {
            log,
            imap,
            cr,
            config,
            next_txn_id: 1,
        })
    }

    /// Opens an existing log, recovering from its latest valid checkpoint.
    pub fn mount(device: D, config: LfsConfig) -> LfsResult<Self> {
        config.validate()?;
        let log = LogManager::new(device, config.max_blocks)?;
        let (cr_addr, cp) = recovery::find_checkpoint(&log)?;
        let imap = recovery::rebuild_imap(&log, &cp)?;
        let fs = Self {
            log,
            imap,
            cr: CheckpointRegion::new(cr_addr, cp),
            config,
            next_txn_id: 1,
        };

        match fs.read_inode(ROOT_INODE) {
            Ok(root) if root.ftype.is_dir() => {}
            Ok(_) | Err(LfsError::UnknownInode(_)) | Err(LfsError::UnexpectedBlock { .. }) => {
                warn!("checkpoint at {} has no root directory", cr_addr);
                return Err(LfsError::NoCheckpoint);
            }
            Err(err) => return Err(err),
        }
        if fs.config.check_on_mount {
            let problems = fsck::check(&fs, CheckFlags::all())?;
            if !problems.is_empty() {
                for problem in &problems {
                    warn!("mount check: {:?}", problem);
                }
                return Err(LfsError::Corrupted(cr_addr));
            }
        }
        info!(
            "mounted: checkpoint at {}, {} inodes, {} blocks in log",
            cr_addr,
            fs.imap.live().count(),
            fs.log.len()
        );
        Ok(fs)
    }

    /// Assembles an engine from parts that are already consistent.
    pub(crate) fn from_parts(log: LogManager<D>, imap: ImapCache, cr: CheckpointRegion, config: LfsConfig) -> Self {
        Self {
            log,
            imap,
            cr,
            config,
            next_txn_id: 1,
        }
    }

    pub fn resolve(&self, inum: Inum) -> LfsResult<Addr> {
        self.imap.resolve(inum)
    }

    pub fn read_block(&self, addr: Addr) -> LfsResult<Block> {
        self.log.read(addr)
    }

    pub fn read_inode(&self, inum: Inum) -> LfsResult<Inode> {
        let addr = self.imap.resolve(inum)?;
        self.log.read(addr)?.into_inode(addr)
    }

    pub fn read_directory(&self, addr: Addr) -> LfsResult<Box<DirectoryBlock>> {
        self.log.read(addr)?.into_directory(addr)
    }

    fn read_dir_inode(&self, inum: Inum) -> LfsResult<Inode> {
        let inode = self.read_inode(inum)?;
        if !inode.ftype.is_dir() {
            return Err(LfsError::NotADirectory(inum));
        }
        Ok(inode)
    }

    /// Finds `name` in directory `parent`.
    ///
    /// Directory blocks are scanned in pointer order and entries in slot
    /// order; the first live match wins.
    pub fn lookup(&self, parent: Inum, name: &str) -> LfsResult<Inum> {
        let dir = self.read_dir_inode(parent)?;
        // no stored name is that long
        if name.len() > MAX_NAME_LEN {
            return Err(LfsError::NotFound);
        }
        for (_, addr) in dir.blocks() {
            if let Some(inum) = self.read_directory(addr)?.find(name) {
                return Ok(inum);
            }
        }
        Err(LfsError::NotFound)
    }

    /// Live entries of directory `inum`, in lookup order.
    pub fn read_dir(&self, inum: Inum) -> LfsResult<Vec<(String, Inum)>> {
        let dir = self.read_dir_inode(inum)?;
        let mut entries = Vec::new();
        for (_, addr) in dir.blocks() {
            let block = self.read_directory(addr)?;
            for entry in block.live() {
                if let Some(child) = entry.inum {
                    entries.push((String::from_utf8_lossy(entry.name()).into_owned(), child));
                }
            }
        }
        Ok(entries)
    }

    fn find_free_slot(&self, dir: &Inode) -> LfsResult<Option<FreeSlot>> {
        for (pointer, addr) in dir.blocks() {
            let block = self.read_directory(addr)?;
            if let Some(entry) = block.free_slot() {
                return Ok(Some(FreeSlot { pointer, block, entry }));
            }
        }
        Ok(None)
    }

    /// Creates `name` in directory `parent` and returns its inode number.
    ///
    /// All checks run before the first append. The blocks are then appended
    /// in order: content block, new inode, parent directory block, parent
    /// inode, imap chunk(s), and finally the checkpoint that commits them.
    pub fn create(&mut self, parent: Inum, ftype: FileType, name: &str) -> LfsResult<Inum> {
        match self.lookup(parent, name) {
            Ok(_) => return Err(LfsError::AlreadyExists),
            Err(LfsError::NotFound) => {}
            Err(err) => return Err(err),
        }
        let mut parent_inode = self.read_dir_inode(parent)?;
        validate_name(name)?;
        let FreeSlot {
            pointer,
            block: mut dir_block,
            entry,
        } = self.find_free_slot(&parent_inode)?.ok_or(LfsError::DirectoryFull(parent))?;
        let inum = self.imap.allocate()?;

        let chunks = if ImapCache::chunk_of(inum) == ImapCache::chunk_of(parent) { 1 } else { 2 };
        // four blocks, the chunks, the checkpoint
        if self.log.remaining() < 4 + chunks + 1 {
            return Err(LfsError::StoreFull);
        }

        let mut txn = Transaction::new(self.next_txn_id, self.log.next_addr());
        self.next_txn_id += 1;
        debug!("txn {}: create {} {:?} in {} as inode {}", txn.id, ftype, name, parent, inum);

        let content = match ftype {
            FileType::Regular => Block::Data(DataBlock::zeroed()),
            FileType::Directory => Block::Directory(DirectoryBlock::new(inum, parent)),
        };
        let content_addr = txn.stage(content);

        let mut inode = Inode::new(ftype, 0);
        inode.pointers[0] = Some(content_addr);
        let inode_addr = txn.stage(Block::Inode(inode));

        dir_block.insert(entry, name, inum);
        let dir_addr = txn.stage(Block::Directory(dir_block));

        parent_inode.size += 1;
        parent_inode.pointers[pointer] = Some(dir_addr);
        let parent_addr = txn.stage(Block::Inode(parent_inode));

        txn.map_inode(inum, inode_addr);
        txn.map_inode(parent, parent_addr);
        for chunk in txn.dirty_chunks() {
            let imap_chunk = txn.rebuild_chunk(&self.imap, chunk);
            let chunk_addr = txn.stage(Block::ImapChunk(imap_chunk));
            self.cr.set_chunk_address(chunk, chunk_addr);
        }

        self.commit(txn)?;
        Ok(inum)
    }

    /// Appends a staged transaction and its checkpoint. If an append fails nothing
    /// in memory changes and the appended blocks stay unreferenced.
    ///
    /// Once the checkpoint record is appended the transaction is committed,
    /// even if the device then fails to flush: the caller gets
    /// `FlushFailed` and the engine already reflects the update.
    fn commit(&mut self, txn: Transaction) -> LfsResult<()> {
        let result = txn.append_to(&mut self.log).and_then(|_| self.cr.commit(&mut self.log));
        match result {
            Ok(cr_addr) | Err(LfsError::FlushFailed(cr_addr)) => {
                for &(inum, addr) in txn.imap_updates() {
                    self.imap.set(inum, addr)?;
                }
                debug!("txn {}: committed {} blocks, checkpoint at {}", txn.id, txn.len() + 1, cr_addr);
                result.map(|_| ())
            }
            Err(err) => {
                warn!("txn {}: aborted: {}", txn.id, err);
                self.cr.discard();
                Err(err)
            }
        }
    }

    /// Imap chunk `chunk` as named by the live checkpoint, read from the log.
    pub fn read_imap_chunk(&self, chunk: usize) -> LfsResult<Option<ImapChunk>> {
        match self.cr.committed().entries.get(chunk).copied().flatten() {
            Some(addr) => Ok(Some(self.log.read(addr)?.into_imap_chunk(addr)?)),
            None => Ok(None),
        }
    }

    pub fn imap(&self) -> &ImapCache {
        &self.imap
    }

    pub fn checkpoint(&self) -> &CheckpointRegion {
        &self.cr
    }

    pub fn log(&self) -> &LogManager<D> {
        &self.log
    }

    pub fn config(&self) -> &LfsConfig {
        &self.config
    }

    /// Number of blocks in the log, garbage included.
    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    pub fn into_device(self) -> D {
        self.log.into_device()
    }
}
