//! Log cleaning.
//!
//! A block is live when the live checkpoint reaches it: the checkpoint
//! itself, the imap chunks it names, the inodes those chunks name, and the
//! blocks those inodes point at. Everything else is garbage. Cleaning copies
//! the live graph into a fresh log; the source is never modified.

use alloc::{collections::BTreeMap, vec, vec::Vec};

use log::info;

use crate::{
    block::{Block, BlockKind, Checkpoint},
    checkpoint::CheckpointRegion,
    common::{LfsError, LfsResult},
    imap::ImapCache,
    log_manager::{BlockDevice, LogManager},
    tx_engine::Lfs,
    Addr,
};

pub struct LiveMap {
    live: Vec<bool>,
}

impl LiveMap {
    fn mark(&mut self, addr: Addr) -> LfsResult<()> {
        let slot = self.live.get_mut(addr as usize).ok_or(LfsError::InvalidAddress(addr))?;
        *slot = true;
        Ok(())
    }

    pub fn is_live(&self, addr: Addr) -> bool {
        self.live.get(addr as usize).copied().unwrap_or(false)
    }

    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|&&live| live).count()
    }

    pub fn dead_count(&self) -> usize {
        self.live.len() - self.live_count()
    }

    /// Addresses nothing live refers to.
    pub fn dead(&self) -> impl Iterator<Item = Addr> + '_ {
        self.live
            .iter()
            .enumerate()
            .filter(|(_, &live)| !live)
            .map(|(addr, _)| addr as Addr)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub live: BTreeMap<BlockKind, usize>,
    pub dead: BTreeMap<BlockKind, usize>,
    /// Dead records that do not decode, e.g. a torn transaction.
    pub unreadable: usize,
}

/// Walks the chain from the live checkpoint and marks what it reaches.
pub fn mark_live<D: BlockDevice>(fs: &Lfs<D>) -> LfsResult<LiveMap> {
    let mut map = LiveMap {
        live: vec![false; fs.log_len()],
    };
    map.mark(fs.checkpoint().addr())?;
    for (chunk, chunk_addr) in fs.checkpoint().chunks() {
        map.mark(chunk_addr)?;
        let Some(imap_chunk) = fs.read_imap_chunk(chunk)? else { continue };
        for inode_addr in imap_chunk.entries.iter().flatten().copied() {
            map.mark(inode_addr)?;
            let inode = fs.read_block(inode_addr)?.into_inode(inode_addr)?;
            for (_, ptr) in inode.blocks() {
                map.mark(ptr)?;
            }
        }
    }
    Ok(map)
}

/// Tallies live and dead blocks by kind.
pub fn report<D: BlockDevice>(fs: &Lfs<D>, map: &LiveMap) -> LfsResult<CleanReport> {
    let mut report = CleanReport::default();
    for addr in 0..fs.log_len() as Addr {
        let live = map.is_live(addr);
        let kind = match fs.read_block(addr) {
            Ok(block) => block.kind(),
            Err(LfsError::Corrupted(_)) if !live => {
                report.unreadable += 1;
                continue;
            }
            Err(err) => return Err(err),
        };
        let tally = if live { &mut report.live } else { &mut report.dead };
        *tally.entry(kind).or_insert(0) += 1;
    }
    Ok(report)
}

/// Copies the live graph of `fs` into an empty log on `target`.
///
/// The new log starts with an empty checkpoint at address 0, then for each
/// inode in number order its content blocks and the inode itself, then the
/// imap chunks, then the committing checkpoint. Inode numbers are kept, so
/// directory blocks are copied unchanged.
pub fn compact<D: BlockDevice, E: BlockDevice>(fs: &Lfs<D>, target: E) -> LfsResult<Lfs<E>> {
    let config = fs.config().clone();
    let mut log = LogManager::new(target, config.max_blocks)?;
    if !log.is_empty() {
        return Err(LfsError::AlreadyExists);
    }
    let cr_addr = log.append(&Block::Checkpoint(alloc::boxed::Box::new(Checkpoint::new(1))))?;

    let mut imap = ImapCache::new();
    for (inum, addr) in fs.imap().live() {
        let mut inode = fs.read_block(addr)?.into_inode(addr)?;
        for slot in 0..inode.pointers.len() {
            if let Some(ptr) = inode.pointers[slot] {
                let block = fs.read_block(ptr)?;
                inode.pointers[slot] = Some(log.append(&block)?);
            }
        }
        imap.set(inum, log.append(&Block::Inode(inode))?)?;
    }

    let mut cr = CheckpointRegion::new(cr_addr, Checkpoint::new(1));
    for (chunk, _) in fs.checkpoint().chunks() {
        let chunk_addr = log.append(&Block::ImapChunk(imap.rebuild_chunk(chunk)))?;
        cr.set_chunk_address(chunk, chunk_addr);
    }
    cr.commit(&mut log)?;
    info!("compacted {} blocks into {}", fs.log_len(), log.len());

    Ok(Lfs::from_parts(log, imap, cr, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::RamDevice, snapshot::FsSnapshot, FileType, LfsConfig, ROOT_INODE};

    fn busy_fs() -> Lfs<RamDevice> {
        let mut fs = Lfs::format(RamDevice::new(), LfsConfig::default()).unwrap();
        let docs = fs.create(ROOT_INODE, FileType::Directory, "docs").unwrap();
        fs.create(docs, FileType::Regular, "a").unwrap();
        fs.create(docs, FileType::Regular, "b").unwrap();
        fs.create(ROOT_INODE, FileType::Regular, "readme").unwrap();
        fs
    }

    #[test]
    fn test_mark_live_after_updates() {
        let fs = busy_fs();
        let map = mark_live(&fs).unwrap();
        // checkpoint, one chunk, five inodes, five content blocks
        assert_eq!(map.live_count(), 12);
        assert_eq!(map.dead_count(), fs.log_len() - 12);
        assert!(map.is_live(fs.checkpoint().addr()));
        // the format-time checkpoint and root inode are superseded
        assert!(!map.is_live(0));
        assert!(!map.is_live(2));
        assert!(map.dead().any(|addr| addr == 4));

        let report = report(&fs, &map).unwrap();
        assert_eq!(report.live[&BlockKind::Inode], 5);
        assert_eq!(report.live[&BlockKind::Checkpoint], 1);
        assert_eq!(report.dead[&BlockKind::Checkpoint], 5);
        assert_eq!(report.unreadable, 0);
    }

    #[test]
    fn test_compact_keeps_namespace() {
        let fs = busy_fs();
        let before = FsSnapshot::take(&fs).unwrap();
        let target = RamDevice::new();
        let mut compacted = compact(&fs, target.clone()).unwrap();

        // placeholder checkpoint, 10 blocks, chunk, checkpoint
        assert_eq!(compacted.log_len(), 13);
        assert_eq!(compacted.resolve(ROOT_INODE), Ok(2));
        assert_eq!(FsSnapshot::take(&compacted).unwrap(), before);
        assert_eq!(mark_live(&compacted).unwrap().dead_count(), 1);

        compacted.create(ROOT_INODE, FileType::Regular, "after").unwrap();
        let after = FsSnapshot::take(&compacted).unwrap();
        drop(compacted);
        let remounted = Lfs::mount(target, LfsConfig::default()).unwrap();
        assert_eq!(FsSnapshot::take(&remounted).unwrap(), after);
    }

    #[test]
    fn test_compact_needs_empty_target() {
        let fs = busy_fs();
        let target = RamDevice::new();
        compact(&fs, target.clone()).unwrap();
        assert!(matches!(compact(&fs, target), Err(LfsError::AlreadyExists)));
    }
}
