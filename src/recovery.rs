//! Mount-time recovery.
//!
//! Blocks appended after the last valid checkpoint belong to transactions
//! that never committed; nothing references them and they are ignored.

use log::{debug, warn};

use crate::{
    block::{Block, Checkpoint},
    checkpoint::CheckpointRegion,
    common::{LfsError, LfsResult},
    imap::ImapCache,
    log_manager::{BlockDevice, LogManager},
    Addr,
};

/// Scans the log backward for the highest-addressed valid checkpoint.
pub fn find_checkpoint<D: BlockDevice>(log: &LogManager<D>) -> LfsResult<(Addr, Checkpoint)> {
    for addr in (0..log.len() as Addr).rev() {
        let block = match log.read(addr) {
            Ok(block) => block,
            Err(LfsError::Corrupted(_)) => {
                warn!("skipping undecodable record at {}", addr);
                continue;
            }
            Err(err) => return Err(err),
        };
        if let Block::Checkpoint(cp) = block {
            if CheckpointRegion::is_valid_at(addr, &cp) {
                debug!("live checkpoint at {}", addr);
                return Ok((addr, *cp));
            }
            warn!("skipping invalid checkpoint at {} (end of log {})", addr, cp.end_of_log);
        }
    }
    Err(LfsError::NoCheckpoint)
}

/// Rebuilds the imap cache from every chunk `cp` references.
pub fn rebuild_imap<D: BlockDevice>(log: &LogManager<D>, cp: &Checkpoint) -> LfsResult<ImapCache> {
    let mut imap = ImapCache::new();
    for (chunk, slot) in cp.entries.iter().enumerate() {
        if let Some(addr) = *slot {
            let imap_chunk = log.read(addr)?.into_imap_chunk(addr)?;
            imap.load_chunk(chunk, &imap_chunk);
        }
    }
    Ok(imap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{DataBlock, ImapChunk},
        device::RamDevice,
        BlockKind, NUM_INODES_PER_IMAP_CHUNK, RECORD_SIZE,
    };
    use alloc::boxed::Box;

    #[test]
    fn test_empty_log_has_no_checkpoint() {
        let log = LogManager::new(RamDevice::new(), 8).unwrap();
        assert_eq!(find_checkpoint(&log).unwrap_err(), LfsError::NoCheckpoint);
    }

    #[test]
    fn test_latest_valid_checkpoint_wins() {
        let dev = RamDevice::new();
        let mut log = LogManager::new(dev.clone(), 16).unwrap();
        let mut entries = [None; NUM_INODES_PER_IMAP_CHUNK];
        entries[0] = Some(0);
        log.append(&Block::Inode(crate::Inode::new(crate::FileType::Directory, 0))).unwrap();
        log.append(&Block::ImapChunk(ImapChunk { entries })).unwrap();
        let mut cp = Checkpoint::new(3);
        cp.entries[0] = Some(1);
        log.append(&Block::Checkpoint(Box::new(cp.clone()))).unwrap();
        // stamped for another address: not a commit
        log.append(&Block::Checkpoint(Box::new(Checkpoint::new(1)))).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();

        let (addr, found) = find_checkpoint(&log).unwrap();
        assert_eq!(addr, 2);
        assert_eq!(found, cp);
        let imap = rebuild_imap(&log, &found).unwrap();
        assert_eq!(imap.resolve(0), Ok(0));
    }

    #[test]
    fn test_garbage_tail_is_skipped() {
        let dev = RamDevice::new();
        let mut log = LogManager::new(dev.clone(), 16).unwrap();
        log.append(&Block::Checkpoint(Box::new(Checkpoint::new(1)))).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        // an undecodable record
        dev.write_at(2 * RECORD_SIZE as u64, &[0xff; RECORD_SIZE]).unwrap();

        let log = LogManager::new(dev, 16).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(find_checkpoint(&log).unwrap().0, 0);
    }

    #[test]
    fn test_damaged_checkpoint_falls_back() {
        let dev = RamDevice::new();
        let mut log = LogManager::new(dev.clone(), 16).unwrap();
        log.append(&Block::Checkpoint(Box::new(Checkpoint::new(1)))).unwrap();
        log.append(&Block::Checkpoint(Box::new(Checkpoint::new(2)))).unwrap();
        // the newer record keeps its length and its end-of-log stamp, but its
        // first chunk slot now reads as address 0
        dev.write_at(RECORD_SIZE as u64 + 4, &[0, 0, 0, 0]).unwrap();

        let log = LogManager::new(dev, 16).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(find_checkpoint(&log).unwrap().0, 0);
    }

    #[test]
    fn test_chunk_slot_must_name_a_chunk() {
        let mut log = LogManager::new(RamDevice::new(), 8).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        let mut cp = Checkpoint::new(2);
        cp.entries[0] = Some(0);
        assert_eq!(
            rebuild_imap(&log, &cp).unwrap_err(),
            LfsError::UnexpectedBlock {
                addr: 0,
                expected: BlockKind::ImapChunk,
                found: BlockKind::Data,
            }
        );
    }
}
