//! The checkpoint region.
//!
//! One working copy lives in memory. It is changed only through
//! `set_chunk_address` and becomes durable when `commit` appends it; until
//! then the last committed copy is what recovery will find.

use log::{debug, warn};

use crate::{
    block::{Block, Checkpoint},
    common::{LfsError, LfsResult},
    log_manager::{BlockDevice, LogManager},
    Addr, NUM_IMAP_PTRS_IN_CR,
};

#[derive(Debug, Clone)]
pub struct CheckpointRegion {
    working: Checkpoint,
    committed: Checkpoint,
    addr: Addr,
}

impl CheckpointRegion {
    /// Region whose live record `cp` was read from `addr`.
    pub fn new(addr: Addr, cp: Checkpoint) -> Self {
        Self {
            working: cp.clone(),
            committed: cp,
            addr,
        }
    }

    /// A committed record is stamped with the cursor just past itself.
    pub fn is_valid_at(addr: Addr, cp: &Checkpoint) -> bool {
        cp.end_of_log == addr + 1 && cp.entries.iter().flatten().all(|&chunk| chunk < addr)
    }

    pub fn set_chunk_address(&mut self, chunk: usize, addr: Addr) {
        self.working.entries[chunk] = Some(addr);
    }

    /// Address of `chunk` in the working copy.
    pub fn chunk_address(&self, chunk: usize) -> Option<Addr> {
        self.working.entries.get(chunk).copied().flatten()
    }

    /// Store cursor at the last successful commit.
    pub fn current_end_of_log(&self) -> Addr {
        self.committed.end_of_log
    }

    /// Address of the live checkpoint record.
    pub fn addr(&self) -> Addr {
        self.addr
    }

    pub fn committed(&self) -> &Checkpoint {
        &self.committed
    }

    /// Committed `(chunk index, address)` pairs.
    pub fn chunks(&self) -> impl Iterator<Item = (usize, Addr)> + '_ {
        (0..NUM_IMAP_PTRS_IN_CR).filter_map(|chunk| self.committed.entries[chunk].map(|addr| (chunk, addr)))
    }

    pub fn is_dirty(&self) -> bool {
        self.working != self.committed
    }

    /// Appends the working copy, making it the live checkpoint.
    ///
    /// The appended record is live whether or not the flush that follows
    /// succeeds; a failed flush is reported as `FlushFailed` with the new
    /// address after the committed copy has been updated.
    pub fn commit<D: BlockDevice>(&mut self, log: &mut LogManager<D>) -> LfsResult<Addr> {
        self.working.end_of_log = log.next_addr() + 1;
        let addr = log.append(&Block::Checkpoint(alloc::boxed::Box::new(self.working.clone())))?;
        self.committed = self.working.clone();
        self.addr = addr;
        debug!("checkpoint committed at {}, end of log {}", addr, self.committed.end_of_log);
        log.flush().map_err(|err| {
            warn!("checkpoint at {} not flushed: {}", addr, err);
            LfsError::FlushFailed(addr)
        })?;
        Ok(addr)
    }

    /// Drops uncommitted slot changes.
    pub fn discard(&mut self) {
        self.working = self.committed.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::DataBlock, device::RamDevice, LfsError};

    #[test]
    fn test_commit_stamps_end_of_log() {
        let mut log = LogManager::new(RamDevice::new(), 16).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        let mut region = CheckpointRegion::new(0, Checkpoint::new(1));
        region.set_chunk_address(3, 0);
        assert!(region.is_dirty());

        let addr = region.commit(&mut log).unwrap();
        assert_eq!(addr, 1);
        assert_eq!(region.current_end_of_log(), 2);
        assert!(!region.is_dirty());
        assert_eq!(region.chunks().collect::<alloc::vec::Vec<_>>(), alloc::vec![(3, 0)]);

        let stored = log.read(1).unwrap().into_checkpoint(1).unwrap();
        assert!(CheckpointRegion::is_valid_at(1, &stored));
        assert!(!CheckpointRegion::is_valid_at(0, &stored));
    }

    #[test]
    fn test_failed_commit_keeps_committed_copy() {
        let mut log = LogManager::new(RamDevice::new(), 1).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        let mut region = CheckpointRegion::new(0, Checkpoint::new(1));
        region.set_chunk_address(0, 0);
        assert_eq!(region.commit(&mut log), Err(LfsError::StoreFull));
        assert_eq!(region.chunks().count(), 0);
        region.discard();
        assert!(!region.is_dirty());
        assert_eq!(region.chunk_address(0), None);
    }

    #[test]
    fn test_chunk_pointing_forward_is_invalid() {
        let mut cp = Checkpoint::new(5);
        cp.entries[0] = Some(6);
        assert!(!CheckpointRegion::is_valid_at(4, &cp));
    }
}
