use log::{error, trace};

use crate::{
    block::Block,
    common::{LfsError, LfsResult},
    Addr, RECORD_SIZE,
};

/// Byte-addressed transport the log is persisted on.
pub trait BlockDevice: Send + Sync {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> LfsResult<usize>;
    fn write_at(&self, pos: u64, buf: &[u8]) -> LfsResult<usize>;
    /// Number of bytes written so far.
    fn size(&self) -> LfsResult<u64>;
    fn flush(&self) -> LfsResult<()> {
        Ok(())
    }
}

/// The block store: an append-only sequence of fixed-size records.
///
/// This is the only place addresses are assigned. A record's address is its
/// index in the log; there is no way to overwrite one.
pub struct LogManager<D: BlockDevice> {
    device: D,
    len: usize,
    capacity: usize,
}

impl<D: BlockDevice> LogManager<D> {
    /// Opens the log held by `device`. A torn trailing record is not counted
    /// and will be overwritten by the next append.
    ///
    /// Fails with `InvalidConfig` when the device already holds more records
    /// than `capacity`; opening a prefix would hide the newest checkpoints.
    pub fn new(device: D, capacity: usize) -> LfsResult<Self> {
        let len = (device.size()? / RECORD_SIZE as u64) as usize;
        if len > capacity {
            error!("log holds {} records, capacity is {}", len, capacity);
            return Err(LfsError::InvalidConfig);
        }
        Ok(Self { device, len, capacity })
    }

    pub fn append(&mut self, block: &Block) -> LfsResult<Addr> {
        if self.len >= self.capacity {
            return Err(LfsError::StoreFull);
        }
        let addr = self.len as Addr;
        let record = block.encode();
        let written = self.device.write_at(Self::offset(addr), &record)?;
        if written != RECORD_SIZE {
            return Err(LfsError::Io);
        }
        self.len += 1;
        trace!("append {} at {}", block.kind(), addr);
        Ok(addr)
    }

    pub fn read(&self, addr: Addr) -> LfsResult<Block> {
        if addr as usize >= self.len {
            return Err(LfsError::InvalidAddress(addr));
        }
        let mut record = alloc::vec![0u8; RECORD_SIZE];
        let read = self.device.read_at(Self::offset(addr), &mut record)?;
        if read != RECORD_SIZE {
            return Err(LfsError::Io);
        }
        Block::decode(addr, &record)
    }

    pub fn flush(&self) -> LfsResult<()> {
        self.device.flush()
    }

    /// Address the next append will get.
    pub fn next_addr(&self) -> Addr {
        self.len as Addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    fn offset(addr: Addr) -> u64 {
        addr as u64 * RECORD_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::DataBlock, device::RamDevice, FileType, Inode};

    #[test]
    fn test_dense_addresses() {
        let mut log = LogManager::new(RamDevice::new(), 8).unwrap();
        assert!(log.is_empty());
        for expected in 0..3 {
            let addr = log.append(&Block::Inode(Inode::new(FileType::Regular, 0))).unwrap();
            assert_eq!(addr, expected);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.remaining(), 5);
        assert_eq!(log.read(1).unwrap().kind(), crate::BlockKind::Inode);
    }

    #[test]
    fn test_store_full() {
        let mut log = LogManager::new(RamDevice::new(), 2).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        assert_eq!(log.append(&Block::Data(DataBlock::zeroed())), Err(LfsError::StoreFull));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_invalid_address() {
        let mut log = LogManager::new(RamDevice::new(), 4).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        assert_eq!(log.read(1).unwrap_err(), LfsError::InvalidAddress(1));
        assert_eq!(log.read(500).unwrap_err(), LfsError::InvalidAddress(500));
    }

    #[test]
    fn test_reopen_ignores_torn_record() {
        let device = RamDevice::new();
        let mut log = LogManager::new(device.clone(), 8).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        device.truncate((RECORD_SIZE + 100) as u64);

        let mut reopened = LogManager::new(device, 8).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.append(&Block::Data(DataBlock::zeroed())).unwrap(), 1);
    }

    #[test]
    fn test_reopen_beyond_capacity_fails() {
        let device = RamDevice::new();
        let mut log = LogManager::new(device.clone(), 8).unwrap();
        for _ in 0..5 {
            log.append(&Block::Data(DataBlock::zeroed())).unwrap();
        }
        assert!(matches!(LogManager::new(device.clone(), 4), Err(LfsError::InvalidConfig)));
        assert_eq!(LogManager::new(device, 5).unwrap().len(), 5);
    }

    #[test]
    fn test_damaged_record_is_corrupted() {
        let device = RamDevice::new();
        let mut log = LogManager::new(device.clone(), 4).unwrap();
        log.append(&Block::Inode(Inode::new(FileType::Directory, 2))).unwrap();
        // flip one payload byte; the record keeps its full length
        let mut byte = [0u8; 1];
        device.read_at(8, &mut byte).unwrap();
        device.write_at(8, &[byte[0] ^ 0x01]).unwrap();
        assert_eq!(log.read(0).unwrap_err(), LfsError::Corrupted(0));
    }
}
