//! Block devices the log can live on.

use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use crate::{common::LfsResult, log_manager::BlockDevice};

/// In-memory device. Clones share the same buffer, so a clone outlives the
/// engine that wrote it and can be mounted again.
#[derive(Clone, Default)]
pub struct RamDevice {
    data: Arc<Mutex<Vec<u8>>>,
}

impl RamDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cuts the buffer to `len` bytes.
    pub fn truncate(&self, len: u64) {
        self.data.lock().truncate(len as usize);
    }
}

impl BlockDevice for RamDevice {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> LfsResult<usize> {
        let data = self.data.lock();
        let start = (pos as usize).min(data.len());
        let end = (start + buf.len()).min(data.len());
        buf[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }

    fn write_at(&self, pos: u64, buf: &[u8]) -> LfsResult<usize> {
        let mut data = self.data.lock();
        let end = pos as usize + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[pos as usize..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&self) -> LfsResult<u64> {
        Ok(self.data.lock().len() as u64)
    }
}

/// Device backed by a regular file.
#[cfg(feature = "std")]
pub struct FileDevice {
    file: Mutex<std::fs::File>,
}

#[cfg(feature = "std")]
impl FileDevice {
    /// Opens `path`, creating it if missing. Existing contents are kept.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[cfg(feature = "std")]
impl BlockDevice for FileDevice {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> LfsResult<usize> {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos)).map_err(io_error)?;
        let mut done = 0;
        while done < buf.len() {
            match file.read(&mut buf[done..]).map_err(io_error)? {
                0 => break,
                n => done += n,
            }
        }
        Ok(done)
    }

    fn write_at(&self, pos: u64, buf: &[u8]) -> LfsResult<usize> {
        use std::io::{Seek, SeekFrom, Write};

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos)).map_err(io_error)?;
        file.write_all(buf).map_err(io_error)?;
        Ok(buf.len())
    }

    fn size(&self) -> LfsResult<u64> {
        let meta = self.file.lock().metadata().map_err(io_error)?;
        Ok(meta.len())
    }

    fn flush(&self) -> LfsResult<()> {
        self.file.lock().sync_data().map_err(io_error)
    }
}

#[cfg(feature = "std")]
fn io_error(err: std::io::Error) -> crate::LfsError {
    log::error!("file device: {}", err);
    crate::LfsError::Io
}
