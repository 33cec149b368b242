//! On-disk records.
//!
//! Every record is `RECORD_SIZE` bytes: a little-endian `i32` tag, a
//! `BLOCK_SIZE` payload area and a trailing little-endian CRC-32 of tag and
//! payload. Address and inode-number slots use `-1` for "absent"; payload
//! bytes past the end of a variant's fields are zero.

use alloc::{boxed::Box, vec, vec::Vec};
use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    common::{FileType, LfsError, LfsResult},
    Addr, Inum, ABSENT, BLOCK_SIZE, DIR_NAME_LEN, NUM_DIR_ENTRIES, NUM_IMAP_PTRS_IN_CR,
    NUM_INODES_PER_IMAP_CHUNK, NUM_INODE_PTRS, RECORD_SIZE,
};

const TAG_LEN: usize = 4;
const SEALED_LEN: usize = TAG_LEN + BLOCK_SIZE;
const DIR_ENTRY_SIZE: usize = DIR_NAME_LEN + 4;

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockKind {
    Checkpoint = 0,
    Directory = 1,
    Data = 2,
    Inode = 3,
    ImapChunk = 4,
}

impl BlockKind {
    pub const ALL: [BlockKind; 5] = [
        BlockKind::Checkpoint,
        BlockKind::Directory,
        BlockKind::Data,
        BlockKind::Inode,
        BlockKind::ImapChunk,
    ];

    fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| *k as i32 == raw)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::Checkpoint => "checkpoint",
            BlockKind::Directory => "directory",
            BlockKind::Data => "data",
            BlockKind::Inode => "inode",
            BlockKind::ImapChunk => "imap chunk",
        };
        f.write_str(name)
    }
}

/// Root record naming the current version of every imap chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub entries: [Option<Addr>; NUM_IMAP_PTRS_IN_CR],
    pub end_of_log: Addr,
}

impl Checkpoint {
    pub fn new(end_of_log: Addr) -> Self {
        Self {
            entries: [None; NUM_IMAP_PTRS_IN_CR],
            end_of_log,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImapChunk {
    pub entries: [Option<Addr>; NUM_INODES_PER_IMAP_CHUNK],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub size: u32,
    pub ftype: FileType,
    pub pointers: [Option<Addr>; NUM_INODE_PTRS],
}

impl Inode {
    pub fn new(ftype: FileType, size: u32) -> Self {
        Self {
            size,
            ftype,
            pointers: [None; NUM_INODE_PTRS],
        }
    }

    /// Present pointers as `(slot, address)`, in slot order.
    pub fn blocks(&self) -> impl Iterator<Item = (usize, Addr)> + '_ {
        self.pointers
            .iter()
            .enumerate()
            .filter_map(|(slot, ptr)| ptr.map(|addr| (slot, addr)))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; DIR_NAME_LEN],
    pub inum: Option<Inum>,
}

impl DirEntry {
    /// Free slot, written as name "-" with inum -1.
    pub const EMPTY: Self = {
        let mut name = [0; DIR_NAME_LEN];
        name[0] = b'-';
        Self { name, inum: None }
    };

    /// Caller validates `name`; anything past `DIR_NAME_LEN - 1` bytes is cut.
    pub fn new(name: &str, inum: Inum) -> Self {
        let mut buf = [0; DIR_NAME_LEN];
        let len = name.len().min(DIR_NAME_LEN - 1);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self {
            name: buf,
            inum: Some(inum),
        }
    }

    pub fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&c| c == 0).unwrap_or(DIR_NAME_LEN);
        &self.name[..end]
    }

    pub fn name_eq(&self, name: &str) -> bool {
        self.name() == name.as_bytes()
    }

    pub fn is_free(&self) -> bool {
        self.inum.is_none()
    }
}

impl fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirEntry")
            .field("name", &core::str::from_utf8(self.name()).unwrap_or("<bin>"))
            .field("inum", &self.inum)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryBlock {
    pub entries: [DirEntry; NUM_DIR_ENTRIES],
}

#[derive(Clone, PartialEq, Eq)]
pub struct DataBlock {
    pub data: [u8; BLOCK_SIZE],
}

impl DataBlock {
    pub fn zeroed() -> Box<Self> {
        Box::new(Self { data: [0; BLOCK_SIZE] })
    }
}

impl fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBlock").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Checkpoint(Box<Checkpoint>),
    Directory(Box<DirectoryBlock>),
    Data(Box<DataBlock>),
    Inode(Inode),
    ImapChunk(ImapChunk),
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        match self {
            Block::Checkpoint(_) => BlockKind::Checkpoint,
            Block::Directory(_) => BlockKind::Directory,
            Block::Data(_) => BlockKind::Data,
            Block::Inode(_) => BlockKind::Inode,
            Block::ImapChunk(_) => BlockKind::ImapChunk,
        }
    }

    fn mismatch(&self, addr: Addr, expected: BlockKind) -> LfsError {
        LfsError::UnexpectedBlock {
            addr,
            expected,
            found: self.kind(),
        }
    }

    pub fn into_checkpoint(self, addr: Addr) -> LfsResult<Box<Checkpoint>> {
        match self {
            Block::Checkpoint(cp) => Ok(cp),
            other => Err(other.mismatch(addr, BlockKind::Checkpoint)),
        }
    }

    pub fn into_directory(self, addr: Addr) -> LfsResult<Box<DirectoryBlock>> {
        match self {
            Block::Directory(dir) => Ok(dir),
            other => Err(other.mismatch(addr, BlockKind::Directory)),
        }
    }

    pub fn into_inode(self, addr: Addr) -> LfsResult<Inode> {
        match self {
            Block::Inode(inode) => Ok(inode),
            other => Err(other.mismatch(addr, BlockKind::Inode)),
        }
    }

    pub fn into_imap_chunk(self, addr: Addr) -> LfsResult<ImapChunk> {
        match self {
            Block::ImapChunk(chunk) => Ok(chunk),
            other => Err(other.mismatch(addr, BlockKind::ImapChunk)),
        }
    }

    /// Serialize into a full record.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_SIZE];
        put_i32(&mut buf, 0, self.kind() as i32);
        let payload = &mut buf[TAG_LEN..SEALED_LEN];
        match self {
            Block::Checkpoint(cp) => {
                for (i, slot) in cp.entries.iter().enumerate() {
                    put_i32(payload, i * 4, encode_slot(*slot));
                }
                put_i32(payload, NUM_IMAP_PTRS_IN_CR * 4, cp.end_of_log as i32);
            }
            Block::Directory(dir) => {
                for (i, entry) in dir.entries.iter().enumerate() {
                    let off = i * DIR_ENTRY_SIZE;
                    payload[off..off + DIR_NAME_LEN].copy_from_slice(&entry.name);
                    put_i32(payload, off + DIR_NAME_LEN, encode_slot(entry.inum));
                }
            }
            Block::Data(data) => payload.copy_from_slice(&data.data),
            Block::Inode(inode) => {
                put_i32(payload, 0, inode.size as i32);
                put_i32(payload, 4, inode.ftype as i32);
                for (i, ptr) in inode.pointers.iter().enumerate() {
                    put_i32(payload, 8 + i * 4, encode_slot(*ptr));
                }
            }
            Block::ImapChunk(chunk) => {
                for (i, slot) in chunk.entries.iter().enumerate() {
                    put_i32(payload, i * 4, encode_slot(*slot));
                }
            }
        }
        let crc = crc32fast::hash(&buf[..SEALED_LEN]);
        buf[SEALED_LEN..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse a record read from `addr`.
    pub fn decode(addr: Addr, buf: &[u8]) -> LfsResult<Self> {
        if buf.len() != RECORD_SIZE {
            return Err(LfsError::Corrupted(addr));
        }
        let stored = crate::i32!(&buf[SEALED_LEN..]) as u32;
        if stored != crc32fast::hash(&buf[..SEALED_LEN]) {
            return Err(LfsError::Corrupted(addr));
        }
        let kind = BlockKind::from_raw(crate::i32!(&buf[..TAG_LEN])).ok_or(LfsError::Corrupted(addr))?;
        let payload = &buf[TAG_LEN..SEALED_LEN];
        let slot = |off: usize| decode_slot(addr, get_i32(payload, off));
        let block = match kind {
            BlockKind::Checkpoint => {
                let mut cp = Box::new(Checkpoint::new(0));
                for i in 0..NUM_IMAP_PTRS_IN_CR {
                    cp.entries[i] = slot(i * 4)?;
                }
                cp.end_of_log = decode_count(addr, get_i32(payload, NUM_IMAP_PTRS_IN_CR * 4))?;
                Block::Checkpoint(cp)
            }
            BlockKind::Directory => {
                let mut dir = Box::new(DirectoryBlock {
                    entries: [DirEntry::EMPTY; NUM_DIR_ENTRIES],
                });
                for (i, entry) in dir.entries.iter_mut().enumerate() {
                    let off = i * DIR_ENTRY_SIZE;
                    entry.name.copy_from_slice(&payload[off..off + DIR_NAME_LEN]);
                    entry.inum = slot(off + DIR_NAME_LEN)?;
                }
                Block::Directory(dir)
            }
            BlockKind::Data => {
                let mut data = DataBlock::zeroed();
                data.data.copy_from_slice(payload);
                Block::Data(data)
            }
            BlockKind::Inode => {
                let size = decode_count(addr, get_i32(payload, 0))?;
                let ftype = FileType::from_raw(get_i32(payload, 4)).ok_or(LfsError::Corrupted(addr))?;
                let mut inode = Inode::new(ftype, size);
                for i in 0..NUM_INODE_PTRS {
                    inode.pointers[i] = slot(8 + i * 4)?;
                }
                Block::Inode(inode)
            }
            BlockKind::ImapChunk => {
                let mut entries = [None; NUM_INODES_PER_IMAP_CHUNK];
                for (i, entry) in entries.iter_mut().enumerate() {
                    *entry = slot(i * 4)?;
                }
                Block::ImapChunk(ImapChunk { entries })
            }
        };
        Ok(block)
    }
}

fn put_i32(buf: &mut [u8], off: usize, value: i32) {
    buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_i32(buf: &[u8], off: usize) -> i32 {
    crate::i32!(&buf[off..off + 4])
}

fn encode_slot(slot: Option<u32>) -> i32 {
    slot.map_or(ABSENT, |v| v as i32)
}

fn decode_slot(addr: Addr, raw: i32) -> LfsResult<Option<u32>> {
    match raw {
        ABSENT => Ok(None),
        v if v >= 0 => Ok(Some(v as u32)),
        _ => Err(LfsError::Corrupted(addr)),
    }
}

fn decode_count(addr: Addr, raw: i32) -> LfsResult<u32> {
    u32::try_from(raw).map_err(|_| LfsError::Corrupted(addr))
}
