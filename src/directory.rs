//! Directory blocks: fixed tables of `(name, inum)` slots.

use alloc::boxed::Box;

use crate::{
    block::{DirEntry, DirectoryBlock},
    common::{LfsError, LfsResult},
    Inum, MAX_NAME_LEN, NUM_DIR_ENTRIES,
};

pub const DOT: &str = ".";
pub const DOTDOT: &str = "..";

impl DirectoryBlock {
    /// Block with every slot free.
    pub fn empty() -> Box<Self> {
        Box::new(Self {
            entries: [DirEntry::EMPTY; NUM_DIR_ENTRIES],
        })
    }

    /// Fresh directory content: "." and ".." in the first two slots.
    pub fn new(current: Inum, parent: Inum) -> Box<Self> {
        let mut dir = Self::empty();
        dir.entries[0] = DirEntry::new(DOT, current);
        dir.entries[1] = DirEntry::new(DOTDOT, parent);
        dir
    }

    /// First live entry named `name`.
    pub fn find(&self, name: &str) -> Option<Inum> {
        self.live().find(|entry| entry.name_eq(name)).and_then(|entry| entry.inum)
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.entries.iter().position(DirEntry::is_free)
    }

    /// Fills `slot` if it is free. Returns false otherwise.
    pub fn insert(&mut self, slot: usize, name: &str, inum: Inum) -> bool {
        match self.entries.get_mut(slot) {
            Some(entry) if entry.is_free() => {
                *entry = DirEntry::new(name, inum);
                true
            }
            _ => false,
        }
    }

    pub fn live(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter(|entry| !entry.is_free())
    }
}

/// Checks a name supplied to `create`.
pub fn validate_name(name: &str) -> LfsResult<()> {
    if name.is_empty() || name == DOT || name == DOTDOT || name.bytes().any(|c| c == b'/' || c == 0) {
        return Err(LfsError::InvalidName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(LfsError::NameTooLong);
    }
    Ok(())
}
