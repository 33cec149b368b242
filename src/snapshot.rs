//! Logical view of the namespace, re-derived from the log.
//!
//! Two snapshots are equal exactly when the same inode numbers map to inodes
//! of the same type and size with the same directory entries, wherever the
//! blocks physically live.

use alloc::{collections::BTreeMap, string::String, vec::Vec};

use serde::{Deserialize, Serialize};

use crate::{
    common::{FileType, LfsResult},
    log_manager::BlockDevice,
    tx_engine::Lfs,
    Inum,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeView {
    pub ftype: FileType,
    pub size: u32,
    /// Directory entries in lookup order; empty for regular files.
    pub entries: Vec<(String, Inum)>,
    /// Number of present block pointers.
    pub blocks: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsSnapshot {
    pub inodes: BTreeMap<Inum, InodeView>,
}

impl FsSnapshot {
    pub fn take<D: BlockDevice>(fs: &Lfs<D>) -> LfsResult<Self> {
        let mut inodes = BTreeMap::new();
        for (inum, _) in fs.imap().live() {
            let inode = fs.read_inode(inum)?;
            let entries = match inode.ftype {
                FileType::Directory => fs.read_dir(inum)?,
                FileType::Regular => Vec::new(),
            };
            inodes.insert(
                inum,
                InodeView {
                    ftype: inode.ftype,
                    size: inode.size,
                    entries,
                    blocks: inode.blocks().count(),
                },
            );
        }
        Ok(Self { inodes })
    }

    pub fn to_json(&self) -> String {
        // only strings and integers inside
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}
