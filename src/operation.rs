use alloc::{string::String, vec::Vec};

use serde::{Deserialize, Serialize};

use crate::{
    common::{FileType, LfsError, LfsResult},
    log_manager::BlockDevice,
    tx_engine::Lfs,
    Inum,
};

/// A namespace request, as it can be queued or scripted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create {
        parent: Inum,
        ftype: FileType,
        name: String,
    },
    Lookup {
        parent: Inum,
        name: String,
    },
}

impl Operation {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Operation::Lookup { .. })
    }

    /// Apply the operation to the engine. Returns the inode number created
    /// or found.
    pub fn apply<D: BlockDevice>(&self, fs: &mut Lfs<D>) -> LfsResult<Inum> {
        match self {
            Operation::Create { parent, ftype, name } => fs.create(*parent, *ftype, name),
            Operation::Lookup { .. } => self.apply_read(fs),
        }
    }

    /// Read-only variant of [`apply`](Self::apply); a `Create` is refused.
    pub fn apply_read<D: BlockDevice>(&self, fs: &Lfs<D>) -> LfsResult<Inum> {
        match self {
            Operation::Lookup { parent, name } => fs.lookup(*parent, name),
            Operation::Create { .. } => Err(LfsError::ReadOnly),
        }
    }

    /// Parses a JSON array of operations.
    pub fn parse_batch(json: &str) -> LfsResult<Vec<Operation>> {
        serde_json::from_str(json).map_err(|e| {
            log::error!("bad operation batch: {}", e);
            LfsError::InvalidBatch
        })
    }
}

/// Applies `ops` in order. Each result is independent: a failed operation
/// leaves no trace and the batch carries on.
pub fn run_batch<D: BlockDevice>(fs: &mut Lfs<D>, ops: &[Operation]) -> Vec<LfsResult<Inum>> {
    ops.iter().map(|op| op.apply(fs)).collect()
}
