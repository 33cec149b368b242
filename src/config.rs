use serde::{Deserialize, Serialize};

use crate::{
    common::{LfsError, LfsResult},
    MAX_DISK_SIZE,
};

/// Blocks written by `format`: checkpoint, root directory, root inode, imap
/// chunk and the committing checkpoint.
pub const FORMAT_BLOCKS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfsConfig {
    /// Log capacity in blocks. Appends beyond it fail with `StoreFull`.
    pub max_blocks: usize,
    /// Run the consistency checker after mounting.
    pub check_on_mount: bool,
}

impl Default for LfsConfig {
    fn default() -> Self {
        Self {
            max_blocks: MAX_DISK_SIZE,
            check_on_mount: false,
        }
    }
}

impl LfsConfig {
    pub fn with_max_blocks(max_blocks: usize) -> Self {
        Self {
            max_blocks,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> LfsResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            log::error!("bad config: {}", e);
            LfsError::InvalidConfig
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LfsResult<()> {
        // addresses are stored as non-negative i32
        if self.max_blocks < FORMAT_BLOCKS || self.max_blocks > i32::MAX as usize {
            return Err(LfsError::InvalidConfig);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_defaults() {
        let config = LfsConfig::from_json("{}").unwrap();
        assert_eq!(config, LfsConfig::default());
        assert_eq!(config.max_blocks, 1000);

        let config = LfsConfig::from_json(r#"{"max_blocks": 64, "check_on_mount": true}"#).unwrap();
        assert_eq!(config.max_blocks, 64);
        assert!(config.check_on_mount);
    }

    #[test]
    fn test_from_json_rejects() {
        assert_eq!(LfsConfig::from_json(r#"{"max_blocks": 3}"#), Err(LfsError::InvalidConfig));
        assert_eq!(LfsConfig::from_json("not json"), Err(LfsError::InvalidConfig));
    }
}
