use crate::paths::StorePaths;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;

const DEFAULT_KEEP_SNAPSHOTS: usize = 3;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Copy the database aside before any upgrade that has pending steps.
    #[serde(default = "default_true")]
    pub snapshot_before_upgrade: bool,
    #[serde(default = "default_keep_snapshots")]
    pub keep_snapshots: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_before_upgrade: true,
            keep_snapshots: DEFAULT_KEEP_SNAPSHOTS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_keep_snapshots() -> usize {
    DEFAULT_KEEP_SNAPSHOTS
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Config {
    pub fn load(paths: &StorePaths) -> Result<Self> {
        if !paths.config_path.exists() {
            return Ok(Config::default());
        }
        let data = fs::read_to_string(&paths.config_path)?;
        let config: Config = serde_json::from_str(&data)
            .map_err(|e| anyhow!("Invalid config at {}: {}", paths.config_path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, paths: &StorePaths) -> Result<()> {
        self.validate()?;
        if let Some(parent) = paths.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&paths.config_path, data)?;
        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            let perms = Permissions::from_mode(0o600);
            fs::set_permissions(&paths.config_path, perms)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.snapshot_before_upgrade && self.keep_snapshots == 0 {
            return Err(anyhow!(
                "keep_snapshots must be at least 1 when snapshot_before_upgrade is enabled"
            ));
        }
        Ok(())
    }
}
