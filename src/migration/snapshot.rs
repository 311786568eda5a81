use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "snapshot_metadata.json";

/// A byte-for-byte copy of the encrypted store taken before an upgrade.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub dir: PathBuf,
    pub database: PathBuf,
    pub from_version: u32,
    pub to_version: u32,
    /// SHA-256 of the copied database file.
    pub checksum: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMetadata {
    from_version: u32,
    to_version: u32,
    created_at: String,
    database: String,
    checksum: String,
}

pub struct SnapshotManager {
    base_dir: PathBuf,
}

impl SnapshotManager {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Copies `db_path` into `snapshot_<ts>_v<from>_to_v<to>/` with its checksum.
    pub fn create(&self, db_path: &Path, from_version: u32, to_version: u32) -> Result<Snapshot> {
        let now = Utc::now();
        let name = format!(
            "snapshot_{}_v{}_to_v{}",
            now.format("%Y%m%d_%H%M%S%3f"),
            from_version,
            to_version
        );
        let dir = self.base_dir.join(&name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create snapshot directory {}", dir.display()))?;
        set_private(&dir, 0o700)?;

        let file_name = db_path
            .file_name()
            .ok_or_else(|| anyhow!("Store path {} has no file name", db_path.display()))?;
        let database = dir.join(file_name);
        fs::copy(db_path, &database).map_err(|e| anyhow!("Failed to snapshot store: {}", e))?;
        set_private(&database, 0o600)?;

        let checksum = calculate_checksum(&database)?;
        let metadata = SnapshotMetadata {
            from_version,
            to_version,
            created_at: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            database: file_name.to_string_lossy().to_string(),
            checksum: checksum.clone(),
        };
        let metadata_path = dir.join(METADATA_FILE);
        fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;
        set_private(&metadata_path, 0o600)?;

        info!("Snapshot of schema v{from_version} written to {}", dir.display());
        Ok(Snapshot {
            dir,
            database,
            from_version,
            to_version,
            checksum,
            created_at: metadata.created_at,
        })
    }

    /// True when the copy is still present and matches its checksum.
    pub fn verify(&self, snapshot: &Snapshot) -> Result<bool> {
        if !snapshot.database.exists() {
            return Ok(false);
        }
        Ok(calculate_checksum(&snapshot.database)? == snapshot.checksum)
    }

    /// Snapshots, newest first. Directories without readable metadata are skipped.
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        if !self.base_dir.exists() {
            return Ok(snapshots);
        }

        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let metadata = match fs::read_to_string(path.join(METADATA_FILE))
                .map_err(anyhow::Error::from)
                .and_then(|json| serde_json::from_str::<SnapshotMetadata>(&json).map_err(Into::into))
            {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Ignoring snapshot directory {}: {}", path.display(), e);
                    continue;
                }
            };
            snapshots.push(Snapshot {
                database: path.join(&metadata.database),
                dir: path,
                from_version: metadata.from_version,
                to_version: metadata.to_version,
                checksum: metadata.checksum,
                created_at: metadata.created_at,
            });
        }

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }

    /// Removes all but the `keep` newest snapshots. Returns how many went.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let mut removed = 0;
        for snapshot in self.list()?.into_iter().skip(keep) {
            fs::remove_dir_all(&snapshot.dir)
                .map_err(|e| anyhow!("Failed to remove snapshot {}: {}", snapshot.dir.display(), e))?;
            removed += 1;
        }
        Ok(removed)
    }
}

fn calculate_checksum(path: &Path) -> Result<String> {
    let data =
        fs::read(path).map_err(|e| anyhow!("Failed to read file for checksum: {}", e))?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(unix)]
fn set_private(path: &Path, mode: u32) -> Result<()> {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, Permissions::from_mode(mode))
        .with_context(|| format!("Failed to restrict permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_private(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
