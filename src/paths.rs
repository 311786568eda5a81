use anyhow::{anyhow, Result};
use directories::BaseDirs;
use std::path::{Path, PathBuf};

pub const DATABASE_NAME: &str = "msgvault.db";
pub const LEGACY_DATABASE_NAME: &str = "legacy.db";

/// Every file and directory the store owns, resolved once per process.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub legacy_db_path: PathBuf,
    pub keystore_path: PathBuf,
    pub config_path: PathBuf,
    pub legacy_prefs_path: PathBuf,
    pub snapshots_dir: PathBuf,
    pub parts_dir: PathBuf,
    pub legacy_avatars_dir: PathBuf,
    pub avatars_dir: PathBuf,
}

impl StorePaths {
    /// Resolves the layout under `store`, or `~/.msgvault` when no directory is given.
    pub fn new(store: Option<&Path>) -> Result<Self> {
        let base_dir = match store {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => std::env::current_dir()?.join(path),
            None => {
                let base_dirs =
                    BaseDirs::new().ok_or_else(|| anyhow!("Unable to resolve home directory"))?;
                base_dirs.home_dir().join(".msgvault")
            }
        };
        Ok(Self::in_dir(base_dir))
    }

    pub fn in_dir(base_dir: PathBuf) -> Self {
        Self {
            db_path: base_dir.join(DATABASE_NAME),
            legacy_db_path: base_dir.join(LEGACY_DATABASE_NAME),
            keystore_path: base_dir.join("keystore.json"),
            config_path: base_dir.join("config.json"),
            legacy_prefs_path: base_dir.join("legacy_prefs.json"),
            snapshots_dir: base_dir.join("snapshots"),
            parts_dir: base_dir.join("parts"),
            legacy_avatars_dir: base_dir.join("avatars"),
            avatars_dir: base_dir.join("avatar_store"),
            base_dir,
        }
    }

    pub fn ensure_base_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            let perms = Permissions::from_mode(0o700);
            std::fs::set_permissions(&self.base_dir, perms)?;
        }
        Ok(())
    }

    pub fn keystore_path(&self) -> &Path {
        &self.keystore_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_rooted_in_store_dir() {
        let paths = StorePaths::in_dir(PathBuf::from("/tmp/store"));
        assert_eq!(paths.db_path, PathBuf::from("/tmp/store/msgvault.db"));
        assert_eq!(paths.parts_dir, PathBuf::from("/tmp/store/parts"));
        assert_eq!(paths.avatars_dir, PathBuf::from("/tmp/store/avatar_store"));
    }

    #[test]
    fn test_relative_store_resolves_against_cwd() {
        let paths = StorePaths::new(Some(Path::new("relative-store"))).unwrap();
        assert!(paths.base_dir.is_absolute());
        assert!(paths.base_dir.ends_with("relative-store"));
    }
}
