//! Filesystem access for migration steps.
//!
//! Steps never get a raw path to play with: every operation names one of the
//! directories in [`KnownDir`] and anything resolving outside of them is
//! refused. Removal is idempotent, so a step can be replayed after a crash.

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::paths::StorePaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownDir {
    /// Attachment blobs and their thumbnails.
    Parts,
    /// Pre-store avatar files, named by recipient id.
    LegacyAvatars,
    /// Current avatar store.
    Avatars,
}

impl KnownDir {
    const ALL: [KnownDir; 3] = [KnownDir::Parts, KnownDir::LegacyAvatars, KnownDir::Avatars];
}

pub struct BlobJanitor {
    parts: PathBuf,
    legacy_avatars: PathBuf,
    avatars: PathBuf,
}

impl BlobJanitor {
    pub fn new(paths: &StorePaths) -> Self {
        Self {
            parts: paths.parts_dir.clone(),
            legacy_avatars: paths.legacy_avatars_dir.clone(),
            avatars: paths.avatars_dir.clone(),
        }
    }

    pub fn dir(&self, dir: KnownDir) -> &Path {
        match dir {
            KnownDir::Parts => &self.parts,
            KnownDir::LegacyAvatars => &self.legacy_avatars,
            KnownDir::Avatars => &self.avatars,
        }
    }

    /// Plain files directly inside `dir` whose name passes `filter`, sorted.
    /// A missing directory lists as empty.
    pub fn list<F>(&self, dir: KnownDir, filter: F) -> Result<Vec<PathBuf>>
    where
        F: Fn(&str) -> bool,
    {
        let root = self.dir(dir);
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", root.display())),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if filter(&name.to_string_lossy()) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn exists(&self, dir: KnownDir) -> bool {
        self.dir(dir).is_dir()
    }

    /// Deletes `path`. Returns whether a file was actually removed; a missing
    /// file is not an error.
    pub fn remove(&self, path: &Path) -> Result<bool> {
        let path = self.confine(path)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Deletes a whole known directory. Missing is fine.
    pub fn remove_dir(&self, dir: KnownDir) -> Result<bool> {
        let root = self.dir(dir);
        match fs::remove_dir_all(root) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", root.display())),
        }
    }

    /// Writes `bytes` to `name` inside `dir`, creating the directory.
    pub fn store(&self, dir: KnownDir, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let target = self.child(dir, name)?;
        fs::create_dir_all(self.dir(dir))?;
        fs::write(&target, bytes)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        #[cfg(unix)]
        {
            use std::fs::Permissions;
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, Permissions::from_mode(0o600))?;
        }
        Ok(target)
    }

    /// Copies a file from one known directory into another under `name`.
    pub fn copy_into(&self, source: &Path, dir: KnownDir, name: &str) -> Result<PathBuf> {
        let source = self.confine(source)?;
        let bytes =
            fs::read(&source).with_context(|| format!("Failed to read {}", source.display()))?;
        self.store(dir, name, &bytes)
    }

    fn child(&self, dir: KnownDir, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir(dir).join(name)),
            _ => Err(anyhow!("Refusing file name {name:?}")),
        }
    }

    /// Normalises `path` lexically and checks it sits under a known directory.
    fn confine(&self, path: &Path) -> Result<PathBuf> {
        let mut normalised = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    if !normalised.pop() {
                        return Err(anyhow!("Refusing path {}", path.display()));
                    }
                }
                Component::CurDir => {}
                other => normalised.push(other.as_os_str()),
            }
        }

        let inside = KnownDir::ALL.iter().any(|dir| {
            let root = self.dir(*dir);
            normalised.starts_with(root) && normalised != root
        });
        if inside {
            Ok(normalised)
        } else {
            Err(anyhow!(
                "Refusing to touch {} outside the store's blob directories",
                path.display()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn janitor(base: &Path) -> BlobJanitor {
        BlobJanitor::new(&StorePaths::in_dir(base.to_path_buf()))
    }

    #[test]
    fn test_list_filters_and_tolerates_missing_dir() {
        let temp = tempdir().unwrap();
        let janitor = janitor(temp.path());
        assert!(janitor.list(KnownDir::Parts, |_| true).unwrap().is_empty());

        let parts = janitor.dir(KnownDir::Parts).to_path_buf();
        fs::create_dir_all(&parts).unwrap();
        fs::write(parts.join("transfer123.tmp"), b"x").unwrap();
        fs::write(parts.join("part456.mms"), b"x").unwrap();

        let found = janitor
            .list(KnownDir::Parts, |name| name.starts_with("transfer"))
            .unwrap();
        assert_eq!(found, vec![parts.join("transfer123.tmp")]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp = tempdir().unwrap();
        let janitor = janitor(temp.path());
        let file = janitor.store(KnownDir::Parts, "blob", b"data").unwrap();

        assert!(janitor.remove(&file).unwrap());
        assert!(!janitor.remove(&file).unwrap());
    }

    #[test]
    fn test_refuses_paths_outside_known_dirs() {
        let temp = tempdir().unwrap();
        let janitor = janitor(temp.path());
        let outside = temp.path().join("msgvault.db");
        fs::write(&outside, b"precious").unwrap();

        assert!(janitor.remove(&outside).is_err());
        let sneaky = janitor.dir(KnownDir::Parts).join("../msgvault.db");
        assert!(janitor.remove(&sneaky).is_err());
        assert!(janitor.store(KnownDir::Avatars, "../escape", b"x").is_err());
        assert!(outside.exists());
    }

    #[test]
    fn test_copy_between_dirs() {
        let temp = tempdir().unwrap();
        let janitor = janitor(temp.path());
        let source = janitor.store(KnownDir::LegacyAvatars, "12", b"avatar").unwrap();

        let copied = janitor.copy_into(&source, KnownDir::Avatars, "12").unwrap();
        assert_eq!(fs::read(copied).unwrap(), b"avatar");

        assert!(janitor.remove_dir(KnownDir::LegacyAvatars).unwrap());
        assert!(!janitor.exists(KnownDir::LegacyAvatars));
        assert!(!janitor.remove_dir(KnownDir::LegacyAvatars).unwrap());
    }
}
