//! Versioned schema migrations for the encrypted store.
//!
//! The store records its schema version in `PRAGMA user_version`. Opening it
//! either builds a new store at [`CURRENT_VERSION`] or replays the pending
//! part of the history inside one transaction.

pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod registry;
pub mod snapshot;
pub mod step;

use log::{debug, info, warn};
use std::time::Duration;

use crate::config::Config;
use crate::db::Db;
use crate::files::BlobJanitor;
use crate::legacy_prefs::LegacyPrefs;
use crate::models::SchemaStatus;
use crate::paths::StorePaths;
use crate::secret::SecretProvider;

pub use engine::MigrationEngine;
pub use error::MigrationError;
pub use registry::{VersionRegistry, CURRENT_VERSION, MIN_SUPPORTED_VERSION};
pub use snapshot::{Snapshot, SnapshotManager};
pub use step::{MigrationStep, StepContext, StepKind};

/// Schema version this build produces.
pub fn current_schema_version() -> u32 {
    CURRENT_VERSION
}

/// Opens the store under `paths`, creating or upgrading it as needed.
///
/// Returns only once the store is at [`CURRENT_VERSION`]. A store that is too
/// old, or a leftover legacy database where no store exists yet, yields
/// [`MigrationError::UnsupportedVersion`] without anything being written.
pub fn open_or_migrate(
    paths: &StorePaths,
    secrets: &dyn SecretProvider,
    config: &Config,
) -> Result<Db, MigrationError> {
    let registry = registry::history()?;

    let is_new = !paths.db_path.exists();
    if is_new && paths.legacy_db_path.exists() {
        warn!(
            "Found {} but no store; it cannot be migrated",
            paths.legacy_db_path.display()
        );
        return Err(MigrationError::UnsupportedVersion {
            found: 0,
            minimum: registry.min_supported_version(),
        });
    }

    let secret = secrets.database_secret().map_err(MigrationError::Open)?;
    paths.ensure_base_dir().map_err(MigrationError::Open)?;
    let mut db = Db::open(
        &paths.db_path,
        &secret,
        Duration::from_millis(config.busy_timeout_ms),
    )
    .map_err(MigrationError::Open)?;
    drop(secret);

    let version = db.persisted_version().map_err(MigrationError::Open)?;
    let prefs = LegacyPrefs::load(&paths.legacy_prefs_path).map_err(MigrationError::Open)?;
    let janitor = BlobJanitor::new(paths);
    let engine = MigrationEngine::new(registry, &janitor, &prefs);

    if version == 0 && db.is_blank().map_err(MigrationError::Open)? {
        engine.create(&mut db)?;
        return Ok(db);
    }

    let pending = registry.pending_steps(version)?;
    if pending.is_empty() {
        debug!("Store is current at version {version}");
        return Ok(db);
    }

    if config.snapshot_before_upgrade {
        let snapshots = SnapshotManager::new(paths.snapshots_dir.clone());
        let snapshot = snapshots
            .create(&paths.db_path, version, registry.current_version())
            .map_err(MigrationError::Snapshot)?;
        info!("Snapshot taken at {}", snapshot.dir.display());
        if let Err(e) = snapshots.prune(config.keep_snapshots) {
            warn!("Failed to prune old snapshots: {e:#}");
        }
    }

    engine.upgrade(&mut db, version)?;
    Ok(db)
}

/// Reports the persisted version without migrating anything.
pub fn inspect(paths: &StorePaths, secrets: &dyn SecretProvider, config: &Config) -> Result<SchemaStatus, MigrationError> {
    let registry = registry::history()?;
    let persisted = if paths.db_path.exists() {
        let secret = secrets.database_secret().map_err(MigrationError::Open)?;
        let db = Db::open(
            &paths.db_path,
            &secret,
            Duration::from_millis(config.busy_timeout_ms),
        )
        .map_err(MigrationError::Open)?;
        Some(db.persisted_version().map_err(MigrationError::Open)?)
    } else {
        None
    };

    Ok(SchemaStatus {
        persisted,
        current: registry.current_version(),
        minimum: registry.min_supported_version(),
    })
}
