use log::{debug, info};
use std::time::Instant;

use super::error::MigrationError;
use super::executor;
use super::registry::VersionRegistry;
use super::step::{StepContext, StepKind};
use crate::db::{self, Db};
use crate::files::BlobJanitor;
use crate::legacy_prefs::LegacyPrefs;

/// Drives a store from its persisted version to the registry's current one.
pub struct MigrationEngine<'a> {
    registry: &'a VersionRegistry,
    janitor: &'a BlobJanitor,
    prefs: &'a LegacyPrefs,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(registry: &'a VersionRegistry, janitor: &'a BlobJanitor, prefs: &'a LegacyPrefs) -> Self {
        Self {
            registry,
            janitor,
            prefs,
        }
    }

    /// Applies every pending step above `from` inside one immediate
    /// transaction and records the current version in the same commit.
    ///
    /// Any failure other than a contained side effect leaves the store exactly
    /// as it was, still at `from`.
    pub fn upgrade(&self, db: &mut Db, from: u32) -> Result<u32, MigrationError> {
        let pending = self.registry.pending_steps(from)?;
        if pending.is_empty() {
            debug!("Store already at schema version {from}");
            return Ok(from);
        }

        let current = self.registry.current_version();
        info!("Upgrading store: {from} -> {current} ({} steps)", pending.len());
        let started = Instant::now();

        let tx = db.transaction()?;
        {
            let ctx = StepContext::new(&tx, self.janitor, self.prefs);
            for step in pending {
                executor::run_step(&ctx, step)?;
            }
        }
        db::set_persisted_version(&tx, current)?;
        tx.commit()?;

        info!(
            "Upgrade complete. Took {} ms.",
            started.elapsed().as_millis()
        );
        Ok(current)
    }

    /// Builds a brand-new store: the baseline shape followed by every step,
    /// so the result matches an upgraded store object for object. External
    /// side effects are skipped; a new store has no files to tidy.
    ///
    /// Legacy preferences are not consulted. A new store has no account row
    /// for them to land in.
    pub fn create(&self, db: &mut Db) -> Result<u32, MigrationError> {
        let current = self.registry.current_version();
        let floor = self.registry.min_supported_version();
        info!("Creating store at schema version {current}");
        let started = Instant::now();

        let no_account = LegacyPrefs::default();
        let tx = db.transaction()?;
        {
            let ctx = StepContext::new(&tx, self.janitor, &no_account);
            if let Some(baseline) = self.registry.baseline() {
                baseline(&ctx).map_err(|source| MigrationError::StepFailed {
                    version: floor,
                    name: "baseline",
                    kind: StepKind::SchemaChange,
                    source,
                })?;
            }
            for step in self.registry.steps() {
                if step.kind == StepKind::ExternalSideEffect {
                    debug!("Skipping side effect {} on a new store", step.name);
                    continue;
                }
                executor::run_step(&ctx, step)?;
            }
        }
        db::set_persisted_version(&tx, current)?;
        tx.commit()?;

        info!("Store created. Took {} ms.", started.elapsed().as_millis());
        Ok(current)
    }
}
