use rusqlite::Connection;
use std::fmt;

use crate::files::BlobJanitor;
use crate::legacy_prefs::LegacyPrefs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Tables, columns, indexes and triggers only.
    SchemaChange,
    /// Scans rows and writes derived values back. All or nothing.
    DataBackfill,
    /// Touches files outside the database. Failures are contained.
    ExternalSideEffect,
    /// Creates objects only when `sqlite_master` does not list them yet.
    GuardedCreate,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepKind::SchemaChange => "schema change",
            StepKind::DataBackfill => "data backfill",
            StepKind::ExternalSideEffect => "external side effect",
            StepKind::GuardedCreate => "guarded create",
        };
        f.write_str(label)
    }
}

pub type StepAction = fn(&StepContext<'_>) -> anyhow::Result<()>;

/// One append-only entry of the schema history.
#[derive(Clone, Copy)]
pub struct MigrationStep {
    pub target_version: u32,
    pub name: &'static str,
    pub kind: StepKind,
    pub action: StepAction,
}

impl MigrationStep {
    pub const fn new(
        target_version: u32,
        name: &'static str,
        kind: StepKind,
        action: StepAction,
    ) -> Self {
        Self {
            target_version,
            name,
            kind,
            action,
        }
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("target_version", &self.target_version)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// What a step may touch: the connection inside the migration transaction,
/// the confined filesystem, and the pre-database preferences.
pub struct StepContext<'a> {
    pub conn: &'a Connection,
    pub janitor: &'a BlobJanitor,
    pub prefs: &'a LegacyPrefs,
}

impl<'a> StepContext<'a> {
    pub fn new(conn: &'a Connection, janitor: &'a BlobJanitor, prefs: &'a LegacyPrefs) -> Self {
        Self {
            conn,
            janitor,
            prefs,
        }
    }
}
