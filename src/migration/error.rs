use thiserror::Error;

use super::step::StepKind;

/// Everything that can stop a store from being opened at the current schema.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The store predates the oldest shape the registry can replay from.
    /// Not retryable: the store is unusable by this build.
    #[error("Unsupported store: schema version {found} is older than the minimum supported version {minimum}")]
    UnsupportedVersion { found: u32, minimum: u32 },

    #[error("Store was written by a newer build: schema version {found} is above {current}")]
    FutureVersion { found: u32, current: u32 },

    #[error("Migration to version {version} ({name}, {kind}) failed: {source:#}")]
    StepFailed {
        version: u32,
        name: &'static str,
        kind: StepKind,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid migration registry: {0}")]
    InvalidRegistry(String),

    #[error("Failed to open store: {0:#}")]
    Open(#[source] anyhow::Error),

    #[error("Failed to snapshot store before upgrading: {0:#}")]
    Snapshot(#[source] anyhow::Error),

    #[error("Store error during migration: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl MigrationError {
    pub fn is_unsupported_version(&self) -> bool {
        matches!(self, MigrationError::UnsupportedVersion { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_version_is_distinguishable() {
        let unsupported = MigrationError::UnsupportedVersion {
            found: 12,
            minimum: 39,
        };
        let failed = MigrationError::StepFailed {
            version: 61,
            name: "color_migration",
            kind: StepKind::DataBackfill,
            source: anyhow::anyhow!("boom"),
        };
        assert!(unsupported.is_unsupported_version());
        assert!(!failed.is_unsupported_version());
        assert!(failed.to_string().contains("color_migration"));
        assert!(unsupported.to_string().contains("39"));
    }
}
