use once_cell::sync::Lazy;

use super::error::MigrationError;
use super::history;
use super::step::{MigrationStep, StepAction};

/// Oldest schema the history can replay from.
pub const MIN_SUPPORTED_VERSION: u32 = 39;
/// Schema version produced by the last step of the history.
pub const CURRENT_VERSION: u32 = 106;

/// Ordered, immutable catalog of migration steps above a fixed floor.
pub struct VersionRegistry {
    floor: u32,
    steps: Vec<MigrationStep>,
    baseline: Option<StepAction>,
}

impl VersionRegistry {
    /// Builds a registry over `steps`, which must target strictly increasing
    /// versions above `floor`.
    pub fn new(floor: u32, steps: Vec<MigrationStep>) -> Result<Self, MigrationError> {
        if steps.is_empty() {
            return Err(MigrationError::InvalidRegistry(
                "a registry needs at least one step".to_string(),
            ));
        }

        let mut previous = floor;
        for step in &steps {
            if step.target_version <= previous {
                let reason = if step.target_version == previous && previous != floor {
                    format!("version {} is registered twice", step.target_version)
                } else if step.target_version <= floor {
                    format!(
                        "step {} ({}) does not target a version above the floor {}",
                        step.target_version, step.name, floor
                    )
                } else {
                    format!(
                        "step {} ({}) is out of order after {}",
                        step.target_version, step.name, previous
                    )
                };
                return Err(MigrationError::InvalidRegistry(reason));
            }
            previous = step.target_version;
        }

        Ok(Self {
            floor,
            steps,
            baseline: None,
        })
    }

    /// DDL that produces the floor's shape in an empty store.
    pub fn with_baseline(mut self, baseline: StepAction) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn baseline(&self) -> Option<StepAction> {
        self.baseline
    }

    pub fn min_supported_version(&self) -> u32 {
        self.floor
    }

    pub fn current_version(&self) -> u32 {
        // Non-empty and ascending, checked in `new`.
        self.steps
            .last()
            .map(|step| step.target_version)
            .unwrap_or(self.floor)
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Steps a store at `from` still needs, ascending.
    pub fn pending_steps(&self, from: u32) -> Result<&[MigrationStep], MigrationError> {
        if from < self.floor {
            return Err(MigrationError::UnsupportedVersion {
                found: from,
                minimum: self.floor,
            });
        }
        let current = self.current_version();
        if from > current {
            return Err(MigrationError::FutureVersion {
                found: from,
                current,
            });
        }
        let start = self.steps.partition_point(|step| step.target_version <= from);
        Ok(&self.steps[start..])
    }
}

impl std::fmt::Debug for VersionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionRegistry")
            .field("floor", &self.floor)
            .field("steps", &self.steps)
            .field("has_baseline", &self.baseline.is_some())
            .finish()
    }
}

static HISTORY: Lazy<Result<VersionRegistry, String>> = Lazy::new(|| {
    VersionRegistry::new(MIN_SUPPORTED_VERSION, history::steps())
        .map(|registry| registry.with_baseline(history::baseline::create))
        .map_err(|e| e.to_string())
});

/// The process-wide registry of every historical step.
pub fn history() -> Result<&'static VersionRegistry, MigrationError> {
    HISTORY
        .as_ref()
        .map_err(|reason| MigrationError::InvalidRegistry(reason.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::step::{StepContext, StepKind};

    fn noop(_: &StepContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn step(version: u32) -> MigrationStep {
        MigrationStep::new(version, "noop", StepKind::SchemaChange, noop)
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = VersionRegistry::new(40, vec![step(41), step(42), step(42)]).unwrap_err();
        assert!(err.to_string().contains("registered twice"));
    }

    #[test]
    fn test_rejects_unordered() {
        let err = VersionRegistry::new(40, vec![step(41), step(43), step(42)]).unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn test_rejects_step_at_or_below_floor() {
        assert!(VersionRegistry::new(40, vec![step(40), step(41)]).is_err());
        assert!(VersionRegistry::new(40, vec![]).is_err());
    }

    #[test]
    fn test_pending_steps_bounds() {
        let registry = VersionRegistry::new(40, vec![step(41), step(42), step(43)]).unwrap();
        assert_eq!(registry.current_version(), 43);

        let versions: Vec<u32> = registry
            .pending_steps(41)
            .unwrap()
            .iter()
            .map(|s| s.target_version)
            .collect();
        assert_eq!(versions, vec![42, 43]);
        assert!(registry.pending_steps(43).unwrap().is_empty());

        assert!(registry.pending_steps(39).unwrap_err().is_unsupported_version());
        assert!(matches!(
            registry.pending_steps(44),
            Err(MigrationError::FutureVersion { found: 44, current: 43 })
        ));
    }

    #[test]
    fn test_history_is_contiguous_up_to_current() {
        let registry = history().unwrap();
        assert_eq!(registry.min_supported_version(), MIN_SUPPORTED_VERSION);
        assert_eq!(registry.current_version(), CURRENT_VERSION);
        let versions: Vec<u32> = registry.steps().iter().map(|s| s.target_version).collect();
        let expected: Vec<u32> = (MIN_SUPPORTED_VERSION + 1..=CURRENT_VERSION).collect();
        assert_eq!(versions, expected);
    }
}
