use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Account settings kept outside the database by older builds. Two historical
/// steps move them into the recipient table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPrefs {
    #[serde(default)]
    pub local_number: Option<String>,
    /// Base64 profile key.
    #[serde(default)]
    pub profile_key: Option<String>,
    /// Given and family name separated by a NUL character.
    #[serde(default)]
    pub profile_name: Option<String>,
}

impl LegacyPrefs {
    /// Missing file means no local account was ever registered.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| anyhow!("Invalid legacy preferences at {}: {}", path.display(), e))
    }

    pub fn profile_key_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.profile_key
            .as_deref()
            .map(|encoded| {
                STANDARD
                    .decode(encoded)
                    .map_err(|e| anyhow!("Invalid stored profile key: {e}"))
            })
            .transpose()
    }

    pub fn profile_name(&self) -> ProfileName {
        ProfileName::from_serialized(self.profile_name.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileName {
    pub given: String,
    pub family: String,
}

impl ProfileName {
    pub fn from_serialized(serialized: Option<&str>) -> Self {
        let Some(serialized) = serialized else {
            return Self::default();
        };
        let mut parts = serialized.splitn(2, '\0');
        Self {
            given: parts.next().unwrap_or_default().to_string(),
            family: parts.next().unwrap_or_default().to_string(),
        }
    }

    pub fn joined(&self) -> String {
        match (self.given.is_empty(), self.family.is_empty()) {
            (true, _) => self.family.clone(),
            (false, true) => self.given.clone(),
            (false, false) => format!("{} {}", self.given, self.family),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let temp = tempdir().unwrap();
        let prefs = LegacyPrefs::load(&temp.path().join("legacy_prefs.json")).unwrap();
        assert_eq!(prefs, LegacyPrefs::default());
        assert!(prefs.profile_key_bytes().unwrap().is_none());
    }

    #[test]
    fn test_loads_and_decodes() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("legacy_prefs.json");
        fs::write(
            &path,
            r#"{"local_number":"+15550001111","profile_key":"AAECAw==","profile_name":"Ada\u0000Lovelace"}"#,
        )
        .unwrap();

        let prefs = LegacyPrefs::load(&path).unwrap();
        assert_eq!(prefs.local_number.as_deref(), Some("+15550001111"));
        assert_eq!(prefs.profile_key_bytes().unwrap(), Some(vec![0, 1, 2, 3]));
        let name = prefs.profile_name();
        assert_eq!(name.given, "Ada");
        assert_eq!(name.family, "Lovelace");
        assert_eq!(name.joined(), "Ada Lovelace");
    }

    #[test]
    fn test_profile_name_partial() {
        assert_eq!(ProfileName::from_serialized(Some("Cher")).joined(), "Cher");
        assert_eq!(ProfileName::from_serialized(None).joined(), "");
        assert_eq!(ProfileName::from_serialized(Some("\0Smith")).joined(), "Smith");
    }
}
