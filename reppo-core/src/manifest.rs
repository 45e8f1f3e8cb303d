//! Worker manifest model and validation
//!
//! A manifest is a JSON document declaring the workers to launch, either as
//! an array of entries or as an object keyed by identity:
//!
//! ```json
//! [{"identity": "adder", "command": "python", "args": ["adder_server.py"]}]
//! ```
//!
//! ```json
//! {"adder": {"command": "python", "args": ["adder_server.py"]}}
//! ```
//!
//! Both forms keep file order, which is the startup and discovery order.

use crate::{Error, Result};
use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single worker declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub identity: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables layered over the orchestrator's own
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Entry body in the identity-keyed object form
#[derive(Debug, Deserialize)]
struct LaunchSpec {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    description: Option<String>,
}

impl ManifestEntry {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        identity: S1,
        command: S2,
        args: Vec<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            command: command.into(),
            args,
            env: BTreeMap::new(),
            cwd: None,
            description: None,
        }
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Human readable command line for logs and discovery output
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn validate(&self) -> Result<()> {
        if self.identity.is_empty() {
            return Err(Error::configuration("Manifest entry has an empty identity"));
        }
        // any ':' could merge into the separator once qualified
        if self.identity.contains(':') {
            return Err(Error::configuration(format!(
                "Identity '{}' must not contain ':'",
                self.identity
            )));
        }
        if self.identity.chars().any(char::is_whitespace) {
            return Err(Error::configuration(format!(
                "Identity '{}' must not contain whitespace",
                self.identity
            )));
        }
        if self.command.trim().is_empty() {
            return Err(Error::configuration(format!(
                "Worker '{}' has an empty launch command",
                self.identity
            )));
        }
        Ok(())
    }
}

/// Ordered, validated set of worker declarations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build a manifest from entries, enforcing identity uniqueness
    pub fn new(entries: Vec<ManifestEntry>) -> Result<Self> {
        let manifest = Self { entries };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load and validate a manifest file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!(
                "Failed to read manifest {}: {}",
                path.display(),
                e
            ))
        })?;
        let manifest = Self::from_json_str(&contents)?;
        debug!(
            "Loaded manifest {} with {} entries",
            path.display(),
            manifest.len()
        );
        Ok(manifest)
    }

    /// Parse and validate a manifest from JSON text
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(contents)
            .map_err(|e| Error::configuration(format!("Invalid manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check every entry and identity uniqueness
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            entry.validate()?;
            if !seen.insert(entry.identity.as_str()) {
                return Err(Error::configuration(format!(
                    "Duplicate worker identity '{}' in manifest",
                    entry.identity
                )));
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ManifestEntry;
    type IntoIter = std::slice::Iter<'a, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ManifestVisitor;

        impl<'de> Visitor<'de> for ManifestVisitor {
            type Value = Manifest;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array of worker entries or an object keyed by identity")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<Manifest, A::Error> {
                let mut entries = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(entry) = seq.next_element::<ManifestEntry>()? {
                    entries.push(entry);
                }
                Ok(Manifest { entries })
            }

            // Duplicate keys are kept so validation can report them
            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Manifest, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((identity, spec)) = map.next_entry::<String, LaunchSpec>()? {
                    entries.push(ManifestEntry {
                        identity,
                        command: spec.command,
                        args: spec.args,
                        env: spec.env,
                        cwd: spec.cwd,
                        description: spec.description,
                    });
                }
                Ok(Manifest { entries })
            }
        }

        deserializer.deserialize_any(ManifestVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::operation::{qualify, split_qualified};
    use std::io::Write;

    #[test]
    fn test_array_form_preserves_order() {
        let manifest = Manifest::from_json_str(
            r#"[
                {"identity": "b", "command": "python", "args": ["b.py"]},
                {"identity": "a", "command": "python", "args": ["a.py"], "description": "A"}
            ]"#,
        )
        .unwrap();

        let ids: Vec<_> = manifest.iter().map(|e| e.identity.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(manifest.entries()[1].description.as_deref(), Some("A"));
    }

    #[test]
    fn test_object_form_preserves_order() {
        let manifest = Manifest::from_json_str(
            r#"{
                "random": {"command": "python", "args": ["random_server.py"]},
                "adder": {"command": "python", "args": ["adder_server.py"], "env": {"X": "1"}}
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.entries()[0].identity, "random");
        assert_eq!(manifest.entries()[1].identity, "adder");
        assert_eq!(manifest.entries()[1].env.get("X").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_duplicate_identity_array_form() {
        let result = Manifest::from_json_str(
            r#"[
                {"identity": "a", "command": "x"},
                {"identity": "a", "command": "y"}
            ]"#,
        );
        assert_matches!(result, Err(Error::Configuration { message }) if message.contains("Duplicate"));
    }

    #[test]
    fn test_duplicate_identity_object_form() {
        let result = Manifest::from_json_str(
            r#"{"a": {"command": "x"}, "a": {"command": "y"}}"#,
        );
        assert_matches!(result, Err(Error::Configuration { .. }));
    }

    #[test]
    fn test_invalid_identities_rejected() {
        for bad in [
            r#"[{"identity": "", "command": "x"}]"#,
            r#"[{"identity": "a::b", "command": "x"}]"#,
            r#"[{"identity": "svc:", "command": "x"}]"#,
            r#"[{"identity": "db:main", "command": "x"}]"#,
            r#"[{"identity": "a b", "command": "x"}]"#,
            r#"[{"identity": "a", "command": " "}]"#,
        ] {
            assert!(Manifest::from_json_str(bad).unwrap_err().is_configuration());
        }
    }

    #[test]
    fn test_malformed_manifest_is_configuration_error() {
        assert!(Manifest::from_json_str("not json")
            .unwrap_err()
            .is_configuration());
        assert!(Manifest::from_json_str(r#""just a string""#)
            .unwrap_err()
            .is_configuration());
        assert!(Manifest::from_json_str(r#"[{"identity": "a"}]"#)
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"adder": {{"command": "adder", "args": ["--fast"]}}}}"#).unwrap();

        let manifest = Manifest::load(file.path()).unwrap();
        assert_eq!(manifest.entries()[0].command_line(), "adder --fast");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Manifest::load("/nonexistent/reppo/manifest.json");
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_accepted_identities_round_trip() {
        for identity in ["adder", "random-2", "svc.v1", "_x"] {
            let manifest = Manifest::new(vec![ManifestEntry::new(identity, "x", vec![])]).unwrap();
            let name = qualify(&manifest.entries()[0].identity, "add");
            assert_eq!(split_qualified(&name).unwrap(), (identity, "add"));
        }
        assert!(Manifest::new(vec![ManifestEntry::new("svc:", "x", vec![])])
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_new_validates() {
        let entries = vec![
            ManifestEntry::new("a", "x", vec![]),
            ManifestEntry::new("a", "y", vec![]),
        ];
        assert!(Manifest::new(entries).is_err());
        assert!(Manifest::new(vec![]).unwrap().is_empty());
    }
}
