//! The project file: a project's declared direct dependencies and compat
//! constraints (§3, §6).

use crate::error::{Error, Result};
use crate::id::PackageId;
use crate::version::VersionSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Project {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<PackageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    #[serde(default)]
    pub deps: HashMap<String, PackageId>,
    #[serde(default, rename = "weakdeps")]
    pub weak_deps: HashMap<String, PackageId>,
    #[serde(default)]
    pub extras: HashMap<String, PackageId>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub sources: HashMap<String, String>,
    /// Stored as the original constraint string so the file round-trips
    /// byte-for-byte on unrelated edits; parsed lazily via
    /// [`Project::compat_spec`].
    #[serde(default)]
    pub compat: HashMap<String, String>,
    #[serde(default)]
    pub targets: HashMap<String, Vec<String>>,
}

impl Project {
    pub fn load(path: &Path) -> Result<Project> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::project(format!("reading {}: {e}", path.display())))?;
        let project: Project = toml::from_str(&text)?;
        project.validate()?;
        Ok(project)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// All names a dependency constraint may legally reference: direct,
    /// weak, or extra deps (§3's invariant on `targets`/`compat`).
    fn known_names(&self) -> std::collections::HashSet<&str> {
        self.deps
            .keys()
            .chain(self.weak_deps.keys())
            .chain(self.extras.keys())
            .map(|s| s.as_str())
            .collect()
    }

    /// Checks the §3 invariants: UUIDs unique within `deps`, and every name
    /// referenced by `targets` or `compat` is declared as a dep somewhere.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for id in self.deps.values() {
            if !seen.insert(*id) {
                return Err(Error::project(format!("duplicate UUID {id} in deps")));
            }
        }
        let known = self.known_names();
        for name in self.compat.keys() {
            if !known.contains(name.as_str()) {
                return Err(Error::project(format!(
                    "compat entry '{name}' does not name a declared dependency"
                )));
            }
        }
        for (target, names) in &self.targets {
            for name in names {
                if !known.contains(name.as_str()) {
                    return Err(Error::project(format!(
                        "target '{target}' references unknown dependency '{name}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn compat_spec(&self, name: &str) -> Result<Option<VersionSpec>> {
        match self.compat.get(name) {
            Some(s) => Ok(Some(VersionSpec::parse(s)?)),
            None => Ok(None),
        }
    }

    pub fn has_dep(&self, id: PackageId) -> bool {
        self.deps.values().any(|v| *v == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Project {
        let mut p = Project {
            name: Some("demo".into()),
            ..Default::default()
        };
        let a: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        p.deps.insert("A".into(), a);
        p
    }

    #[test]
    fn rejects_duplicate_uuid() {
        let mut p = sample();
        let a = *p.deps.get("A").unwrap();
        p.deps.insert("B".into(), a);
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_unknown_compat_name() {
        let mut p = sample();
        p.compat.insert("Missing".into(), "1.0.0".into());
        assert!(p.validate().is_err());
    }

    #[test]
    fn rejects_unknown_target_name() {
        let mut p = sample();
        p.targets.insert("test".into(), vec!["Missing".into()]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_project() {
        let mut p = sample();
        p.compat.insert("A".into(), "^1.0.0".into());
        p.targets.insert("test".into(), vec!["A".into()]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn round_trips_through_toml() {
        let p = sample();
        let text = p.to_toml_string().unwrap();
        let parsed: Project = toml::from_str(&text).unwrap();
        assert_eq!(parsed.deps.len(), 1);
    }
}
