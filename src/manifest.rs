//! The manifest file: the fully-resolved dependency graph with exact
//! versions and tree hashes (§3, §6 manifest_format v2).

use crate::error::{Error, Result};
use crate::id::PackageId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const MANIFEST_FORMAT: u32 = 2;

/// The tagged union of where a manifest entry's source comes from (§9
/// design note: the original's `path`/`repo`/`tree_hash`/`version` fields on
/// a single struct is a poor man's discriminated union; this is the
/// explicit enum replacement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageSource {
    Registered {
        version: String,
        #[serde(rename = "git-tree-sha1")]
        tree_hash: String,
    },
    Path {
        path: String,
    },
    Repo {
        #[serde(rename = "repo-url")]
        url: String,
        #[serde(rename = "repo-rev")]
        rev: String,
        #[serde(rename = "repo-subdir", skip_serializing_if = "Option::is_none")]
        subdir: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub uuid: PackageId,
    #[serde(flatten)]
    pub source: PackageSource,
    #[serde(default)]
    pub pinned: bool,
    /// Resolved dependency UUIDs, name-keyed. Per the §9 `libLLVM_jll`
    /// fix, every UUID here is guaranteed present as a manifest entry key.
    #[serde(default)]
    pub deps: HashMap<String, PackageId>,
}

impl ManifestEntry {
    pub fn version(&self) -> Option<&str> {
        match &self.source {
            PackageSource::Registered { version, .. } => Some(version),
            _ => None,
        }
    }

    pub fn tree_hash(&self) -> Option<&str> {
        match &self.source {
            PackageSource::Registered { tree_hash, .. } => Some(tree_hash),
            _ => None,
        }
    }

    pub fn is_develop(&self) -> bool {
        matches!(self.source, PackageSource::Path { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub manifest_format: String,
    /// Hash of the project's `deps ∪ compat` at resolve time, so a later
    /// `instantiate` can warn when the project changed without a
    /// re-resolve (§6).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_hash: Option<String>,
    #[serde(default, rename = "deps")]
    pub entries: HashMap<String, Vec<ManifestEntry>>,
}

impl Manifest {
    pub fn new() -> Self {
        Manifest {
            manifest_format: MANIFEST_FORMAT.to_string(),
            project_hash: None,
            entries: HashMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Manifest> {
        if !path.exists() {
            return Ok(Manifest::new());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::manifest(format!("reading {}: {e}", path.display())))?;
        Manifest::from_toml_str(&text)
    }

    /// Parses a manifest from TOML text, treating empty text the same as an
    /// absent file (§3: no `Manifest.toml` yet is not an error). Shared by
    /// [`Manifest::load`] and the undo/redo history, whose seed entry
    /// carries whatever text was on disk before the very first `write()` —
    /// `""` in the common case where no manifest existed yet.
    pub fn from_toml_str(text: &str) -> Result<Manifest> {
        if text.trim().is_empty() {
            return Ok(Manifest::new());
        }
        let manifest: Manifest = toml::from_str(text)?;
        if manifest.manifest_format != MANIFEST_FORMAT.to_string() {
            return Err(Error::manifest(format!(
                "unsupported manifest_format '{}', expected {}",
                manifest.manifest_format, MANIFEST_FORMAT
            )));
        }
        Ok(manifest)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn get(&self, name: &str, uuid: PackageId) -> Option<&ManifestEntry> {
        self.entries
            .get(name)
            .and_then(|v| v.iter().find(|e| e.uuid == uuid))
    }

    pub fn get_by_uuid(&self, uuid: PackageId) -> Option<(&str, &ManifestEntry)> {
        for (name, v) in &self.entries {
            if let Some(e) = v.iter().find(|e| e.uuid == uuid) {
                return Some((name.as_str(), e));
            }
        }
        None
    }

    pub fn upsert(&mut self, name: &str, entry: ManifestEntry) {
        let bucket = self.entries.entry(name.to_string()).or_default();
        bucket.retain(|e| e.uuid != entry.uuid);
        bucket.push(entry);
    }

    pub fn remove(&mut self, uuid: PackageId) -> bool {
        let mut removed = false;
        for bucket in self.entries.values_mut() {
            let before = bucket.len();
            bucket.retain(|e| e.uuid != uuid);
            removed |= bucket.len() != before;
        }
        self.entries.retain(|_, v| !v.is_empty());
        removed
    }

    pub fn contains(&self, uuid: PackageId) -> bool {
        self.entries.values().any(|v| v.iter().any(|e| e.uuid == uuid))
    }

    pub fn all_uuids(&self) -> std::collections::HashSet<PackageId> {
        self.entries
            .values()
            .flat_map(|v| v.iter().map(|e| e.uuid))
            .collect()
    }

    /// Drops every entry not reachable from `roots` by following `deps`
    /// edges — the manifest-pruning invariant of §3 ("the manifest is
    /// *pruned*").
    pub fn prune(&mut self, roots: &[PackageId]) {
        let mut reachable = std::collections::HashSet::new();
        let mut stack: Vec<PackageId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some((_, entry)) = self.get_by_uuid(id) {
                for dep in entry.deps.values() {
                    stack.push(*dep);
                }
            }
        }
        for bucket in self.entries.values_mut() {
            bucket.retain(|e| reachable.contains(&e.uuid));
        }
        self.entries.retain(|_, v| !v.is_empty());
    }

    /// §8 invariant: for every `manifest[uuid]`, every dependency in
    /// `manifest[uuid].deps` is also a key of `manifest`.
    pub fn check_closed(&self) -> Result<()> {
        let all = self.all_uuids();
        for (name, bucket) in &self.entries {
            for entry in bucket {
                for (dep_name, dep_id) in &entry.deps {
                    if !all.contains(dep_id) {
                        return Err(Error::manifest(format!(
                            "{name} depends on {dep_name} ({dep_id}) which has no manifest entry"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Manifest::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(uuid: &str, version: &str) -> ManifestEntry {
        ManifestEntry {
            uuid: uuid.parse().unwrap(),
            source: PackageSource::Registered {
                version: version.to_string(),
                tree_hash: "deadbeef".to_string(),
            },
            pinned: false,
            deps: HashMap::new(),
        }
    }

    #[test]
    fn upsert_and_get() {
        let mut m = Manifest::new();
        m.upsert("A", entry("11111111-1111-1111-1111-111111111111", "1.0.0"));
        let id: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        assert!(m.get("A", id).is_some());
    }

    #[test]
    fn prune_drops_unreachable() {
        let mut m = Manifest::new();
        let a: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        let b: PackageId = "22222222-2222-2222-2222-222222222222".parse().unwrap();
        m.upsert("A", entry("11111111-1111-1111-1111-111111111111", "1.0.0"));
        m.upsert("B", entry("22222222-2222-2222-2222-222222222222", "1.0.0"));
        m.prune(&[a]);
        assert!(m.contains(a));
        assert!(!m.contains(b));
    }

    #[test]
    fn check_closed_detects_dangling_dep() {
        let mut m = Manifest::new();
        let mut e = entry("11111111-1111-1111-1111-111111111111", "1.0.0");
        let missing: PackageId = "99999999-9999-9999-9999-999999999999".parse().unwrap();
        e.deps.insert("Missing".into(), missing);
        m.upsert("A", e);
        assert!(m.check_closed().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut m = Manifest::new();
        m.upsert("A", entry("11111111-1111-1111-1111-111111111111", "1.0.0"));
        let text = m.to_toml_string().unwrap();
        let parsed: Manifest = toml::from_str(&text).unwrap();
        assert_eq!(parsed.entries.len(), 1);
    }
}
