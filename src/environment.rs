//! Environment cache: owns a project and manifest file pair, serializes
//! mutations atomically, and keeps an on-disk undo/redo ring (§4.3).

use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::project::Project;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Fixed TOML key order for project/manifest writes (§4.3): the identity
/// and dependency keys come first in this exact order, everything else
/// follows alphabetically. `toml_edit` lets us place keys explicitly
/// instead of relying on struct field order surviving serde.
const PRIORITY_KEYS: &[&str] = &["name", "uuid", "keywords", "license", "desc", "deps", "compat"];

fn reorder_toml_keys(text: &str) -> Result<String> {
    let mut doc: toml_edit::DocumentMut = text.parse()?;
    let existing: Vec<String> = doc.as_table().iter().map(|(k, _)| k.to_string()).collect();
    let mut ordered: Vec<String> = PRIORITY_KEYS
        .iter()
        .filter(|k| existing.contains(&k.to_string()))
        .map(|k| k.to_string())
        .collect();
    let mut rest: Vec<String> = existing
        .into_iter()
        .filter(|k| !ordered.contains(k))
        .collect();
    rest.sort();
    ordered.extend(rest);
    // toml_edit preserves insertion order on write; reinsert keys in the
    // priority order so the document's own order matches the spec's.
    let mut new_doc = toml_edit::DocumentMut::new();
    for key in &ordered {
        if let Some(item) = doc.remove(key) {
            new_doc[key] = item;
        }
    }
    Ok(new_doc.to_string())
}

/// Atomically replaces `path`'s contents: writes to a sibling temp file in
/// the same directory, fsyncs it, then renames over the target (§4.3, §8's
/// "kill between fsync and rename leaves the original intact" law).
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let dir = path.parent().ok_or_else(|| Error::depot("path has no parent directory"))?;
    fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(contents.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    project_text: String,
    manifest_text: String,
}

/// An on-disk ring buffer of (project, manifest) snapshots keyed by the
/// project file's path, supporting `undo`/`redo` (§4.3, §8 scenario 6).
pub struct UndoHistory {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
    cursor: usize,
}

const MAX_HISTORY: usize = 100;

impl UndoHistory {
    fn history_path(project_path: &Path) -> PathBuf {
        let dir = project_path.parent().unwrap_or_else(|| Path::new("."));
        dir.join(".pkgdepot_undo.toml")
    }

    pub fn load(project_path: &Path) -> UndoHistory {
        let path = Self::history_path(project_path);
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|text| toml::from_str::<RawHistory>(&text).ok())
            .map(|raw| {
                raw.entries
                    .into_iter()
                    .map(|e| HistoryEntry {
                        project_text: e.project,
                        manifest_text: e.manifest,
                    })
                    .collect()
            })
            .unwrap_or_default();
        UndoHistory {
            path,
            entries,
            cursor: 0,
        }
    }

    fn save(&self) -> Result<()> {
        let raw = RawHistory {
            entries: self
                .entries
                .iter()
                .map(|e| RawEntry {
                    project: e.project_text.clone(),
                    manifest: e.manifest_text.clone(),
                })
                .collect(),
        };
        let text = toml::to_string_pretty(&raw)?;
        atomic_write(&self.path, &text)
    }

    /// Records a completed write: `prior` is the state the files were in
    /// before it, `new` is what's now on disk. The cursor always points at
    /// the entry matching the current on-disk state, so `undo`/`redo` can
    /// walk it in both directions; the first call on an empty history
    /// seeds `entries[0]` with `prior` so even the very first write is
    /// undoable.
    pub fn push(&mut self, prior_project: &str, prior_manifest: &str, new_project: &str, new_manifest: &str) -> Result<()> {
        if self.entries.is_empty() {
            self.entries.push(HistoryEntry {
                project_text: prior_project.to_string(),
                manifest_text: prior_manifest.to_string(),
            });
        }
        self.entries.truncate(self.cursor + 1);
        self.entries.push(HistoryEntry {
            project_text: new_project.to_string(),
            manifest_text: new_manifest.to_string(),
        });
        if self.entries.len() > MAX_HISTORY {
            self.entries.remove(0);
        }
        self.cursor = self.entries.len() - 1;
        self.save()
    }

    /// Moves the pointer back one step, returning the (project, manifest)
    /// text pair to restore, or `None` if there is nothing to undo.
    pub fn undo(&mut self) -> Option<(String, String)> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        let entry = &self.entries[self.cursor];
        Some((entry.project_text.clone(), entry.manifest_text.clone()))
    }

    pub fn redo(&mut self) -> Option<(String, String)> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        let entry = &self.entries[self.cursor];
        Some((entry.project_text.clone(), entry.manifest_text.clone()))
    }
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct RawHistory {
    entries: Vec<RawEntry>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RawEntry {
    project: String,
    manifest: String,
}

/// Owns a project and manifest pair together with their file paths, plus
/// the snapshots needed to diff against the pre-operation state (§3).
pub struct Environment {
    pub project_path: PathBuf,
    pub manifest_path: PathBuf,
    pub project: Project,
    pub manifest: Manifest,
    pub original_project: Project,
    pub original_manifest: Manifest,
    history: UndoHistory,
}

impl Environment {
    pub fn read(project_path: &Path) -> Result<Environment> {
        let project = Project::load(project_path)?;
        let manifest_path = project
            .manifest
            .as_ref()
            .map(|p| project_path.parent().unwrap_or_else(|| Path::new(".")).join(p))
            .unwrap_or_else(|| {
                project_path
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join("Manifest.toml")
            });
        let manifest = Manifest::load(&manifest_path)?;
        let history = UndoHistory::load(project_path);
        Ok(Environment {
            project_path: project_path.to_path_buf(),
            manifest_path,
            original_project: project.clone(),
            original_manifest: manifest.clone(),
            project,
            manifest,
            history,
        })
    }

    /// Writes both files atomically in the same critical section (§5's
    /// ordering guarantee: a reader never observes a manifest without its
    /// matching project).
    pub fn write(&mut self) -> Result<()> {
        self.manifest.check_closed()?;
        let prior_project = fs::read_to_string(&self.project_path).unwrap_or_default();
        let prior_manifest = fs::read_to_string(&self.manifest_path).unwrap_or_default();

        let project_text = reorder_toml_keys(&self.project.to_toml_string()?)?;
        let manifest_text = reorder_toml_keys(&self.manifest.to_toml_string()?)?;
        self.history.push(&prior_project, &prior_manifest, &project_text, &manifest_text)?;
        atomic_write(&self.project_path, &project_text)?;
        atomic_write(&self.manifest_path, &manifest_text)?;
        self.original_project = self.project.clone();
        self.original_manifest = self.manifest.clone();
        Ok(())
    }

    pub fn undo(&mut self) -> Result<bool> {
        match self.history.undo() {
            Some((project_text, manifest_text)) => {
                atomic_write(&self.project_path, &project_text)?;
                atomic_write(&self.manifest_path, &manifest_text)?;
                self.project = toml::from_str(&project_text)?;
                self.manifest = Manifest::from_toml_str(&manifest_text)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn redo(&mut self) -> Result<bool> {
        match self.history.redo() {
            Some((project_text, manifest_text)) => {
                atomic_write(&self.project_path, &project_text)?;
                atomic_write(&self.manifest_path, &manifest_text)?;
                self.project = toml::from_str(&project_text)?;
                self.manifest = Manifest::from_toml_str(&manifest_text)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// A standalone copy sharing no state with `self`, for callers that
    /// need to try a mutation and resolve against it before committing to
    /// the same mutation on the real environment (e.g. building the
    /// `dep_names` map an operation needs before it has produced the
    /// solution that map describes).
    pub fn snapshot(&self) -> Environment {
        Environment {
            project_path: self.project_path.clone(),
            manifest_path: self.manifest_path.clone(),
            project: self.project.clone(),
            manifest: self.manifest.clone(),
            original_project: self.original_project.clone(),
            original_manifest: self.original_manifest.clone(),
            history: UndoHistory::load(&self.project_path),
        }
    }

    /// True when every resolved package's source is materialized on disk
    /// under `depot_packages_dir` (§4.3).
    pub fn is_instantiated(&self, installed_paths: impl Fn(crate::id::PackageId) -> Option<PathBuf>) -> bool {
        self.manifest
            .all_uuids()
            .into_iter()
            .all(|id| installed_paths(id).map(|p| p.exists()).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Project.toml");
        atomic_write(&path, "name = \"demo\"\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "name = \"demo\"\n");
    }

    #[test]
    fn atomic_write_preserves_original_on_later_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Project.toml");
        atomic_write(&path, "name = \"v1\"\n").unwrap();
        atomic_write(&path, "name = \"v2\"\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "name = \"v2\"\n");
    }

    #[test]
    fn undo_history_push_and_undo() {
        let dir = TempDir::new().unwrap();
        let project_path = dir.path().join("Project.toml");
        let mut history = UndoHistory::load(&project_path);
        history.push("", "", "name = \"a\"\n", "").unwrap();
        history.push("name = \"a\"\n", "", "name = \"b\"\n", "").unwrap();
        let (project_text, _) = history.undo().unwrap();
        assert_eq!(project_text, "name = \"a\"\n");
    }

    #[test]
    fn undo_history_redo_restores_the_state_undo_left() {
        let dir = TempDir::new().unwrap();
        let project_path = dir.path().join("Project.toml");
        let mut history = UndoHistory::load(&project_path);
        history.push("", "", "name = \"a\"\n", "").unwrap();
        history.undo().unwrap();
        let (project_text, _) = history.redo().unwrap();
        assert_eq!(project_text, "name = \"a\"\n");
    }

    #[test]
    fn undo_after_first_write_restores_absent_manifest_without_erroring() {
        let dir = TempDir::new().unwrap();
        let project_path = dir.path().join("Project.toml");
        fs::write(&project_path, "name = \"demo\"\n").unwrap();

        // No Manifest.toml exists yet, so the undo seed entry carries "" for
        // the manifest half of the pair (§4.3, write()'s prior_manifest
        // read uses unwrap_or_default()).
        let mut env = Environment::read(&project_path).unwrap();
        env.project.deps.insert(
            "A".to_string(),
            "11111111-1111-1111-1111-111111111111".parse().unwrap(),
        );
        env.write().unwrap();

        assert!(env.undo().unwrap());
        assert!(env.manifest.entries.is_empty());
        assert!(!env.project.deps.contains_key("A"));
    }

    #[test]
    fn key_reorder_moves_priority_keys_first() {
        let text = "zzz = 1\nname = \"demo\"\nuuid = \"x\"\n";
        let reordered = reorder_toml_keys(text).unwrap();
        let name_pos = reordered.find("name").unwrap();
        let zzz_pos = reordered.find("zzz").unwrap();
        assert!(name_pos < zzz_pos);
    }
}
