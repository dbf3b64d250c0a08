//! Registry instance: lazy-loaded package metadata from one of several
//! on-disk storage formats (§4.2).
//!
//! A registry is an immutable (per session) view identified by a UUID and
//! name. Package entries are loaded lazily on first access and cached for
//! the lifetime of the registry handle, guarded by double-checked locking so
//! concurrent callers never race the same entry's materialization.

use crate::compressed::CompressedTable;
use crate::error::{Error, Result};
use crate::id::PackageId;
use crate::version::{Version, VersionRange, VersionSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// How a registry's bytes are stored on disk, detected per the rule in
/// §4.2: a `*.toml` index carrying a `path` key is packed; `.tree_info.toml`
/// means unpacked; `.git/` means git; a lone `Registry.toml` is bare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVariant {
    Packed,
    Unpacked,
    Git,
    Bare,
}

/// The root `Registry.toml` document (§6 External Interfaces).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryToml {
    pub name: String,
    pub uuid: PackageId,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub packages: HashMap<String, RegistryPackageEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryPackageEntry {
    pub name: String,
    pub path: String,
}

/// The sidecar index for a packed registry: `name.toml` paired with
/// `name.tar.gz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedIndex {
    pub uuid: PackageId,
    #[serde(rename = "git-tree-sha1")]
    pub tree_hash: String,
    pub path: String,
}

/// One version's record inside `Versions.toml`: a tree hash and whether the
/// version has been yanked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(rename = "git-tree-sha1")]
    pub tree_hash: String,
    #[serde(default)]
    pub yanked: bool,
}

/// A package entry as seen in the registry index, before its full metadata
/// (`PkgInfo`) has been loaded.
#[derive(Debug, Clone)]
pub struct PkgEntry {
    pub id: PackageId,
    pub name: String,
    pub path: String,
}

/// The fully materialized per-version metadata for one package: version
/// pool with tree hashes and yanked flags, plus the four compressed tables
/// from §3 (strong deps, weak deps, and their compat counterparts).
#[derive(Debug, Clone, Default)]
pub struct PkgInfo {
    pub versions: Vec<(Version, VersionRecord)>,
    pub deps: CompressedTable<Vec<PackageId>>,
    pub compat: CompressedTable<HashMap<PackageId, VersionSpec>>,
    pub weak_deps: CompressedTable<Vec<PackageId>>,
    pub weak_compat: CompressedTable<HashMap<PackageId, VersionSpec>>,
}

impl PkgInfo {
    /// Sorted pool of non-yanked versions, the `pool[p]` input to the graph
    /// builder (§4.4).
    pub fn non_yanked_pool(&self) -> Vec<Version> {
        let mut pool: Vec<Version> = self
            .versions
            .iter()
            .filter(|(_, rec)| !rec.yanked)
            .map(|(v, _)| v.clone())
            .collect();
        pool.sort();
        pool
    }

    pub fn tree_hash(&self, v: &Version) -> Option<&str> {
        self.versions
            .iter()
            .find(|(ver, _)| ver == v)
            .map(|(_, rec)| rec.tree_hash.as_str())
    }
}

#[derive(Debug)]
struct LazyEntry {
    loaded: Mutex<bool>,
    info: RwLock<Option<PkgInfo>>,
}

impl Default for LazyEntry {
    fn default() -> Self {
        LazyEntry {
            loaded: Mutex::new(false),
            info: RwLock::new(None),
        }
    }
}

/// A loaded registry handle: immutable name/UUID index plus lazily
/// materialized per-package metadata.
#[derive(Debug)]
pub struct Registry {
    pub name: String,
    pub uuid: PackageId,
    pub variant: StorageVariant,
    /// The git remote this registry was cloned from, if any — used as the
    /// base for package archive/clone URLs in the download fallback chain
    /// (§4.7).
    pub repo: Option<String>,
    root: PathBuf,
    entries: HashMap<PackageId, PkgEntry>,
    by_name: HashMap<String, Vec<PackageId>>,
    lazy: HashMap<PackageId, LazyEntry>,
    /// Present only for packed registries: the tarball contents read into
    /// memory, keyed by archive-relative path. Freed per-package after that
    /// package's `PkgInfo` is materialized (§4.2).
    packed_files: Mutex<Option<HashMap<String, Vec<u8>>>>,
}

impl Registry {
    /// Detects the storage variant at `path` and opens a handle. Only the
    /// index (`Registry.toml` plus per-package `Package.toml` existence) is
    /// read eagerly; per-version tables load lazily via [`Registry::info`].
    pub fn open(path: &Path) -> Result<Registry> {
        let variant = detect_variant(path)?;
        let (toml_path, packed_files) = match variant {
            StorageVariant::Packed => {
                let index_path = find_packed_index(path)?;
                let index: PackedIndex = toml::from_str(&fs::read_to_string(&index_path)?)?;
                let archive_path = path.join(&index.path);
                let files = read_tarball(&archive_path)?;
                let registry_toml_bytes = files
                    .get("Registry.toml")
                    .ok_or_else(|| Error::registry("packed registry missing Registry.toml"))?;
                let text = String::from_utf8_lossy(registry_toml_bytes).to_string();
                (text, Some(files))
            }
            _ => (fs::read_to_string(path.join("Registry.toml"))?, None),
        };
        let reg_toml: RegistryToml = toml::from_str(&toml_path)?;

        let mut entries = HashMap::new();
        let mut by_name: HashMap<String, Vec<PackageId>> = HashMap::new();
        let mut lazy = HashMap::new();
        for (uuid_str, pkg) in &reg_toml.packages {
            let id: PackageId = uuid_str.parse().map_err(Error::from)?;
            entries.insert(
                id,
                PkgEntry {
                    id,
                    name: pkg.name.clone(),
                    path: pkg.path.clone(),
                },
            );
            by_name.entry(pkg.name.clone()).or_default().push(id);
            lazy.insert(id, LazyEntry::default());
        }

        Ok(Registry {
            name: reg_toml.name,
            uuid: reg_toml.uuid,
            variant,
            repo: reg_toml.repo,
            root: path.to_path_buf(),
            entries,
            by_name,
            lazy,
            packed_files: Mutex::new(packed_files),
        })
    }

    pub fn packages(&self) -> impl Iterator<Item = &PkgEntry> {
        self.entries.values()
    }

    /// Built once per registry and cached on the `by_name` index at open
    /// time; returns the UUIDs sharing `name` (names are non-unique, §3).
    pub fn uuids_by_name(&self, name: &str) -> &[PackageId] {
        self.by_name.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn entry(&self, id: PackageId) -> Option<&PkgEntry> {
        self.entries.get(&id)
    }

    /// Lazily loads and returns `PkgInfo` for `id`. Thread-safe with
    /// double-checked locking: readers take the shared lock first and only
    /// fall through to the exclusive load path once.
    pub fn info(&self, id: PackageId) -> Result<std::sync::RwLockReadGuard<'_, Option<PkgInfo>>> {
        let lazy = self
            .lazy
            .get(&id)
            .ok_or_else(|| Error::registry(format!("unknown package UUID {id}")))?;

        {
            let guard = lazy.info.read().unwrap();
            if guard.is_some() {
                return Ok(guard);
            }
        }

        let mut loaded = lazy.loaded.lock().unwrap();
        if !*loaded {
            let entry = self.entries.get(&id).expect("entry present for lazy slot");
            let info = self.load_pkg_info(entry)?;
            *lazy.info.write().unwrap() = Some(info);
            *loaded = true;
            self.free_packed_bytes(&entry.path);
        }
        drop(loaded);

        Ok(lazy.info.read().unwrap())
    }

    fn free_packed_bytes(&self, pkg_path: &str) {
        if let Some(files) = self.packed_files.lock().unwrap().as_mut() {
            let prefix = format!("{pkg_path}/");
            files.retain(|k, _| !k.starts_with(&prefix));
        }
    }

    fn load_pkg_info(&self, entry: &PkgEntry) -> Result<PkgInfo> {
        let versions_text = self.read_package_file(&entry.path, "Versions.toml")?;
        let deps_text = self.read_package_file(&entry.path, "Deps.toml")?;
        let compat_text = self
            .read_package_file_opt(&entry.path, "Compat.toml")?
            .unwrap_or_default();
        let weak_deps_text = self
            .read_package_file_opt(&entry.path, "WeakDeps.toml")?
            .unwrap_or_default();
        let weak_compat_text = self
            .read_package_file_opt(&entry.path, "WeakCompat.toml")?
            .unwrap_or_default();

        let versions_raw: HashMap<String, VersionRecord> = toml::from_str(&versions_text)?;
        let mut versions: Vec<(Version, VersionRecord)> = Vec::new();
        for (v_str, rec) in versions_raw {
            let v: Version = v_str.parse()?;
            versions.push((v, rec));
        }
        versions.sort_by(|a, b| a.0.cmp(&b.0));

        let deps = parse_range_keyed_table::<Vec<String>>(&deps_text)?;
        let compat = parse_range_keyed_table::<HashMap<String, String>>(&compat_text)?;
        let weak_deps = parse_range_keyed_table::<Vec<String>>(&weak_deps_text)?;
        let weak_compat = parse_range_keyed_table::<HashMap<String, String>>(&weak_compat_text)?;

        let mut deps_table = CompressedTable::new();
        for (range, names) in deps {
            let ids: Result<Vec<PackageId>> = names.iter().map(|n| self.resolve_dep_name(n)).collect();
            deps_table.insert(range, ids?).map_err(|_| {
                Error::RegistryInvariant {
                    package: entry.name.clone(),
                    detail: "overlapping ranges in Deps.toml".to_string(),
                }
            })?;
        }

        let mut compat_table = CompressedTable::new();
        for (range, m) in compat {
            let mut out = HashMap::new();
            for (name, spec_str) in m {
                let id = self.resolve_dep_name(&name)?;
                out.insert(id, VersionSpec::parse(&spec_str)?);
            }
            compat_table.insert(range, out).map_err(|_| Error::RegistryInvariant {
                package: entry.name.clone(),
                detail: "overlapping ranges in Compat.toml".to_string(),
            })?;
        }

        let mut weak_deps_table = CompressedTable::new();
        for (range, names) in weak_deps {
            let ids: Result<Vec<PackageId>> = names.iter().map(|n| self.resolve_dep_name(n)).collect();
            weak_deps_table.insert(range, ids?).map_err(|_| Error::RegistryInvariant {
                package: entry.name.clone(),
                detail: "overlapping ranges in WeakDeps.toml".to_string(),
            })?;
        }

        let mut weak_compat_table = CompressedTable::new();
        for (range, m) in weak_compat {
            let mut out = HashMap::new();
            for (name, spec_str) in m {
                let id = self.resolve_dep_name(&name)?;
                out.insert(id, VersionSpec::parse(&spec_str)?);
            }
            weak_compat_table.insert(range, out).map_err(|_| Error::RegistryInvariant {
                package: entry.name.clone(),
                detail: "overlapping ranges in WeakCompat.toml".to_string(),
            })?;
        }

        Ok(PkgInfo {
            versions,
            deps: deps_table,
            compat: compat_table,
            weak_deps: weak_deps_table,
            weak_compat: weak_compat_table,
        })
    }

    fn resolve_dep_name(&self, name: &str) -> Result<PackageId> {
        self.by_name
            .get(name)
            .and_then(|ids| ids.first())
            .copied()
            .ok_or_else(|| Error::registry(format!("Deps.toml references unknown package {name}")))
    }

    fn read_package_file(&self, pkg_path: &str, file: &str) -> Result<String> {
        self.read_package_file_opt(pkg_path, file)?
            .ok_or_else(|| Error::registry(format!("missing {file} for package at {pkg_path}")))
    }

    fn read_package_file_opt(&self, pkg_path: &str, file: &str) -> Result<Option<String>> {
        if let Some(files) = self.packed_files.lock().unwrap().as_ref() {
            let key = format!("{pkg_path}/{file}");
            return Ok(files.get(&key).map(|b| String::from_utf8_lossy(b).to_string()));
        }
        let full = self.root.join(pkg_path).join(file);
        if !full.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(full)?))
    }

    /// Package search used by the `search` command: a case-insensitive
    /// substring match over package names.
    pub fn search(&self, query: &str) -> Vec<&PkgEntry> {
        let q = query.to_lowercase();
        let mut out: Vec<&PkgEntry> = self
            .entries
            .values()
            .filter(|e| e.name.to_lowercase().contains(&q))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// Enumerates registries under each depot's `registries/` subtree (§4.2).
/// A packed registry is represented as the pair `(name.toml, name.tar.gz)`
/// and is detected the same way `Registry::open` detects it.
pub fn reachable_registries(depots: &[PathBuf]) -> Result<Vec<Registry>> {
    let mut out = Vec::new();
    for depot in depots {
        let registries_dir = depot.join("registries");
        if !registries_dir.exists() {
            continue;
        }
        for entry in fs::read_dir(&registries_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                out.push(Registry::open(&entry.path())?);
            }
        }
    }
    Ok(out)
}

fn detect_variant(path: &Path) -> Result<StorageVariant> {
    if find_packed_index(path).is_ok() {
        return Ok(StorageVariant::Packed);
    }
    if path.join(".tree_info.toml").exists() {
        return Ok(StorageVariant::Unpacked);
    }
    if path.join(".git").exists() {
        return Ok(StorageVariant::Git);
    }
    if path.join("Registry.toml").exists() {
        return Ok(StorageVariant::Bare);
    }
    Err(Error::registry(format!(
        "no recognizable registry storage format at {}",
        path.display()
    )))
}

fn find_packed_index(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Err(Error::registry("not a directory"));
    }
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let p = entry.path();
        if p.extension().map(|e| e == "toml").unwrap_or(false) {
            if let Ok(text) = fs::read_to_string(&p) {
                if let Ok(idx) = toml::from_str::<PackedIndex>(&text) {
                    if !idx.path.is_empty() {
                        return Ok(p);
                    }
                }
            }
        }
    }
    Err(Error::registry("no packed index found"))
}

fn read_tarball(path: &Path) -> Result<HashMap<String, Vec<u8>>> {
    let file = fs::File::open(path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    let mut files = HashMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut buf)?;
        files.insert(path, buf);
    }
    Ok(files)
}

/// Parses a TOML table keyed by compressed `VersionRange` strings (the
/// `Deps.toml`/`Compat.toml`/etc. wire format of §6) into `(range, value)`
/// pairs. Range strings use the same syntax as [`VersionSpec`] clauses but
/// each key names exactly one range.
fn parse_range_keyed_table<T: serde::de::DeserializeOwned>(
    text: &str,
) -> Result<Vec<(VersionRange, T)>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: HashMap<String, T> = toml::from_str(text)?;
    let mut out = Vec::new();
    for (range_str, value) in raw {
        let spec = VersionSpec::parse(&range_str)?;
        let range = spec
            .ranges()
            .first()
            .cloned()
            .ok_or_else(|| Error::registry(format!("empty range key '{range_str}'")))?;
        out.push((range, value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, rel: &str, contents: &str) {
        let full = dir.join(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        let mut f = fs::File::create(full).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn bare_registry_fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        let a_uuid = "11111111-1111-1111-1111-111111111111";
        write_file(
            dir.path(),
            "Registry.toml",
            &format!(
                "name = \"TestRegistry\"\nuuid = \"{}\"\n\n[packages.{a_uuid}]\nname = \"A\"\npath = \"A\"\n",
                "22222222-2222-2222-2222-222222222222"
            ),
        );
        write_file(
            dir.path(),
            "A/Versions.toml",
            "\"1.0.0\" = { git-tree-sha1 = \"deadbeef\" }\n\"1.1.0\" = { git-tree-sha1 = \"cafebabe\" }\n",
        );
        write_file(dir.path(), "A/Deps.toml", "");
        dir
    }

    #[test]
    fn detects_bare_variant() {
        let dir = bare_registry_fixture();
        let reg = Registry::open(dir.path()).unwrap();
        assert_eq!(reg.variant, StorageVariant::Bare);
        assert_eq!(reg.name, "TestRegistry");
    }

    #[test]
    fn lazy_loads_pkg_info() {
        let dir = bare_registry_fixture();
        let reg = Registry::open(dir.path()).unwrap();
        let id: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        let info = reg.info(id).unwrap();
        let info = info.as_ref().unwrap();
        assert_eq!(info.non_yanked_pool().len(), 2);
    }

    #[test]
    fn uuids_by_name_lookup() {
        let dir = bare_registry_fixture();
        let reg = Registry::open(dir.path()).unwrap();
        let ids = reg.uuids_by_name("A");
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn rejects_overlapping_deps_toml() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "Registry.toml",
            "name = \"R\"\nuuid = \"33333333-3333-3333-3333-333333333333\"\n\n[packages.\"11111111-1111-1111-1111-111111111111\"]\nname = \"A\"\npath = \"A\"\n[packages.\"44444444-4444-4444-4444-444444444444\"]\nname = \"B\"\npath = \"B\"\n",
        );
        write_file(
            dir.path(),
            "A/Versions.toml",
            "\"1.0.0\" = { git-tree-sha1 = \"a\" }\n\"1.5.0\" = { git-tree-sha1 = \"b\" }\n",
        );
        write_file(
            dir.path(),
            "A/Deps.toml",
            "\"1.0.0 - 2.0.0\" = [\"B\"]\n\"1.2.0 - 3.0.0\" = [\"B\"]\n",
        );
        write_file(dir.path(), "B/Versions.toml", "\"1.0.0\" = { git-tree-sha1 = \"c\" }\n");
        write_file(dir.path(), "B/Deps.toml", "");

        let reg = Registry::open(dir.path()).unwrap();
        let id: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        let result = reg.info(id);
        assert!(result.is_err());
    }
}
