//! Fixture helpers shared across the integration tests: an in-memory
//! registry builder that writes a real bare-variant `Registry.toml` tree
//! to disk, plus a scratch project/environment builder.

use pkgdepot::id::PackageId;
use pkgdepot::registry::{PackedIndex, Registry, RegistryPackageEntry, RegistryToml, VersionRecord};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// One version's worth of dependency data for [`TestRegistry::add_package`].
pub struct TestVersion {
    pub version: String,
    pub deps: Vec<String>,
    pub compat: Vec<(String, String)>,
}

impl TestVersion {
    pub fn new(version: &str) -> Self {
        TestVersion { version: version.to_string(), deps: Vec::new(), compat: Vec::new() }
    }

    pub fn with_dep(mut self, name: &str, compat: &str) -> Self {
        self.deps.push(name.to_string());
        self.compat.push((name.to_string(), compat.to_string()));
        self
    }
}

/// A bare-variant registry under a temp directory, populated package by
/// package and opened once every package is registered (package dep names
/// are resolved against the registry's full `by_name` index at open time,
/// so every package a `with_dep` references must be added first).
pub struct TestRegistry {
    _dir: Option<TempDir>,
    root: PathBuf,
    uuid: PackageId,
    name: String,
    packages: HashMap<String, RegistryPackageEntry>,
}

impl TestRegistry {
    pub fn new(name: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().to_path_buf();
        TestRegistry {
            _dir: Some(dir),
            root,
            uuid: PackageId::new_v4(),
            name: name.to_string(),
            packages: HashMap::new(),
        }
    }

    /// Builds the registry directly under `root` instead of a throwaway
    /// temp directory, for fixtures that need the registry to live inside
    /// a caller-owned depot tree (e.g. `<depot>/registries/<name>`).
    pub fn new_at(root: PathBuf, name: &str) -> Self {
        fs::create_dir_all(&root).expect("create registry root");
        TestRegistry {
            _dir: None,
            root,
            uuid: PackageId::new_v4(),
            name: name.to_string(),
            packages: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Registers a package's versions and writes its `Versions.toml` /
    /// `Deps.toml` / `Compat.toml`, returning the UUID assigned to it.
    pub fn add_package(&mut self, name: &str, versions: Vec<TestVersion>) -> PackageId {
        let id = PackageId::new_v4();
        let pkg_path = format!("packages/{name}");
        let full = self.root.join(&pkg_path);
        fs::create_dir_all(&full).expect("create package dir");

        let mut versions_toml = HashMap::new();
        let mut deps_toml: HashMap<String, Vec<String>> = HashMap::new();
        let mut compat_toml: HashMap<String, HashMap<String, String>> = HashMap::new();
        for v in &versions {
            let tree_hash = format!("{:040x}", versions_toml.len() + 1);
            versions_toml.insert(v.version.clone(), VersionRecord { tree_hash, yanked: false });
            if !v.deps.is_empty() {
                deps_toml.insert(format!("={}", v.version), v.deps.clone());
            }
            if !v.compat.is_empty() {
                let m: HashMap<String, String> = v.compat.iter().cloned().collect();
                compat_toml.insert(format!("={}", v.version), m);
            }
        }

        fs::write(full.join("Versions.toml"), toml::to_string_pretty(&versions_toml).unwrap()).unwrap();
        fs::write(full.join("Deps.toml"), toml::to_string_pretty(&deps_toml).unwrap()).unwrap();
        if !compat_toml.is_empty() {
            fs::write(full.join("Compat.toml"), toml::to_string_pretty(&compat_toml).unwrap()).unwrap();
        }

        self.packages.insert(id.to_string(), RegistryPackageEntry { name: name.to_string(), path: pkg_path });
        id
    }

    /// Writes `Registry.toml` and opens the registry, consuming the
    /// builder since the on-disk index is now fixed.
    pub fn open(self) -> Registry {
        let reg_toml = RegistryToml {
            name: self.name.clone(),
            uuid: self.uuid,
            repo: None,
            description: None,
            packages: self.packages.clone(),
        };
        fs::write(self.root.join("Registry.toml"), toml::to_string_pretty(&reg_toml).unwrap()).unwrap();
        Registry::open(&self.root).expect("open fixture registry")
    }
}

/// Writes a packed registry (a sidecar `.toml` index pointing at a
/// `.tar.gz` archive) for the variant-detection tests. `files` are
/// archive-relative paths to contents, already including `Registry.toml`.
pub fn write_packed_registry(dir: &Path, archive_name: &str, files: &[(&str, &[u8])]) {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let archive_path = dir.join(format!("{archive_name}.tar.gz"));
    let tar_gz = fs::File::create(&archive_path).unwrap();
    let enc = GzEncoder::new(tar_gz, Compression::default());
    let mut builder = tar::Builder::new(enc);
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();

    let index = PackedIndex {
        uuid: PackageId::new_v4(),
        tree_hash: "0".repeat(40),
        path: format!("{archive_name}.tar.gz"),
    };
    fs::write(dir.join(format!("{archive_name}.toml")), toml::to_string_pretty(&index).unwrap()).unwrap();
}

/// A scratch directory with a `Project.toml` (and, once `write` or
/// `pkgdepot` operations run, a `Manifest.toml` beside it) ready for
/// [`pkgdepot::environment::Environment::read`].
pub struct TestProject {
    pub dir: TempDir,
}

impl TestProject {
    pub fn new(name: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let project = pkgdepot::project::Project {
            name: Some(name.to_string()),
            uuid: Some(PackageId::new_v4()),
            version: Some("0.1.0".to_string()),
            ..Default::default()
        };
        fs::write(dir.path().join("Project.toml"), project.to_toml_string().unwrap()).unwrap();
        TestProject { dir }
    }

    pub fn project_path(&self) -> PathBuf {
        self.dir.path().join("Project.toml")
    }
}
