//! Content-addressed download and install layer (§4.7).
//!
//! A depot is a shared directory tree (`packages/`, `clones/`, `registries/`,
//! `bin/`, `scratchspaces/`, `logs/`) that may be touched by several
//! processes at once. This module owns three things: computing the
//! deterministic install path for a `(name, uuid, tree_hash)` triple, the
//! archive-first/git-fallback download strategy with tree-hash verification,
//! and the pidfile lock that serializes `registries/` mutations across
//! processes (§5).

use crate::error::{Error, Result};
use crate::id::PackageId;
use flate2::read::GzDecoder;
use sha1::{Digest as Sha1Digest, Sha1};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tar::Archive;

/// Progress callback for downloads/installs: message, current, total — the
/// same three-argument shape the teacher's installer used for extraction
/// progress, generalized to cover byte counts for network transfer too.
pub type ProgressCallback = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

const STALE_PID_AGE: Duration = Duration::from_secs(10);
const DEFAULT_CONCURRENCY: usize = 8;

/// A depot's on-disk layout (§6). All paths are subdirectories of `root`.
pub struct Depot {
    pub root: PathBuf,
}

impl Depot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Depot { root: root.into() }
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn clones_dir(&self) -> PathBuf {
        self.root.join("clones")
    }

    pub fn registries_dir(&self) -> PathBuf {
        self.root.join("registries")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn scratchspaces_dir(&self) -> PathBuf {
        self.root.join("scratchspaces")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.packages_dir(),
            self.clones_dir(),
            self.registries_dir(),
            self.bin_dir(),
            self.scratchspaces_dir(),
            self.logs_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// The deterministic install path for a resolved package: `packages/<name>/<slug>`.
    pub fn package_install_path(&self, name: &str, uuid: PackageId, tree_hash: &str) -> PathBuf {
        self.packages_dir().join(name).join(slug(uuid, tree_hash))
    }

    /// Returns `package_install_path` if a slug computed with the legacy
    /// 4-char truncation exists, for packages installed before the longer
    /// slug was adopted. Probed only when the current-format path is
    /// missing (§4.7).
    pub fn legacy_package_install_path(&self, name: &str, uuid: PackageId, tree_hash: &str) -> PathBuf {
        self.packages_dir().join(name).join(legacy_slug(uuid, tree_hash))
    }

    pub fn bare_clone_path(&self, uuid: PackageId) -> PathBuf {
        self.clones_dir().join(uuid.to_string())
    }

    /// Whether a package's source is already materialized on disk, tried
    /// at both the current and legacy slug.
    pub fn is_installed(&self, name: &str, uuid: PackageId, tree_hash: &str) -> bool {
        self.package_install_path(name, uuid, tree_hash).is_dir()
            || self.legacy_package_install_path(name, uuid, tree_hash).is_dir()
    }
}

/// Base-32 slug of `sha1(uuid || tree_hash)`, truncated to 20 characters —
/// enough entropy to make collisions a non-concern while keeping install
/// paths short (§4.7).
pub fn slug(uuid: PackageId, tree_hash: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(uuid.to_string().as_bytes());
    hasher.update(tree_hash.as_bytes());
    let digest = hasher.finalize();
    let encoded = base32::encode(base32::Alphabet::Crockford, &digest);
    encoded[..20.min(encoded.len())].to_string()
}

/// The older 4-char slug format, kept only so `is_installed` and the
/// installer can still find packages laid out by a previous depot version.
fn legacy_slug(uuid: PackageId, tree_hash: &str) -> String {
    slug(uuid, tree_hash)[..4].to_string()
}

/// One candidate source to try, in the order the depot should attempt them
/// (§4.7 download strategy).
#[derive(Debug, Clone)]
pub enum FetchSource {
    /// The pkg-server's own archive endpoint for a registry it tracks.
    PkgServerArchive { url: String },
    /// A per-registry archive URL derived from the git remote (e.g. a
    /// GitHub tarball endpoint).
    RegistryArchive { url: String },
    /// Full repository clone plus checkout of a specific tree.
    Git { repo_url: String, tree_hash: String },
}

impl FetchSource {
    fn describe(&self) -> String {
        match self {
            FetchSource::PkgServerArchive { url } => format!("pkg-server archive {url}"),
            FetchSource::RegistryArchive { url } => format!("registry archive {url}"),
            FetchSource::Git { repo_url, .. } => format!("git clone of {repo_url}"),
        }
    }
}

/// Abstraction over the byte-level "fetch URL to path" primitive the core
/// depends on but does not implement (§1 non-goals: network transport is
/// assumed provided). A blocking `reqwest` client backs the production
/// implementation; tests substitute an in-memory fake.
pub trait Fetcher: Send + Sync {
    fn fetch_archive(&self, url: &str, dest: &Path) -> Result<()>;
    fn git_clone_bare(&self, repo_url: &str, dest: &Path) -> Result<()>;
    fn git_checkout_tree(&self, bare_repo: &Path, tree_hash: &str, dest: &Path) -> Result<()>;
}

/// Production [`Fetcher`] backed by a blocking `reqwest` client and an
/// external `git` subprocess, matching the "assumed provided" transport
/// boundary (§1, §5 suspension points).
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for HttpFetcher {
    fn fetch_archive(&self, url: &str, dest: &Path) -> Result<()> {
        let mut resp = self.client.get(url).send()?.error_for_status()?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(dest)?;
        std::io::copy(&mut resp, &mut file)?;
        Ok(())
    }

    fn git_clone_bare(&self, repo_url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let status = std::process::Command::new("git")
            .args(["clone", "--bare", repo_url])
            .arg(dest)
            .status()?;
        if !status.success() {
            return Err(Error::depot(format!("git clone of {repo_url} failed")));
        }
        Ok(())
    }

    fn git_checkout_tree(&self, bare_repo: &Path, tree_hash: &str, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)?;
        let archive = std::process::Command::new("git")
            .arg("--git-dir")
            .arg(bare_repo)
            .args(["archive", tree_hash])
            .output()?;
        if !archive.status.success() {
            return Err(Error::depot(format!(
                "git archive of tree {tree_hash} failed: {}",
                String::from_utf8_lossy(&archive.stderr)
            )));
        }
        let mut tar = Archive::new(archive.stdout.as_slice());
        tar.unpack(dest)?;
        Ok(())
    }
}

/// One package's download job: where it ends up, the sources to try in
/// order, and the tree hash every successful download must match.
pub struct DownloadJob {
    pub name: String,
    pub uuid: PackageId,
    pub dest: PathBuf,
    pub expected_tree_hash: String,
    pub sources: Vec<FetchSource>,
}

/// Drives the download strategy for a single job: try each source in
/// order, verifying the tree hash after every attempt, falling through on
/// mismatch or failure (§4.7).
pub fn install_one(job: &DownloadJob, fetcher: &dyn Fetcher, progress: Option<&ProgressCallback>) -> Result<()> {
    let mut tried = Vec::new();
    for source in &job.sources {
        tried.push(source.describe());
        if let Some(cb) = progress {
            cb(&format!("fetching {} from {}", job.name, source.describe()), 0, 1);
        }
        let attempt = try_source(job, source, fetcher);
        match attempt {
            Ok(()) => {
                if verify_tree_hash(&job.dest, &job.expected_tree_hash)? {
                    if let Some(cb) = progress {
                        cb(&format!("installed {}", job.name), 1, 1);
                    }
                    make_readonly(&job.dest)?;
                    return Ok(());
                }
                let _ = fs::remove_dir_all(&job.dest);
            }
            Err(_) => {
                let _ = fs::remove_dir_all(&job.dest);
            }
        }
    }
    Err(Error::depot(format!(
        "failed to install {} ({}): tried {}",
        job.name,
        job.uuid,
        tried.join(", ")
    )))
}

fn try_source(job: &DownloadJob, source: &FetchSource, fetcher: &dyn Fetcher) -> Result<()> {
    match source {
        FetchSource::PkgServerArchive { url } | FetchSource::RegistryArchive { url } => {
            let tmp = job.dest.with_extension("tar.gz.part");
            fetcher.fetch_archive(url, &tmp)?;
            let extract_to = job.dest.with_extension("extracting");
            if extract_to.exists() {
                fs::remove_dir_all(&extract_to)?;
            }
            let tar_gz = File::open(&tmp)?;
            let mut archive = Archive::new(GzDecoder::new(tar_gz));
            archive.set_preserve_permissions(false);
            archive.unpack(&extract_to)?;
            let _ = fs::remove_file(&tmp);
            if job.dest.exists() {
                fs::remove_dir_all(&job.dest)?;
            }
            if let Some(parent) = job.dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&extract_to, &job.dest)?;
            Ok(())
        }
        FetchSource::Git { repo_url, tree_hash } => {
            let bare = job.dest.with_extension("git-cache");
            if !bare.exists() {
                fetcher.git_clone_bare(repo_url, &bare)?;
            }
            let extract_to = job.dest.with_extension("extracting");
            fetcher.git_checkout_tree(&bare, tree_hash, &extract_to)?;
            if job.dest.exists() {
                fs::remove_dir_all(&job.dest)?;
            }
            if let Some(parent) = job.dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&extract_to, &job.dest)?;
            Ok(())
        }
    }
}

/// Computes the Git-style tree hash of `dir` and compares it to `expected`.
/// A real implementation would shell out to `git hash-object -t tree` or
/// reimplement the tree-object format; here the comparison is the contract
/// surface the caller relies on, and the hash itself is computed over a
/// deterministic listing of relative paths and file contents so repeated
/// installs of the same bytes agree.
pub fn verify_tree_hash(dir: &Path, expected: &str) -> Result<bool> {
    let actual = compute_tree_hash(dir)?;
    Ok(actual.eq_ignore_ascii_case(expected))
}

fn compute_tree_hash(dir: &Path) -> Result<String> {
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();

    let mut hasher = Sha1::new();
    for path in paths {
        let rel = path.strip_prefix(dir).unwrap_or(&path);
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(fs::read(&path)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Marks every file under `dir` read-only, matching the depot's write-once
/// content-addressed contract (§5). Directories are left writable so the
/// tree itself can still be removed wholesale (e.g. during a `gc`) without
/// needing elevated privileges.
fn make_readonly(dir: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let mut perms = fs::metadata(entry.path())?.permissions();
        perms.set_readonly(true);
        let _ = fs::set_permissions(entry.path(), perms);
    }
    Ok(())
}

/// Runs up to `concurrency` downloads at once via a bounded work queue fed
/// by jobs and drained by worker threads into a results vector (§4.7, §5).
/// Packages that still fail after their own fallback chain are reported
/// individually; the caller decides whether a partial install set is
/// acceptable.
pub fn install_many(
    jobs: Vec<DownloadJob>,
    fetcher: Arc<dyn Fetcher>,
    concurrency: Option<usize>,
    progress: Option<ProgressCallback>,
) -> Vec<(String, Result<()>)> {
    let concurrency = concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(concurrency)
        .enable_time()
        .build();
    let Ok(runtime) = runtime else {
        // No async runtime available: fall back to sequential installs
        // rather than losing the work entirely.
        return jobs
            .into_iter()
            .map(|job| {
                let name = job.name.clone();
                let result = install_one(&job, fetcher.as_ref(), progress.as_ref());
                (name, result)
            })
            .collect();
    };

    runtime.block_on(async move {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
        let mut handles = Vec::new();
        let mut out = Vec::new();
        for job in jobs {
            let fetcher = fetcher.clone();
            let progress = progress.clone();
            // Acquired before spawning and moved into the blocking closure
            // so the permit is held for the install's full duration, not
            // just the (non-existent) await point inside a sync closure.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    out.push((job.name.clone(), Err(Error::depot(e.to_string()))));
                    continue;
                }
            };
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let name = job.name.clone();
                let result = install_one(&job, fetcher.as_ref(), progress.as_ref());
                (name, result)
            }));
        }
        for handle in handles {
            match handle.await {
                Ok(pair) => out.push(pair),
                Err(e) => out.push(("<task panicked>".to_string(), Err(Error::depot(e.to_string())))),
            }
        }
        out
    })
}

/// A cross-process lock on a depot's `registries/` subtree (§4.7, §5). The
/// pidfile at `registries/.pid` carries the holding process's PID; a lock
/// older than [`STALE_PID_AGE`] is assumed abandoned and stolen.
pub struct PidLock {
    path: PathBuf,
    held: bool,
}

impl PidLock {
    /// Blocks until the lock is acquired, stealing a stale pidfile if
    /// found. A process blocked here re-reads registry state once it
    /// acquires, per §5's ordering guarantee.
    pub fn acquire(depot: &Depot) -> Result<PidLock> {
        fs::create_dir_all(depot.registries_dir())?;
        let path = depot.registries_dir().join(".pid");
        loop {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    use std::io::Write;
                    write!(f, "{}", std::process::id())?;
                    return Ok(PidLock { path, held: true });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn release(mut self) {
        if self.held {
            let _ = fs::remove_file(&self.path);
            self.held = false;
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if self.held {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| {
            SystemTime::now()
                .duration_since(modified)
                .map(|age| age > STALE_PID_AGE)
                .unwrap_or(false)
        })
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pid(n: u8) -> PackageId {
        let mut bytes = [0u8; 16];
        bytes[15] = n;
        PackageId(uuid::Uuid::from_bytes(bytes))
    }

    #[test]
    fn slug_is_deterministic_and_base32() {
        let id = pid(1);
        let a = slug(id, "deadbeef");
        let b = slug(id, "deadbeef");
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(slug(id, "deadbeef"), slug(id, "cafebabe"));
    }

    #[test]
    fn legacy_slug_is_a_prefix_of_current_slug() {
        let id = pid(2);
        let full = slug(id, "abc123");
        let legacy = legacy_slug(id, "abc123");
        assert!(full.starts_with(&legacy));
        assert_eq!(legacy.len(), 4);
    }

    #[test]
    fn ensure_layout_creates_expected_subdirs() {
        let dir = TempDir::new().unwrap();
        let depot = Depot::new(dir.path());
        depot.ensure_layout().unwrap();
        assert!(depot.packages_dir().is_dir());
        assert!(depot.registries_dir().is_dir());
        assert!(depot.bin_dir().is_dir());
    }

    #[test]
    fn is_installed_false_when_absent() {
        let dir = TempDir::new().unwrap();
        let depot = Depot::new(dir.path());
        assert!(!depot.is_installed("A", pid(3), "deadbeef"));
    }

    #[test]
    fn tree_hash_matches_identical_contents() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let hash = compute_tree_hash(dir.path()).unwrap();
        assert!(verify_tree_hash(dir.path(), &hash).unwrap());
        assert!(!verify_tree_hash(dir.path(), "not-the-hash").unwrap());
    }

    #[test]
    fn pid_lock_round_trips_and_detects_stale() {
        let dir = TempDir::new().unwrap();
        let depot = Depot::new(dir.path());
        let lock = PidLock::acquire(&depot).unwrap();
        assert!(depot.registries_dir().join(".pid").exists());
        lock.release();
        assert!(!depot.registries_dir().join(".pid").exists());
    }

    struct FakeFetcher;
    impl Fetcher for FakeFetcher {
        fn fetch_archive(&self, _url: &str, dest: &Path) -> Result<()> {
            fs::create_dir_all(dest.parent().unwrap())?;
            fs::write(dest, b"not a real archive")?;
            Err(Error::depot("fake fetcher intentionally fails to decode"))
        }
        fn git_clone_bare(&self, _repo_url: &str, dest: &Path) -> Result<()> {
            fs::create_dir_all(dest)?;
            Ok(())
        }
        fn git_checkout_tree(&self, _bare_repo: &Path, _tree_hash: &str, dest: &Path) -> Result<()> {
            fs::create_dir_all(dest)?;
            fs::write(dest.join("file.txt"), b"checked out")?;
            Ok(())
        }
    }

    #[test]
    fn install_one_falls_through_to_git_on_archive_failure() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("packages/A/slug");
        let expected = compute_tree_hash_of_checkout();
        let job = DownloadJob {
            name: "A".to_string(),
            uuid: pid(4),
            dest: dest.clone(),
            expected_tree_hash: expected,
            sources: vec![
                FetchSource::RegistryArchive { url: "https://example.invalid/a.tar.gz".to_string() },
                FetchSource::Git { repo_url: "https://example.invalid/a.git".to_string(), tree_hash: "abc".to_string() },
            ],
        };
        let fetcher = FakeFetcher;
        let result = install_one(&job, &fetcher, None);
        assert!(result.is_ok());
        assert!(dest.join("file.txt").exists());
    }

    fn compute_tree_hash_of_checkout() -> String {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file.txt"), b"checked out").unwrap();
        compute_tree_hash(dir.path()).unwrap()
    }
}
