//! Shared setup for every command: loads config, opens the depot, and
//! loads every reachable registry once per invocation.

use pkgdepot::depot::{Depot, DownloadJob, FetchSource, HttpFetcher};
use pkgdepot::environment::Environment;
use pkgdepot::error::{Error, Result};
use pkgdepot::graph::RegistrySet;
use pkgdepot::id::PackageId;
use pkgdepot::manifest::PackageSource;
use pkgdepot::operations::{self, OperationContext, PreservationTier};
use pkgdepot::registry::{self, Registry};
use pkgdepot::version::Version;
use pkgdepot::Config;
use std::collections::HashMap;
use std::sync::Arc;

/// Bundles the process-wide state a command needs: config, depot layout,
/// and the registries reachable from it. Built once in `main` and passed
/// down to the command function.
pub struct App {
    pub config: Config,
    pub depot: Depot,
    pub registries: Vec<Registry>,
}

impl App {
    pub fn load() -> Result<App> {
        let config = Config::load()?;
        let depot_root = config.depot_root()?;
        let depot = Depot::new(depot_root);
        depot.ensure_layout()?;
        let registries = registry::reachable_registries(&[depot.root.clone()])?;
        Ok(App { config, depot, registries })
    }

    /// Whether `id`@`version` is present on disk, by cross-referencing the
    /// owning registry's entry name and tree hash with the depot layout.
    pub fn is_installed(&self, id: PackageId, version: &Version) -> bool {
        for reg in &self.registries {
            let Some(entry) = reg.entry(id) else { continue };
            let Ok(info) = reg.info(id) else { continue };
            let Some(info) = info.as_ref() else { continue };
            let Some(tree_hash) = info.tree_hash(version) else { continue };
            if self.depot.is_installed(&entry.name, id, tree_hash) {
                return true;
            }
        }
        false
    }

    /// Finds the UUID(s) registered under `name` across every loaded
    /// registry. Errors if the name is unknown anywhere, matching
    /// `Error::PackageNotFound`'s hint text.
    pub fn find_package(&self, name: &str) -> Result<PackageId> {
        for reg in &self.registries {
            let ids = reg.uuids_by_name(name);
            if let Some(id) = ids.first() {
                return Ok(*id);
            }
        }
        Err(Error::PackageNotFound(name.to_string()))
    }

    /// The registered name for `id`, if any registry carries it; falls
    /// back to the UUID's short form otherwise.
    pub fn name_for(&self, id: PackageId) -> String {
        self.registries
            .iter()
            .find_map(|r| r.entry(id).map(|e| e.name.clone()))
            .unwrap_or_else(|| id.short())
    }

    fn registry_refs(&self) -> Vec<&Registry> {
        self.registries.iter().collect()
    }

    /// Builds the `dep_names` map every mutating operation needs: for each
    /// solved (id, version) pair, the names of its effective dependencies,
    /// resolved by cross-referencing dependency UUIDs against every loaded
    /// registry's entry table.
    pub fn dep_names_for(&self, solved: &[(PackageId, Version)]) -> HashMap<PackageId, HashMap<PackageId, String>> {
        let set = RegistrySet::new(self.registry_refs());
        let mut out = HashMap::new();
        for (id, version) in solved {
            let effective = set.effective_deps(*id, version);
            let mut names = HashMap::new();
            for dep_id in effective.deps.keys() {
                names.insert(*dep_id, self.name_for(*dep_id));
            }
            out.insert(*id, names);
        }
        out
    }
}

/// Runs `f` with an [`OperationContext`] built from `app`, working around
/// the fact that a closure borrowing `app` can't be returned by reference
/// from a method: callers get a context whose `is_installed` predicate is
/// backed by `App::is_installed` for the lifetime of the call.
pub fn with_context<R>(app: &App, f: impl FnOnce(&OperationContext) -> R) -> R {
    let is_installed = |id: PackageId, v: &Version| app.is_installed(id, v);
    let ctx = OperationContext {
        registries: app.registry_refs(),
        stdlibs: HashMap::new(),
        runtime_version: current_runtime_version(),
        is_installed: &is_installed,
    };
    f(&ctx)
}

/// The runtime's own version, treated as a fixed entry in every resolve
/// (§4.4). Matches the crate's own release version: this binary *is* the
/// runtime being depended on.
fn current_runtime_version() -> Version {
    env!("CARGO_PKG_VERSION").parse().unwrap_or_else(|_| Version::new(0, 1, 0))
}

/// `add`/`update`/`instantiate` need a `dep_names` map covering the
/// solution they're about to produce, but that solution only exists once
/// the operation itself resolves. Resolution is a pure function of the
/// environment and tier, so this runs `mutate` against a disposable
/// [`Environment::snapshot`], resolves it, and builds the map from that —
/// the real operation repeats the same mutation and resolve a moment
/// later and arrives at an identical solution.
pub fn preview_dep_names(
    app: &App,
    env: &Environment,
    tier: PreservationTier,
    mutate: impl FnOnce(&mut Environment),
) -> Result<HashMap<PackageId, HashMap<PackageId, String>>> {
    let mut preview = env.snapshot();
    mutate(&mut preview);
    let solution = with_context(app, |ctx| operations::resolve_tiered(&preview, tier, ctx))?;
    let solved: Vec<(PackageId, Version)> = solution
        .assigned
        .into_iter()
        .chain(solution.pruned.into_iter())
        .collect();
    Ok(app.dep_names_for(&solved))
}

/// Downloads every manifest entry not already present on disk, trying the
/// pkg-server archive, then the registry's own archive endpoint, then a
/// full git clone, in that order (§4.7).
pub fn download_missing(app: &App, env: &Environment) -> Result<()> {
    let mut jobs = Vec::new();
    for bucket in env.manifest.entries.values() {
        for entry in bucket {
            let PackageSource::Registered { version, tree_hash } = &entry.source else { continue };
            let Ok(version) = version.parse::<Version>() else { continue };
            if app.is_installed(entry.uuid, &version) {
                continue;
            }
            let name = app.name_for(entry.uuid);
            let dest = app.depot.package_install_path(&name, entry.uuid, tree_hash);
            let mut sources = Vec::new();
            if let Some(url) = &app.config.network.pkg_server_url {
                sources.push(FetchSource::PkgServerArchive {
                    url: format!("{}/package/{}/{}", url.trim_end_matches('/'), entry.uuid, tree_hash),
                });
            }
            if let Some(reg) = app.registries.iter().find(|r| r.entry(entry.uuid).is_some()) {
                if let Some(repo) = registry_repo_url(reg) {
                    sources.push(FetchSource::RegistryArchive {
                        url: format!("{}/archive/{tree_hash}.tar.gz", repo.trim_end_matches('/')),
                    });
                    sources.push(FetchSource::Git { repo_url: repo, tree_hash: tree_hash.clone() });
                }
            }
            if sources.is_empty() {
                continue;
            }
            jobs.push(DownloadJob {
                name,
                uuid: entry.uuid,
                dest,
                expected_tree_hash: tree_hash.clone(),
                sources,
            });
        }
    }

    if jobs.is_empty() {
        return Ok(());
    }

    let fetcher: Arc<dyn pkgdepot::depot::Fetcher> = Arc::new(HttpFetcher::new());
    let results = pkgdepot::depot::install_many(jobs, fetcher, Some(app.config.network.download_concurrency), None);
    let mut failures = Vec::new();
    for (name, result) in results {
        if let Err(e) = result {
            failures.push(format!("{name}: {e}"));
        } else {
            println!("✓ installed {name}");
        }
    }
    if !failures.is_empty() {
        return Err(Error::depot(failures.join("; ")));
    }
    Ok(())
}

fn registry_repo_url(reg: &Registry) -> Option<String> {
    reg.repo.clone()
}
