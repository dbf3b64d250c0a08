//! Operations state machine: maps user-facing operations onto resolver
//! inputs with configurable preservation tiers, then merges the result
//! back into the manifest (§4.6).

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::graph::{Fixed, GraphBuilder, RegistrySet, ResolverInput};
use crate::id::PackageId;
use crate::manifest::{ManifestEntry, PackageSource};
use crate::registry::Registry;
use crate::resolve_log::ResolveLog;
use crate::resolver::{self, CancellationToken};
use crate::version::{Version, VersionSpec};
use std::collections::HashMap;

/// Preservation tier governing how much of the existing manifest is kept
/// across a re-resolve (§4.6, glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservationTier {
    All,
    AllInstalled,
    Direct,
    Semver,
    None,
    Tiered,
    TieredInstalled,
}

/// The level at which `update` widens a package's allowed range (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateLevel {
    Major,
    Minor,
    Patch,
    Fixed,
}

/// Bundles everything an operation needs to build a [`ResolverInput`] and
/// run the resolver: the set of reachable registries, a predicate for
/// whether a package's source is installed on disk (used by the
/// `*_INSTALLED` tiers and `is_instantiated`), and the runtime's own fixed
/// version.
pub struct OperationContext<'a> {
    pub registries: Vec<&'a Registry>,
    pub stdlibs: HashMap<PackageId, Version>,
    pub runtime_version: Version,
    pub is_installed: &'a dyn Fn(PackageId, &Version) -> bool,
}

impl<'a> OperationContext<'a> {
    fn registry_set(&self) -> RegistrySet<'a> {
        RegistrySet::new(self.registries.clone())
    }
}

/// Builds the `Requires`/`Fixed` resolver input for a re-resolve under the
/// given preservation tier, from the environment's current project and
/// manifest (§4.6).
fn build_input(env: &Environment, tier: PreservationTier, ctx: &OperationContext) -> ResolverInput {
    let mut input = ResolverInput::default();

    // The runtime itself is always a fixed entry (§4.4).
    input.fixed.insert(
        crate::id::runtime_id(),
        Fixed {
            version: ctx.runtime_version.clone(),
            requires: HashMap::new(),
        },
    );

    for (name, id) in &env.project.deps {
        let spec = env
            .project
            .compat_spec(name)
            .ok()
            .flatten()
            .unwrap_or_else(VersionSpec::everything);
        input.requires.insert(*id, spec);
    }

    let direct_ids: std::collections::HashSet<PackageId> = env.project.deps.values().copied().collect();

    for (_name, bucket) in &env.manifest.entries {
        for entry in bucket {
            if entry.pinned {
                if let PackageSource::Registered { version, .. } = &entry.source {
                    if let Ok(v) = version.parse::<Version>() {
                        input.fixed.insert(
                            entry.uuid,
                            Fixed {
                                version: v,
                                requires: HashMap::new(),
                            },
                        );
                    }
                }
                continue;
            }
            if entry.is_develop() {
                // develop entries are always fixed with requires taken
                // from the dev directory's own project file (§4.6
                // "develop"), wired up by the `develop` operation itself.
                continue;
            }
            let is_direct = direct_ids.contains(&entry.uuid);
            let installed = entry
                .version()
                .and_then(|v| v.parse::<Version>().ok())
                .map(|v| (ctx.is_installed)(entry.uuid, &v))
                .unwrap_or(false);

            let include = match tier {
                PreservationTier::All => true,
                PreservationTier::AllInstalled => installed,
                PreservationTier::Direct => is_direct,
                PreservationTier::Semver => is_direct,
                PreservationTier::None => false,
                PreservationTier::Tiered | PreservationTier::TieredInstalled => true,
            };
            if !include {
                continue;
            }
            if matches!(tier, PreservationTier::AllInstalled | PreservationTier::TieredInstalled) && !installed {
                continue;
            }

            let Some(version_str) = entry.version() else { continue };
            let Ok(version) = version_str.parse::<Version>() else { continue };

            match tier {
                PreservationTier::Semver => {
                    let caret = VersionSpec::parse(&version.to_string()).unwrap_or_else(|_| VersionSpec::everything());
                    input.requires.entry(entry.uuid).or_insert(caret);
                }
                _ => {
                    input.fixed.insert(
                        entry.uuid,
                        Fixed {
                            version,
                            requires: HashMap::new(),
                        },
                    );
                }
            }
        }
    }

    input
}

/// Runs `resolve` under a single tier, used directly by every tier except
/// `TIERED`/`TIERED_INSTALLED`.
fn resolve_with_tier(
    env: &Environment,
    tier: PreservationTier,
    ctx: &OperationContext,
) -> Result<resolver::Solution> {
    let input = build_input(env, tier, ctx);
    let builder = GraphBuilder::new(ctx.registry_set(), &ctx.stdlibs);
    let mut graph = builder.build(&input)?;
    let mut log = ResolveLog::new();
    let cancel = CancellationToken::new();
    resolver::resolve(&mut graph, &mut log, &cancel)
}

/// Resolves under `tier`, trying `ALL → DIRECT → SEMVER → NONE` in order
/// for the `TIERED` family and returning the first success (§4.6).
pub fn resolve_tiered(env: &Environment, tier: PreservationTier, ctx: &OperationContext) -> Result<resolver::Solution> {
    match tier {
        PreservationTier::Tiered => {
            for candidate in [
                PreservationTier::All,
                PreservationTier::Direct,
                PreservationTier::Semver,
                PreservationTier::None,
            ] {
                if let Ok(sol) = resolve_with_tier(env, candidate, ctx) {
                    return Ok(sol);
                }
            }
            resolve_with_tier(env, PreservationTier::None, ctx)
        }
        PreservationTier::TieredInstalled => {
            for candidate in [
                PreservationTier::AllInstalled,
                PreservationTier::Direct,
                PreservationTier::Semver,
                PreservationTier::None,
            ] {
                if let Ok(sol) = resolve_with_tier(env, candidate, ctx) {
                    return Ok(sol);
                }
            }
            resolve_with_tier(env, PreservationTier::None, ctx)
        }
        other => resolve_with_tier(env, other, ctx),
    }
}

/// Per the §9 `libLLVM_jll` fix: only UUIDs actually present in the
/// resolver's solution (or a recognized stdlib) are written into a
/// manifest entry's `deps` table — never a UUID merely because the
/// registry lists it at that version.
fn filtered_deps(
    all_solved: &std::collections::HashSet<PackageId>,
    stdlibs: &HashMap<PackageId, Version>,
    names: &HashMap<PackageId, String>,
) -> HashMap<String, PackageId> {
    let mut out = HashMap::new();
    for (id, name) in names {
        if all_solved.contains(id) || stdlibs.contains_key(id) {
            out.insert(name.clone(), *id);
        }
    }
    out
}

/// Merges a resolved solution into the environment's manifest, applying
/// the dependency filter above to every new entry.
fn merge_solution_into_manifest(
    env: &mut Environment,
    ctx: &OperationContext,
    solution: &resolver::Solution,
    dep_names: &HashMap<PackageId, HashMap<PackageId, String>>,
) {
    let mut all_solved: std::collections::HashSet<PackageId> = solution.assigned.keys().copied().collect();
    all_solved.extend(solution.pruned.keys().copied());

    for (id, version) in solution.assigned.iter().chain(solution.pruned.iter()) {
        let tree_hash = ctx
            .registries
            .iter()
            .find_map(|r| r.entry(*id).and_then(|_| r.info(*id).ok()).and_then(|g| g.as_ref().and_then(|i| i.tree_hash(version).map(String::from))));
        let Some(tree_hash) = tree_hash else { continue };
        let name = ctx
            .registries
            .iter()
            .find_map(|r| r.entry(*id).map(|e| e.name.clone()))
            .unwrap_or_else(|| id.short());
        let deps = dep_names
            .get(id)
            .map(|names| filtered_deps(&all_solved, &ctx.stdlibs, names))
            .unwrap_or_default();
        env.manifest.upsert(
            &name,
            ManifestEntry {
                uuid: *id,
                source: PackageSource::Registered {
                    version: version.to_string(),
                    tree_hash,
                },
                pinned: env.manifest.get(&name, *id).map(|e| e.pinned).unwrap_or(false),
                deps,
            },
        );
    }

    let roots: Vec<PackageId> = env.project.deps.values().copied().collect();
    env.manifest.prune(&roots);
}

/// `add`: validates no name/UUID conflict, adds the spec to the project,
/// resolves, and merges the result (§4.6). Caller is responsible for
/// downloading newly-added sources and calling [`Environment::write`].
pub fn add(
    env: &mut Environment,
    ctx: &OperationContext,
    name: &str,
    id: PackageId,
    spec_str: Option<&str>,
    tier: PreservationTier,
    dep_names: &HashMap<PackageId, HashMap<PackageId, String>>,
) -> Result<resolver::Solution> {
    if env.project.has_dep(id) {
        return Err(Error::project(format!("{name} is already a dependency")));
    }
    if env.project.deps.contains_key(name) {
        return Err(Error::project(format!("a dependency named {name} already exists")));
    }
    env.project.deps.insert(name.to_string(), id);
    // The raw string is stored verbatim (§3's round-trip guarantee on
    // `compat`); parsing here only validates it before it's committed.
    if let Some(raw) = spec_str {
        VersionSpec::parse(raw)?;
        env.project.compat.insert(name.to_string(), raw.to_string());
    }

    let solution = resolve_tiered(env, tier, ctx)?;
    merge_solution_into_manifest(env, ctx, &solution, dep_names);
    Ok(solution)
}

/// `remove`: drops the named packages from project deps, prunes
/// unreachable manifest entries, and cleans up dangling `compat`/`targets`
/// references (§4.6).
pub fn remove(env: &mut Environment, names: &[String]) -> Result<()> {
    for name in names {
        env.project.deps.remove(name);
        env.project.weak_deps.remove(name);
        env.project.extras.remove(name);
        env.project.compat.remove(name);
        for (_target, list) in env.project.targets.iter_mut() {
            list.retain(|n| n != name);
        }
    }
    let roots: Vec<PackageId> = env.project.deps.values().copied().collect();
    env.manifest.prune(&roots);
    Ok(())
}

/// Widens each target's `compat` entry per `level` (§4.6). Split out of
/// [`update`] so callers that need to preview the resulting solution
/// before it exists (to build a `dep_names` map) apply the exact same
/// mutation the real operation will.
pub fn widen_compat(env: &mut Environment, targets: &[String], level: UpdateLevel) {
    for name in targets {
        let Some(&id) = env.project.deps.get(name) else {
            continue;
        };
        if let Some(entry) = env.manifest.get(name, id) {
            if entry.pinned {
                continue;
            }
        }
        if level == UpdateLevel::Fixed {
            continue;
        }
        if let Some((_, entry)) = env.manifest.get_by_uuid(id) {
            if let Some(v) = entry.version().and_then(|v| v.parse::<Version>().ok()) {
                let widened = match level {
                    UpdateLevel::Major => VersionSpec::parse(&format!(">={v}")),
                    UpdateLevel::Minor => VersionSpec::parse(&format!("^{v}")),
                    UpdateLevel::Patch => VersionSpec::parse(&format!("~{v}")),
                    UpdateLevel::Fixed => unreachable!(),
                };
                if let Ok(spec) = widened {
                    env.project.compat.insert(name.clone(), spec.to_string());
                }
            }
        }
    }
}

/// `update`: widens the allowed range for each target per `level`, then
/// re-resolves with `DIRECT` preservation (or `NONE` for `FIXED`). Pinned
/// entries are never touched (§4.6).
pub fn update(
    env: &mut Environment,
    ctx: &OperationContext,
    targets: &[String],
    level: UpdateLevel,
    dep_names: &HashMap<PackageId, HashMap<PackageId, String>>,
) -> Result<resolver::Solution> {
    widen_compat(env, targets, level);
    let tier = if level == UpdateLevel::Fixed {
        PreservationTier::None
    } else {
        PreservationTier::Direct
    };
    let solution = resolve_tiered(env, tier, ctx)?;
    merge_solution_into_manifest(env, ctx, &solution, dep_names);
    Ok(solution)
}

/// `pin`: sets the pinned flag, optionally first updating to `version`.
pub fn pin(env: &mut Environment, name: &str, version: Option<Version>) -> Result<()> {
    let id = *env
        .project
        .deps
        .get(name)
        .ok_or_else(|| Error::project(format!("{name} is not a dependency")))?;
    let (owner_name, entry) = env
        .manifest
        .get_by_uuid(id)
        .ok_or_else(|| Error::manifest(format!("{name} has no manifest entry to pin")))?;
    let owner_name = owner_name.to_string();
    let tree_hash = entry.tree_hash().map(|s| s.to_string());
    let deps = entry.deps.clone();
    let new_version = version.map(|v| v.to_string()).or_else(|| entry.version().map(String::from));
    let Some(new_version) = new_version else {
        return Err(Error::manifest(format!("{name} has no resolvable version to pin")));
    };
    let Some(tree_hash) = tree_hash else {
        return Err(Error::manifest(format!("{name} is not a registered package and cannot be pinned this way")));
    };
    env.manifest.upsert(
        &owner_name,
        ManifestEntry {
            uuid: id,
            source: PackageSource::Registered {
                version: new_version,
                tree_hash,
            },
            pinned: true,
            deps,
        },
    );
    Ok(())
}

/// `free`: clears the pinned flag. The package must already be registered
/// (§4.6).
pub fn free(env: &mut Environment, name: &str) -> Result<()> {
    let id = *env
        .project
        .deps
        .get(name)
        .ok_or_else(|| Error::project(format!("{name} is not a dependency")))?;
    let (owner_name, entry) = env
        .manifest
        .get_by_uuid(id)
        .ok_or_else(|| Error::manifest(format!("{name} has no manifest entry")))?;
    if !matches!(entry.source, PackageSource::Registered { .. }) {
        return Err(Error::manifest(format!("{name} must be a registered package to free")));
    }
    let mut freed = entry.clone();
    let owner_name = owner_name.to_string();
    freed.pinned = false;
    env.manifest.upsert(&owner_name, freed);
    Ok(())
}

/// `develop`: records a path entry in the manifest; resolution should
/// treat this UUID as `Fixed` with `requires` taken from the dev
/// directory's own project file, wired up by the caller before the next
/// resolve (§4.6).
pub fn develop(env: &mut Environment, name: &str, id: PackageId, path: &str) -> Result<()> {
    env.project.deps.insert(name.to_string(), id);
    env.manifest.upsert(
        name,
        ManifestEntry {
            uuid: id,
            source: PackageSource::Path { path: path.to_string() },
            pinned: false,
            deps: HashMap::new(),
        },
    );
    Ok(())
}

/// `instantiate`: if the manifest already exists (non-empty), callers
/// should simply download whatever is missing. If it's empty, resolve as
/// if every project dep were newly added, with `ALL` preservation so an
/// existing manifest (if any slipped through as empty) is trusted as far
/// as possible.
pub fn instantiate(
    env: &mut Environment,
    ctx: &OperationContext,
    dep_names: &HashMap<PackageId, HashMap<PackageId, String>>,
) -> Result<resolver::Solution> {
    let tier = if env.manifest.entries.is_empty() {
        PreservationTier::None
    } else {
        PreservationTier::All
    };
    let solution = resolve_tiered(env, tier, ctx)?;
    merge_solution_into_manifest(env, ctx, &solution, dep_names);
    Ok(solution)
}

/// `why`: the chain of manifest entries that depend (directly or
/// transitively) on `target`, grounded in the resolve log's purpose of
/// explaining why a package is present.
pub fn why(env: &Environment, target: PackageId) -> Vec<String> {
    let mut out = Vec::new();
    for (name, bucket) in &env.manifest.entries {
        for entry in bucket {
            if entry.deps.values().any(|d| *d == target) {
                out.push(name.clone());
            }
        }
    }
    out.sort();
    out
}

/// `tree`: a simple indented rendering of the manifest's dependency graph
/// starting from the project's direct deps.
pub fn dependency_tree(env: &Environment) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    let mut roots: Vec<(&String, PackageId)> = env.project.deps.iter().map(|(n, id)| (n, *id)).collect();
    roots.sort();
    for (name, id) in roots {
        render_tree_node(env, name, id, 0, &mut out, &mut std::collections::HashSet::new());
    }
    out
}

fn render_tree_node(
    env: &Environment,
    name: &str,
    id: PackageId,
    depth: usize,
    out: &mut String,
    visited: &mut std::collections::HashSet<PackageId>,
) {
    use std::fmt::Write as _;
    let indent = "  ".repeat(depth);
    let version = env.manifest.get_by_uuid(id).and_then(|(_, e)| e.version()).unwrap_or("?");
    let _ = writeln!(out, "{indent}{name} {version}");
    if !visited.insert(id) {
        return;
    }
    if let Some((_, entry)) = env.manifest.get_by_uuid(id) {
        let mut deps: Vec<(&String, PackageId)> = entry.deps.iter().map(|(n, d)| (n, *d)).collect();
        deps.sort();
        for (dep_name, dep_id) in deps {
            render_tree_node(env, dep_name, dep_id, depth + 1, out, visited);
        }
    }
}

/// One entry in an [`outdated`] report: a direct dependency whose installed
/// version is behind the newest version the reachable registries offer
/// within (and, separately, outside) its `compat` spec.
#[derive(Debug, Clone)]
pub struct OutdatedEntry {
    pub name: String,
    pub current: Version,
    /// Newest version satisfying the project's `compat` spec, if any is
    /// newer than `current`.
    pub latest_compatible: Option<Version>,
    /// Newest version in the registry at all, if it's newer than
    /// `latest_compatible` (i.e. only reachable by widening `compat`).
    pub latest_overall: Option<Version>,
}

/// `outdated`: for every direct dependency with a registered manifest entry,
/// compares the installed version against the newest version the reachable
/// registries carry, both within the current `compat` spec and unconstrained.
/// Read-only; never touches the project, manifest, or resolver.
pub fn outdated(env: &Environment, ctx: &OperationContext) -> Vec<OutdatedEntry> {
    let mut out = Vec::new();
    for (name, &id) in &env.project.deps {
        let Some((_, entry)) = env.manifest.get_by_uuid(id) else { continue };
        let PackageSource::Registered { version, .. } = &entry.source else { continue };
        let Ok(current) = version.parse::<Version>() else { continue };

        let pool: Vec<Version> = ctx
            .registries
            .iter()
            .find_map(|r| r.entry(id).and_then(|_| r.info(id).ok()))
            .and_then(|guard| guard.as_ref().map(|info| info.non_yanked_pool()))
            .unwrap_or_default();
        if pool.is_empty() {
            continue;
        }
        let latest_overall = pool.iter().max().cloned();

        let spec = env
            .project
            .compat_spec(name)
            .ok()
            .flatten()
            .unwrap_or_else(VersionSpec::everything);
        let latest_compatible = pool.iter().filter(|v| spec.contains(v)).max().cloned();

        let compatible_is_newer = latest_compatible.as_ref().is_some_and(|v| *v > current);
        let overall_is_newer = latest_overall.as_ref().is_some_and(|v| *v > current);
        if !compatible_is_newer && !overall_is_newer {
            continue;
        }

        let latest_overall = match (&latest_compatible, &latest_overall) {
            (Some(c), Some(o)) if o > c => Some(o.clone()),
            _ => None,
        };

        out.push(OutdatedEntry {
            name: name.clone(),
            current,
            latest_compatible: if compatible_is_newer { latest_compatible } else { None },
            latest_overall,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

/// §8's runnable form of the invariants list: walks project + manifest and
/// returns every violation found, rather than failing fast on the first.
pub fn check_invariants(env: &Environment) -> Vec<String> {
    let mut problems = Vec::new();
    if let Err(e) = env.project.validate() {
        problems.push(e.to_string());
    }
    if let Err(e) = env.manifest.check_closed() {
        problems.push(e.to_string());
    }
    for id in env.project.deps.values() {
        if !env.manifest.contains(*id) {
            problems.push(format!("project dependency {id} has no manifest entry"));
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use std::path::Path;
    use tempfile::TempDir;

    fn empty_env() -> (TempDir, Environment) {
        let dir = TempDir::new().unwrap();
        let project_path = dir.path().join("Project.toml");
        std::fs::write(&project_path, "name = \"demo\"\n").unwrap();
        let env = Environment::read(&project_path).unwrap();
        (dir, env)
    }

    #[test]
    fn remove_drops_project_dep_and_prunes_manifest() {
        let (_dir, mut env) = empty_env();
        let a: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        env.project.deps.insert("A".into(), a);
        env.manifest.upsert(
            "A",
            ManifestEntry {
                uuid: a,
                source: PackageSource::Registered {
                    version: "1.0.0".into(),
                    tree_hash: "x".into(),
                },
                pinned: false,
                deps: HashMap::new(),
            },
        );
        remove(&mut env, &["A".to_string()]).unwrap();
        assert!(!env.project.deps.contains_key("A"));
        assert!(!env.manifest.contains(a));
    }

    #[test]
    fn pin_requires_existing_manifest_entry() {
        let (_dir, mut env) = empty_env();
        let a: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        env.project.deps.insert("A".into(), a);
        let result = pin(&mut env, "A", None);
        assert!(result.is_err());
    }

    #[test]
    fn check_invariants_reports_missing_manifest_entry() {
        let (_dir, mut env) = empty_env();
        let a: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        env.project.deps.insert("A".into(), a);
        let problems = check_invariants(&env);
        assert!(!problems.is_empty());
    }

    #[test]
    fn outdated_reports_a_newer_compatible_version() {
        let (_dir, mut env) = empty_env();
        let a: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        env.project.deps.insert("A".into(), a);
        env.manifest.upsert(
            "A",
            ManifestEntry {
                uuid: a,
                source: PackageSource::Registered {
                    version: "1.0.0".into(),
                    tree_hash: "x".into(),
                },
                pinned: false,
                deps: HashMap::new(),
            },
        );
        // No registries loaded -> empty pool -> nothing reported, rather
        // than a false "up to date" claim about a package we can't see.
        let ctx = OperationContext {
            registries: Vec::new(),
            stdlibs: HashMap::new(),
            runtime_version: Version::new(1, 0, 0),
            is_installed: &|_, _| false,
        };
        assert!(outdated(&env, &ctx).is_empty());
    }

    #[test]
    fn develop_records_path_entry() {
        let (_dir, mut env) = empty_env();
        let a: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        develop(&mut env, "A", a, "../A").unwrap();
        let (_, entry) = env.manifest.get_by_uuid(a).unwrap();
        assert!(entry.is_develop());
        let _ = Path::new("unused");
    }
}
