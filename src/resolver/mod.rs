//! Resolver core: stages A–H over the bit-mask dependency graph (§4.5).
//!
//! The single public entry point is [`resolve`]. Internally it runs
//! constraint propagation to a fixpoint, disables unreachable packages,
//! speculatively validates ambiguous versions, compresses equivalence
//! classes, prunes singletons, attempts a greedy solve, falls back to
//! max-sum belief propagation, and finishes with a local-optimality pass
//! that tries to bump installed versions within shrinking bounds.

pub mod maxsum;
pub mod snapshot;

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::id::PackageId;
use crate::resolve_log::ResolveLog;
use crate::version::Version;
use maxsum::MaxSumSolver;
use snapshot::SnapshotStack;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation flag the resolver polls at the start of each
/// propagation round and max-sum sweep (§9's "cooperative interrupt").
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The resolver's output: the assignment excluding fixed packages,
/// augmented with the pruned map (§4.5 "Return").
#[derive(Debug, Clone, Default)]
pub struct Solution {
    pub assigned: HashMap<PackageId, Version>,
    pub pruned: HashMap<PackageId, Version>,
}

/// Runs the full stage pipeline and returns the solved version assignment.
pub fn resolve(graph: &mut Graph, log: &mut ResolveLog, cancel: &CancellationToken) -> Result<Solution> {
    seed_requirements(graph, log)?;
    propagate(graph, log, cancel)?;
    disable_unreachable(graph, log);
    validate_versions(graph, log, cancel)?;
    let classes = compress_equivalence_classes(graph);
    let pruned = prune_singletons(graph);

    let active: Vec<PackageId> = graph
        .packages()
        .into_iter()
        .filter(|p| !pruned.contains_key(p) && *p != crate::id::runtime_id())
        .collect();

    let assignment = match greedy_solve(graph, &active, &pruned) {
        Some(a) => a,
        None => {
            log.global("greedy solver could not find a consistent assignment, falling back to max-sum", &[]);
            let solver = MaxSumSolver::new(graph);
            let cancel2 = cancel.clone();
            match solver.solve(&active, log, &move || cancel2.is_cancelled()) {
                Some(a) => a,
                None => {
                    let rendered = log.render_chronological(|id| id.short());
                    return Err(Error::resolver(rendered));
                }
            }
        }
    };

    let assignment = local_optimality_pass(graph, &active, assignment, log);

    verify(graph, &active, &assignment, &pruned)?;

    let mut out = Solution::default();
    for (p, idx) in &assignment {
        if let Some(v) = version_for(graph, *p, *idx) {
            if graph.fixed.contains_key(p) {
                continue;
            }
            out.assigned.insert(*p, v);
        }
    }
    for (p, idx) in &pruned {
        if *p == crate::id::runtime_id() || graph.fixed.contains_key(p) {
            continue;
        }
        if let Some(v) = version_for(graph, *p, *idx) {
            out.pruned.insert(*p, v);
        }
    }
    let _ = classes;
    Ok(out)
}

fn version_for(graph: &Graph, p: PackageId, idx: usize) -> Option<Version> {
    let uninstalled = graph.uninstalled_index(p);
    if idx == uninstalled {
        return None;
    }
    graph.pool.get(&p).and_then(|pool| pool.get(idx)).cloned()
}

/// Narrows `gconstr` by explicit requirements and fixed bindings before
/// propagation starts.
fn seed_requirements(graph: &mut Graph, log: &mut ResolveLog) -> Result<()> {
    let requires = graph.requires.clone();
    for (p, spec) in &requires {
        let Some(pool) = graph.pool.get(p).cloned() else {
            continue;
        };
        let uninstalled = graph.uninstalled_index(*p);
        let entry = graph.gconstr.get_mut(p).unwrap();
        for (idx, v) in pool.iter().enumerate() {
            entry[idx] = entry[idx] && spec.contains(v);
        }
        entry[uninstalled] = false;
        if entry.iter().all(|b| !*b) {
            let msg = format!("no version satisfies the required spec {spec}");
            log.package(*p, msg.clone(), &[]);
            return Err(Error::resolver(log.subtree_for(*p, |id| id.short())));
        }
        log.package(*p, format!("explicit requirement added: {spec}"), &[]);
    }

    let fixed = graph.fixed.clone();
    for (p, f) in &fixed {
        let Some(pool) = graph.pool.get(p).cloned() else {
            continue;
        };
        let idx = pool.iter().position(|v| *v == f.version);
        let entry = graph.gconstr.get_mut(p).unwrap();
        for (i, slot) in entry.iter_mut().enumerate() {
            *slot = Some(i) == idx;
        }
        log.package(*p, format!("fixed at {}", f.version), &[]);
    }
    Ok(())
}

/// Stage A: constraint propagation to fixpoint.
fn propagate(graph: &mut Graph, log: &mut ResolveLog, cancel: &CancellationToken) -> Result<()> {
    let packages = graph.packages();
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut changed = false;
        for &q in &packages {
            let neighbors = graph.neighbors(q);
            let spp_q = graph.spp[&q];
            let mut allowed = vec![false; spp_q];
            for v_q in 0..spp_q {
                if !graph.gconstr[&q][v_q] {
                    continue;
                }
                let mut ok = true;
                for &p in &neighbors {
                    let reachable = (0..graph.spp[&p])
                        .any(|v_p| graph.gconstr[&p][v_p] && graph.edge(p, q, v_q, v_p));
                    if !reachable {
                        ok = false;
                        break;
                    }
                }
                allowed[v_q] = ok;
            }
            let entry = graph.gconstr.get_mut(&q).unwrap();
            for i in 0..spp_q {
                if entry[i] && !allowed[i] {
                    entry[i] = false;
                    changed = true;
                }
            }
            if entry.iter().all(|b| !*b) {
                log.package(q, "constraint propagation emptied every allowed state", &[]);
                return Err(Error::resolver(log.subtree_for(q, |id| id.short())));
            }
        }
        if !changed {
            break;
        }
    }
    Ok(())
}

/// Stage B: BFS from required/fixed packages; anything unreached is forced
/// to "uninstalled".
fn disable_unreachable(graph: &mut Graph, log: &mut ResolveLog) {
    let mut reached: HashSet<PackageId> = HashSet::new();
    let mut queue: VecDeque<PackageId> = VecDeque::new();
    for p in graph.requires.keys().chain(graph.fixed.keys()) {
        if reached.insert(*p) {
            queue.push_back(*p);
        }
    }
    while let Some(p) = queue.pop_front() {
        for q in graph.neighbors(p) {
            let has_link = (0..graph.spp[&p]).any(|v_p| {
                graph.gconstr[&p][v_p]
                    && (0..graph.spp[&q]).any(|v_q| {
                        v_q != graph.uninstalled_index(q)
                            && graph.gconstr[&q][v_q]
                            && graph.edge(p, q, v_q, v_p)
                    })
            });
            if has_link && reached.insert(q) {
                queue.push_back(q);
            }
        }
    }
    let all: Vec<PackageId> = graph.packages();
    for p in all {
        if !reached.contains(&p) {
            let uninstalled = graph.uninstalled_index(p);
            let entry = graph.gconstr.get_mut(&p).unwrap();
            if entry[uninstalled] {
                for (i, slot) in entry.iter_mut().enumerate() {
                    *slot = i == uninstalled;
                }
                log.package(p, "unreachable from requirements, forced uninstalled", &[]);
            }
        }
    }
}

/// Stage C: skim-mode validation. For each package with more than one
/// allowed state, tentatively pin each and re-propagate in a snapshot;
/// states that produce a contradiction are dropped.
fn validate_versions(graph: &mut Graph, log: &mut ResolveLog, cancel: &CancellationToken) -> Result<()> {
    let mut stack = SnapshotStack::new();
    let packages = graph.packages();
    for p in packages {
        let allowed_indices: Vec<usize> = (0..graph.spp[&p]).filter(|i| graph.gconstr[&p][*i]).collect();
        if allowed_indices.len() <= 1 {
            continue;
        }
        let mut survivors = Vec::new();
        for idx in &allowed_indices {
            stack.push(&graph.gconstr);
            let entry = graph.gconstr.get_mut(&p).unwrap();
            for (i, slot) in entry.iter_mut().enumerate() {
                *slot = i == *idx;
            }
            let ok = propagate(graph, &mut ResolveLog::new(), cancel).is_ok();
            if ok {
                survivors.push(*idx);
            }
            stack.pop(&mut graph.gconstr);
        }
        if survivors.len() != allowed_indices.len() {
            let entry = graph.gconstr.get_mut(&p).unwrap();
            for (i, slot) in entry.iter_mut().enumerate() {
                *slot = survivors.contains(&i);
            }
            log.package(p, format!("skim validation narrowed to {} states", survivors.len()), &[]);
        }
        if survivors.is_empty() {
            return Err(Error::resolver(log.subtree_for(p, |id| id.short())));
        }
    }
    Ok(())
}

/// Stage D: two versions of the same package are equivalent if, for every
/// edge and every state of the neighbor, they have identical compatibility
/// truth values. Keeps the highest representative of each class.
fn compress_equivalence_classes(graph: &mut Graph) -> HashMap<PackageId, HashMap<usize, Vec<usize>>> {
    let mut classes: HashMap<PackageId, HashMap<usize, Vec<usize>>> = HashMap::new();
    let packages = graph.packages();
    for p in packages {
        let neighbors = graph.neighbors(p);
        let allowed: Vec<usize> = (0..graph.spp[&p]).filter(|i| graph.gconstr[&p][*i]).collect();
        if allowed.len() <= 1 {
            continue;
        }
        let signature = |v_p: usize| -> Vec<bool> {
            let mut sig = Vec::new();
            for &q in &neighbors {
                for v_q in 0..graph.spp[&q] {
                    sig.push(graph.edge(p, q, v_q, v_p));
                }
            }
            sig
        };
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for idx in allowed {
            let sig = signature(idx);
            let mut placed = false;
            for group in groups.iter_mut() {
                if signature(group[0]) == sig {
                    group.push(idx);
                    placed = true;
                    break;
                }
            }
            if !placed {
                groups.push(vec![idx]);
            }
        }
        let mut per_pkg = HashMap::new();
        let entry = graph.gconstr.get_mut(&p).unwrap();
        for group in groups {
            if group.len() <= 1 {
                continue;
            }
            let highest = *group.iter().max().unwrap();
            for &idx in &group {
                if idx != highest {
                    entry[idx] = false;
                }
            }
            per_pkg.insert(highest, group);
        }
        if !per_pkg.is_empty() {
            classes.insert(p, per_pkg);
        }
    }
    classes
}

/// Stage E: packages whose constraint vector has exactly one true entry
/// are effectively fixed; remove them from further consideration and
/// record them so they reappear in the output.
fn prune_singletons(graph: &mut Graph) -> HashMap<PackageId, usize> {
    let mut pruned = HashMap::new();
    for p in graph.packages() {
        let allowed: Vec<usize> = (0..graph.spp[&p]).filter(|i| graph.gconstr[&p][*i]).collect();
        if allowed.len() == 1 {
            pruned.insert(p, allowed[0]);
        }
    }
    pruned
}

/// Stage F: greedy solver. Returns `None` if any neighbor ends up with an
/// empty or ambiguous-under-constraint candidate set.
fn greedy_solve(
    graph: &Graph,
    active: &[PackageId],
    pruned: &HashMap<PackageId, usize>,
) -> Option<HashMap<PackageId, usize>> {
    let active_set: HashSet<PackageId> = active.iter().copied().collect();
    let mut assignment: HashMap<PackageId, usize> = pruned.clone();
    let mut candidates: HashMap<PackageId, HashSet<usize>> = HashMap::new();
    for &p in active {
        candidates.insert(p, (0..graph.spp[&p]).filter(|i| graph.gconstr[&p][*i]).collect());
    }

    let mut queue: VecDeque<PackageId> = VecDeque::new();
    let mut seeded: HashSet<PackageId> = HashSet::new();
    for p in graph.requires.keys().chain(graph.fixed.keys()).chain(pruned.keys()) {
        if active_set.contains(p) && seeded.insert(*p) {
            let best = *candidates.get(p)?.iter().max()?;
            assignment.insert(*p, best);
            queue.push_back(*p);
        } else if pruned.contains_key(p) {
            queue.push_back(*p);
        }
    }
    // Fixed/pruned-only graphs still need their neighbors propagated.
    for p in pruned.keys() {
        if !queue.contains(p) {
            queue.push_back(*p);
        }
    }

    let mut visited: HashSet<PackageId> = assignment.keys().copied().collect();
    while let Some(p) = queue.pop_front() {
        let v_p = *assignment.get(&p)?;
        for q in graph.neighbors(p) {
            if !active_set.contains(&q) || visited.contains(&q) {
                continue;
            }
            let cand = candidates.get_mut(&q)?;
            cand.retain(|&v_q| graph.edge(p, q, v_q, v_p));
            if cand.is_empty() {
                return None;
            }
        }
    }
    // Finalize remaining active packages breadth-first from whatever is
    // already assigned, picking the highest surviving candidate each time.
    let mut frontier: VecDeque<PackageId> = assignment.keys().copied().collect();
    while let Some(p) = frontier.pop_front() {
        let v_p = assignment[&p];
        for q in graph.neighbors(p) {
            if !active_set.contains(&q) || visited.contains(&q) {
                continue;
            }
            let cand = candidates.get_mut(&q)?;
            cand.retain(|&v_q| graph.edge(p, q, v_q, v_p));
            if cand.is_empty() {
                return None;
            }
            let best = *cand.iter().max()?;
            assignment.insert(q, best);
            visited.insert(q);
            frontier.push_back(q);
        }
    }
    for &p in active {
        if !assignment.contains_key(&p) {
            let best = *candidates.get(&p)?.iter().max()?;
            assignment.insert(p, best);
        }
    }
    Some(assignment)
}

/// Stage H: local optimality pass. Repeatedly tries to bump an installed
/// package's version; stops when nothing changes or a previously seen
/// assignment recurs (the 100%-revisit infinite-loop guard).
fn local_optimality_pass(
    graph: &Graph,
    active: &[PackageId],
    mut assignment: HashMap<PackageId, usize>,
    log: &mut ResolveLog,
) -> HashMap<PackageId, usize> {
    let mut seen: HashSet<Vec<(PackageId, usize)>> = HashSet::new();
    let mut sorted_active: Vec<PackageId> = active.to_vec();
    sorted_active.sort_by_key(|p| p.0);

    loop {
        let mut snapshot: Vec<(PackageId, usize)> = sorted_active.iter().map(|p| (*p, assignment[p])).collect();
        snapshot.sort();
        if !seen.insert(snapshot) {
            break;
        }

        let mut bumped = false;
        for &p in &sorted_active {
            let current = assignment[&p];
            let uninstalled = graph.uninstalled_index(p);
            if current == uninstalled {
                continue;
            }
            let higher: Vec<usize> = (current + 1..uninstalled).filter(|i| graph.gconstr[&p][*i]).collect();
            for candidate in higher.into_iter().rev() {
                let compatible = graph.neighbors(p).iter().all(|&q| {
                    let v_q = assignment[&q];
                    graph.edge(p, q, v_q, candidate)
                });
                if compatible {
                    assignment.insert(p, candidate);
                    log.package(p, "local-optimality pass bumped to a newer compatible version", &[]);
                    bumped = true;
                    break;
                }
            }
            if bumped {
                break;
            }
        }
        if !bumped {
            break;
        }
    }
    assignment
}

/// Verification invariant checked on every return path (§4.5).
fn verify(
    graph: &Graph,
    active: &[PackageId],
    assignment: &HashMap<PackageId, usize>,
    pruned: &HashMap<PackageId, usize>,
) -> Result<()> {
    let mut full = pruned.clone();
    full.extend(assignment.iter().map(|(k, v)| (*k, *v)));
    for &p in active {
        let idx = full[&p];
        if !graph.gconstr[&p][idx] {
            return Err(Error::Other(format!(
                "resolver invariant violated: {p} assigned a disallowed state"
            )));
        }
        for q in graph.neighbors(p) {
            if let Some(v_q) = full.get(&q) {
                if !graph.edge(p, q, *v_q, idx) {
                    return Err(Error::Other(format!(
                        "resolver invariant violated: edge ({p}, {q}) unsatisfied"
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Fixed, GraphBuilder, RegistrySet, ResolverInput};
    use crate::registry::Registry;
    use crate::version::VersionSpec;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &std::path::Path, rel: &str, contents: &str) {
        let full = dir.join(rel);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        let mut f = fs::File::create(full).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    /// Builds a tiny two-package registry: A@1.0.0 depends on B in
    /// [2.0.0, 3.0.0); B has 2.0.0, 2.5.0, 3.0.0.
    fn two_level_fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "Registry.toml",
            "name = \"R\"\nuuid = \"33333333-3333-3333-3333-333333333333\"\n\n\
             [packages.\"11111111-1111-1111-1111-111111111111\"]\nname = \"A\"\npath = \"A\"\n\
             [packages.\"22222222-2222-2222-2222-222222222222\"]\nname = \"B\"\npath = \"B\"\n",
        );
        write_file(
            dir.path(),
            "A/Versions.toml",
            "\"1.0.0\" = { git-tree-sha1 = \"a1\" }\n",
        );
        write_file(dir.path(), "A/Deps.toml", "\"1.0.0 - 2.0.0\" = [\"B\"]\n");
        write_file(
            dir.path(),
            "A/Compat.toml",
            "\"1.0.0 - 2.0.0\" = { B = \">=2.0.0\" }\n",
        );
        write_file(
            dir.path(),
            "B/Versions.toml",
            "\"2.0.0\" = { git-tree-sha1 = \"b1\" }\n\"2.5.0\" = { git-tree-sha1 = \"b2\" }\n\"3.0.0\" = { git-tree-sha1 = \"b3\" }\n",
        );
        write_file(dir.path(), "B/Deps.toml", "");
        dir
    }

    #[test]
    fn two_level_resolution_picks_highest_compatible_b() {
        let dir = two_level_fixture();
        let reg = Registry::open(dir.path()).unwrap();
        let a: PackageId = "11111111-1111-1111-1111-111111111111".parse().unwrap();

        let mut input = ResolverInput::default();
        input.requires.insert(a, VersionSpec::parse("1.0.0").unwrap());

        let stdlibs = HashMap::new();
        let builder = GraphBuilder::new(RegistrySet::new(vec![&reg]), &stdlibs);
        let mut graph = builder.build(&input).unwrap();

        let mut log = ResolveLog::new();
        let cancel = CancellationToken::new();
        let solution = resolve(&mut graph, &mut log, &cancel).unwrap();

        let b: PackageId = "22222222-2222-2222-2222-222222222222".parse().unwrap();
        assert_eq!(solution.assigned.get(&a).unwrap(), &Version::new(1, 0, 0));
        assert_eq!(solution.assigned.get(&b).unwrap(), &Version::new(2, 5, 0));
    }

    #[test]
    fn single_package_with_no_deps_resolves_to_highest() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "Registry.toml",
            "name = \"R\"\nuuid = \"55555555-5555-5555-5555-555555555555\"\n\n\
             [packages.\"44444444-4444-4444-4444-444444444444\"]\nname = \"A\"\npath = \"A\"\n",
        );
        write_file(
            dir.path(),
            "A/Versions.toml",
            "\"1.0.0\" = { git-tree-sha1 = \"x\" }\n\"1.1.0\" = { git-tree-sha1 = \"y\" }\n",
        );
        write_file(dir.path(), "A/Deps.toml", "");
        let reg = Registry::open(dir.path()).unwrap();
        let a: PackageId = "44444444-4444-4444-4444-444444444444".parse().unwrap();

        let mut input = ResolverInput::default();
        input.requires.insert(a, VersionSpec::everything());
        let stdlibs = HashMap::new();
        let builder = GraphBuilder::new(RegistrySet::new(vec![&reg]), &stdlibs);
        let mut graph = builder.build(&input).unwrap();
        let mut log = ResolveLog::new();
        let cancel = CancellationToken::new();
        let solution = resolve(&mut graph, &mut log, &cancel).unwrap();
        assert_eq!(solution.assigned.get(&a).unwrap(), &Version::new(1, 1, 0));
    }

    #[test]
    fn conflicting_requirements_surface_resolver_error() {
        let dir = TempDir::new().unwrap();
        write_file(
            dir.path(),
            "Registry.toml",
            "name = \"R\"\nuuid = \"66666666-6666-6666-6666-666666666666\"\n\n\
             [packages.\"77777777-7777-7777-7777-777777777777\"]\nname = \"A\"\npath = \"A\"\n",
        );
        write_file(
            dir.path(),
            "A/Versions.toml",
            "\"1.0.0\" = { git-tree-sha1 = \"x\" }\n",
        );
        write_file(dir.path(), "A/Deps.toml", "");
        let reg = Registry::open(dir.path()).unwrap();
        let a: PackageId = "77777777-7777-7777-7777-777777777777".parse().unwrap();

        let mut input = ResolverInput::default();
        input.requires.insert(a, VersionSpec::parse("=2.0.0").unwrap());
        let stdlibs = HashMap::new();
        let builder = GraphBuilder::new(RegistrySet::new(vec![&reg]), &stdlibs);
        let mut graph = builder.build(&input).unwrap();
        let mut log = ResolveLog::new();
        let cancel = CancellationToken::new();
        let result = resolve(&mut graph, &mut log, &cancel);
        assert!(matches!(result, Err(Error::Resolver { .. })));
    }

    #[test]
    fn fixed_package_bypasses_registry_pool() {
        let a = PackageId(uuid::Uuid::from_bytes([9; 16]));
        let mut input = ResolverInput::default();
        input.fixed.insert(
            a,
            Fixed {
                version: Version::new(9, 9, 9),
                requires: HashMap::new(),
            },
        );
        let stdlibs = HashMap::new();
        let builder = GraphBuilder::new(RegistrySet::new(vec![]), &stdlibs);
        let mut graph = builder.build(&input).unwrap();
        let mut log = ResolveLog::new();
        let cancel = CancellationToken::new();
        let solution = resolve(&mut graph, &mut log, &cancel).unwrap();
        // Fixed packages are excluded from the returned assignment (§4.5).
        assert!(solution.assigned.get(&a).is_none());
        assert!(solution.pruned.get(&a).is_none());
    }
}
