//! Graph builder: composes per-package compressed dependency data across
//! every reachable registry into a bit-mask adjacency graph over
//! `(package, version-index)` pairs (§4.4).

use crate::id::PackageId;
use crate::registry::Registry;
use crate::version::{Version, VersionSpec};
use std::collections::{HashMap, HashSet};

/// A package whose version is locked before resolution: develop-mode,
/// pinned, or the runtime itself (glossary: "Fixed package").
#[derive(Debug, Clone)]
pub struct Fixed {
    pub version: Version,
    pub requires: HashMap<PackageId, VersionSpec>,
}

/// The resolver's raw input: explicit requirements plus fixed bindings
/// (§4.4).
#[derive(Debug, Clone, Default)]
pub struct ResolverInput {
    pub requires: HashMap<PackageId, VersionSpec>,
    pub fixed: HashMap<PackageId, Fixed>,
}

/// One package's dependency set at a specific version, after unioning
/// across every registry that carries it and intersecting overlapping
/// compat specs (§4.2 cross-registry union, §4.4 step 3).
#[derive(Debug, Clone, Default)]
pub struct EffectiveDeps {
    /// dependency id -> (is_weak, compat spec or None for unconstrained)
    pub deps: HashMap<PackageId, (bool, Option<VersionSpec>)>,
}

/// A read-only view over every registry reachable for a resolve, providing
/// the cross-registry union/intersection queries of §4.2.
pub struct RegistrySet<'a> {
    registries: Vec<&'a Registry>,
}

impl<'a> RegistrySet<'a> {
    pub fn new(registries: Vec<&'a Registry>) -> Self {
        RegistrySet { registries }
    }

    /// Sorted union across registries of non-yanked versions for `id`
    /// (§4.4 step 1).
    pub fn pool_for(&self, id: PackageId) -> crate::error::Result<Vec<Version>> {
        let mut versions: HashSet<Version> = HashSet::new();
        for reg in &self.registries {
            if reg.entry(id).is_none() {
                continue;
            }
            if let Ok(guard) = reg.info(id) {
                if let Some(info) = guard.as_ref() {
                    versions.extend(info.non_yanked_pool());
                }
            }
        }
        let mut pool: Vec<Version> = versions.into_iter().collect();
        pool.sort();
        Ok(pool)
    }

    /// The effective dependency set of `id@v`: union of strong + weak deps
    /// from every registry that has `v` in its pool for `id`, keyed by
    /// dependency UUID, each with the intersection of compat specs from
    /// those registries (first-registry-wins when they'd otherwise
    /// disagree down to nothing) (§4.4 step 3, §4.2 cross-registry union).
    ///
    /// A registry is only ever queried for constraints at a version that
    /// it actually carries (§4.2's "only query... at a version that
    /// exists in that registry").
    pub fn effective_deps(&self, id: PackageId, v: &Version) -> EffectiveDeps {
        let mut out: HashMap<PackageId, (bool, Option<VersionSpec>)> = HashMap::new();
        for reg in &self.registries {
            let Some(_entry) = reg.entry(id) else { continue };
            let Ok(guard) = reg.info(id) else { continue };
            let Some(info) = guard.as_ref() else { continue };
            if info.tree_hash(v).is_none() {
                continue; // this registry doesn't carry this version
            }

            if let Some(strong) = info.deps.get(v) {
                let compat = info.compat.get(v);
                for dep_id in strong {
                    merge_dep(&mut out, *dep_id, false, compat.and_then(|c| c.get(dep_id).cloned()));
                }
            }
            if let Some(weak) = info.weak_deps.get(v) {
                let weak_compat = info.weak_compat.get(v);
                for dep_id in weak {
                    merge_dep(
                        &mut out,
                        *dep_id,
                        true,
                        weak_compat.and_then(|c| c.get(dep_id).cloned()),
                    );
                }
            }
        }
        out.insert(crate::id::runtime_id(), (false, None));
        EffectiveDeps { deps: out }
    }
}

fn merge_dep(
    out: &mut HashMap<PackageId, (bool, Option<VersionSpec>)>,
    dep_id: PackageId,
    is_weak: bool,
    compat: Option<VersionSpec>,
) {
    match out.get_mut(&dep_id) {
        None => {
            out.insert(dep_id, (is_weak, compat));
        }
        Some((existing_weak, existing_compat)) => {
            // A dependency required strongly by any registry is strong
            // overall; weak only if every registry agrees it's weak.
            *existing_weak = *existing_weak && is_weak;
            *existing_compat = match (existing_compat.take(), compat) {
                (Some(a), Some(b)) => {
                    let merged = a.intersect(&b);
                    Some(if merged.is_empty() { a } else { merged })
                }
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };
        }
    }
}

/// A bit matrix of shape `rows x cols`, stored row-major.
#[derive(Debug, Clone)]
pub struct BitMatrix {
    rows: usize,
    cols: usize,
    bits: Vec<bool>,
}

impl BitMatrix {
    pub fn new(rows: usize, cols: usize, fill: bool) -> Self {
        BitMatrix {
            rows,
            cols,
            bits: vec![fill; rows * cols],
        }
    }

    pub fn get(&self, r: usize, c: usize) -> bool {
        self.bits[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, v: bool) {
        self.bits[r * self.cols + c] = v;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Transposed copy: used to materialize `M[q][p]` from `M[p][q]`
    /// without storing the computation twice (§4.4: "the graph is
    /// symmetric... must be stored explicitly").
    pub fn transpose(&self) -> BitMatrix {
        let mut out = BitMatrix::new(self.cols, self.rows, false);
        for r in 0..self.rows {
            for c in 0..self.cols {
                out.set(c, r, self.get(r, c));
            }
        }
        out
    }
}

/// The full bit-mask dependency graph (§4.4).
pub struct Graph {
    /// Sorted version pool per package, including the fixed version when
    /// the package is fixed. The "uninstalled" state is the implicit
    /// index `pool[p].len()`.
    pub pool: HashMap<PackageId, Vec<Version>>,
    /// `spp[p] = pool[p].len() + 1`.
    pub spp: HashMap<PackageId, usize>,
    /// Edge matrices keyed `(p, q)` with `p < q` (by raw UUID bytes) to
    /// avoid storing both directions; `edge(p, q)` below resolves the
    /// transpose automatically.
    pub(crate) edges: HashMap<(PackageId, PackageId), BitMatrix>,
    pub gconstr: HashMap<PackageId, Vec<bool>>,
    pub fixed: HashMap<PackageId, Fixed>,
    pub requires: HashMap<PackageId, VersionSpec>,
}

impl Graph {
    pub fn uninstalled_index(&self, p: PackageId) -> usize {
        self.spp[&p] - 1
    }

    fn edge_key(p: PackageId, q: PackageId) -> (PackageId, PackageId, bool) {
        if p.0 <= q.0 {
            (p, q, false)
        } else {
            (q, p, true)
        }
    }

    /// `M[p][q][v_q, v_p]`: true iff choosing `v_q` (or uninstalled) for
    /// `q` is compatible with `p` taking state `v_p`.
    pub fn edge(&self, p: PackageId, q: PackageId, v_q: usize, v_p: usize) -> bool {
        let (a, b, swapped) = Self::edge_key(p, q);
        let Some(m) = self.edges.get(&(a, b)) else {
            return true; // no edge recorded: unconstrained
        };
        if swapped {
            // stored matrix is keyed (q=a, p=b) shape spp[p] x spp[q]
            m.get(v_p, v_q)
        } else {
            m.get(v_q, v_p)
        }
    }

    pub fn neighbors(&self, p: PackageId) -> Vec<PackageId> {
        self.edges
            .keys()
            .filter_map(|(a, b)| {
                if *a == p {
                    Some(*b)
                } else if *b == p {
                    Some(*a)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn packages(&self) -> Vec<PackageId> {
        self.pool.keys().copied().collect()
    }
}

/// Builds the bit-mask graph from a [`ResolverInput`] against every
/// reachable registry (§4.4).
pub struct GraphBuilder<'a> {
    registries: RegistrySet<'a>,
    stdlibs: &'a HashMap<PackageId, Version>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registries: RegistrySet<'a>, stdlibs: &'a HashMap<PackageId, Version>) -> Self {
        GraphBuilder { registries, stdlibs }
    }

    pub fn build(&self, input: &ResolverInput) -> crate::error::Result<Graph> {
        // Discover every package reachable from the requirements and fixed
        // set by walking effective-dependency edges until fixpoint.
        let mut reachable: HashSet<PackageId> = HashSet::new();
        reachable.extend(input.requires.keys().copied());
        reachable.extend(input.fixed.keys().copied());
        let mut pool: HashMap<PackageId, Vec<Version>> = HashMap::new();
        let mut effective: HashMap<(PackageId, Version), EffectiveDeps> = HashMap::new();

        let mut frontier: Vec<PackageId> = reachable.iter().copied().collect();
        while let Some(p) = frontier.pop() {
            let versions = if let Some(fixed) = input.fixed.get(&p) {
                vec![fixed.version.clone()]
            } else {
                self.registries.pool_for(p)?
            };
            pool.insert(p, versions.clone());

            for v in &versions {
                let eff = if let Some(fixed) = input.fixed.get(&p) {
                    if *v == fixed.version {
                        EffectiveDeps {
                            deps: fixed
                                .requires
                                .iter()
                                .map(|(k, spec)| (*k, (false, Some(spec.clone()))))
                                .collect(),
                        }
                    } else {
                        EffectiveDeps::default()
                    }
                } else {
                    self.apply_stdlib_filter(self.registries.effective_deps(p, v))
                };
                for dep_id in eff.deps.keys() {
                    if reachable.insert(*dep_id) {
                        frontier.push(*dep_id);
                    }
                }
                effective.insert((p, v.clone()), eff);
            }
        }

        let mut spp = HashMap::new();
        for (p, versions) in &pool {
            spp.insert(*p, versions.len() + 1);
        }

        let mut edges: HashMap<(PackageId, PackageId), BitMatrix> = HashMap::new();
        // Build one matrix per (p, q) pair where q is a dependency of some
        // version of p.
        let mut pair_set: HashSet<(PackageId, PackageId)> = HashSet::new();
        for ((p, v), eff) in &effective {
            for q in eff.deps.keys() {
                if q == p {
                    continue;
                }
                let key = if p.0 <= q.0 { (*p, *q) } else { (*q, *p) };
                pair_set.insert(key);
            }
            let _ = v;
        }

        for (a, b) in pair_set {
            // matrix keyed (a, b) shape spp[b] x spp[a]: M[a][b][v_b, v_a]
            let spp_a = spp[&a];
            let spp_b = spp[&b];
            let mut m = BitMatrix::new(spp_b, spp_a, false);
            let uninstalled_a = spp_a - 1;
            let uninstalled_b = spp_b - 1;

            // a's perspective: does a@v_a depend on b, and if so which
            // versions of b are acceptable?
            for (v_a_idx, v_a) in pool[&a].iter().enumerate() {
                let eff = effective.get(&(a, v_a.clone()));
                let (requires_b, compat) = eff
                    .and_then(|e| e.deps.get(&b))
                    .map(|(weak, compat)| (!weak, compat.clone()))
                    .unwrap_or((false, None));
                let is_dep = eff.map(|e| e.deps.contains_key(&b)).unwrap_or(false);
                for (v_b_idx, v_b) in pool[&b].iter().enumerate() {
                    let ok = match &compat {
                        Some(spec) => spec.contains(v_b),
                        None => true,
                    };
                    m.set(v_b_idx, v_a_idx, !is_dep || ok);
                }
                // uninstalled row for b: true iff b is a weak dep of
                // a@v_a (a does not require b to be installed).
                m.set(uninstalled_b, v_a_idx, !requires_b);
            }
            // a uninstalled column: always compatible with any state of b.
            for v_b_idx in 0..spp_b {
                m.set(v_b_idx, uninstalled_a, true);
            }

            // b's perspective mirrors into the same matrix where b depends
            // on a; intersect rather than overwrite, since both directions
            // must hold simultaneously.
            for (v_b_idx, v_b) in pool[&b].iter().enumerate() {
                let eff = effective.get(&(b, v_b.clone()));
                let (requires_a, compat) = eff
                    .and_then(|e| e.deps.get(&a))
                    .map(|(weak, compat)| (!weak, compat.clone()))
                    .unwrap_or((false, None));
                let is_dep = eff.map(|e| e.deps.contains_key(&a)).unwrap_or(false);
                for (v_a_idx, v_a) in pool[&a].iter().enumerate() {
                    let ok = match &compat {
                        Some(spec) => spec.contains(v_a),
                        None => true,
                    };
                    let prior = m.get(v_b_idx, v_a_idx);
                    m.set(v_b_idx, v_a_idx, prior && (!is_dep || ok));
                }
                let prior = m.get(v_b_idx, uninstalled_a);
                m.set(v_b_idx, uninstalled_a, prior && !requires_a);
            }

            edges.insert((a, b), m);
        }

        let mut gconstr = HashMap::new();
        for (p, n) in &spp {
            gconstr.insert(*p, vec![true; *n]);
        }

        Ok(Graph {
            pool,
            spp,
            edges,
            gconstr,
            fixed: input.fixed.clone(),
            requires: input.requires.clone(),
        })
    }

    /// Drops a dependency whose identity is a known stdlib locked to a
    /// specific runtime version, if that stdlib's pinned version fails the
    /// compat check demanded here (§4.4 step 3, boundary case in §8).
    fn apply_stdlib_filter(&self, mut eff: EffectiveDeps) -> EffectiveDeps {
        eff.deps.retain(|id, (_, compat)| match self.stdlibs.get(id) {
            Some(pinned) => compat.as_ref().map(|c| c.contains(pinned)).unwrap_or(true),
            None => true,
        });
        eff
    }
}
