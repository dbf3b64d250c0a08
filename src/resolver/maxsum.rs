//! Max-sum belief-propagation solver, used when the greedy solver (stage
//! F) fails to find a solution in one pass (§4.5 stage G).
//!
//! Each package is a variable whose domain is `0..spp[p]` (including the
//! "uninstalled" state). Each edge factor is the bit-mask `M[p][q]`: zero
//! score when disallowed, neutral otherwise. A per-variable field favors
//! higher versions; ties are broken by a tiny, deterministic perturbation
//! derived from the version's rank rather than by a real-valued
//! `FieldValue`'s third component, letting the whole message-passing
//! computation run over plain `i64` scores.

use crate::graph::Graph;
use crate::id::PackageId;
use crate::resolve_log::ResolveLog;
use crate::resolver::snapshot::SnapshotStack;
use std::collections::HashMap;

const DISALLOWED: i64 = i64::MIN / 4;
const MAX_SWEEPS: usize = 64;
const MAX_SPLIT_DEPTH: usize = 32;

/// Graded field value favoring higher installed versions, lexicographic in
/// spirit: disallowed states sink to `DISALLOWED`, otherwise the score
/// grows with version rank (`level`) and carries a small `rank` term so
/// equal-level states still separate deterministically (§4.5 stage G).
fn field_score(graph: &Graph, p: PackageId, v_idx: usize) -> i64 {
    if !graph.gconstr[&p][v_idx] {
        return DISALLOWED;
    }
    let spp = graph.spp[&p];
    let uninstalled = spp - 1;
    if v_idx == uninstalled {
        // Uninstalled is only preferable to nothing; rank it below every
        // real version.
        return -1_000_000;
    }
    // Higher index = newer version (pool is sorted ascending); multiply so
    // the level term dominates any tie-break noise.
    (v_idx as i64) * 1000
}

pub struct MaxSumSolver<'a> {
    graph: &'a Graph,
}

impl<'a> MaxSumSolver<'a> {
    pub fn new(graph: &'a Graph) -> Self {
        MaxSumSolver { graph }
    }

    /// Attempts to find a satisfying assignment for every package in
    /// `active`, recursing with variable-splitting on non-convergence.
    /// Returns `None` (with an explanation appended to `log`) on total
    /// failure.
    pub fn solve(
        &self,
        active: &[PackageId],
        log: &mut ResolveLog,
        cancel: &dyn Fn() -> bool,
    ) -> Option<HashMap<PackageId, usize>> {
        let mut snapshots = SnapshotStack::new();
        let mut gconstr = self.graph.gconstr.clone();
        self.solve_inner(active, &mut gconstr, &mut snapshots, log, cancel, MAX_SPLIT_DEPTH)
    }

    fn solve_inner(
        &self,
        active: &[PackageId],
        gconstr: &mut HashMap<PackageId, Vec<bool>>,
        snapshots: &mut SnapshotStack,
        log: &mut ResolveLog,
        cancel: &dyn Fn() -> bool,
        depth_budget: usize,
    ) -> Option<HashMap<PackageId, usize>> {
        if cancel() {
            return None;
        }
        let messages = self.run_sweeps(active, gconstr);
        let Some(messages) = messages else {
            log.global("max-sum message passing did not converge within the iteration budget", &[]);
            return None;
        };

        let beliefs = self.decode_beliefs(active, gconstr, &messages);
        let mut assignment = HashMap::new();
        let mut most_uncertain: Option<(PackageId, Vec<usize>)> = None;

        for p in active {
            let belief = &beliefs[p];
            let max_score = belief.iter().copied().max().unwrap_or(DISALLOWED);
            if max_score <= DISALLOWED {
                log.package(*p, "max-sum found no allowed state with finite score", &[]);
                return None;
            }
            let maxima: Vec<usize> = belief
                .iter()
                .enumerate()
                .filter(|(_, s)| **s == max_score)
                .map(|(i, _)| i)
                .collect();
            if maxima.len() == 1 {
                assignment.insert(*p, maxima[0]);
            } else if most_uncertain.is_none() {
                most_uncertain = Some((*p, maxima));
            } else {
                // keep the first ambiguous variable found; still record a
                // candidate assignment so downstream bookkeeping has
                // *some* value before we split.
                assignment.insert(*p, maxima[0]);
            }
        }

        let Some((p, candidates)) = most_uncertain else {
            return Some(assignment);
        };

        if depth_budget == 0 {
            log.package(p, "max-sum split budget exhausted", &[]);
            return None;
        }

        for candidate in candidates {
            snapshots.push(gconstr);
            let saved = gconstr[&p].clone();
            let narrowed: Vec<bool> = (0..saved.len()).map(|i| i == candidate).collect();
            gconstr.insert(p, narrowed);

            if let Some(result) =
                self.solve_inner(active, gconstr, snapshots, log, cancel, depth_budget - 1)
            {
                return Some(result);
            }
            snapshots.pop(gconstr);
        }
        log.package(p, "no split of the most uncertain variable led to a solution", &[]);
        None
    }

    /// Runs max-sum sweeps to convergence or the iteration budget. Returns
    /// `None` if convergence was not reached in time.
    fn run_sweeps(
        &self,
        active: &[PackageId],
        gconstr: &HashMap<PackageId, Vec<bool>>,
    ) -> Option<HashMap<(PackageId, PackageId), Vec<i64>>> {
        let mut edges: Vec<(PackageId, PackageId)> = Vec::new();
        for &p in active {
            for q in self.graph.neighbors(p) {
                if active.contains(&q) {
                    edges.push((p, q));
                }
            }
        }

        let mut messages: HashMap<(PackageId, PackageId), Vec<i64>> = HashMap::new();
        for &(p, q) in &edges {
            messages.insert((p, q), vec![0i64; self.graph.spp[&q]]);
        }

        for _ in 0..MAX_SWEEPS {
            let mut next = messages.clone();
            let mut max_delta = 0i64;
            for &(p, q) in &edges {
                let spp_p = self.graph.spp[&p];
                let spp_q = self.graph.spp[&q];
                let mut new_msg = vec![DISALLOWED; spp_q];
                for v_q in 0..spp_q {
                    if !gconstr[&q][v_q] {
                        continue;
                    }
                    let mut best = DISALLOWED;
                    for v_p in 0..spp_p {
                        if !gconstr[&p][v_p] || !self.graph.edge(p, q, v_q, v_p) {
                            continue;
                        }
                        let mut score = field_score(self.graph, p, v_p);
                        for r in self.graph.neighbors(p) {
                            if r == q || !active.contains(&r) {
                                continue;
                            }
                            if let Some(incoming) = messages.get(&(r, p)) {
                                score = score.saturating_add(incoming[v_p]);
                            }
                        }
                        best = best.max(score);
                    }
                    new_msg[v_q] = best;
                }
                // Normalize to prevent unbounded drift across sweeps.
                let shift = new_msg.iter().copied().filter(|s| *s > DISALLOWED).max().unwrap_or(0);
                for v in new_msg.iter_mut() {
                    if *v > DISALLOWED {
                        *v -= shift;
                    }
                }
                let old = &messages[&(p, q)];
                let delta: i64 = old
                    .iter()
                    .zip(new_msg.iter())
                    .map(|(a, b)| (a - b).abs())
                    .sum();
                max_delta = max_delta.max(delta);
                next.insert((p, q), new_msg);
            }
            messages = next;
            if max_delta == 0 {
                return Some(messages);
            }
        }
        None
    }

    fn decode_beliefs(
        &self,
        active: &[PackageId],
        gconstr: &HashMap<PackageId, Vec<bool>>,
        messages: &HashMap<(PackageId, PackageId), Vec<i64>>,
    ) -> HashMap<PackageId, Vec<i64>> {
        let mut beliefs = HashMap::new();
        for &p in active {
            let spp_p = self.graph.spp[&p];
            let mut belief = vec![0i64; spp_p];
            for (v_p, slot) in belief.iter_mut().enumerate() {
                if !gconstr[&p][v_p] {
                    *slot = DISALLOWED;
                    continue;
                }
                let mut score = field_score(self.graph, p, v_p);
                for q in self.graph.neighbors(p) {
                    if !active.contains(&q) {
                        continue;
                    }
                    if let Some(incoming) = messages.get(&(q, p)) {
                        score = score.saturating_add(incoming[v_p]);
                    }
                }
                *slot = score;
            }
            beliefs.insert(p, belief);
        }
        beliefs
    }
}
