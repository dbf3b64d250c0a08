//! Resolve log: a structured, per-package event journal explaining why
//! resolution succeeded or failed (§4.8).
//!
//! Log entries can reference other entries they were caused by, forming a
//! DAG rather than a tree (§9). Each entry gets a stable index in a flat
//! vector; references are stored as indices, and rendering carries a
//! visited set to break cycles.

use crate::id::PackageId;
use std::collections::HashSet;
use std::fmt::Write as _;

/// A target of a log entry: either a specific package or the global
/// ("no package") scope used for top-level events like "greedy solve
/// succeeded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogSubject {
    Package(PackageId),
    Global,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub subject: LogSubject,
    pub message: String,
    pub caused_by: Vec<usize>,
}

/// The flat-vector indexed DAG of log entries (§9 design note).
#[derive(Debug, Clone, Default)]
pub struct ResolveLog {
    entries: Vec<LogEntry>,
}

impl ResolveLog {
    pub fn new() -> Self {
        ResolveLog { entries: Vec::new() }
    }

    /// Appends an entry and returns its stable index for later
    /// back-referencing.
    pub fn push(&mut self, subject: LogSubject, message: impl Into<String>, caused_by: &[usize]) -> usize {
        let idx = self.entries.len();
        self.entries.push(LogEntry {
            subject,
            message: message.into(),
            caused_by: caused_by.to_vec(),
        });
        idx
    }

    pub fn package(
        &mut self,
        id: PackageId,
        message: impl Into<String>,
        caused_by: &[usize],
    ) -> usize {
        self.push(LogSubject::Package(id), message, caused_by)
    }

    pub fn global(&mut self, message: impl Into<String>, caused_by: &[usize]) -> usize {
        self.push(LogSubject::Global, message, caused_by)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Plain view: per-package, alphabetical by display name, no
    /// recursion into caused-by references (§4.8).
    pub fn render_plain(&self, name_of: impl Fn(PackageId) -> String) -> String {
        let mut by_subject: Vec<(String, &LogEntry)> = self
            .entries
            .iter()
            .map(|e| (self.subject_label(e.subject, &name_of), e))
            .collect();
        by_subject.sort_by(|a, b| a.0.cmp(&b.0));
        let mut out = String::new();
        for (label, entry) in by_subject {
            let _ = writeln!(out, "{label}: {}", entry.message);
        }
        out
    }

    /// Tree view: per-package, alphabetical, with recursive expansion of
    /// `caused_by` references, cycle-broken via a visited set.
    pub fn render_tree(&self, name_of: impl Fn(PackageId) -> String) -> String {
        let mut roots: Vec<(String, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (self.subject_label(e.subject, &name_of), i))
            .collect();
        roots.sort_by(|a, b| a.0.cmp(&b.0));
        let mut out = String::new();
        for (label, idx) in roots {
            let mut visited = HashSet::new();
            self.render_node(idx, 0, &mut out, &mut visited, &label);
        }
        out
    }

    fn render_node(
        &self,
        idx: usize,
        depth: usize,
        out: &mut String,
        visited: &mut HashSet<usize>,
        label: &str,
    ) {
        let indent = "  ".repeat(depth);
        if !visited.insert(idx) {
            let _ = writeln!(out, "{indent}{label}: (cycle)");
            return;
        }
        let entry = &self.entries[idx];
        let _ = writeln!(out, "{indent}{label}: {}", entry.message);
        for &cause in &entry.caused_by {
            self.render_node(cause, depth + 1, out, visited, label);
        }
    }

    /// Chronological view: flat, in journal (push) order.
    pub fn render_chronological(&self, name_of: impl Fn(PackageId) -> String) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let label = self.subject_label(entry.subject, &name_of);
            let _ = writeln!(out, "{label}: {}", entry.message);
        }
        out
    }

    fn subject_label(&self, subject: LogSubject, name_of: &impl Fn(PackageId) -> String) -> String {
        match subject {
            LogSubject::Package(id) => name_of(id),
            LogSubject::Global => "<global>".to_string(),
        }
    }

    /// Returns the log subtree for `id`: every entry about it and every
    /// entry transitively referenced by those, rendered depth-first. Used
    /// to build the `ResolverError` message naming the conflicting
    /// package(s) (§4.5 stage A, §7 propagation policy).
    pub fn subtree_for(&self, id: PackageId, name_of: impl Fn(PackageId) -> String) -> String {
        let mut out = String::new();
        let mut visited = HashSet::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.subject == LogSubject::Package(id) {
                self.render_node(idx, 0, &mut out, &mut visited, &name_of(id));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u8) -> PackageId {
        let mut bytes = [0u8; 16];
        bytes[15] = n;
        PackageId(uuid::Uuid::from_bytes(bytes))
    }

    #[test]
    fn back_references_form_dag_and_render_without_infinite_loop() {
        let mut log = ResolveLog::new();
        let a = pid(1);
        let first = log.package(a, "possible versions 1.0.0, 1.1.0", &[]);
        let second = log.package(a, "restricted by B's requirement", &[first]);
        log.package(a, "restricted again, cites itself", &[second, first]);

        let rendered = log.render_tree(|id| format!("pkg-{}", id.short()));
        assert!(rendered.contains("possible versions"));
    }

    #[test]
    fn cycle_is_broken_not_infinite() {
        let mut log = ResolveLog::new();
        let a = pid(2);
        let first = log.package(a, "first", &[]);
        // Manually introduce a cycle: patch entry 0 to reference entry 1,
        // which references entry 0.
        let second = log.package(a, "second", &[first]);
        log.entries[first].caused_by.push(second);

        let rendered = log.render_tree(|id| format!("pkg-{}", id.short()));
        assert!(rendered.contains("cycle"));
    }

    #[test]
    fn plain_view_has_no_recursive_indentation() {
        let mut log = ResolveLog::new();
        let a = pid(3);
        let first = log.package(a, "root cause", &[]);
        log.package(a, "derived", &[first]);
        let rendered = log.render_plain(|id| format!("pkg-{}", id.short()));
        assert!(!rendered.contains("  "));
    }
}
