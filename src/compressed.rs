//! Compressed-range codec: the `map<VersionRange, T>` representation used by
//! registries to store per-version dependency and compat data compactly
//! (§2 "Compressed-range codec", §4.1's `compress`/expand duality).

use crate::error::{Error, Result};
use crate::version::{Version, VersionRange};
use std::collections::HashMap;

/// A compressed table: a list of (range, value) entries, no two of which
/// overlap. Looking a version up is a linear scan over a typically tiny
/// range list (registries keep entries coarse on purpose).
#[derive(Debug, Clone, Default)]
pub struct CompressedTable<T> {
    entries: Vec<(VersionRange, T)>,
}

impl<T> CompressedTable<T> {
    pub fn new() -> Self {
        CompressedTable { entries: Vec::new() }
    }

    /// Inserts `(range, value)`, rejecting the insert if it overlaps an
    /// existing entry — the registry-invariant violation of §4.2.
    pub fn insert(&mut self, range: VersionRange, value: T) -> Result<()> {
        for (existing, _) in &self.entries {
            if existing.overlaps(&range) {
                return Err(Error::RegistryInvariant {
                    package: String::new(),
                    detail: format!("overlapping ranges {existing} and {range} in compressed table"),
                });
            }
        }
        self.entries.push((range, value));
        Ok(())
    }

    /// Looks up the value bound to `v`, if any range contains it.
    pub fn get(&self, v: &Version) -> Option<&T> {
        self.entries
            .iter()
            .find(|(r, _)| r.contains(v))
            .map(|(_, val)| val)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(VersionRange, T)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Expands a compressed table into a `version -> value` map over a known
/// version pool, the operation `compress` is the right inverse of (§8).
pub fn expand<T: Clone>(table: &CompressedTable<T>, pool: &[Version]) -> HashMap<Version, T> {
    let mut out = HashMap::new();
    for v in pool {
        if let Some(val) = table.get(v) {
            out.insert(v.clone(), val.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    #[test]
    fn rejects_overlap() {
        let mut t = CompressedTable::new();
        t.insert(
            VersionRange::new(Version::new(1, 0, 0), Some(Version::new(2, 0, 0))),
            "a",
        )
        .unwrap();
        let err = t.insert(
            VersionRange::new(Version::new(1, 5, 0), Some(Version::new(3, 0, 0))),
            "b",
        );
        assert!(err.is_err());
    }

    #[test]
    fn lookup_by_version() {
        let mut t = CompressedTable::new();
        t.insert(
            VersionRange::new(Version::new(1, 0, 0), Some(Version::new(2, 0, 0))),
            vec!["dep-a".to_string()],
        )
        .unwrap();
        assert_eq!(
            t.get(&Version::new(1, 5, 0)),
            Some(&vec!["dep-a".to_string()])
        );
        assert_eq!(t.get(&Version::new(2, 0, 0)), None);
    }
}
