//! Version algebra: parsing, precedence, and range-set operations.
//!
//! A [`Version`] is the 5-tuple (major, minor, patch, pre-release, build)
//! from semver, reusing `semver::Version` for parsing and ordering. A
//! [`VersionRange`] is a half-open interval `[lo, hi)`; a [`VersionSpec`] is
//! a canonical, sorted, non-overlapping set of ranges.

use crate::error::{Error, Result};
use semver::Version as SemVersion;
use std::fmt;
use std::str::FromStr;

/// A parsed semantic version. Thin wrapper over `semver::Version` so the
/// rest of the crate has one type to import regardless of which upstream
/// crate backs it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub SemVersion);

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version(SemVersion::new(major, minor, patch))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    pub fn is_prerelease(&self) -> bool {
        !self.0.pre.is_empty()
    }

    /// The version immediately after this one within the "bump the leftmost
    /// non-zero component" family used by caret ranges.
    fn bump(&self, component: BumpAt) -> Version {
        match component {
            BumpAt::Major => Version::new(self.major() + 1, 0, 0),
            BumpAt::Minor => Version::new(self.major(), self.minor() + 1, 0),
            BumpAt::Patch => Version::new(self.major(), self.minor(), self.patch() + 1),
        }
    }
}

enum BumpAt {
    Major,
    Minor,
    Patch,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Version(SemVersion::parse(s.trim())?))
    }
}

/// A half-open interval `[lo, hi)` over versions. `hi = None` means
/// unbounded above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub lo: Version,
    pub hi: Option<Version>,
}

impl VersionRange {
    pub fn new(lo: Version, hi: Option<Version>) -> Self {
        if let Some(h) = &hi {
            assert!(lo <= *h, "VersionRange lo must be <= hi");
        }
        VersionRange { lo, hi }
    }

    pub fn exact(v: Version) -> Self {
        let hi = bump_patch_epsilon(&v);
        VersionRange { lo: v, hi: Some(hi) }
    }

    pub fn contains(&self, v: &Version) -> bool {
        v >= &self.lo && self.hi.as_ref().map_or(true, |hi| v < hi)
    }

    pub fn overlaps(&self, other: &VersionRange) -> bool {
        let lo_ok = match &other.hi {
            Some(hi) => self.lo < *hi,
            None => true,
        };
        let hi_ok = match &self.hi {
            Some(hi) => other.lo < *hi,
            None => true,
        };
        lo_ok && hi_ok
    }

    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        let lo = std::cmp::max(&self.lo, &other.lo).clone();
        let hi = match (&self.hi, &other.hi) {
            (Some(a), Some(b)) => Some(std::cmp::min(a, b).clone()),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        if let Some(h) = &hi {
            if *h <= lo {
                return None;
            }
        }
        Some(VersionRange { lo, hi })
    }
}

/// A version one ULP above `v` in the (major, minor, patch) lattice; used to
/// build a tight exact-match range without leaning on pre-release ordering.
fn bump_patch_epsilon(v: &Version) -> Version {
    Version::new(v.major(), v.minor(), v.patch() + 1)
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hi {
            Some(hi) => write!(f, "[{}, {})", self.lo, hi),
            None => write!(f, "[{}, ∞)", self.lo),
        }
    }
}

/// A canonical, sorted, non-overlapping set of [`VersionRange`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionSpec {
    ranges: Vec<VersionRange>,
}

impl VersionSpec {
    pub fn empty() -> Self {
        VersionSpec { ranges: Vec::new() }
    }

    pub fn everything() -> Self {
        VersionSpec {
            ranges: vec![VersionRange::new(Version::new(0, 0, 0), None)],
        }
    }

    pub fn from_range(r: VersionRange) -> Self {
        VersionSpec { ranges: vec![r] }
    }

    /// Builds a spec from an unordered list of ranges, merging overlapping
    /// or adjacent ones into the canonical minimal form.
    pub fn from_ranges(mut ranges: Vec<VersionRange>) -> Self {
        ranges.sort_by(|a, b| a.lo.cmp(&b.lo));
        let mut merged: Vec<VersionRange> = Vec::new();
        for r in ranges {
            if let Some(last) = merged.last_mut() {
                let touching = match &last.hi {
                    Some(hi) => *hi >= r.lo,
                    None => true,
                };
                if touching {
                    last.hi = match (&last.hi, &r.hi) {
                        (Some(a), Some(b)) => Some(std::cmp::max(a, b).clone()),
                        _ => None,
                    };
                    continue;
                }
            }
            merged.push(r);
        }
        VersionSpec { ranges: merged }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[VersionRange] {
        &self.ranges
    }

    pub fn contains(&self, v: &Version) -> bool {
        self.ranges.iter().any(|r| r.contains(v))
    }

    pub fn intersect(&self, other: &VersionSpec) -> VersionSpec {
        let mut out = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                if let Some(r) = a.intersect(b) {
                    out.push(r);
                }
            }
        }
        VersionSpec::from_ranges(out)
    }

    pub fn union(&self, other: &VersionSpec) -> VersionSpec {
        let mut ranges = self.ranges.clone();
        ranges.extend(other.ranges.iter().cloned());
        VersionSpec::from_ranges(ranges)
    }

    /// Builds the canonical minimal range list that accepts exactly the
    /// members of `subset` out of the sorted `pool`. §4.1 / §8's
    /// compress-is-right-inverse-of-expand law.
    pub fn compress(pool: &[Version], subset: &[Version]) -> VersionSpec {
        if subset.is_empty() {
            return VersionSpec::empty();
        }
        let accepted: std::collections::HashSet<&Version> = subset.iter().collect();
        let mut ranges = Vec::new();
        let mut i = 0;
        while i < pool.len() {
            if !accepted.contains(&pool[i]) {
                i += 1;
                continue;
            }
            let lo = pool[i].clone();
            let mut j = i;
            while j + 1 < pool.len() && accepted.contains(&pool[j + 1]) {
                j += 1;
            }
            let hi = if j + 1 < pool.len() {
                Some(pool[j + 1].clone())
            } else {
                None
            };
            ranges.push(VersionRange { lo, hi });
            i = j + 1;
        }
        VersionSpec { ranges }
    }

    /// Parses the union of version-spec clauses from a string per §4.1:
    /// comma-separated list of caret (default), tilde, hyphen, or exact
    /// clauses.
    pub fn parse(s: &str) -> Result<VersionSpec> {
        let mut ranges = Vec::new();
        for clause in s.split(',') {
            ranges.push(parse_clause(clause.trim())?);
        }
        Ok(VersionSpec::from_ranges(ranges))
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(" ∪ "))
    }
}

fn parse_clause(clause: &str) -> Result<VersionRange> {
    if let Some(rest) = clause.strip_prefix('^') {
        return parse_caret(rest);
    }
    if let Some(rest) = clause.strip_prefix('~') {
        return parse_tilde(rest);
    }
    if let Some(rest) = clause.strip_prefix('=') {
        let v: Version = rest.trim().parse()?;
        return Ok(VersionRange::exact(v));
    }
    if let Some((lo, hi)) = clause.split_once(" - ") {
        let lo: Version = lo.trim().parse()?;
        let hi: Version = hi.trim().parse()?;
        // Hyphen ranges are inclusive on both ends per §4.1.
        return Ok(VersionRange::new(lo, Some(bump_patch_epsilon(&hi))));
    }
    if clause.starts_with(">=") {
        let lo: Version = clause[2..].trim().parse()?;
        return Ok(VersionRange::new(lo, None));
    }
    if clause.starts_with('>') {
        let v: Version = clause[1..].trim().parse()?;
        return Ok(VersionRange::new(bump_patch_epsilon(&v), None));
    }
    if clause.starts_with("<=") {
        let hi: Version = clause[2..].trim().parse()?;
        return Ok(VersionRange::new(Version::new(0, 0, 0), Some(bump_patch_epsilon(&hi))));
    }
    if clause.starts_with('<') {
        let hi: Version = clause[1..].trim().parse()?;
        return Ok(VersionRange::new(Version::new(0, 0, 0), Some(hi)));
    }
    // Bare version defaults to caret, the published-registry convention.
    parse_caret(clause)
}

/// `^a.b.c` → `[a.b.c, N)` where N bumps the leftmost non-zero component,
/// except the zero-major relaxation: `^0.a.b` with `a != 0` means
/// `[0.a.b, 0.(a+1).0)`.
fn parse_caret(s: &str) -> Result<VersionRange> {
    let v: Version = s.trim().parse()?;
    let hi = if v.major() != 0 {
        v.bump(BumpAt::Major)
    } else if v.minor() != 0 {
        v.bump(BumpAt::Minor)
    } else {
        v.bump(BumpAt::Patch)
    };
    Ok(VersionRange::new(v, Some(hi)))
}

/// `~a.b.c` permits increments only in the last specified digit. We only
/// accept fully-specified major.minor.patch strings, so the last digit is
/// always patch.
fn parse_tilde(s: &str) -> Result<VersionRange> {
    let v: Version = s.trim().parse()?;
    let hi = v.bump(BumpAt::Minor);
    Ok(VersionRange::new(v, Some(hi)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_default_range() {
        let spec = VersionSpec::parse("1.2.3").unwrap();
        assert!(spec.contains(&Version::new(1, 2, 3)));
        assert!(spec.contains(&Version::new(1, 9, 0)));
        assert!(!spec.contains(&Version::new(2, 0, 0)));
    }

    #[test]
    fn caret_zero_major_relaxation() {
        let spec = VersionSpec::parse("^0.2.3").unwrap();
        assert!(spec.contains(&Version::new(0, 2, 9)));
        assert!(!spec.contains(&Version::new(0, 3, 0)));
    }

    #[test]
    fn caret_zero_major_zero_minor() {
        let spec = VersionSpec::parse("^0.0.3").unwrap();
        assert!(spec.contains(&Version::new(0, 0, 3)));
        assert!(!spec.contains(&Version::new(0, 0, 4)));
    }

    #[test]
    fn tilde_range() {
        let spec = VersionSpec::parse("~1.2.3").unwrap();
        assert!(spec.contains(&Version::new(1, 2, 9)));
        assert!(!spec.contains(&Version::new(1, 3, 0)));
    }

    #[test]
    fn hyphen_range_inclusive() {
        let spec = VersionSpec::parse("1.0.0 - 1.2.0").unwrap();
        assert!(spec.contains(&Version::new(1, 2, 0)));
        assert!(!spec.contains(&Version::new(1, 2, 1)));
    }

    #[test]
    fn exact_spec() {
        let spec = VersionSpec::parse("=1.2.3").unwrap();
        assert!(spec.contains(&Version::new(1, 2, 3)));
        assert!(!spec.contains(&Version::new(1, 2, 4)));
    }

    #[test]
    fn union_spec() {
        let spec = VersionSpec::parse("1.0.0, 2.0.0").unwrap();
        assert!(spec.contains(&Version::new(1, 5, 0)));
        assert!(spec.contains(&Version::new(2, 5, 0)));
        assert!(!spec.contains(&Version::new(3, 0, 0)));
    }

    #[test]
    fn compress_is_right_inverse_of_expand() {
        let pool: Vec<Version> = vec![
            Version::new(1, 0, 0),
            Version::new(1, 1, 0),
            Version::new(1, 2, 0),
            Version::new(2, 0, 0),
            Version::new(2, 1, 0),
        ];
        let subset: Vec<Version> = vec![pool[0].clone(), pool[1].clone(), pool[3].clone()];
        let spec = VersionSpec::compress(&pool, &subset);
        for v in &pool {
            assert_eq!(spec.contains(v), subset.contains(v), "mismatch at {v}");
        }
    }

    #[test]
    fn compress_consecutive_run_is_single_range() {
        let pool: Vec<Version> = (0..5).map(|p| Version::new(1, p, 0)).collect();
        let subset = pool.clone();
        let spec = VersionSpec::compress(&pool, &subset);
        assert_eq!(spec.ranges().len(), 1);
    }

    #[test]
    fn intersect_ranges() {
        let a = VersionSpec::parse(">=1.0.0").unwrap();
        let b = VersionSpec::parse("<2.0.0").unwrap();
        let c = a.intersect(&b);
        assert!(c.contains(&Version::new(1, 5, 0)));
        assert!(!c.contains(&Version::new(2, 0, 0)));
    }

    #[test]
    fn overlap_detection() {
        let a = VersionRange::new(Version::new(1, 0, 0), Some(Version::new(2, 0, 0)));
        let b = VersionRange::new(Version::new(1, 5, 0), Some(Version::new(3, 0, 0)));
        assert!(a.overlaps(&b));
        let c = VersionRange::new(Version::new(2, 0, 0), Some(Version::new(3, 0, 0)));
        assert!(!a.overlaps(&c));
    }
}
