//! End-to-end resolver tests: build a small fixture registry, run it
//! through the graph builder and the bitmask resolver, and check the
//! solved assignment. Version algebra gets its own focused cases.

mod test_utils;

use pkgdepot::graph::{GraphBuilder, RegistrySet, ResolverInput};
use pkgdepot::resolve_log::ResolveLog;
use pkgdepot::resolver::{self, CancellationToken};
use pkgdepot::version::{Version, VersionSpec};
use std::collections::HashMap;
use test_utils::{TestRegistry, TestVersion};

#[test]
fn caret_spec_allows_minor_and_patch_bumps() {
    let spec = VersionSpec::parse("^1.2.0").unwrap();
    assert!(spec.contains(&Version::new(1, 2, 0)));
    assert!(spec.contains(&Version::new(1, 9, 9)));
    assert!(!spec.contains(&Version::new(2, 0, 0)));
}

#[test]
fn tilde_spec_allows_only_patch_bumps() {
    let spec = VersionSpec::parse("~1.2.0").unwrap();
    assert!(spec.contains(&Version::new(1, 2, 5)));
    assert!(!spec.contains(&Version::new(1, 3, 0)));
}

#[test]
fn union_of_disjoint_specs_keeps_both_ranges() {
    let a = VersionSpec::parse("^1.0.0").unwrap();
    let b = VersionSpec::parse("^2.0.0").unwrap();
    let u = a.union(&b);
    assert!(u.contains(&Version::new(1, 5, 0)));
    assert!(u.contains(&Version::new(2, 5, 0)));
    assert!(!u.contains(&Version::new(3, 0, 0)));
}

#[test]
fn resolve_picks_newest_satisfying_version() {
    let mut leaf = TestRegistry::new("fixture");
    let leaf_id = leaf.add_package(
        "Leaf",
        vec![TestVersion::new("1.0.0"), TestVersion::new("1.1.0"), TestVersion::new("2.0.0")],
    );
    let root_id = leaf.add_package("Root", vec![TestVersion::new("1.0.0").with_dep("Leaf", "^1.0.0")]);
    let registry = leaf.open();

    let registries = vec![&registry];
    let set = RegistrySet::new(registries);
    let stdlibs = HashMap::new();
    let builder = GraphBuilder::new(set, &stdlibs);

    let mut input = ResolverInput::default();
    input.requires.insert(root_id, VersionSpec::parse("^1.0.0").unwrap());

    let mut graph = builder.build(&input).unwrap();
    let mut log = ResolveLog::new();
    let solution = resolver::resolve(&mut graph, &mut log, &CancellationToken::new()).unwrap();

    assert_eq!(solution.assigned.get(&root_id), Some(&Version::new(1, 0, 0)));
    assert_eq!(solution.assigned.get(&leaf_id), Some(&Version::new(1, 1, 0)));
}

#[test]
fn resolve_fails_when_no_version_satisfies_both_constraints() {
    let mut reg = TestRegistry::new("fixture");
    let leaf_id = reg.add_package("Leaf", vec![TestVersion::new("1.0.0")]);
    let a_id = reg.add_package("A", vec![TestVersion::new("1.0.0").with_dep("Leaf", "^1.0.0")]);
    let b_id = reg.add_package("B", vec![TestVersion::new("1.0.0").with_dep("Leaf", "^2.0.0")]);
    let registry = reg.open();

    let registries = vec![&registry];
    let set = RegistrySet::new(registries);
    let stdlibs = HashMap::new();
    let builder = GraphBuilder::new(set, &stdlibs);

    let mut input = ResolverInput::default();
    input.requires.insert(a_id, VersionSpec::parse("^1.0.0").unwrap());
    input.requires.insert(b_id, VersionSpec::parse("^1.0.0").unwrap());
    let _ = leaf_id;

    let mut graph = builder.build(&input).unwrap();
    let mut log = ResolveLog::new();
    let result = resolver::resolve(&mut graph, &mut log, &CancellationToken::new());
    assert!(result.is_err());
}
