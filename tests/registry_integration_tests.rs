//! Registry loading: storage-variant detection, lazy metadata loading,
//! and cross-registry package lookup.

mod test_utils;

use pkgdepot::registry::Registry;
use test_utils::{write_packed_registry, TestRegistry, TestVersion};

#[test]
fn bare_registry_opens_and_lists_packages() {
    let mut reg = TestRegistry::new("BareFixture");
    reg.add_package("Alpha", vec![TestVersion::new("1.0.0")]);
    reg.add_package("Beta", vec![TestVersion::new("1.0.0")]);
    let registry = reg.open();

    let mut names: Vec<&str> = registry.packages().map(|e| e.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["Alpha", "Beta"]);
}

#[test]
fn lazy_info_loads_versions_and_deps_on_first_access() {
    let mut reg = TestRegistry::new("LazyFixture");
    reg.add_package("Leaf", vec![TestVersion::new("1.0.0"), TestVersion::new("1.1.0")]);
    let root_id = reg.add_package("Root", vec![TestVersion::new("1.0.0").with_dep("Leaf", "^1.0.0")]);
    let registry = reg.open();

    let info = registry.info(root_id).unwrap();
    let info = info.as_ref().unwrap();
    assert_eq!(info.non_yanked_pool().len(), 1);
    assert!(!info.deps.is_empty());
}

#[test]
fn search_is_case_insensitive_substring_match() {
    let mut reg = TestRegistry::new("SearchFixture");
    reg.add_package("HttpClient", vec![TestVersion::new("1.0.0")]);
    reg.add_package("JsonParser", vec![TestVersion::new("1.0.0")]);
    let registry = reg.open();

    let results = registry.search("http");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "HttpClient");
}

#[test]
fn uuids_by_name_returns_empty_for_unknown_package() {
    let reg = TestRegistry::new("EmptyLookupFixture");
    let registry = reg.open();
    assert!(registry.uuids_by_name("DoesNotExist").is_empty());
}

#[test]
fn packed_registry_is_detected_and_opened() {
    let dir = tempfile::TempDir::new().unwrap();
    let registry_toml = br#"
name = "PackedFixture"
uuid = "11111111-1111-1111-1111-111111111111"

[packages]
"22222222-2222-2222-2222-222222222222" = { name = "Packed", path = "packages/Packed" }
"#;
    let versions_toml = b"\"1.0.0\" = { \"git-tree-sha1\" = \"0000000000000000000000000000000000000a\" }\n";
    let deps_toml = b"";
    write_packed_registry(
        dir.path(),
        "packed",
        &[
            ("Registry.toml", registry_toml),
            ("packages/Packed/Versions.toml", versions_toml),
            ("packages/Packed/Deps.toml", deps_toml),
        ],
    );

    let registry = Registry::open(dir.path()).unwrap();
    assert_eq!(registry.name, "PackedFixture");
    assert_eq!(registry.packages().count(), 1);
}

#[test]
fn missing_registry_toml_is_not_a_recognizable_format() {
    let dir = tempfile::TempDir::new().unwrap();
    let err = Registry::open(dir.path()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("no recognizable registry storage format"));
}
