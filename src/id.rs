//! Package identifiers.
//!
//! Names are human-readable but non-unique across the union of registries
//! (§3); equality and hashing are by UUID, with `Display` falling back to a
//! name plus short UUID prefix the way error messages and the resolve log
//! want to refer to packages.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub Uuid);

impl PackageId {
    pub fn new_v4() -> Self {
        PackageId(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PackageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(PackageId(Uuid::parse_str(s)?))
    }
}

impl TryFrom<&str> for PackageId {
    type Error = crate::error::Error;

    fn try_from(s: &str) -> Result<Self> {
        Ok(PackageId(Uuid::parse_str(s)?))
    }
}

/// A display helper pairing a UUID with its human name, the `name + short
/// UUID prefix` convention from §3.
pub struct NamedId<'a> {
    pub name: &'a str,
    pub id: PackageId,
}

impl fmt::Display for NamedId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.id.short())
    }
}

/// The runtime's own identifier: every package implicitly depends on it
/// (§3). Fixed so that registries written against it are reproducible
/// across machines.
pub fn runtime_id() -> PackageId {
    // Stable across builds: a namespaced UUIDv5 rather than a literal
    // random constant, so it never has to be "the one true magic string"
    // copy-pasted around the codebase.
    PackageId(Uuid::new_v5(&Uuid::NAMESPACE_URL, b"pkgdepot://runtime"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_id_is_stable() {
        assert_eq!(runtime_id(), runtime_id());
    }

    #[test]
    fn parse_roundtrip() {
        let id = PackageId::new_v4();
        let parsed: PackageId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
