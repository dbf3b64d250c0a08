//! User and depot configuration (§6 External Interfaces, environment
//! variables).
//!
//! Configuration is layered: a TOML file at `~/.pkgdepot/config.toml`
//! (overridable via `PKGDEPOT_CONFIG_DIR`) supplies defaults, and a fixed
//! set of environment variables override individual fields at load time —
//! the same `load()`-applies-env-overrides-after-parse shape the teacher
//! used for its single `auth.token` override, generalized to the full set
//! this core needs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// How a registry's packed archive is materialized on disk once fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryUnpack {
    /// Keep the tarball and read it as an in-memory file map (§4.2 packed).
    Packed,
    /// Always extract to a directory on disk (§4.2 unpacked).
    Unpacked,
}

/// The depot's root directory and the knobs that govern how it's
/// populated (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepotConfig {
    /// Overrides the depot root; defaults to `~/.pkgdepot`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Default preservation tier used by `instantiate`/`up` when the
    /// caller doesn't specify one (§4.6).
    #[serde(default = "default_preservation_tier")]
    pub default_preservation_tier: String,

    /// How fetched registries are stored once downloaded.
    #[serde(default = "default_registry_unpack")]
    pub registry_unpack: RegistryUnpack,
}

fn default_preservation_tier() -> String {
    "tiered".to_string()
}

fn default_registry_unpack() -> RegistryUnpack {
    RegistryUnpack::Packed
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            path: None,
            default_preservation_tier: default_preservation_tier(),
            registry_unpack: default_registry_unpack(),
        }
    }
}

/// Network and download behavior (§4.7, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// URL of a pkg-server that mirrors registry archives, tried first in
    /// the download fallback chain.
    #[serde(default)]
    pub pkg_server_url: Option<String>,

    /// Which fetch strategy order registries themselves use when being
    /// added or updated: "archive" prefers the per-registry archive URL,
    /// "git" always does a full clone.
    #[serde(default = "default_registry_fetch_flavor")]
    pub registry_fetch_flavor: String,

    /// Maximum concurrent downloads (§4.7, default 8).
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,

    /// When true, no network access is attempted; operations that would
    /// need to fetch something fail immediately instead of hanging on a
    /// dead connection.
    #[serde(default)]
    pub offline: bool,

    /// When false, git operations always shell out to an external `git`
    /// binary rather than using an in-process implementation.
    #[serde(default = "default_external_git")]
    pub external_git: bool,
}

fn default_registry_fetch_flavor() -> String {
    "archive".to_string()
}

fn default_download_concurrency() -> usize {
    8
}

fn default_external_git() -> bool {
    true
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            pkg_server_url: None,
            registry_fetch_flavor: default_registry_fetch_flavor(),
            download_concurrency: default_download_concurrency(),
            offline: false,
            external_git: default_external_git(),
        }
    }
}

/// Resolver tuning knobs exposed to the user (separate from the
/// per-invocation preservation tier, which is an operation argument, not a
/// persisted setting).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Upper bound on max-sum message-passing sweeps before giving up and
    /// splitting the most uncertain variable (mirrors `MAX_SWEEPS`, exposed
    /// here for users debugging a slow resolve).
    #[serde(default = "default_max_sweeps")]
    pub max_sweeps: usize,

    /// Emit the full resolve log (not just the failing subtree) even on
    /// success, for debugging.
    #[serde(default)]
    pub verbose_log: bool,
}

fn default_max_sweeps() -> usize {
    64
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_sweeps: default_max_sweeps(),
            verbose_log: false,
        }
    }
}

/// Top-level configuration document, loaded from `~/.pkgdepot/config.toml`
/// with environment-variable overrides applied on top (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub depot: DepotConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl Config {
    /// `PKGDEPOT_CONFIG_DIR` if set, otherwise `~/.pkgdepot/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("PKGDEPOT_CONFIG_DIR") {
            return Ok(PathBuf::from(dir).join("config.toml"));
        }
        let home = dirs::home_dir().ok_or_else(|| Error::Other("could not find home directory".to_string()))?;
        Ok(home.join(".pkgdepot").join("config.toml"))
    }

    /// Loads the config file (or defaults, if absent) and applies the
    /// environment-variable overrides named in §6: depot path, pkg-server
    /// URL, registry-fetch flavor, download concurrency, offline toggle,
    /// preferred-preservation default, registry-unpack override, and the
    /// external-git toggle.
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Ok(depot_path) = std::env::var("PKGDEPOT_DEPOT_PATH") {
            if !depot_path.is_empty() {
                config.depot.path = Some(PathBuf::from(shellexpand::tilde(&depot_path).into_owned()));
            }
        }
        if let Ok(url) = std::env::var("PKGDEPOT_SERVER_URL") {
            if !url.is_empty() {
                config.network.pkg_server_url = Some(url);
            }
        }
        if let Ok(flavor) = std::env::var("PKGDEPOT_REGISTRY_FETCH") {
            if !flavor.is_empty() {
                config.network.registry_fetch_flavor = flavor;
            }
        }
        if let Ok(n) = std::env::var("PKGDEPOT_DOWNLOAD_CONCURRENCY") {
            if let Ok(n) = n.parse() {
                config.network.download_concurrency = n;
            }
        }
        if let Ok(v) = std::env::var("PKGDEPOT_OFFLINE") {
            config.network.offline = is_truthy(&v);
        }
        if let Ok(tier) = std::env::var("PKGDEPOT_PRESERVATION") {
            if !tier.is_empty() {
                config.depot.default_preservation_tier = tier;
            }
        }
        if let Ok(mode) = std::env::var("PKGDEPOT_REGISTRY_UNPACK") {
            config.depot.registry_unpack = match mode.to_lowercase().as_str() {
                "unpacked" => RegistryUnpack::Unpacked,
                "packed" => RegistryUnpack::Packed,
                _ => config.depot.registry_unpack,
            };
        }
        if let Ok(v) = std::env::var("PKGDEPOT_EXTERNAL_GIT") {
            config.network.external_git = is_truthy(&v);
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// The effective depot root: the config override if set, else
    /// `~/.pkgdepot/depot`.
    pub fn depot_root(&self) -> Result<PathBuf> {
        if let Some(path) = &self.depot.path {
            return Ok(path.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| Error::Other("could not find home directory".to_string()))?;
        Ok(home.join(".pkgdepot").join("depot"))
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch
    // them so they don't observe each other's overrides.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.network.download_concurrency, 8);
        assert_eq!(config.depot.default_preservation_tier, "tiered");
        assert_eq!(config.depot.registry_unpack, RegistryUnpack::Packed);
    }

    #[test]
    fn config_dir_env_var_overrides_default_path() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("PKGDEPOT_CONFIG_DIR", "/tmp/pkgdepot-test-config");
        let path = Config::default_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/pkgdepot-test-config/config.toml"));
        std::env::remove_var("PKGDEPOT_CONFIG_DIR");
    }

    #[test]
    fn load_applies_offline_and_concurrency_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        std::env::set_var("PKGDEPOT_CONFIG_DIR", dir.path());
        std::env::set_var("PKGDEPOT_OFFLINE", "true");
        std::env::set_var("PKGDEPOT_DOWNLOAD_CONCURRENCY", "3");

        let config = Config::load().unwrap();
        assert!(config.network.offline);
        assert_eq!(config.network.download_concurrency, 3);

        std::env::remove_var("PKGDEPOT_CONFIG_DIR");
        std::env::remove_var("PKGDEPOT_OFFLINE");
        std::env::remove_var("PKGDEPOT_DOWNLOAD_CONCURRENCY");
    }

    #[test]
    fn depot_root_uses_override_when_set() {
        let mut config = Config::default();
        config.depot.path = Some(PathBuf::from("/srv/pkgdepot"));
        assert_eq!(config.depot_root().unwrap(), PathBuf::from("/srv/pkgdepot"));
    }
}
