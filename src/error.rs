use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The core's error type.
///
/// Variants line up with the error-kind taxonomy of the external interface
/// contract: resolver failures always carry a rendered resolve log so the
/// caller can explain *why* a version was rejected, registry/depot/manifest
/// errors describe on-disk state problems, and `Other` is the catch-all for
/// conditions that don't warrant their own variant.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML edit error: {0}")]
    TomlEdit(#[from] toml_edit::TomlError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("version parsing error: {0}")]
    SemVer(#[from] semver::Error),

    #[error("invalid UUID: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("registry invariant violation in {package}: {detail}")]
    RegistryInvariant { package: String, detail: String },

    #[error("package not found: {0}\n\n\
             Hint: check the name against `pkgdepot search <query>`, or confirm the\n\
             registry that hosts it is registered with `pkgdepot registry add`.")]
    PackageNotFound(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("project error: {0}\n\n\
             Hint: run this command from a directory containing a Project.toml,\n\
             or create one with `pkgdepot init`.")]
    Project(String),

    #[error("depot error: {0}")]
    Depot(String),

    #[error("dependency resolution failed\n\n{log}")]
    Resolver { log: String },

    #[error("resolution was cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn registry(msg: impl Into<String>) -> Self {
        Error::Registry(msg.into())
    }

    pub fn manifest(msg: impl Into<String>) -> Self {
        Error::Manifest(msg.into())
    }

    pub fn project(msg: impl Into<String>) -> Self {
        Error::Project(msg.into())
    }

    pub fn depot(msg: impl Into<String>) -> Self {
        Error::Depot(msg.into())
    }

    pub fn resolver(log: impl Into<String>) -> Self {
        Error::Resolver { log: log.into() }
    }

    /// Maps this error onto the process exit codes from the external
    /// interface contract: 1 for resolver failures, 2 for I/O/depot/registry
    /// problems, 3 for manifest corruption, 130 for a user interrupt.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Resolver { .. } => 1,
            Error::Cancelled => 130,
            Error::Manifest(_) | Error::TomlDe(_) | Error::TomlSer(_) | Error::TomlEdit(_) => 3,
            _ => 2,
        }
    }
}
