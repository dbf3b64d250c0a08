use crate::ConfigAction;
use pkgdepot::config::RegistryUnpack;
use pkgdepot::error::{Error, Result};
use pkgdepot::Config;
use std::path::PathBuf;

pub fn run(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show(),
        ConfigAction::Set { key, value } => set(&key, &value),
    }
}

fn show() -> Result<()> {
    let config = Config::load()?;
    let path = Config::default_path()?;

    println!("Config file: {}", path.display());
    println!();
    println!("[depot]");
    println!("  path                    = {}", config.depot_root()?.display());
    println!("  default_preservation_tier = {}", config.depot.default_preservation_tier);
    println!("  registry_unpack         = {:?}", config.depot.registry_unpack);
    println!();
    println!("[network]");
    println!("  pkg_server_url          = {}", config.network.pkg_server_url.as_deref().unwrap_or("<none>"));
    println!("  registry_fetch_flavor   = {}", config.network.registry_fetch_flavor);
    println!("  download_concurrency    = {}", config.network.download_concurrency);
    println!("  offline                 = {}", config.network.offline);
    println!("  external_git            = {}", config.network.external_git);
    println!();
    println!("[resolver]");
    println!("  max_sweeps              = {}", config.resolver.max_sweeps);
    println!("  verbose_log             = {}", config.resolver.verbose_log);

    Ok(())
}

fn set(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?;

    match key {
        "depot.path" => config.depot.path = Some(PathBuf::from(shellexpand::tilde(value).into_owned())),
        "depot.default_preservation_tier" => config.depot.default_preservation_tier = value.to_string(),
        "depot.registry_unpack" => {
            config.depot.registry_unpack = match value.to_lowercase().as_str() {
                "packed" => RegistryUnpack::Packed,
                "unpacked" => RegistryUnpack::Unpacked,
                _ => return Err(Error::Other(format!("invalid registry_unpack value: {value}"))),
            };
        }
        "network.pkg_server_url" => {
            config.network.pkg_server_url = if value.is_empty() { None } else { Some(value.to_string()) };
        }
        "network.registry_fetch_flavor" => config.network.registry_fetch_flavor = value.to_string(),
        "network.download_concurrency" => {
            config.network.download_concurrency = value
                .parse()
                .map_err(|_| Error::Other("download_concurrency must be an integer".to_string()))?;
        }
        "network.offline" => {
            config.network.offline = value
                .parse()
                .map_err(|_| Error::Other("offline must be true or false".to_string()))?;
        }
        "network.external_git" => {
            config.network.external_git = value
                .parse()
                .map_err(|_| Error::Other("external_git must be true or false".to_string()))?;
        }
        "resolver.max_sweeps" => {
            config.resolver.max_sweeps = value
                .parse()
                .map_err(|_| Error::Other("max_sweeps must be an integer".to_string()))?;
        }
        "resolver.verbose_log" => {
            config.resolver.verbose_log = value
                .parse()
                .map_err(|_| Error::Other("verbose_log must be true or false".to_string()))?;
        }
        other => return Err(Error::Other(format!("unknown configuration key: {other}"))),
    }

    config.save()?;
    println!("✓ {key} = {value}");
    Ok(())
}
