use pkgdepot::environment::Environment;
use pkgdepot::error::{Error, Result};
use pkgdepot::operations;
use pkgdepot::version::Version;
use std::env;

pub fn run(name: &str, version: Option<&str>) -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let mut pkg_env = Environment::read(&project_path)?;

    let version = version.map(|v| v.parse::<Version>()).transpose().map_err(Error::from)?;
    operations::pin(&mut pkg_env, name, version)?;
    pkg_env.write()?;

    println!("✓ Pinned {name}");
    Ok(())
}
