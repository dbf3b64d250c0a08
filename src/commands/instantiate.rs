use super::context::{self, App};
use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::operations::{self, PreservationTier};
use std::env;

pub fn run() -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let mut pkg_env = Environment::read(&project_path)?;
    let app = App::load()?;

    let tier = if pkg_env.manifest.entries.is_empty() { PreservationTier::None } else { PreservationTier::All };
    let dep_names = context::preview_dep_names(&app, &pkg_env, tier, |_| {})?;

    context::with_context(&app, |ctx| operations::instantiate(&mut pkg_env, ctx, &dep_names))?;

    pkg_env.write()?;
    context::download_missing(&app, &pkg_env)?;

    println!("✓ Instantiated {} manifest entries", pkg_env.manifest.entries.len());
    Ok(())
}
