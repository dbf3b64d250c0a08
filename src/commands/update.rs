use super::context::{self, App};
use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::operations::{self, PreservationTier, UpdateLevel};
use std::env;

pub fn run(targets: &[String], major: bool, minor: bool, patch: bool) -> Result<()> {
    let level = if major {
        UpdateLevel::Major
    } else if minor {
        UpdateLevel::Minor
    } else if patch {
        UpdateLevel::Patch
    } else {
        UpdateLevel::Fixed
    };

    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let mut pkg_env = Environment::read(&project_path)?;
    let app = App::load()?;

    let tier = if level == UpdateLevel::Fixed { PreservationTier::None } else { PreservationTier::Direct };
    let dep_names = context::preview_dep_names(&app, &pkg_env, tier, |preview| {
        operations::widen_compat(preview, targets, level);
    })?;

    let solution = context::with_context(&app, |ctx| operations::update(&mut pkg_env, ctx, targets, level, &dep_names))?;

    pkg_env.write()?;
    context::download_missing(&app, &pkg_env)?;

    println!("✓ Updated");
    for (pkg_id, v) in &solution.assigned {
        println!("  {} {v}", app.name_for(*pkg_id));
    }

    Ok(())
}
