use super::context::{self, App};
use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::operations::{self, PreservationTier};
use std::env;

pub fn run(name: &str, version: Option<&str>) -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let mut pkg_env = Environment::read(&project_path)?;
    let app = App::load()?;

    let id = app.find_package(name)?;

    let dep_names = context::preview_dep_names(&app, &pkg_env, PreservationTier::Tiered, |preview| {
        preview.project.deps.insert(name.to_string(), id);
        if let Some(v) = version {
            preview.project.compat.insert(name.to_string(), v.to_string());
        }
    })?;

    let solution = context::with_context(&app, |ctx| {
        operations::add(&mut pkg_env, ctx, name, id, version, PreservationTier::Tiered, &dep_names)
    })?;

    pkg_env.write()?;
    context::download_missing(&app, &pkg_env)?;

    println!("✓ Added {name}");
    for (pkg_id, v) in &solution.assigned {
        println!("  {} {v}", app.name_for(*pkg_id));
    }

    Ok(())
}
