use super::context::App;
use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::operations;
use std::env;

pub fn run(name: &str) -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let pkg_env = Environment::read(&project_path)?;
    let app = App::load()?;

    let target = match pkg_env.project.deps.get(name) {
        Some(id) => *id,
        None => app.find_package(name)?,
    };

    if pkg_env.project.deps.values().any(|id| *id == target) {
        println!("{name} is a direct dependency in Project.toml");
    }

    let dependents = operations::why(&pkg_env, target);
    if dependents.is_empty() && pkg_env.project.deps.values().all(|id| *id != target) {
        println!("{name} is not present in the manifest.");
        return Ok(());
    }

    if !dependents.is_empty() {
        println!("Required by:");
        for d in dependents {
            println!("  {d}");
        }
    }

    Ok(())
}
