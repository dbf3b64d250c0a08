use super::context::App;
use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::id::PackageId;
use pkgdepot::operations;
use std::env;

pub fn run(name: &str, path: &str) -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let mut pkg_env = Environment::read(&project_path)?;

    let id = if let Some(&id) = pkg_env.project.deps.get(name) {
        id
    } else {
        let app = App::load()?;
        app.find_package(name).unwrap_or_else(|_| PackageId::new_v4())
    };

    operations::develop(&mut pkg_env, name, id, path)?;
    pkg_env.write()?;

    println!("✓ Developing {name} at {path}");
    Ok(())
}
