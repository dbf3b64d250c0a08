use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::operations;
use std::env;

pub fn run(name: &str) -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let mut pkg_env = Environment::read(&project_path)?;

    operations::free(&mut pkg_env, name)?;
    pkg_env.write()?;

    println!("✓ Freed {name}");
    Ok(())
}
