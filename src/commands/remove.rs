use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::operations;
use std::env;

pub fn run(names: &[String]) -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let mut pkg_env = Environment::read(&project_path)?;

    operations::remove(&mut pkg_env, names)?;
    pkg_env.write()?;

    println!("✓ Removed {}", names.join(", "));
    Ok(())
}
