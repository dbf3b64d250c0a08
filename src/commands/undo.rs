use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use std::env;

pub fn run(undo: bool) -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let mut pkg_env = Environment::read(&project_path)?;

    let applied = if undo { pkg_env.undo()? } else { pkg_env.redo()? };

    if applied {
        println!("✓ {}", if undo { "Undid last change" } else { "Redid change" });
    } else {
        println!("Nothing to {}.", if undo { "undo" } else { "redo" });
    }

    Ok(())
}
