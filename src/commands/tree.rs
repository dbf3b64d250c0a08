use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::operations;
use std::env;

pub fn run() -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");

    let env = match Environment::read(&project_path) {
        Ok(e) => e,
        Err(_) => {
            println!("✗ No Project.toml found in current directory");
            println!();
            println!("Run 'pkgdepot init' first to initialize the project.");
            return Ok(());
        }
    };

    let tree = operations::dependency_tree(&env);
    if tree.is_empty() {
        println!("No dependencies to display.");
    } else {
        print!("{tree}");
    }

    Ok(())
}
