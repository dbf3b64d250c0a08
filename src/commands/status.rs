use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use std::env;

pub fn run() -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");

    let env = match Environment::read(&project_path) {
        Ok(e) => e,
        Err(_) => {
            println!("No Project.toml found in current directory.");
            println!();
            println!("Run 'pkgdepot init' to create one.");
            return Ok(());
        }
    };

    if env.project.deps.is_empty() {
        println!("No dependencies.");
        println!();
        println!("Add one with: pkgdepot add <package>");
        return Ok(());
    }

    println!("Dependencies:");
    let mut deps: Vec<(&String, _)> = env.project.deps.iter().collect();
    deps.sort_by_key(|(name, _)| (*name).clone());
    for (name, id) in &deps {
        let version = env.manifest.get_by_uuid(**id).and_then(|(_, e)| e.version()).unwrap_or("?");
        let pinned = env.manifest.get_by_uuid(**id).map(|(_, e)| e.pinned).unwrap_or(false);
        println!("  {name} {version}{}", if pinned { " (pinned)" } else { "" });
    }

    println!();
    println!(
        "Total: {} dependenc{}, {} manifest entr{}",
        deps.len(),
        if deps.len() == 1 { "y" } else { "ies" },
        env.manifest.entries.len(),
        if env.manifest.entries.len() == 1 { "y" } else { "ies" },
    );

    Ok(())
}
