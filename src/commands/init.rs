use pkgdepot::environment::atomic_write;
use pkgdepot::error::Result;
use pkgdepot::id::PackageId;
use pkgdepot::project::Project;
use std::env;

pub fn run(name: Option<String>) -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");

    if project_path.exists() {
        println!("✓ Project.toml already exists in this directory");
        println!();
        println!("To reinitialize, remove Project.toml and run 'pkgdepot init' again.");
        return Ok(());
    }

    let name = name.unwrap_or_else(|| {
        current_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("project")
            .to_string()
    });

    let project = Project {
        name: Some(name.clone()),
        uuid: Some(PackageId::new_v4()),
        version: Some("0.1.0".to_string()),
        ..Default::default()
    };

    atomic_write(&project_path, &project.to_toml_string()?)?;

    println!("✓ Created Project.toml for {name}");
    println!();
    println!("Next steps:");
    println!("  • Add dependencies: pkgdepot add <package>");
    println!("  • Resolve and download: pkgdepot instantiate");
    println!();

    Ok(())
}
