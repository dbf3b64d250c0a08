use super::context::App;
use crate::RegistryAction;
use pkgdepot::error::Result;

pub fn run(action: RegistryAction) -> Result<()> {
    match action {
        RegistryAction::List => list(),
        RegistryAction::Remove { name } => remove(&name),
    }
}

fn list() -> Result<()> {
    let app = App::load()?;
    if app.registries.is_empty() {
        println!("No registries tracked.");
        println!();
        println!("Add one by cloning or extracting it under {}", app.depot.registries_dir().display());
        return Ok(());
    }
    for reg in &app.registries {
        println!("{} [{}] ({} packages)", reg.name, reg.uuid.short(), reg.packages().count());
    }
    Ok(())
}

fn remove(name: &str) -> Result<()> {
    let app = App::load()?;
    if !app.registries.iter().any(|r| r.name == name) {
        println!("No registry named '{name}' is tracked.");
        return Ok(());
    }
    let registries_dir = app.depot.registries_dir();
    let mut removed = false;
    for entry in std::fs::read_dir(&registries_dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Ok(reg) = pkgdepot::registry::Registry::open(&entry.path()) {
            if reg.name == name {
                std::fs::remove_dir_all(entry.path())?;
                removed = true;
                break;
            }
        }
    }
    if removed {
        println!("✓ Removed registry {name}");
    } else {
        println!("Registry {name} has no on-disk entry under {}", registries_dir.display());
    }
    Ok(())
}
