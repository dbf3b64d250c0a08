use super::context::App;
use pkgdepot::error::Result;

pub fn run(query: &str) -> Result<()> {
    println!("Searching for: {query}");
    println!();

    let app = App::load()?;

    let mut found = false;
    for registry in &app.registries {
        let results = registry.search(query);
        if results.is_empty() {
            continue;
        }
        found = true;
        println!("{} ({}):", registry.name, registry.uuid.short());
        for entry in results {
            println!("  {} [{}]", entry.name, entry.id.short());
        }
    }

    if !found {
        println!("No packages found matching '{query}'");
        println!();
        println!("Try a different search term, or add a registry with 'pkgdepot registry list'.");
    }

    Ok(())
}
