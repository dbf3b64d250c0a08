use super::context::{self, App};
use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::operations;
use std::env;

pub fn run() -> Result<()> {
    let current_dir = env::current_dir()?;
    let project_path = current_dir.join("Project.toml");
    let pkg_env = Environment::read(&project_path)?;
    let app = App::load()?;

    let entries = context::with_context(&app, |ctx| operations::outdated(&pkg_env, ctx));

    if entries.is_empty() {
        println!("All dependencies are up to date.");
        return Ok(());
    }

    println!("Outdated dependencies:");
    for e in &entries {
        let mut line = format!("  {} {} ", e.name, e.current);
        match (&e.latest_compatible, &e.latest_overall) {
            (Some(compat), Some(overall)) => {
                line.push_str(&format!("-> {compat} (compat), {overall} (overall, requires widening compat)"));
            }
            (Some(compat), None) => line.push_str(&format!("-> {compat}")),
            (None, Some(overall)) => line.push_str(&format!("-> {overall} (requires widening compat)")),
            (None, None) => continue,
        }
        println!("{line}");
    }

    Ok(())
}
