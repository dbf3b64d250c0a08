//! Diagnoses the depot, config, and current project, covering §8's
//! invariants list in a form a user can run directly.

use super::context::App;
use pkgdepot::environment::Environment;
use pkgdepot::error::Result;
use pkgdepot::operations;
use std::env;

enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckStatus {
    fn symbol(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "✓",
            CheckStatus::Warning => "⚠",
            CheckStatus::Error => "✗",
        }
    }
}

struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    message: String,
}

impl CheckResult {
    fn new(name: &'static str, status: CheckStatus, message: impl Into<String>) -> Self {
        CheckResult { name, status, message: message.into() }
    }

    fn print(&self) {
        println!("  {} {} - {}", self.status.symbol(), self.name, self.message);
    }
}

pub fn run() -> Result<()> {
    println!("pkgdepot doctor");
    println!("===============");
    println!();

    let mut results = Vec::new();
    results.push(check_config());
    results.push(check_registries());
    results.push(check_depot());
    if let Some(result) = check_project() {
        results.push(result);
    }

    for r in &results {
        r.print();
    }

    let error_count = results.iter().filter(|r| matches!(r.status, CheckStatus::Error)).count();
    let warn_count = results.iter().filter(|r| matches!(r.status, CheckStatus::Warning)).count();

    println!();
    println!("Summary: {} passed, {warn_count} warnings, {error_count} errors", results.len() - warn_count - error_count);

    Ok(())
}

fn check_config() -> CheckResult {
    match pkgdepot::Config::load() {
        Ok(config) => CheckResult::new(
            "Configuration",
            CheckStatus::Ok,
            format!(
                "depot={}, concurrency={}, offline={}",
                config.depot_root().map(|p| p.display().to_string()).unwrap_or_default(),
                config.network.download_concurrency,
                config.network.offline,
            ),
        ),
        Err(e) => CheckResult::new("Configuration", CheckStatus::Error, format!("failed to load: {e}")),
    }
}

fn check_registries() -> CheckResult {
    match App::load() {
        Ok(app) if app.registries.is_empty() => CheckResult::new(
            "Registries",
            CheckStatus::Warning,
            "no registries tracked; add one under the depot's registries/ directory",
        ),
        Ok(app) => CheckResult::new(
            "Registries",
            CheckStatus::Ok,
            format!("{} reachable", app.registries.len()),
        ),
        Err(e) => CheckResult::new("Registries", CheckStatus::Error, format!("{e}")),
    }
}

fn check_depot() -> CheckResult {
    match App::load() {
        Ok(app) => {
            let dirs = [
                app.depot.packages_dir(),
                app.depot.clones_dir(),
                app.depot.registries_dir(),
            ];
            if dirs.iter().all(|d| d.exists()) {
                CheckResult::new("Depot layout", CheckStatus::Ok, "packages/clones/registries present")
            } else {
                CheckResult::new("Depot layout", CheckStatus::Warning, "some depot subdirectories are missing")
            }
        }
        Err(e) => CheckResult::new("Depot layout", CheckStatus::Error, format!("{e}")),
    }
}

fn check_project() -> Option<CheckResult> {
    let current_dir = env::current_dir().ok()?;
    let project_path = current_dir.join("Project.toml");
    if !project_path.exists() {
        return None;
    }
    match Environment::read(&project_path) {
        Ok(env) => {
            let problems = operations::check_invariants(&env);
            if problems.is_empty() {
                Some(CheckResult::new("Project", CheckStatus::Ok, format!("{} direct deps, closed manifest", env.project.deps.len())))
            } else {
                Some(CheckResult::new("Project", CheckStatus::Error, problems.join("; ")))
            }
        }
        Err(e) => Some(CheckResult::new("Project", CheckStatus::Error, format!("{e}"))),
    }
}
