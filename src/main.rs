use clap::{Parser, Subcommand};

mod commands;

/// pkgdepot - a language-agnostic package environment manager core
#[derive(Parser)]
#[command(name = "pkgdepot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new Project.toml in the current directory
    Init {
        /// Project name; defaults to the current directory's name
        name: Option<String>,
    },

    /// Add a dependency to the project and resolve
    Add {
        /// Package name as registered
        name: String,

        /// Version spec, e.g. "^1.2.0", "~1.2", "=1.2.3"
        #[arg(long)]
        version: Option<String>,
    },

    /// Remove one or more dependencies from the project
    Remove { names: Vec<String> },

    /// Re-resolve, widening the given packages' allowed range
    Update {
        targets: Vec<String>,

        #[arg(long, conflicts_with_all = ["minor", "patch"])]
        major: bool,
        #[arg(long, conflicts_with_all = ["major", "patch"])]
        minor: bool,
        #[arg(long, conflicts_with_all = ["major", "minor"])]
        patch: bool,
    },

    /// Pin a dependency to its currently resolved version
    Pin {
        name: String,
        /// Pin to a specific version instead of the current one
        #[arg(long)]
        version: Option<String>,
    },

    /// Clear a dependency's pin
    Free { name: String },

    /// Point a dependency at a local path for in-place development
    Develop { name: String, path: String },

    /// Download every package the manifest resolves to
    Instantiate,

    /// Explain why a package is present in the manifest
    Why { name: String },

    /// Print the dependency tree rooted at the project's direct deps
    Tree,

    /// List the project's direct and manifest dependencies
    #[command(alias = "list")]
    Status,

    /// Check the manifest and project for closure/consistency problems
    Doctor,

    /// Search reachable registries for a package name
    Search { query: String },

    /// List direct dependencies with a newer version available
    Outdated,

    /// Manage registries tracked by the depot
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// View or change persisted configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Undo the last manifest/project write
    Undo,

    /// Redo a previously undone write
    Redo,
}

#[derive(Subcommand)]
enum RegistryAction {
    /// List registries reachable from the depot
    List,
    /// Remove a tracked registry by name
    Remove { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Set a single configuration key (e.g. network.offline=true)
    Set { key: String, value: String },
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Init { name } => commands::init::run(name),
        Commands::Add { name, version } => commands::add::run(&name, version.as_deref()),
        Commands::Remove { names } => commands::remove::run(&names),
        Commands::Update { targets, major, minor, patch } => {
            commands::update::run(&targets, major, minor, patch)
        }
        Commands::Pin { name, version } => commands::pin::run(&name, version.as_deref()),
        Commands::Free { name } => commands::free::run(&name),
        Commands::Develop { name, path } => commands::develop::run(&name, &path),
        Commands::Instantiate => commands::instantiate::run(),
        Commands::Why { name } => commands::why::run(&name),
        Commands::Tree => commands::tree::run(),
        Commands::Status => commands::status::run(),
        Commands::Doctor => commands::doctor::run(),
        Commands::Search { query } => commands::search::run(&query),
        Commands::Outdated => commands::outdated::run(),
        Commands::Registry { action } => commands::registry::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Undo => commands::undo::run(true),
        Commands::Redo => commands::undo::run(false),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
