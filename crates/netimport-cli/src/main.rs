//! netimport command-line tool
//!
//! Imports modules from remote roots and prints what was loaded.

mod logging;
mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use netimport::{ChainPosition, GitService, ImportSystem};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "netimport")]
#[command(about = "Import modules from remote directories, archives and package indexes", long_about = None)]
#[command(version)]
struct Cli {
    /// Extra TOML profile file, applied after the user configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Allow plaintext (http://) roots
    #[arg(long, global = true)]
    insecure: bool,

    /// Increase logging (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RootArgs {
    /// Root URL (directory or archive)
    #[arg(long)]
    url: Option<String>,

    /// Profile name or URL section to take options from
    #[arg(long)]
    profile: Option<String>,
}

#[derive(Args)]
struct GitArgs {
    /// Repository owner
    user: String,

    /// Repository name
    repo: String,

    /// Modules to import
    #[arg(required = true)]
    modules: Vec<String>,

    /// Branch, tag or commit
    #[arg(long = "ref", default_value = netimport::services::DEFAULT_REF)]
    git_ref: String,

    /// Raw-content domain override
    #[arg(long)]
    domain: Option<String>,

    /// Profile to take options from
    #[arg(long)]
    profile: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a module without registering it
    Load {
        /// Dotted module name
        module: String,

        #[command(flatten)]
        root: RootArgs,
    },

    /// Register a root and import modules from it
    Import {
        /// Dotted module names
        #[arg(required = true)]
        modules: Vec<String>,

        #[command(flatten)]
        root: RootArgs,

        /// Consult the root before the built-in modules
        #[arg(long)]
        prepend: bool,
    },

    /// Import modules from a GitHub repository
    Github(GitArgs),

    /// Import modules from a GitLab repository
    Gitlab(GitArgs),

    /// Import modules from a Bitbucket repository
    Bitbucket(GitArgs),

    /// Import modules from the package index
    Pypi {
        /// Dotted module names
        #[arg(required = true)]
        modules: Vec<String>,

        /// Profile with index URL, requirements and project names
        #[arg(long)]
        profile: Option<String>,

        /// Accepted distribution kind, in preference order (repeatable)
        #[arg(long = "kind", value_name = "KIND")]
        kinds: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    if cli.insecure {
        netimport::set_insecure(true);
    }

    let system = netimport::global();
    if let Some(path) = &cli.config {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        system
            .set_profile(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        debug!("Applied configuration from '{}'", path.display());
    }

    match cli.command {
        Commands::Load { module, root } => {
            let loaded = system
                .load(&module, root.url.as_deref(), root.profile.as_deref())
                .with_context(|| format!("Failed to load '{}'", module))?;
            output::print_module(&loaded)?;
        }

        Commands::Import {
            modules,
            root,
            prepend,
        } => {
            let position = if prepend {
                ChainPosition::Prepend
            } else {
                ChainPosition::Append
            };
            let resolved = system
                .config()
                .resolve(root.url.as_deref(), root.profile.as_deref())?;
            let url = resolved
                .url
                .context("A root URL is required (--url, or a profile with 'url')")?;
            let root = netimport::RemoteRoot::new(&url, resolved.options, system.transport().clone())?;
            let _guard = system.scoped(
                Arc::new(netimport::RemoteImporter::new(root)),
                position,
            );
            import_all(system, &modules)?;
        }

        Commands::Github(args) => git(system, GitService::GitHub, args)?,
        Commands::Gitlab(args) => git(system, GitService::GitLab, args)?,
        Commands::Bitbucket(args) => git(system, GitService::Bitbucket, args)?,

        Commands::Pypi {
            modules,
            profile,
            kinds,
        } => {
            let kinds: Vec<&str> = kinds.iter().map(String::as_str).collect();
            let allowed = (!kinds.is_empty()).then_some(kinds.as_slice());
            let _guard = system.pypi_repo(profile.as_deref(), allowed)?;
            import_all(system, &modules)?;
        }
    }

    Ok(())
}

fn git(system: &ImportSystem, service: GitService, args: GitArgs) -> Result<()> {
    let _guard = system.git_repo(
        service,
        &args.user,
        &args.repo,
        Some(&args.git_ref),
        args.domain.as_deref(),
        args.profile.as_deref(),
    )?;
    import_all(system, &args.modules)
}

fn import_all(system: &ImportSystem, modules: &[String]) -> Result<()> {
    for name in modules {
        debug!("Importing '{}'", name);
        let module = system
            .import_module(name)
            .with_context(|| format!("Failed to import '{}'", name))?;
        output::print_module(&module)?;
    }
    Ok(())
}
