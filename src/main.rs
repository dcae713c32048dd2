//! # Repo Tutor CLI (`tutor`)
//!
//! ## Usage
//!
//! ```bash
//! tutor --config ./config/tutor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tutor init` | Create the prompt cache database and cache directories |
//! | `tutor generate <dir>` | Generate (or incrementally update) a tutorial |
//! | `tutor plan <dir>` | Show what a rerun would regenerate, without model calls |
//! | `tutor cache stats` | Prompt and repository cache summary |
//! | `tutor cache cleanup` | Apply the configured eviction policies |
//! | `tutor cache clear <repo-url>` | Forget the cached generation for a repository |
//!
//! ## Examples
//!
//! ```bash
//! tutor init
//! tutor generate ./checkout --repo-url https://github.com/acme/widget
//! tutor generate ./checkout --mode architecture --language spanish
//! tutor generate ./checkout --full --progress json
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use repo_tutor::config::{self, Config};
use repo_tutor::generate::{self, GenerateArgs};
use repo_tutor::progress::ProgressMode;
use repo_tutor::{cache_cmd, logging, migrate};
use repo_tutor_core::models::DocumentationMode;

/// Repo Tutor: incremental tutorial generation for source repositories.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file is treated as an empty one.
#[derive(Parser)]
#[command(
    name = "tutor",
    about = "Repo Tutor: turn a codebase into a chapter-by-chapter tutorial",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tutor.toml")]
    config: PathBuf,

    /// Progress output: `human`, `json`, or `off`. Defaults to `human`
    /// when stderr is a terminal.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Human,
    Json,
    Off,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the prompt cache database and cache directories.
    ///
    /// Idempotent; running it twice is safe.
    Init,

    /// Generate a tutorial for a local checkout.
    ///
    /// Reuses the cached generation for the repository when possible and
    /// only rewrites chapters affected by changed files.
    Generate {
        /// Directory to document.
        dir: PathBuf,

        /// Repository URL used as the cache identity and in the index.
        /// Defaults to the canonical directory path.
        #[arg(long)]
        repo_url: Option<String>,

        /// Project name for the tutorial title and output directory.
        #[arg(long)]
        project_name: Option<String>,

        /// `tutorial` or `architecture`.
        #[arg(long)]
        mode: Option<DocumentationMode>,

        /// Output language, e.g. `english`, `spanish`.
        #[arg(long)]
        language: Option<String>,

        /// Regenerate everything regardless of what changed.
        #[arg(long)]
        full: bool,

        /// Ignore cached prompts and cached generations for this run.
        #[arg(long)]
        no_cache: bool,

        /// Output directory (overrides `[generation].output_dir`).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show the change analysis and regeneration plan for a checkout.
    ///
    /// Takes the same settings as `generate`; a cached generation made with a
    /// different project name, language or mode plans as `full`.
    Plan {
        dir: PathBuf,

        #[arg(long)]
        repo_url: Option<String>,

        #[arg(long)]
        project_name: Option<String>,

        #[arg(long)]
        mode: Option<DocumentationMode>,

        #[arg(long)]
        language: Option<String>,

        /// Plan as if `--full` were passed to `generate`.
        #[arg(long)]
        full: bool,
    },

    /// Inspect and maintain the caches.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Prompt and repository cache summary.
    Stats,
    /// Evict entries per the `[cache]` limits.
    Cleanup,
    /// Forget the cached generation for one repository.
    Clear {
        repo_url: String,
    },
}

fn load_or_default(path: &std::path::Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;
    logging::init_logging(&cfg.logging)?;

    let progress = cli
        .progress
        .map(ProgressMode::from)
        .unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Cache initialized at {}.", cfg.cache.prompt_db.display());
        }
        Commands::Generate {
            dir,
            repo_url,
            project_name,
            mode,
            language,
            full,
            no_cache,
            output,
        } => {
            let args = GenerateArgs {
                dir,
                repo_url,
                project_name,
                mode,
                language,
                full,
                no_cache,
                output,
            };
            generate::run_generate(&cfg, args, progress).await?;
        }
        Commands::Plan {
            dir,
            repo_url,
            project_name,
            mode,
            language,
            full,
        } => {
            let args = GenerateArgs {
                dir,
                repo_url,
                project_name,
                mode,
                language,
                full,
                ..GenerateArgs::default()
            };
            generate::run_plan(&cfg, &args).await?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => cache_cmd::run_cache_stats(&cfg).await?,
            CacheAction::Cleanup => cache_cmd::run_cache_cleanup(&cfg).await?,
            CacheAction::Clear { repo_url } => cache_cmd::run_cache_clear(&cfg, &repo_url).await?,
        },
    }

    Ok(())
}
