//! Moonbind command-line tool
//!
//! Validates scripts, runs them against the reference host and prints
//! editor helpers (reserved words, class templates).

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "moonbind")]
#[command(about = "Lua scripting for reflected host objects", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose logging (overrides MOONBIND_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate scripts without registering them
    Check {
        /// Script files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Project configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Instantiate a script and call one of its methods
    Run {
        /// Script path (`res://...` or relative to the project root)
        script: Option<String>,
        /// Method to call
        #[arg(short, long, default_value = "_ready")]
        method: String,
        /// Project configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the reserved words of the script language
    Words,

    /// Print a new script class template
    New {
        /// Class name
        class: String,
        /// Host class or script the new class extends
        #[arg(short, long, default_value = "Node")]
        base: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("MOONBIND_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let color = output::resolve_color_choice(cli.color.as_deref());

    match cli.command {
        Commands::Check { files, config } => commands::check::execute(files, config, color),
        Commands::Run {
            script,
            method,
            config,
        } => commands::run::execute(script, method, config, color),
        Commands::Words => commands::words::execute(),
        Commands::New { class, base } => commands::new::execute(class, base),
    }
}
