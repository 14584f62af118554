// Copyright 2026 Formrelay Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

mod cli;
mod config;
mod discovery;
mod error;
mod fetch;
mod matching;
mod pipeline;
mod renderer;
mod schema;
mod submit;

#[derive(Parser)]
#[command(
    name = "formrelay",
    about = "Formrelay — bulk contact-form relay",
    version,
    after_help = "Run 'formrelay <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover contact pages for a list of sites and submit the payload to each
    Run(cli::run_cmd::RunParams),
    /// Fetch one page and print the form schemas the extractor sees
    Probe {
        /// URL to probe
        url: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("FORMRELAY_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("FORMRELAY_QUIET", "1");
    }

    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Run(params) => cli::run_cmd::run(params).await,
        Commands::Probe { url } => cli::probe_cmd::run(&url).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "formrelay", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !cli::output::is_quiet() && !cli::output::is_json() {
            eprintln!("  Error: {e:#}");
        }
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        }
        std::process::exit(1);
    }

    result
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "formrelay=debug" } else { "formrelay=info" };
    let filter = EnvFilter::try_from_env("FORMRELAY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
