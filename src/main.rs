//! credmint command line interface

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use credmint::auth::{AuthProbe, CommandProbe};
use credmint::config::OrchestratorConfig;
use credmint::extract::{validate_token_format, TokenGrammar};
use credmint::orchestrator::Orchestrator;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "credmint",
    version,
    about = "Autonomous browser-wizard orchestration for minting service-account credentials"
)]
struct Cli {
    /// Path to a configuration file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(long, global = true)]
    debug: bool,

    /// Output format for command results
    #[arg(long, global = true, value_enum, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full workflow: create a service account and persist its token
    Create {
        /// Service account name to create
        #[arg(long)]
        account: String,

        /// Vault(s) the account gets access to (repeat or comma-separate)
        #[arg(long = "vault", value_delimiter = ',', default_value = "automation")]
        vaults: Vec<String>,

        /// Run with a visible browser window
        #[arg(long)]
        headed: bool,

        /// Let the decision engine drive navigation
        #[arg(long)]
        autonomous: bool,
    },

    /// Probe for an existing authenticated session and report it
    CheckAuth,

    /// Check a token against the credential grammar
    Validate {
        /// The token to check
        token: String,
    },
}

fn init_logging(level: &str, debug: bool) {
    let directive = if debug { "debug" } else { level };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    // logs go to stderr; stdout is reserved for command output
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.debug);

    let mut config = OrchestratorConfig::load(cli.config.as_ref()).await?;
    config.validate()?;

    match cli.command {
        Command::Create {
            account,
            vaults,
            headed,
            autonomous,
        } => {
            if autonomous {
                config.autonomous = true;
            }
            let mut orchestrator = Orchestrator::with_default_collaborators(config);

            // ctrl-c cancels the run; cleanup still executes
            let cancel = orchestrator.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, cancelling run");
                    cancel.cancel();
                }
            });

            let result = orchestrator.orchestrate(&account, &vaults, !headed).await;
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Text => println!("{}", result.summary()),
            }
            if !result.success {
                std::process::exit(1);
            }
        }

        Command::CheckAuth => {
            let probe = CommandProbe::new(config.probe_command.clone())
                .with_browser_marker(config.session_file.clone());
            let status = probe.check().await?;
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Text => println!(
                    "authenticated={} method={} confidence={:.0}%",
                    status.authenticated,
                    status.detected_method,
                    status.confidence_score * 100.0
                ),
            }
            if !status.authenticated {
                std::process::exit(1);
            }
        }

        Command::Validate { token } => {
            let grammar = TokenGrammar::new(config.token_prefix.clone(), config.token_min_len);
            let check = validate_token_format(&token, &grammar);
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&check)?),
                OutputFormat::Text => {
                    if check.is_valid {
                        println!("valid");
                    } else {
                        for error in &check.errors {
                            println!("invalid: {error}");
                        }
                    }
                }
            }
            if !check.is_valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
