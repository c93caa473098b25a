use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use research_orchestrator::{
    config::{Config, LogFormat},
    orchestrator::OrchestrationOptions,
    AppState,
};

#[derive(Parser)]
#[command(name = "research-orchestrator", version, about = "Multi-agent research orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Research a topic and print the report as JSON
    Run {
        /// Topic to research
        topic: String,
        /// Global session timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Cap on agents running at once for this session
        #[arg(long)]
        max_agents: Option<usize>,
        /// Skip the synthesis step
        #[arg(long)]
        no_synthesis: bool,
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Run {
            topic,
            timeout_ms,
            max_agents,
            no_synthesis,
            pretty,
        } => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                agents = config.agents.len(),
                "Research orchestrator starting..."
            );

            let mut options = OrchestrationOptions::from(&config.orchestrator);
            if let Some(timeout_ms) = timeout_ms {
                options = options.with_timeout_ms(timeout_ms);
            }
            if let Some(max_agents) = max_agents {
                options = options.with_max_concurrent_agents(max_agents);
            }

            let state = match AppState::new(config).await {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "Failed to initialize application state");
                    return Err(e.into());
                }
            };

            let report = match state.research(&topic, None, options, !no_synthesis).await {
                Ok(r) => r,
                Err(e) => {
                    error!(error = %e, topic = %topic, "Research failed");
                    return Err(e.into());
                }
            };

            let output = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{}", output);
        }
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
