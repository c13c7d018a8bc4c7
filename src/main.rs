use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ensemble::client::{ConnectionState, RunStatus, Session, SessionUpdate};
use ensemble::config;
use ensemble::display::LiveRenderer;
use ensemble::protocol::PerspectiveCots;
use ensemble::server::{self, ServerConfig};

#[derive(Parser)]
#[command(name = "ensemble")]
#[command(version, about = "Multi-perspective LLM ensemble with live progress streaming")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator server
    Serve {
        #[arg(long, env = "ENSEMBLE_HOST", default_value = config::DEFAULT_HOST)]
        host: String,

        #[arg(long, env = "ENSEMBLE_PORT", default_value_t = config::DEFAULT_PORT)]
        port: u16,

        /// Milliseconds between scripted pipeline emissions
        #[arg(long, env = "ENSEMBLE_PACE_MS", default_value_t = config::DEFAULT_PACE_MS)]
        pace_ms: u64,
    },
    /// Connect and render whatever the orchestrator broadcasts
    Watch {
        #[arg(long, env = "ENSEMBLE_WS_URL", default_value = config::DEFAULT_WS_URL)]
        url: String,
    },
    /// Start an analysis run and render it until it finishes
    Analyze {
        /// The query to analyze
        query: String,

        #[arg(long, env = "ENSEMBLE_WS_URL", default_value = config::DEFAULT_WS_URL)]
        url: String,

        /// Chain-of-thought guidance applied to every stage
        #[arg(long, default_value = "")]
        universal_cot: String,

        /// Guidance for the economic stage
        #[arg(long, default_value = "")]
        economic_cot: String,

        /// Guidance for the environmental stage
        #[arg(long, default_value = "")]
        environmental_cot: String,

        /// Guidance for the technological stage
        #[arg(long, default_value = "")]
        technological_cot: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_dotenv();
    let cli = Cli::parse();
    config::init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve {
            host,
            port,
            pace_ms,
        } => {
            server::start_server(ServerConfig {
                host,
                port,
                pace: Duration::from_millis(pace_ms),
            })
            .await
        }
        Commands::Watch { url } => watch(url).await,
        Commands::Analyze {
            query,
            url,
            universal_cot,
            economic_cot,
            environmental_cot,
            technological_cot,
        } => {
            let cots = PerspectiveCots {
                economic: economic_cot,
                environmental: environmental_cot,
                technological: technological_cot,
            };
            analyze(url, query, universal_cot, cots).await
        }
    }
}

async fn watch(url: String) -> Result<()> {
    let mut session = Session::connect(url);
    let renderer = LiveRenderer::new();
    while let Some(update) = session.next_update().await {
        renderer.observe(&update, &session.state);
        if matches!(update, SessionUpdate::GaveUp) {
            anyhow::bail!("could not reach the orchestrator");
        }
    }
    Ok(())
}

async fn analyze(
    url: String,
    query: String,
    universal_cot: String,
    cots: PerspectiveCots,
) -> Result<()> {
    let mut session = Session::connect(url);
    let renderer = LiveRenderer::new();
    let mut started = false;

    while let Some(update) = session.next_update().await {
        renderer.observe(&update, &session.state);
        match update {
            SessionUpdate::Connection(ConnectionState::Connected) if !started => {
                started = true;
                session.start_analysis(&query, &universal_cot, cots.clone())?;
            }
            SessionUpdate::GaveUp => {
                anyhow::bail!("could not reach the orchestrator");
            }
            _ => {}
        }
        if started && session.state.status.is_terminal() {
            break;
        }
    }

    session.disconnect()?;
    if session.state.status == RunStatus::Error {
        anyhow::bail!(
            session
                .state
                .last_error
                .clone()
                .unwrap_or_else(|| "analysis failed".to_string())
        );
    }
    Ok(())
}
