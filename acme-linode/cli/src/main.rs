use std::path::{Path, PathBuf};

use acme_linode::{
    ChallengeAction, ChallengePayload, ChallengeRequest, ChallengeResponse, ChallengeStatus,
    LinodeSolver, Solver,
};
use anyhow::{Context, Result};
use clap::Parser;
use fs_err as fs;
use tracing::{error, info};

mod config;

fn app_version() -> String {
    const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
    const VERSION: &str = git_version::git_version!(
        args = ["--abbrev=20", "--always", "--dirty=-modified"],
        prefix = "git:",
        fallback = "unknown"
    );
    format!("v{CARGO_PKG_VERSION} ({VERSION})")
}

#[derive(Parser)]
enum Command {
    /// Create or update the TXT record of a challenge
    Present {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Challenge payload or request (JSON)
        #[arg(short, long)]
        payload: PathBuf,
    },
    /// Delete the TXT record of a challenge
    Cleanup {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Challenge payload or request (JSON)
        #[arg(short, long)]
        payload: PathBuf,
    },
    /// Generate configuration template
    Cfg {
        /// Write to file
        #[arg(short, long)]
        write_to: Option<PathBuf>,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_version = app_version())]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Accepts either a full `ChallengePayload` or a bare `ChallengeRequest`.
fn parse_challenge(json: &str) -> Result<ChallengeRequest> {
    let value: serde_json::Value = serde_json::from_str(json).context("invalid json")?;
    if value.get("request").is_some() {
        let payload: ChallengePayload =
            serde_json::from_value(value).context("failed to decode challenge payload")?;
        return payload.request.context("challenge payload has no request");
    }
    serde_json::from_value(value).context("failed to decode challenge request")
}

fn read_challenge(path: &Path) -> Result<ChallengeRequest> {
    let json = fs::read_to_string(path)?;
    parse_challenge(&json)
}

fn challenge_response(ch: &ChallengeRequest, result: &Result<()>) -> ChallengeResponse {
    ChallengeResponse {
        uid: ch.uid.clone(),
        success: result.is_ok(),
        status: result.as_ref().err().map(|err| ChallengeStatus {
            message: format!("{err:#}"),
        }),
    }
}

async fn solve(
    action: ChallengeAction,
    config: Option<&Path>,
    payload: &Path,
) -> Result<ChallengeResponse> {
    let config = config::load_config(config).context("Failed to load configuration")?;
    let ch = read_challenge(payload).context("Failed to read challenge")?;
    let kube_config = kube::Config::infer()
        .await
        .context("Failed to infer kubernetes config")?;
    let solver = LinodeSolver::initialize(kube_config, config.solver_config())?;
    info!(solver = solver.name(), ?action, uid = %ch.uid, "solving challenge");
    let result = match action {
        ChallengeAction::Present => solver.present(&ch).await,
        ChallengeAction::CleanUp => solver.clean_up(&ch).await,
    };
    if let Err(err) = &result {
        error!("challenge {action:?} failed: {err:?}");
    }
    Ok(challenge_response(&ch, &result))
}

async fn run_action(action: ChallengeAction, config: Option<&Path>, payload: &Path) -> Result<()> {
    let response = solve(action, config, payload).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    match args.command {
        Command::Present { config, payload } => {
            run_action(ChallengeAction::Present, config.as_deref(), &payload).await?;
        }
        Command::Cleanup { config, payload } => {
            run_action(ChallengeAction::CleanUp, config.as_deref(), &payload).await?;
        }
        Command::Cfg { write_to } => {
            let toml_str = config::Config::default().to_commented_toml()?;
            match write_to {
                Some(path) => fs::write(path, toml_str)?,
                None => println!("{}", toml_str),
            }
        }
    }
    Ok(())
}
