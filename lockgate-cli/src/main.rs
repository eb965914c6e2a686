//! lockgate: check whether an address satisfies a requirement set.
//!
//! Reads requirements from a JSON file, evaluates them against the
//! configured chain and prints the verdict as JSON. Exits non-zero when
//! the address is not authorized.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use ethers_core::types::Address;
use lockgate::{FulfillmentPolicy, Gate, GateConfig, Progress, Requirement, SessionState};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lockgate", about = "Verify token- and follower-gated access requirements")]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON-RPC endpoint (overrides the config file)
    #[arg(long, env = "LOCKGATE_RPC_URL")]
    rpc_url: Option<String>,

    /// Address to verify
    #[arg(long)]
    identity: Address,

    /// JSON file containing an array of requirements
    #[arg(long)]
    requirements: PathBuf,

    /// Fulfillment policy: any or all
    #[arg(long, default_value = "all")]
    policy: FulfillmentPolicy,

    /// Log every progress update while verifying
    #[arg(long)]
    watch: bool,
}

fn load_config(args: &Args) -> Result<GateConfig> {
    let mut config = match &args.config {
        Some(path) => GateConfig::load(path)?,
        None => GateConfig::default(),
    };
    if let Some(url) = &args.rpc_url {
        config.rpc_url = url.clone();
    }
    Ok(config)
}

fn load_requirements(path: &Path) -> Result<Vec<Requirement>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("can't read requirements from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("bad requirements file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs when LOCKGATE_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("LOCKGATE_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("lockgate=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let args = Args::parse();
    let config = load_config(&args)?;
    let requirements = load_requirements(&args.requirements)?;
    tracing::info!(
        identity = ?args.identity,
        requirements = requirements.len(),
        policy = ?args.policy,
        "Verifying"
    );

    let gate = Gate::from_config(&config)?;
    let session = gate.session(args.identity, requirements, args.policy)?;

    if args.watch {
        let mut rx = session.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let progress = Progress::clone(&rx.borrow_and_update());
                for result in &progress.results {
                    tracing::info!(
                        requirement = %result.requirement_id,
                        status = ?result.status,
                        current = result.current_value.as_deref().unwrap_or("-"),
                        "Progress {}%",
                        progress.overall_percent
                    );
                }
                if progress.state == SessionState::Settled {
                    break;
                }
            }
        });
    }

    let verdict = session.run().await?;
    println!("{}", serde_json::to_string_pretty(&session.progress())?);

    if !verdict.is_authorized {
        std::process::exit(1);
    }
    Ok(())
}
