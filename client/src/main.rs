use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueHint};
use giftbridge_client::{DeliveryPolicy, GiftbridgeClient};
use giftbridge_core::config::{DeploymentConfig, Environment, DEPLOY_DIR};
use giftbridge_core::holding::{holding_address, ESCROW_NAMESPACE};
use giftbridge_core::{
    Address, Clock, CrossChainMessage, ManualClock, RequestId, SystemClock, VerificationState,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RequestId { claim_code } => {
            println!("{}", RequestId::from_claim_code(&claim_code));
        }
        Commands::HoldingAddress {
            claim_code,
            namespace,
        } => {
            println!("{}", holding_address(&namespace, &claim_code));
        }
        Commands::Decode { payload } => {
            let digits = payload.trim().trim_start_matches("0x");
            let bytes = hex::decode(digits).context("payload is not hex")?;
            let message = CrossChainMessage::decode(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
        Commands::Simulate {
            env,
            config,
            claim_code,
            amount,
            expiry_days,
            depositor,
            claimer,
            reliable,
        } => {
            let path = config.unwrap_or_else(|| env.config_path(DEPLOY_DIR));
            let config = DeploymentConfig::load(&path)?;
            let depositor = match depositor {
                Some(d) => d,
                None => first_genesis(&config.source.genesis, "source")?,
            };
            let claimer = match claimer {
                Some(c) => c,
                None => config
                    .destination
                    .genesis
                    .iter()
                    .map(|g| g.account)
                    .find(|a| *a != config.destination.coordinator.treasury)
                    .context("destination genesis has no claimant account")?,
            };
            let policy = if reliable {
                DeliveryPolicy::reliable()
            } else {
                DeliveryPolicy::default()
            };

            let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(SystemClock.now()));
            let client = GiftbridgeClient::new(config, clock)?;

            let escrow = client
                .create_escrow(&depositor, amount, &claim_code, expiry_days)
                .await?;
            tracing::info!(request_id = %escrow.request_id, holding = %escrow.holding, "Escrow created");

            let request_id = client.request_claim(&claimer, &claim_code, amount).await?;
            let deliveries = client.driver(policy).run_until_idle().await?;
            tracing::info!(deliveries = deliveries.len(), "Messages settled");

            let mut verification = client.verification(&request_id).await?;
            if verification.verified() {
                verification = client.claim(&claimer, &request_id).await?;
                tracing::info!(%claimer, amount, "Claim paid");
            } else {
                tracing::warn!(state = %verification.state, "Claim not verified");
            }

            for event in client.take_events().await {
                println!("{}", serde_json::to_string(&event)?);
            }
            let report = SimulationReport {
                request_id,
                state: verification.state,
                attempts: verification.attempts,
                deliveries: deliveries.len(),
                duplicates: deliveries.iter().filter(|d| d.copy > 0).count(),
                dropped: deliveries
                    .iter()
                    .filter(|d| d.disposition.is_dropped())
                    .count(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct SimulationReport {
    request_id: RequestId,
    state: VerificationState,
    attempts: u32,
    deliveries: usize,
    duplicates: usize,
    dropped: usize,
}

fn first_genesis(
    genesis: &[giftbridge_core::config::GenesisBalance],
    side: &str,
) -> anyhow::Result<Address> {
    genesis
        .first()
        .map(|g| g.account)
        .with_context(|| format!("{side} genesis is empty"))
}

#[derive(Parser)]
#[command(name = "giftbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints the request id of a claim code.
    RequestId { claim_code: String },
    /// Prints where an escrow's funds are held.
    HoldingAddress {
        claim_code: String,

        #[arg(short, long, default_value = ESCROW_NAMESPACE)]
        namespace: String,
    },
    /// Decodes a hex-encoded cross-chain message.
    Decode { payload: String },
    /// Runs create, request, relay and claim against an in-memory deployment.
    Simulate {
        #[arg(short, long, default_value = "local")]
        env: Environment,

        /// Overrides the environment's config file.
        #[arg(short, long,
            value_parser,
            value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "BEACH123")]
        claim_code: String,

        #[arg(long, default_value_t = 1_000_000_000)]
        amount: u64,

        #[arg(long, default_value_t = 30)]
        expiry_days: u32,

        #[arg(long)]
        depositor: Option<Address>,

        #[arg(long)]
        claimer: Option<Address>,

        /// Deliver every message exactly once, in order.
        #[arg(long)]
        reliable: bool,
    },
}
