//! Agent Gateway CLI: a thin demo/ops harness over `gateway-core`. Because
//! the gateway's session and marketplace state lives only in-process, each
//! invocation is self-contained — `simulate` opens a session, runs a batch
//! of calls, and settles it in one shot, the way `bundler-cli`'s `simulate`
//! and `submit` commands drive a bundle end-to-end without a separate
//! "attach to a running service" step. Talking to a long-lived gateway
//! belongs to `gateway-service`'s HTTP API, not this binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gateway_config::{GatewayConfig, SignerConfig};
use gateway_core::{
    Ed25519Signer, Gateway, Marketplace, OpenSessionOptions, ResponseAttester, SearchQuery,
    SortDirection, SortKey, Transport,
};
use gateway_types::{AgentIdentity, GatewayError, PaymentIntent, ToolListing};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Metered, attested agent-to-agent RPC gateway")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "gateway.config.toml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Open a session, run a batch of calls against it, and settle
    Simulate {
        /// Path to a JSON file containing a `SimulateRequest`
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Show per-call attestation details
        #[arg(short, long)]
        verbose: bool,
    },

    /// Search a marketplace catalog loaded from a JSON file of listings
    Search {
        /// Path to a JSON array of `ToolListing`
        #[arg(value_name = "FILE")]
        catalog: PathBuf,

        /// Filter by method name
        #[arg(long)]
        method: Option<String>,

        /// Filter by maximum cheapest-tier price
        #[arg(long)]
        max_price: Option<String>,

        /// Filter by minimum reputation score
        #[arg(long)]
        min_reputation: Option<u32>,

        /// Sort key: price, reputation, latency, uptime, total-served
        #[arg(long, default_value = "price")]
        sort: String,

        /// Limit result count
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Generate an Ed25519 attestation key and write it to a file
    Keygen {
        /// Output file for the raw 32-byte seed
        #[arg(value_name = "FILE")]
        out: PathBuf,
    },

    /// Show configuration and validate settings
    Config {
        /// Show the current configuration
        #[arg(short, long)]
        show: bool,

        /// Validate configuration without doing anything else
        #[arg(short, long)]
        validate: bool,
    },
}

/// The full input to a `simulate` run: the buyer identity, the intent they
/// present, and the ordered batch of calls to meter against the resulting
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateRequest {
    pub buyer: AgentIdentity,
    pub intent: PaymentIntent,
    pub calls: Vec<CallSpec>,
    /// Settle the session and print a receipt once every call has run.
    #[serde(default = "default_true")]
    pub settle: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSpec {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct CliRunner {
    config: GatewayConfig,
    gateway: Gateway,
}

impl CliRunner {
    pub fn new(config_path: &Path) -> Result<Self> {
        let config = if config_path.exists() {
            GatewayConfig::load_from_path(config_path).context("failed to load configuration")?
        } else {
            warn!("configuration file not found, using defaults");
            GatewayConfig::default()
        };

        let signer = build_signer(&config.identity.signer)?;
        let attester = Arc::new(ResponseAttester::new(signer));
        let transport: Arc<dyn Transport> = Arc::new(gateway_core::EchoTransport::new());

        let gateway = Gateway::new(
            config.identity.gateway_id.clone(),
            AgentIdentity::new(
                config.identity.gateway_id.clone(),
                config.identity.gateway_id.clone(),
                "cli-local",
            ),
            config.session_defaults.max_concurrent_sessions,
            config.session_defaults.tiers.clone(),
            attester,
            transport,
            false,
        );

        Ok(Self { config, gateway })
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Simulate { file, verbose } => self.simulate_command(file, verbose).await,
            Commands::Search {
                catalog,
                method,
                max_price,
                min_reputation,
                sort,
                limit,
            } => self.search_command(catalog, method, max_price, min_reputation, sort, limit),
            Commands::Keygen { out } => keygen_command(out),
            Commands::Config { show, validate } => self.config_command(show, validate),
        }
    }

    async fn simulate_command(&self, file: PathBuf, verbose: bool) -> Result<()> {
        let request = load_simulate_request(&file)?;
        info!(method_count = request.calls.len(), "running simulate batch");

        let session = self
            .gateway
            .open_session(request.intent, request.buyer, OpenSessionOptions::default())
            .context("failed to open session")?;
        println!("Session opened: {}", session.session_id);

        for call in request.calls {
            match self
                .gateway
                .execute(&session.session_id, &call.method, call.params)
                .await
            {
                Ok(result) => {
                    println!(
                        "  {} -> latency={}ms call#{}",
                        call.method, result.latency_ms, result.call_index
                    );
                    if verbose {
                        if let Some(attestation) = &result.attestation {
                            println!(
                                "    attested by {} (sig {}...)",
                                attestation.attester_id,
                                &attestation.signature[..attestation.signature.len().min(16)]
                            );
                        }
                        println!("    result: {}", result.result);
                    }
                }
                Err(e) => {
                    println!("  {} -> FAILED: {}", call.method, e);
                    if let GatewayError::BudgetExhausted { .. } | GatewayError::CallLimitExceeded { .. } =
                        e
                    {
                        break;
                    }
                }
            }
        }

        let snapshot = session.snapshot();
        println!(
            "Session status: {:?}, remaining budget: {}/{}",
            snapshot.status, snapshot.budget_remaining, snapshot.budget_total
        );

        if request.settle && !snapshot.status.is_terminal() {
            let receipt = self.gateway.settle_session(&session.session_id, None)?;
            println!(
                "Settled: charged {} across {} calls ({:?})",
                receipt.amount_charged, receipt.call_count, receipt.settlement_kind
            );
        }

        let metrics = self.gateway.metrics();
        println!(
            "Gateway metrics: calls={} revenue={} avg_latency={:.1}ms attestations={}",
            metrics.total_calls_served,
            metrics.total_revenue,
            metrics.avg_latency_ms,
            metrics.total_attestations
        );

        Ok(())
    }

    fn search_command(
        &self,
        catalog: PathBuf,
        method: Option<String>,
        max_price: Option<String>,
        min_reputation: Option<u32>,
        sort: String,
        limit: usize,
    ) -> Result<()> {
        let listings = load_listings(&catalog)?;
        let marketplace = Marketplace::new();
        for listing in listings {
            marketplace.publish(listing);
        }

        let mut query = SearchQuery::new();
        query.method = method;
        query.min_reputation = min_reputation;
        query.limit = limit;
        query.direction = SortDirection::Ascending;
        if let Some(max_price) = max_price {
            query.max_price = Some(
                max_price
                    .parse()
                    .context("invalid --max-price: must be a decimal integer")?,
            );
        }
        query.sort = match sort.as_str() {
            "price" => Some(SortKey::Price),
            "reputation" => {
                query.direction = SortDirection::Descending;
                Some(SortKey::Reputation)
            }
            "latency" => Some(SortKey::Latency),
            "uptime" => {
                query.direction = SortDirection::Descending;
                Some(SortKey::Uptime)
            }
            "total-served" => {
                query.direction = SortDirection::Descending;
                Some(SortKey::TotalServed)
            }
            other => anyhow::bail!("unknown sort key '{other}'"),
        };

        let results = marketplace.search(&query);
        if results.is_empty() {
            println!("No listings matched.");
            return Ok(());
        }
        for listing in results {
            println!(
                "{:<24} {:<16} price={:<8} reputation={:<4} latency={:.0}ms uptime={:.2}%",
                listing.method,
                listing.seller.agent_id,
                listing.cheapest_price,
                listing.reputation_score,
                listing.avg_latency_ms,
                listing.uptime_percentage
            );
        }
        Ok(())
    }

    fn config_command(&self, show: bool, validate: bool) -> Result<()> {
        if show {
            println!("{}", toml::to_string_pretty(&self.config)?);
        }
        if validate {
            match self.config.validate() {
                Ok(()) => println!("Configuration is valid"),
                Err(e) => {
                    println!("Configuration is invalid: {e}");
                    std::process::exit(1);
                }
            }
        }
        if !show && !validate {
            println!("Use --show to display configuration or --validate to check it");
        }
        Ok(())
    }
}

fn keygen_command(out: PathBuf) -> Result<()> {
    let signer = Ed25519Signer::generate("cli-generated");
    fs::write(&out, signer.public_key_bytes())
        .with_context(|| format!("failed to write key to {}", out.display()))?;
    println!(
        "Wrote a new Ed25519 verifying key to {} (32 bytes)",
        out.display()
    );
    println!(
        "This file holds the public key only; regenerate a signing key from a stored seed \
         via `Ed25519Signer::from_file` in real deployments."
    );
    Ok(())
}

fn build_signer(signer_config: &SignerConfig) -> Result<Option<Arc<dyn gateway_core::Signer>>> {
    match signer_config {
        SignerConfig::File { key_path } => {
            let signer = Ed25519Signer::from_file(key_path, "gateway")
                .context("failed to load signer key file")?;
            Ok(Some(Arc::new(signer)))
        }
        SignerConfig::Env { var_name } => match std::env::var(var_name) {
            Ok(hex_seed) => {
                let bytes = decode_hex_seed(&hex_seed)?;
                Ok(Some(Arc::new(Ed25519Signer::from_bytes(&bytes, "gateway"))))
            }
            Err(_) => {
                warn!(var_name, "signing key env var not set, running without attestation");
                Ok(None)
            }
        },
        SignerConfig::Kms { .. } => {
            anyhow::bail!("KMS-backed signing is not implemented in this CLI")
        }
    }
}

fn decode_hex_seed(hex: &str) -> Result<[u8; 32]> {
    let hex = hex.trim();
    if hex.len() != 64 {
        anyhow::bail!("signing key env var must contain a 64-character hex-encoded 32-byte seed");
    }
    let mut seed = [0u8; 32];
    for (i, chunk) in seed.iter_mut().enumerate() {
        *chunk = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .context("signing key env var is not valid hex")?;
    }
    Ok(seed)
}

fn load_simulate_request(path: &Path) -> Result<SimulateRequest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse simulate request from: {}", path.display()))
}

fn load_listings(path: &Path) -> Result<Vec<ToolListing>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse listing catalog from: {}", path.display()))
}

pub fn init_logging(level: &str, format: &str) -> Result<()> {
    let level_filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => anyhow::bail!("invalid log level: {level}"),
    };

    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::from_level(level_filter));

    match format.to_lowercase().as_str() {
        "json" => {
            subscriber.with(tracing_subscriber::fmt::layer().json()).init();
        }
        "pretty" => {
            subscriber.with(tracing_subscriber::fmt::layer().pretty()).init();
        }
        _ => anyhow::bail!("invalid log format: {format}"),
    }

    Ok(())
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format)?;
    let runner = CliRunner::new(&cli.config)?;
    runner.run(cli.command).await
}
