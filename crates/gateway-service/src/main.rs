use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gateway_config::GatewayConfig;
use gateway_core::{EchoTransport, Ed25519Signer, Gateway, ResponseAttester, Signer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gateway-service")]
#[command(about = "HTTP service for the agent gateway")]
#[command(version = "0.1.0")]
struct Cli {
    #[arg(short, long, default_value = "gateway.config.toml")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(short, long)]
    port: Option<u16>,
}

fn build_signer(signer_config: &gateway_config::SignerConfig) -> Option<Arc<dyn Signer>> {
    match signer_config {
        gateway_config::SignerConfig::File { key_path } => match Ed25519Signer::from_file(key_path, "gateway") {
            Ok(signer) => Some(Arc::new(signer)),
            Err(e) => {
                error!(error = %e, path = %key_path.display(), "failed to load signing key");
                None
            }
        },
        gateway_config::SignerConfig::Env { var_name } => match std::env::var(var_name) {
            Ok(hex) => match decode_hex_seed(&hex) {
                Ok(seed) => Some(Arc::new(Ed25519Signer::from_bytes(&seed, "gateway"))),
                Err(e) => {
                    error!(error = %e, "invalid signing key in environment variable");
                    None
                }
            },
            Err(_) => {
                warn!(var_name, "signing key environment variable unset, running unattested");
                None
            }
        },
        gateway_config::SignerConfig::Kms { .. } => {
            error!("KMS-backed signing is not implemented in this service");
            None
        }
    }
}

fn decode_hex_seed(hex: &str) -> Result<[u8; 32], String> {
    if hex.len() != 64 {
        return Err(format!("expected 64 hex characters, got {}", hex.len()));
    }
    let mut seed = [0u8; 32];
    for i in 0..32 {
        seed[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|e| e.to_string())?;
    }
    Ok(seed)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level_filter = match cli.log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            eprintln!("Invalid log level: {}", cli.log_level);
            std::process::exit(1);
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::from_level(level_filter))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let mut config = if cli.config.exists() {
        match GatewayConfig::load_from_path(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("Configuration file not found, using defaults");
        GatewayConfig::default()
    };
    if let Some(port) = cli.port {
        config.service.port = port;
    }
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!("Starting Agent Gateway Service");
    info!("Configuration loaded from: {}", cli.config.display());
    info!("Service will listen on port: {}", config.service.port);

    let signer = build_signer(&config.identity.signer);
    let attester = Arc::new(ResponseAttester::new(signer));
    let gateway = Arc::new(Gateway::new(
        config.identity.gateway_id.clone(),
        gateway_types::AgentIdentity::new(
            config.identity.gateway_id.clone(),
            config.identity.gateway_id.clone(),
            "service-local",
        ),
        config.session_defaults.max_concurrent_sessions,
        config.session_defaults.tiers.clone(),
        attester,
        Arc::new(EchoTransport::new()),
        false,
    ));
    gateway.log_startup();

    if let Err(e) = gateway_service::start_service(gateway, config).await {
        error!("Service failed: {}", e);
        std::process::exit(1);
    }
}
