//! Layered configuration for the agent gateway: defaults, a TOML file, and
//! environment overrides, merged the way [`config`] merges its sources, then
//! validated before a [`GatewayService`](gateway_core) is built from it.

use std::path::{Path, PathBuf};

use gateway_types::PricingTier;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config file '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// How the gateway's attestation signer obtains its key material. Mirrors
/// the tagged-enum pattern used for signer configuration elsewhere in this
/// codebase; only `File` and `Env` are implemented, `Kms` is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignerConfig {
    File { key_path: PathBuf },
    Env { var_name: String },
    Kms { key_id: String, region: String },
}

impl Default for SignerConfig {
    fn default() -> Self {
        SignerConfig::Env {
            var_name: "GATEWAY_SIGNING_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub gateway_id: String,
    pub signer: SignerConfig,
}

fn default_gateway_id() -> String {
    "gateway-local".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            gateway_id: default_gateway_id(),
            signer: SignerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDefaultsConfig {
    pub default_ttl_seconds: u64,
    pub default_max_calls_per_second: u32,
    pub max_concurrent_sessions: usize,
    pub tiers: Vec<PricingTier>,
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_max_calls_per_second() -> u32 {
    20
}

fn default_max_concurrent_sessions() -> usize {
    10_000
}

fn default_tiers() -> Vec<PricingTier> {
    use gateway_types::{BigAmount, TokenDescriptor};

    vec![
        PricingTier {
            tier_id: "standard".to_string(),
            label: "Standard".to_string(),
            price_per_call: BigAmount::from(100u64),
            max_calls_per_session: gateway_types::UNLIMITED,
            rate_limit_per_second: 20,
            token: TokenDescriptor::Native {
                network: default_network(),
            },
            includes_attestation: false,
        },
        PricingTier {
            tier_id: "premium".to_string(),
            label: "Premium".to_string(),
            price_per_call: BigAmount::from(500u64),
            max_calls_per_session: gateway_types::UNLIMITED,
            rate_limit_per_second: 50,
            token: TokenDescriptor::Native {
                network: default_network(),
            },
            includes_attestation: true,
        },
    ]
}

impl Default for SessionDefaultsConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl_seconds(),
            default_max_calls_per_second: default_max_calls_per_second(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            tiers: default_tiers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct X402DefaultsConfig {
    pub facilitator_url: String,
    pub default_network: String,
    pub default_asset: String,
    pub max_timeout_seconds: u64,
    pub max_retries: u32,
}

fn default_facilitator_url() -> String {
    "http://localhost:4020".to_string()
}

fn default_network() -> String {
    "solana:devnet".to_string()
}

fn default_asset() -> String {
    "USDC-devnet".to_string()
}

fn default_max_timeout_seconds() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    1
}

impl Default for X402DefaultsConfig {
    fn default() -> Self {
        Self {
            facilitator_url: default_facilitator_url(),
            default_network: default_network(),
            default_asset: default_asset(),
            max_timeout_seconds: default_max_timeout_seconds(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Top-level configuration aggregate, assembled from defaults, an optional
/// TOML file, and `GATEWAY_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    pub identity: IdentityConfig,
    pub session_defaults: SessionDefaultsConfig,
    pub x402_defaults: X402DefaultsConfig,
    pub logging: LoggingConfig,
    pub service: ServiceConfig,
}

impl GatewayConfig {
    /// Load configuration from an explicit file path, layering in
    /// `GATEWAY_*` environment overrides (double underscore separates
    /// nested keys, e.g. `GATEWAY_SERVICE__PORT=9090`).
    pub fn load_from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("GATEWAY").separator("__"));
        let settings = builder.build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `GATEWAY_CONFIG_PATH` if set, falling back to built-in
    /// defaults overlaid with environment variables only.
    pub fn load() -> ConfigResult<Self> {
        if let Ok(path) = std::env::var("GATEWAY_CONFIG_PATH") {
            return Self::load_from_path(path);
        }
        let builder = config::Config::builder()
            .add_source(config::Environment::with_prefix("GATEWAY").separator("__"));
        let settings = builder.build()?;
        let config: Self = settings.try_deserialize().unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.identity.gateway_id.trim().is_empty() {
            return Err(ConfigError::Invalid("identity.gateway_id must not be empty".into()));
        }
        if self.session_defaults.default_ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "session_defaults.default_ttl_seconds must be greater than zero".into(),
            ));
        }
        if self.session_defaults.max_concurrent_sessions == 0 {
            return Err(ConfigError::Invalid(
                "session_defaults.max_concurrent_sessions must be greater than zero".into(),
            ));
        }
        if self.session_defaults.tiers.is_empty() {
            return Err(ConfigError::Invalid(
                "session_defaults.tiers must contain at least one tier".into(),
            ));
        }
        if self.x402_defaults.facilitator_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "x402_defaults.facilitator_url must not be empty".into(),
            ));
        }
        if self.service.port == 0 {
            return Err(ConfigError::Invalid("service.port must be nonzero".into()));
        }
        Ok(())
    }

    pub fn tier(&self, tier_id: &str) -> Option<&PricingTier> {
        self.session_defaults
            .tiers
            .iter()
            .find(|t| t.tier_id == tier_id)
    }

    pub fn effective_log_level(&self) -> &str {
        &self.logging.level
    }
}

/// Fluent builder over [`GatewayConfig`], mirroring the `with_*` pattern used
/// for the bundler's configuration builder. `.build()` validates before
/// returning.
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gateway_id(mut self, id: impl Into<String>) -> Self {
        self.config.identity.gateway_id = id.into();
        self
    }

    pub fn with_signer(mut self, signer: SignerConfig) -> Self {
        self.config.identity.signer = signer;
        self
    }

    pub fn with_session_defaults(mut self, session_defaults: SessionDefaultsConfig) -> Self {
        self.config.session_defaults = session_defaults;
        self
    }

    pub fn with_x402_defaults(mut self, x402_defaults: X402DefaultsConfig) -> Self {
        self.config.x402_defaults = x402_defaults;
        self
    }

    pub fn with_service(mut self, service: ServiceConfig) -> Self {
        self.config.service = service;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    pub fn build(self) -> ConfigResult<GatewayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
