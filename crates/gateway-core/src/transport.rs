//! External interfaces the gateway consumes but does not implement: the
//! upstream RPC transport and the attestation signer. Both are `async_trait`
//! objects so callers can swap in a Solana RPC client, an HTTP proxy, an HSM
//! signer, or a test double without touching the orchestrator.

use async_trait::async_trait;
use serde_json::Value;

use gateway_types::GatewayError;

/// A single-operation contract to an upstream tool/RPC endpoint. On failure
/// it raises [`GatewayError::Transport`]; no further assumptions are made
/// about retries, pooling, or connection reuse — that's the implementor's
/// concern.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, method: &str, params: &Value) -> Result<Value, GatewayError>;
}

/// A single-operation signing contract used by the attester and the 402
/// payment client. May suspend (network HSM, remote KMS).
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, GatewayError>;

    /// A stable identifier for this signer, attached to attestations.
    fn signer_id(&self) -> &str;
}

/// A transport stub that always fails; useful as a default when no upstream
/// has been wired in yet (tests, CLI dry-runs).
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn request(&self, method: &str, _params: &Value) -> Result<Value, GatewayError> {
        Err(GatewayError::Transport(format!(
            "no transport configured for method '{method}'"
        )))
    }
}

/// An in-memory transport that echoes back canned responses keyed by method
/// name, for tests and demos.
pub struct EchoTransport {
    pub responses: std::collections::HashMap<String, Value>,
}

impl EchoTransport {
    pub fn new() -> Self {
        Self {
            responses: std::collections::HashMap::new(),
        }
    }

    pub fn with_response(mut self, method: impl Into<String>, value: Value) -> Self {
        self.responses.insert(method.into(), value);
        self
    }
}

impl Default for EchoTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for EchoTransport {
    async fn request(&self, method: &str, params: &Value) -> Result<Value, GatewayError> {
        match self.responses.get(method) {
            Some(value) => Ok(value.clone()),
            None => Ok(params.clone()),
        }
    }
}
