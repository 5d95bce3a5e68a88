//! Canonical JSON hashing and the response attester: wraps a raw call result
//! with latency, a per-session call index, and — when policy calls for it —
//! a signed attestation binding the call to its request/response hashes.

use std::sync::Arc;

use gateway_types::{Attestation, AttestedResult, Event, EventType, GatewayError};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::transport::Signer;

/// Serializes `value` to its canonical JSON form: keys sorted
/// lexicographically at every nesting level, no insignificant whitespace.
/// `serde_json::Value`'s map type is a `BTreeMap` by default (no
/// `preserve_order` feature enabled anywhere in this workspace), so ordinary
/// serialization already yields sorted keys; this function exists as the
/// single named seam other modules call through, so that invariant stays
/// documented and easy to audit.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, GatewayError> {
    serde_json::to_string(value).map_err(|e| GatewayError::AttestationFailed(format!("canonicalization failed: {e}")))
}

/// Hex-encoded SHA-256 digest of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Produces attestations when policy requires; otherwise a pass-through
/// wrapper.
pub struct ResponseAttester {
    signer: Option<Arc<dyn Signer>>,
}

impl ResponseAttester {
    pub fn new(signer: Option<Arc<dyn Signer>>) -> Self {
        Self { signer }
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    /// Wrap a call's result with latency/call-index metadata and, when
    /// `should_attest` is true and a signer is configured, a signed
    /// attestation. Signer failure does not fail the call: the result is
    /// still returned, without an attestation, and the caller is expected to
    /// emit a `call:error`-adjacent warning event from the returned flag.
    pub async fn wrap_result(
        &self,
        result: Value,
        session_id: &str,
        method: &str,
        params: &Value,
        slot: u64,
        latency_ms: u64,
        call_index: u64,
        should_attest: bool,
    ) -> (AttestedResult<Value>, Option<Event>) {
        if !should_attest || self.signer.is_none() {
            return (
                AttestedResult {
                    result,
                    attestation: None,
                    latency_ms,
                    call_index,
                },
                None,
            );
        }

        let signer = self.signer.as_ref().expect("checked above");
        match self
            .build_attestation(signer.as_ref(), session_id, method, params, &result, slot)
            .await
        {
            Ok(attestation) => (
                AttestedResult {
                    result,
                    attestation: Some(attestation),
                    latency_ms,
                    call_index,
                },
                None,
            ),
            Err(e) => {
                warn!(session_id, method, error = %e, "attestation signer failed");
                let event = Event::new(
                    EventType::CallError,
                    session_id,
                    serde_json::json!({ "phase": "attestation", "reason": e.to_string() }),
                );
                (
                    AttestedResult {
                        result,
                        attestation: None,
                        latency_ms,
                        call_index,
                    },
                    Some(event),
                )
            }
        }
    }

    async fn build_attestation(
        &self,
        signer: &dyn Signer,
        session_id: &str,
        method: &str,
        params: &Value,
        result: &Value,
        slot: u64,
    ) -> Result<Attestation, GatewayError> {
        let request_hash = sha256_hex(canonical_json(params)?.as_bytes());
        let response_hash = sha256_hex(canonical_json(result)?.as_bytes());
        let message = format!("{method}{request_hash}{response_hash}{slot}");
        let signature_bytes = signer.sign(message.as_bytes()).await?;
        let signature = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature_bytes);

        Ok(Attestation {
            session_id: session_id.to_string(),
            method: method.to_string(),
            request_hash,
            response_hash,
            slot,
            attester_id: signer.signer_id().to_string(),
            signature,
            timestamp: chrono::Utc::now(),
        })
    }
}
