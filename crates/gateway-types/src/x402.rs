//! Wire types for the HTTP 402 payment protocol (x402, protocol version 2).
//!
//! Every header value on this protocol is `base64(utf8(json))` of the
//! canonical struct below; [`encode_header`]/[`decode_header`] are the only
//! place that encoding should happen so header handling stays consistent
//! between the paywall and the payment client.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::GatewayError;

pub const X402_VERSION: u32 = 2;

pub const HEADER_PAYMENT_REQUIRED: &str = "PAYMENT-REQUIRED";
pub const HEADER_PAYMENT_SIGNATURE: &str = "PAYMENT-SIGNATURE";
pub const HEADER_PAYMENT_RESPONSE: &str = "PAYMENT-RESPONSE";

/// A resource descriptor identifying what's being paid for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub url: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// One accepted way to pay for a resource: a (scheme, network, asset) triple
/// plus amount and settlement destination. `network` is a CAIP-2 id
/// (`namespace:reference`, e.g. `solana:mainnet` or `eip155:8453`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    pub asset: String,
    pub amount: String,
    #[serde(rename = "payTo")]
    pub pay_to: String,
    #[serde(rename = "maxTimeoutSeconds")]
    pub max_timeout_seconds: u64,
    #[serde(default)]
    pub extra: Value,
}

impl PaymentRequirements {
    /// Whether this requirement matches the given `(scheme, network, asset)`.
    pub fn matches(&self, scheme: &str, network: &str, asset: &str) -> bool {
        self.scheme == scheme && self.network == network && self.asset == asset
    }
}

/// The `PAYMENT-REQUIRED` challenge body: one or more acceptable ways to pay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequired {
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub resource: ResourceDescriptor,
    pub accepts: Vec<PaymentRequirements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl PaymentRequired {
    pub fn new(resource: ResourceDescriptor, accepts: Vec<PaymentRequirements>) -> Self {
        Self {
            x402_version: X402_VERSION,
            error: None,
            resource,
            accepts,
            extensions: None,
        }
    }
}

/// The `PAYMENT-SIGNATURE` body a buyer submits: the requirement they're
/// satisfying plus a scheme-specific signed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPayload {
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceDescriptor>,
    pub accepted: PaymentRequirements,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

/// The `PAYMENT-RESPONSE` body a seller returns after a successful settle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementResponse {
    pub success: bool,
    pub transaction: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// One entry of a facilitator's `/supported` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedKind {
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedKinds {
    pub kinds: Vec<SupportedKind>,
}

/// Request body for facilitator `/verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub payload: PaymentPayload,
    pub requirements: PaymentRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request body for facilitator `/settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleRequest {
    pub payload: PaymentPayload,
    pub requirements: PaymentRequirements,
}

/// Encode a header value as `base64(utf8(json(value)))`.
pub fn encode_header<T: Serialize>(value: &T) -> Result<String, GatewayError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| GatewayError::MalformedPayment(format!("encode failed: {e}")))?;
    Ok(STANDARD.encode(json))
}

/// Decode a header value produced by [`encode_header`].
pub fn decode_header<T: DeserializeOwned>(raw: &str) -> Result<T, GatewayError> {
    let json = STANDARD
        .decode(raw.trim())
        .map_err(|e| GatewayError::MalformedPayment(format!("invalid base64: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| GatewayError::MalformedPayment(format!("invalid json: {e}")))
}
