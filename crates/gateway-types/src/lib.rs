//! Data model for the agent gateway: identities, pricing tiers, payment
//! intents, session snapshots, attestations, and the tool marketplace. Wire
//! formats for the 402 payment protocol live in [`x402`]; the error
//! taxonomy lives in [`error`].

pub mod amount;
pub mod error;
pub mod x402;

pub use amount::BigAmount;
pub use error::{GatewayError, GatewayResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A durable, immutable-after-creation descriptor for an agent participating
/// in the gateway, either as a buyer calling tools or a seller publishing
/// them. The wallet key is opaque to the gateway: whatever string the
/// upstream wallet/auth system hands back, never a concrete chain-specific
/// key type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub display_name: String,
    pub wallet_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl AgentIdentity {
    pub fn new(
        agent_id: impl Into<String>,
        display_name: impl Into<String>,
        wallet_key: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            wallet_key: wallet_key.into(),
            created_at: Utc::now(),
            tags: Vec::new(),
        }
    }
}

/// Describes the settlement asset a tier or intent is denominated in,
/// independent of any particular chain's native representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenDescriptor {
    Native { network: String },
    CustomMint { network: String, mint: String },
    Stablecoin {
        network: String,
        contract: String,
        symbol: String,
    },
}

impl TokenDescriptor {
    pub fn network(&self) -> &str {
        match self {
            TokenDescriptor::Native { network } => network,
            TokenDescriptor::CustomMint { network, .. } => network,
            TokenDescriptor::Stablecoin { network, .. } => network,
        }
    }

    /// The asset id used in 402 `PaymentRequirements` (mint/contract address,
    /// or a reserved literal for the chain's native asset).
    pub fn asset_id(&self) -> String {
        match self {
            TokenDescriptor::Native { .. } => "native".to_string(),
            TokenDescriptor::CustomMint { mint, .. } => mint.clone(),
            TokenDescriptor::Stablecoin { contract, .. } => contract.clone(),
        }
    }
}

/// Sentinel for "no cap" on a per-session counter such as max calls.
pub const UNLIMITED: u64 = 0;

/// A named pricing tier in the gateway's tier catalog, looked up by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    pub tier_id: String,
    pub label: String,
    pub price_per_call: BigAmount,
    /// `0` means unlimited, per [`UNLIMITED`].
    pub max_calls_per_session: u64,
    pub rate_limit_per_second: u32,
    pub token: TokenDescriptor,
    pub includes_attestation: bool,
}

/// A buyer's request to open a metered session against a seller, bounding
/// the budget and lifetime the seller's gateway may meter against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub nonce: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub tier_id: String,
    pub max_budget: BigAmount,
    pub token: TokenDescriptor,
    pub buyer_signature: String,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

/// Lifecycle states a session moves through. See the session-snapshot type
/// for the point-in-time view exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Paused,
    Exhausted,
    Settled,
    Expired,
}

impl SessionStatus {
    /// Whether a call may be metered against a session in this status.
    pub fn accepts_calls(self) -> bool {
        matches!(self, SessionStatus::Active)
    }

    /// Whether this status is terminal; no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Settled | SessionStatus::Expired | SessionStatus::Exhausted
        )
    }
}

/// An immutable, deep-copied view of session state at a point in time.
/// Returned by session queries so callers can't mutate live ledger state
/// through a shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub buyer: AgentIdentity,
    pub seller_id: String,
    pub tier_id: String,
    pub intent_nonce: String,
    pub budget_total: BigAmount,
    pub budget_remaining: BigAmount,
    pub calls_made: u64,
    /// `None` means unlimited.
    pub calls_remaining: Option<u64>,
    pub per_method: HashMap<String, u64>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl SessionSnapshot {
    /// Fraction of `budget_total` still remaining, in `[0.0, 1.0]`.
    pub fn remaining_fraction(&self) -> f64 {
        self.budget_remaining.fraction_of(&self.budget_total)
    }
}

/// A cryptographic attestation binding a call's request/response to the
/// gateway's signing key, per the canonical-JSON + SHA-256 pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub session_id: String,
    pub method: String,
    pub request_hash: String,
    pub response_hash: String,
    /// Upstream slot/anchor; zero if absent.
    pub slot: u64,
    pub attester_id: String,
    /// Base64-encoded signature bytes.
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

/// A tool result wrapped with its latency, sequential call index, and an
/// optional attestation (absent when attestation policy doesn't apply or
/// the signer failed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestedResult<T> {
    pub result: T,
    pub attestation: Option<Attestation>,
    pub latency_ms: u64,
    pub call_index: u64,
}

/// A seller's published listing for a single callable method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolListing {
    pub method: String,
    pub description: String,
    pub seller: AgentIdentity,
    pub available_tiers: Vec<String>,
    /// The price of the cheapest available tier; marketplace search sorts
    /// on this rather than re-resolving the tier catalog per query.
    pub cheapest_price: BigAmount,
    pub avg_latency_ms: f64,
    pub uptime_percentage: f64,
    pub total_served: u64,
    pub reputation_score: u32,
    pub attestation_available: bool,
    pub region: Option<String>,
    pub commitments: Vec<String>,
    pub listed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named group of listings a seller offers as a single discoverable unit,
/// with tier overrides applying to any method in the bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBundle {
    pub bundle_id: String,
    pub name: String,
    pub description: String,
    pub methods: Vec<String>,
    pub seller_id: String,
    pub tier_overrides: Vec<PricingTier>,
}

/// Rolling reputation inputs the marketplace scores a seller's listings by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationSample {
    pub total_attestations: u64,
    pub verified_attestations: u64,
    pub total_calls: u64,
    pub avg_latency_ms: f64,
    pub last_updated: DateTime<Utc>,
}

impl ReputationSample {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_attestations: 0,
            verified_attestations: 0,
            total_calls: 0,
            avg_latency_ms: 0.0,
            last_updated: now,
        }
    }

    pub fn verified_rate(&self) -> f64 {
        if self.total_attestations == 0 {
            return 0.0;
        }
        self.verified_attestations as f64 / self.total_attestations as f64
    }

    fn volume_score(&self) -> f64 {
        ((self.total_calls as f64 + 1.0).log10() / 6.0).min(1.0)
    }

    fn latency_score(&self) -> f64 {
        (1.0 - self.avg_latency_ms / 2000.0).max(0.0)
    }

    /// Composite reputation score in `[0, 1000]`.
    pub fn score(&self) -> u32 {
        let raw =
            self.verified_rate() * 400.0 + self.volume_score() * 300.0 + self.latency_score() * 300.0;
        raw.round() as u32
    }
}

/// The closed set of events the gateway emits on its internal event bus, per
/// the event catalog. Subscribers match either a specific session id or the
/// wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionCreated,
    SessionActivated,
    SessionPaused,
    SessionExhausted,
    SessionSettled,
    SessionExpired,
    CallBefore,
    CallAfter,
    CallError,
    CallAttested,
    PaymentIntent,
    PaymentSettled,
    RatelimitExceeded,
    BudgetWarning,
    BudgetExhausted,
    X402PaymentRequired,
    X402PaymentVerified,
    X402PaymentSettled,
    X402PaymentSent,
}

/// An event published on the gateway's internal bus. `session_id` may be
/// empty for events not tied to any particular session (e.g. x402-only
/// per-call billing with no open session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType, session_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Settlement kind recorded on a [`Receipt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Onchain,
    OffchainEscrow,
}

/// Final settlement record for a session, returned from `settleSession`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub session_id: String,
    pub intent_nonce: String,
    pub amount_charged: BigAmount,
    pub call_count: u64,
    pub tx_reference: Option<String>,
    pub settlement_kind: SettlementKind,
    pub settled_at: DateTime<Utc>,
}

/// Convenience alias for the map a marketplace keeps of method name to the
/// sellers offering it.
pub type ListingsByMethod = HashMap<String, HashMap<String, ToolListing>>;
