use thiserror::Error;

use crate::SessionStatus;

/// Gateway-specific errors, grouped along the taxonomy in the design's error
/// handling section. Every variant carries a stable code via [`GatewayError::code`]
/// and, where relevant, the offending session id or a retry-after duration —
/// never a stack trace.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    // --- Intent validation ---
    #[error("payment intent targets seller '{expected}', gateway is '{actual}'")]
    WrongSeller { expected: String, actual: String },

    #[error("payment intent max budget must be greater than zero")]
    NonPositiveBudget,

    #[error("payment intent ttl must be greater than zero")]
    NonPositiveTtl,

    #[error("payment intent expired: age exceeds ttl")]
    IntentExpired,

    #[error("unknown pricing tier '{0}'")]
    UnknownTier(String),

    #[error("custom intent verifier rejected the intent: {0}")]
    CustomVerifierRejected(String),

    // --- Capacity ---
    #[error("maximum concurrent sessions ({limit}) reached")]
    CapacityExceeded { limit: usize },

    // --- Session state ---
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("invalid operation for session '{session_id}' in status {status:?}")]
    InvalidState {
        session_id: String,
        status: SessionStatus,
    },

    // --- Metering ---
    #[error("session '{session_id}' budget exhausted")]
    BudgetExhausted { session_id: String },

    #[error("session '{session_id}' rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimitExceeded {
        session_id: String,
        retry_after_ms: u64,
    },

    #[error("session '{session_id}' call limit exceeded")]
    CallLimitExceeded { session_id: String },

    #[error("session '{session_id}' expired")]
    SessionExpired { session_id: String },

    // --- Attestation ---
    #[error("attestation signer failed: {0}")]
    AttestationFailed(String),

    // --- Transport ---
    #[error("upstream transport error: {0}")]
    Transport(String),

    // --- 402 paywall / client ---
    #[error("facilitator error: {0}")]
    Facilitator(String),

    #[error("malformed payment header: {0}")]
    MalformedPayment(String),

    #[error("no acceptable payment requirements found")]
    NoAcceptablePayment,

    #[error("payment signing failed: {0}")]
    Signing(String),

    #[error("payment retry failed with status {status}: {body}")]
    RetryError { status: u16, body: String },

    // --- Configuration ---
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Stable machine-readable code, independent of the `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::WrongSeller { .. } => "WRONG_SELLER",
            GatewayError::NonPositiveBudget => "NON_POSITIVE_BUDGET",
            GatewayError::NonPositiveTtl => "NON_POSITIVE_TTL",
            GatewayError::IntentExpired => "INTENT_EXPIRED",
            GatewayError::UnknownTier(_) => "UNKNOWN_TIER",
            GatewayError::CustomVerifierRejected(_) => "CUSTOM_VERIFIER_REJECTED",
            GatewayError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            GatewayError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            GatewayError::InvalidState { .. } => "INVALID_STATE",
            GatewayError::BudgetExhausted { .. } => "BUDGET_EXHAUSTED",
            GatewayError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::CallLimitExceeded { .. } => "CALL_LIMIT_EXCEEDED",
            GatewayError::SessionExpired { .. } => "SESSION_EXPIRED",
            GatewayError::AttestationFailed(_) => "ATTESTATION_FAILED",
            GatewayError::Transport(_) => "TRANSPORT_ERROR",
            GatewayError::Facilitator(_) => "FACILITATOR_ERROR",
            GatewayError::MalformedPayment(_) => "MALFORMED_PAYMENT",
            GatewayError::NoAcceptablePayment => "NO_ACCEPTABLE_PAYMENT",
            GatewayError::Signing(_) => "SIGNING_ERROR",
            GatewayError::RetryError { .. } => "RETRY_ERROR",
            GatewayError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// The session this error concerns, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            GatewayError::SessionNotFound(id) => Some(id),
            GatewayError::InvalidState { session_id, .. } => Some(session_id),
            GatewayError::BudgetExhausted { session_id } => Some(session_id),
            GatewayError::RateLimitExceeded { session_id, .. } => Some(session_id),
            GatewayError::CallLimitExceeded { session_id } => Some(session_id),
            GatewayError::SessionExpired { session_id } => Some(session_id),
            _ => None,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
