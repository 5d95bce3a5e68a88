//! Session state machine: pre-call admission gate, post-call commit, pause/
//! resume, settlement, and snapshotting. All mutating operations on a single
//! session are serialized through one `std::sync::Mutex` that is never held
//! across an `.await` — the budget check-and-reserve happens synchronously
//! in [`Session::pre_call`], the upstream call runs lock-free, and either
//! [`Session::post_call`] (success) or [`Session::refund`] (failure) closes
//! it out. This is the reserve/commit discipline called for in the
//! concurrency model: `preCall` deducts `cost` from `budgetRemaining`
//! immediately so two concurrent callers can never both pass the budget
//! check for money that only exists once; `postCall` only updates counters
//! that must exclusively follow a successful upstream call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use gateway_types::{
    AgentIdentity, BigAmount, Event, EventType, GatewayError, PricingTier, SessionSnapshot,
    SessionStatus,
};
use serde_json::Value;

use crate::events::EventBus;

const RATE_WINDOW_MS: i64 = 1000;
const BUDGET_WARNING_THRESHOLD: f64 = 0.20;

struct SessionInner {
    status: SessionStatus,
    budget_remaining: BigAmount,
    calls_made: u64,
    calls_remaining: Option<u64>,
    per_method: HashMap<String, u64>,
    metadata: HashMap<String, Value>,
    last_activity: DateTime<Utc>,
    rate_window: VecDeque<DateTime<Utc>>,
}

/// A live, lock-protected session. Cheap to clone (wraps `Arc` internals)
/// and safe to share across tasks.
pub struct Session {
    pub session_id: String,
    pub buyer: AgentIdentity,
    pub seller_id: String,
    pub tier: PricingTier,
    pub intent_nonce: String,
    pub budget_total: BigAmount,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    inner: Mutex<SessionInner>,
    bus: Arc<EventBus>,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        buyer: AgentIdentity,
        seller_id: impl Into<String>,
        tier: PricingTier,
        intent_nonce: impl Into<String>,
        ttl_seconds: u64,
        bus: Arc<EventBus>,
    ) -> Self {
        let now = Utc::now();
        let session_id = session_id.into();
        let calls_remaining = if tier.max_calls_per_session == gateway_types::UNLIMITED {
            None
        } else {
            Some(tier.max_calls_per_session)
        };
        let session = Self {
            session_id: session_id.clone(),
            buyer,
            seller_id: seller_id.into(),
            tier,
            intent_nonce: intent_nonce.into(),
            budget_total: BigAmount::zero(),
            created_at: now,
            ttl_seconds,
            inner: Mutex::new(SessionInner {
                status: SessionStatus::Pending,
                budget_remaining: BigAmount::zero(),
                calls_made: 0,
                calls_remaining,
                per_method: HashMap::new(),
                metadata: HashMap::new(),
                last_activity: now,
                rate_window: VecDeque::new(),
            }),
            bus,
        };
        session.emit(EventType::SessionCreated, serde_json::json!({}));
        session
    }

    /// Set the session's total budget. Called once, immediately after
    /// construction, with the buyer's validated intent amount.
    pub fn with_budget(mut self, budget_total: BigAmount) -> Self {
        self.budget_total = budget_total.clone();
        self.inner.get_mut().expect("lock poisoned").budget_remaining = budget_total;
        self
    }

    fn emit(&self, event_type: EventType, payload: Value) {
        self.bus
            .publish(Event::new(event_type, self.session_id.clone(), payload));
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().expect("session lock poisoned").status
    }

    /// `pending` -> `active`.
    pub fn activate(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if inner.status != SessionStatus::Pending {
            return Err(GatewayError::InvalidState {
                session_id: self.session_id.clone(),
                status: inner.status,
            });
        }
        inner.status = SessionStatus::Active;
        drop(inner);
        self.emit(EventType::SessionActivated, serde_json::json!({}));
        Ok(())
    }

    pub fn pause(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if inner.status != SessionStatus::Active {
            return Err(GatewayError::InvalidState {
                session_id: self.session_id.clone(),
                status: inner.status,
            });
        }
        inner.status = SessionStatus::Paused;
        drop(inner);
        self.emit(EventType::SessionPaused, serde_json::json!({}));
        Ok(())
    }

    pub fn resume(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if inner.status != SessionStatus::Paused {
            return Err(GatewayError::InvalidState {
                session_id: self.session_id.clone(),
                status: inner.status,
            });
        }
        inner.status = SessionStatus::Active;
        Ok(())
    }

    /// The pre-call admission gate. Order matters: the first failing check
    /// wins. On success the tier's price has already been reserved
    /// (subtracted) from `budgetRemaining`; callers MUST either follow up
    /// with [`Session::post_call`] on upstream success or
    /// [`Session::refund`] on upstream failure.
    pub fn pre_call(&self, now: DateTime<Utc>) -> Result<BigAmount, GatewayError> {
        let mut inner = self.inner.lock().expect("session lock poisoned");

        if inner.status != SessionStatus::Active {
            return Err(GatewayError::InvalidState {
                session_id: self.session_id.clone(),
                status: inner.status,
            });
        }

        if self.ttl_seconds > 0 {
            let age = (now - self.created_at).num_seconds().max(0) as u64;
            if age >= self.ttl_seconds {
                inner.status = SessionStatus::Expired;
                drop(inner);
                self.emit(EventType::SessionExpired, serde_json::json!({}));
                return Err(GatewayError::SessionExpired {
                    session_id: self.session_id.clone(),
                });
            }
        }

        let window_start = now - chrono::Duration::milliseconds(RATE_WINDOW_MS);
        while matches!(inner.rate_window.front(), Some(ts) if *ts < window_start) {
            inner.rate_window.pop_front();
        }
        let limit = self.tier.rate_limit_per_second as usize;
        if limit > 0 && inner.rate_window.len() >= limit {
            let oldest = *inner.rate_window.front().expect("len checked above");
            let elapsed_ms = (now - oldest).num_milliseconds().max(0);
            let retry_after_ms = (RATE_WINDOW_MS - elapsed_ms).max(0) as u64;
            drop(inner);
            self.emit(
                EventType::RatelimitExceeded,
                serde_json::json!({ "retryAfterMs": retry_after_ms }),
            );
            return Err(GatewayError::RateLimitExceeded {
                session_id: self.session_id.clone(),
                retry_after_ms,
            });
        }

        if let Some(remaining) = inner.calls_remaining {
            if remaining == 0 {
                inner.status = SessionStatus::Exhausted;
                drop(inner);
                self.emit(EventType::SessionExhausted, serde_json::json!({}));
                return Err(GatewayError::CallLimitExceeded {
                    session_id: self.session_id.clone(),
                });
            }
        }

        let cost = self.tier.price_per_call.clone();
        if inner.budget_remaining < cost {
            inner.status = SessionStatus::Exhausted;
            drop(inner);
            self.emit(EventType::BudgetExhausted, serde_json::json!({}));
            return Err(GatewayError::BudgetExhausted {
                session_id: self.session_id.clone(),
            });
        }

        inner.budget_remaining = inner.budget_remaining.saturating_sub(&cost);
        Ok(cost)
    }

    /// Commits the bookkeeping that must only follow a successful upstream
    /// call: call counters, per-method tally, rate-limiter window, and
    /// last-activity timestamp. Budget was already deducted in
    /// [`Session::pre_call`]; whether that reservation exhausted the budget
    /// (or merely ran it low) is only decided here, since a failed call is
    /// refunded before this ever runs.
    pub fn post_call(&self, method: &str, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.calls_made += 1;
        if let Some(remaining) = inner.calls_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        *inner.per_method.entry(method.to_string()).or_insert(0) += 1;
        inner.last_activity = now;
        inner.rate_window.push_back(now);

        if inner.budget_remaining.is_zero() {
            inner.status = SessionStatus::Exhausted;
            drop(inner);
            self.emit(EventType::BudgetExhausted, serde_json::json!({}));
            return;
        }

        let fraction = inner.budget_remaining.fraction_of(&self.budget_total);
        let should_warn = fraction > 0.0 && fraction <= BUDGET_WARNING_THRESHOLD;
        drop(inner);
        if should_warn {
            self.emit(
                EventType::BudgetWarning,
                serde_json::json!({ "remainingFraction": fraction }),
            );
        }
    }

    /// Reverses a reservation made by [`Session::pre_call`] when the
    /// upstream call failed. If the reservation had driven the session to
    /// `exhausted` purely on the strength of that money, restores it to
    /// `active` now that the budget is whole again.
    pub fn refund(&self, cost: &BigAmount) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.budget_remaining = inner.budget_remaining.checked_add(cost);
        if inner.status == SessionStatus::Exhausted && !inner.budget_remaining.is_zero() {
            inner.status = SessionStatus::Active;
        }
    }

    /// `amountCharged = budgetTotal - budgetRemaining`; transitions to
    /// `settled`.
    pub fn settle(&self) -> BigAmount {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        let amount_charged = self.budget_total.saturating_sub(&inner.budget_remaining);
        inner.status = SessionStatus::Settled;
        drop(inner);
        self.emit(
            EventType::SessionSettled,
            serde_json::json!({ "amountCharged": amount_charged.to_string() }),
        );
        amount_charged
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().expect("session lock poisoned");
        SessionSnapshot {
            session_id: self.session_id.clone(),
            status: inner.status,
            buyer: self.buyer.clone(),
            seller_id: self.seller_id.clone(),
            tier_id: self.tier.tier_id.clone(),
            intent_nonce: self.intent_nonce.clone(),
            budget_total: self.budget_total.clone(),
            budget_remaining: inner.budget_remaining.clone(),
            calls_made: inner.calls_made,
            calls_remaining: inner.calls_remaining,
            per_method: inner.per_method.clone(),
            metadata: inner.metadata.clone(),
            created_at: self.created_at,
            last_activity: inner.last_activity,
            ttl_seconds: self.ttl_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::TokenDescriptor;

    fn tier(price: u64, rate_limit: u32, max_calls: u64) -> PricingTier {
        PricingTier {
            tier_id: "standard".to_string(),
            label: "Standard".to_string(),
            price_per_call: BigAmount::from(price),
            max_calls_per_session: max_calls,
            rate_limit_per_second: rate_limit,
            token: TokenDescriptor::Native {
                network: "solana:devnet".to_string(),
            },
            includes_attestation: false,
        }
    }

    fn new_session(budget: u64, price: u64, rate_limit: u32, max_calls: u64, ttl: u64) -> Session {
        let bus = Arc::new(EventBus::new());
        Session::new(
            "s1",
            AgentIdentity::new("buyer1", "Buyer", "0xabc"),
            "seller1",
            tier(price, rate_limit, max_calls),
            "nonce1",
            ttl,
            bus,
        )
        .with_budget(BigAmount::from(budget))
    }

    #[test]
    fn pre_call_rejects_non_active_session() {
        let session = new_session(1000, 100, 10, 0, 3600);
        let err = session.pre_call(Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn pre_call_reserves_cost_and_post_call_commits_counters() {
        let session = new_session(1000, 100, 10, 0, 3600);
        session.activate().unwrap();
        let now = Utc::now();
        let cost = session.pre_call(now).unwrap();
        assert_eq!(cost, BigAmount::from(100u64));
        assert_eq!(session.snapshot().budget_remaining, BigAmount::from(900u64));
        session.post_call("m1", now);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.calls_made, 1);
        assert_eq!(snapshot.per_method.get("m1"), Some(&1));
    }

    #[test]
    fn refund_restores_budget_after_transport_failure() {
        let session = new_session(100, 100, 10, 0, 3600);
        session.activate().unwrap();
        let now = Utc::now();
        let cost = session.pre_call(now).unwrap();
        // The reservation emptied the budget, but exhaustion is only decided
        // in `post_call`, which never runs for a failed upstream call - the
        // session must not have flipped to `exhausted` on the strength of a
        // call that hasn't completed.
        assert_eq!(session.status(), SessionStatus::Active);
        session.refund(&cost);
        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.snapshot().budget_remaining, BigAmount::from(100u64));
    }

    #[test]
    fn budget_exhaustion_transitions_session_terminal() {
        let session = new_session(100, 100, 10, 0, 3600);
        session.activate().unwrap();
        let now = Utc::now();
        session.pre_call(now).unwrap();
        session.post_call("m1", now);
        assert_eq!(session.status(), SessionStatus::Exhausted);
        let err = session.pre_call(Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn call_limit_exhaustion() {
        let session = new_session(10_000, 10, 100, 1, 3600);
        session.activate().unwrap();
        let now = Utc::now();
        session.pre_call(now).unwrap();
        session.post_call("m1", now);
        let err = session.pre_call(now).unwrap_err();
        assert_eq!(err.code(), "CALL_LIMIT_EXCEEDED");
    }

    #[test]
    fn rate_limit_exceeded_carries_retry_after() {
        let session = new_session(10_000, 10, 1, 0, 3600);
        session.activate().unwrap();
        let now = Utc::now();
        session.pre_call(now).unwrap();
        session.post_call("m1", now);
        let err = session.pre_call(now).unwrap_err();
        match err {
            GatewayError::RateLimitExceeded { retry_after_ms, .. } => {
                assert!(retry_after_ms <= 1000);
            }
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    #[test]
    fn ttl_expiry_transitions_to_expired() {
        let session = new_session(10_000, 10, 10, 0, 1);
        session.activate().unwrap();
        let future = Utc::now() + chrono::Duration::seconds(10);
        let err = session.pre_call(future).unwrap_err();
        assert_eq!(err.code(), "SESSION_EXPIRED");
        assert_eq!(session.status(), SessionStatus::Expired);
    }

    #[test]
    fn settle_computes_amount_charged() {
        let session = new_session(1000, 100, 10, 0, 3600);
        session.activate().unwrap();
        let now = Utc::now();
        session.pre_call(now).unwrap();
        session.post_call("m1", now);
        let charged = session.settle();
        assert_eq!(charged, BigAmount::from(100u64));
        assert_eq!(session.status(), SessionStatus::Settled);
    }

    #[test]
    fn pause_resume_round_trip() {
        let session = new_session(1000, 100, 10, 0, 3600);
        session.activate().unwrap();
        session.pause().unwrap();
        assert_eq!(session.status(), SessionStatus::Paused);
        session.resume().unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
    }
}
