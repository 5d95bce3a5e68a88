//! The gateway orchestrator: session lifecycle, the `execute` pipeline, 402
//! integration, and gateway-wide metrics. Composes every other module the
//! way the bundler's top-level service composes its RPC client, fee
//! manager, signing manager, and simulator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use gateway_types::x402::{PaymentRequirements, SettlementResponse};
use gateway_types::{
    AgentIdentity, BigAmount, Event, EventType, GatewayError, PaymentIntent, PricingTier, Receipt,
    SessionSnapshot, SettlementKind, ToolBundle, ToolListing,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::attester::ResponseAttester;
use crate::events::{EventBus, Handler, SubscriptionId};
use crate::marketplace::Marketplace;
use crate::paywall::{Paywall, PaywallOutcome};
use crate::pricing::PricingEngine;
use crate::session::Session;
use crate::transport::Transport;

/// Options overriding an intent's defaults when opening a session.
#[derive(Default)]
pub struct OpenSessionOptions {
    pub tier_override: Option<String>,
    pub ttl_override: Option<u64>,
    /// Returning `Some(reason)` rejects the intent with that reason.
    pub custom_verifier: Option<Box<dyn Fn(&PaymentIntent) -> Option<String> + Send + Sync>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GatewayMetrics {
    pub total_calls_served: u64,
    pub total_revenue: BigAmount,
    pub active_sessions: usize,
    pub total_sessions: u64,
    pub avg_latency_ms: f64,
    pub total_attestations: u64,
    pub x402_calls_served: u64,
}

#[derive(Default)]
struct MetricsInner {
    total_calls_served: u64,
    total_revenue: BigAmount,
    total_sessions: u64,
    total_attestations: u64,
    x402_calls_served: u64,
}

pub struct ExecuteX402Outcome {
    pub result: gateway_types::AttestedResult<Value>,
    pub settlement: Option<SettlementResponse>,
    pub response_headers: HashMap<String, String>,
}

/// The agent gateway. Owns the session table, the tier catalog, the
/// attester, the marketplace, and (optionally) the seller-side paywall.
pub struct Gateway {
    pub gateway_id: String,
    identity: AgentIdentity,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_concurrent_sessions: usize,
    pricing: Arc<PricingEngine>,
    attester: Arc<ResponseAttester>,
    marketplace: Arc<Marketplace>,
    paywall: Option<Arc<Paywall>>,
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    attest_by_default: bool,
    metrics: std::sync::Mutex<MetricsInner>,
}

impl Gateway {
    pub fn new(
        gateway_id: impl Into<String>,
        identity: AgentIdentity,
        max_concurrent_sessions: usize,
        default_tiers: Vec<PricingTier>,
        attester: Arc<ResponseAttester>,
        transport: Arc<dyn Transport>,
        attest_by_default: bool,
    ) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            identity,
            sessions: RwLock::new(HashMap::new()),
            max_concurrent_sessions,
            pricing: Arc::new(PricingEngine::new(default_tiers)),
            attester,
            marketplace: Arc::new(Marketplace::new()),
            paywall: None,
            transport,
            bus: Arc::new(EventBus::new()),
            attest_by_default,
            metrics: std::sync::Mutex::new(MetricsInner::default()),
        }
    }

    pub fn with_paywall(mut self, paywall: Arc<Paywall>) -> Self {
        self.paywall = Some(paywall);
        self
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    pub fn marketplace(&self) -> &Marketplace {
        &self.marketplace
    }

    pub fn on(&self, event_type: Option<EventType>, handler: Handler) -> SubscriptionId {
        self.bus.subscribe(event_type, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.bus.unsubscribe(id)
    }

    fn active_session_count(&self) -> usize {
        self.sessions
            .read()
            .expect("sessions lock poisoned")
            .values()
            .filter(|s| !s.status().is_terminal())
            .count()
    }

    /// Validate an intent, resolve its tier, check capacity, and open a new
    /// active session.
    pub fn open_session(
        &self,
        intent: PaymentIntent,
        buyer: AgentIdentity,
        options: OpenSessionOptions,
    ) -> Result<Arc<Session>, GatewayError> {
        if intent.seller_id != self.gateway_id {
            return Err(GatewayError::WrongSeller {
                expected: self.gateway_id.clone(),
                actual: intent.seller_id.clone(),
            });
        }
        if intent.max_budget.is_zero() {
            return Err(GatewayError::NonPositiveBudget);
        }
        if intent.ttl_seconds == 0 {
            return Err(GatewayError::NonPositiveTtl);
        }
        let age = (Utc::now() - intent.created_at).num_seconds().max(0) as u64;
        if age > intent.ttl_seconds {
            return Err(GatewayError::IntentExpired);
        }
        if let Some(verifier) = &options.custom_verifier {
            if let Some(reason) = verifier(&intent) {
                return Err(GatewayError::CustomVerifierRejected(reason));
            }
        }

        if self.active_session_count() >= self.max_concurrent_sessions {
            return Err(GatewayError::CapacityExceeded {
                limit: self.max_concurrent_sessions,
            });
        }

        let tier_id = options.tier_override.as_deref().unwrap_or(&intent.tier_id);
        let tier = self
            .pricing
            .get_tier(tier_id, None)
            .ok_or_else(|| GatewayError::UnknownTier(tier_id.to_string()))?;

        let ttl_seconds = options.ttl_override.unwrap_or(intent.ttl_seconds);
        let session_id = uuid::Uuid::new_v4().to_string();

        let session = Arc::new(
            Session::new(
                session_id.clone(),
                buyer,
                intent.seller_id.clone(),
                tier,
                intent.nonce.clone(),
                ttl_seconds,
                self.bus.clone(),
            )
            .with_budget(intent.max_budget.clone()),
        );
        session.activate()?;

        self.sessions
            .write()
            .expect("sessions lock poisoned")
            .insert(session_id.clone(), session.clone());

        {
            let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
            metrics.total_sessions += 1;
        }

        self.bus.publish(Event::new(
            EventType::PaymentIntent,
            session_id,
            serde_json::json!({ "tierId": tier_id, "maxBudget": intent.max_budget.to_string() }),
        ));

        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Arc<Session>, GatewayError> {
        self.sessions
            .read()
            .expect("sessions lock poisoned")
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::SessionNotFound(session_id.to_string()))
    }

    pub fn list_sessions(&self, status_filter: Option<gateway_types::SessionStatus>) -> Vec<SessionSnapshot> {
        self.sessions
            .read()
            .expect("sessions lock poisoned")
            .values()
            .map(|s| s.snapshot())
            .filter(|snap| status_filter.map(|f| snap.status == f).unwrap_or(true))
            .collect()
    }

    /// Remove sessions in a terminal, garbage-collectible status. Per the
    /// data model, only `settled`/`expired` sessions are eligible —
    /// `exhausted` sessions remain queryable until explicitly settled.
    pub fn prune_sessions(&self) -> usize {
        let mut sessions = self.sessions.write().expect("sessions lock poisoned");
        let before = sessions.len();
        sessions.retain(|_, s| {
            !matches!(
                s.status(),
                gateway_types::SessionStatus::Settled | gateway_types::SessionStatus::Expired
            )
        });
        before - sessions.len()
    }

    /// The metered call pipeline: fetch session, gate, call upstream, wrap
    /// through the attester, commit.
    pub async fn execute(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> Result<gateway_types::AttestedResult<Value>, GatewayError> {
        let session = self.get_session(session_id)?;

        self.bus.publish(Event::new(
            EventType::CallBefore,
            session_id,
            serde_json::json!({ "method": method }),
        ));

        let now = Utc::now();
        let cost = session.pre_call(now)?;

        let started = Instant::now();
        let upstream_result = self.transport.request(method, &params).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let raw_result = match upstream_result {
            Ok(value) => value,
            Err(e) => {
                session.refund(&cost);
                self.bus.publish(Event::new(
                    EventType::CallError,
                    session_id,
                    serde_json::json!({ "method": method, "error": e.to_string() }),
                ));
                return Err(e);
            }
        };

        let should_attest = session.tier.includes_attestation || self.attest_by_default;
        let call_index = session.snapshot().calls_made + 1;
        let (attested, attestation_fault) = self
            .attester
            .wrap_result(
                raw_result,
                session_id,
                method,
                &params,
                0,
                latency_ms,
                call_index,
                should_attest,
            )
            .await;

        if let Some(event) = attestation_fault {
            self.bus.publish(event);
        }

        session.post_call(method, Utc::now());

        {
            let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
            metrics.total_calls_served += 1;
            if attested.attestation.is_some() {
                metrics.total_attestations += 1;
            }
        }
        self.pricing.report_latency(latency_ms as f64);

        self.bus.publish(Event::new(
            EventType::CallAfter,
            session_id,
            serde_json::json!({ "method": method, "latencyMs": latency_ms }),
        ));
        if attested.attestation.is_some() {
            self.bus
                .publish(Event::new(EventType::CallAttested, session_id, serde_json::json!({})));
        }

        Ok(attested)
    }

    /// Runs calls serially; the first failure terminates the batch and its
    /// error is returned (results for calls before it are not retained).
    pub async fn execute_batch(
        &self,
        session_id: &str,
        calls: Vec<(String, Value)>,
    ) -> Result<Vec<gateway_types::AttestedResult<Value>>, GatewayError> {
        let mut results = Vec::with_capacity(calls.len());
        for (method, params) in calls {
            let result = self.execute(session_id, &method, params).await?;
            results.push(result);
        }
        Ok(results)
    }

    pub fn settle_session(
        &self,
        session_id: &str,
        tx_reference: Option<String>,
    ) -> Result<Receipt, GatewayError> {
        let session = self.get_session(session_id)?;
        let amount_charged = session.settle();
        let snapshot = session.snapshot();

        {
            let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
            metrics.total_revenue = metrics.total_revenue.checked_add(&amount_charged);
        }

        Ok(Receipt {
            session_id: session_id.to_string(),
            intent_nonce: snapshot.intent_nonce,
            amount_charged,
            call_count: snapshot.calls_made,
            settlement_kind: if tx_reference.is_some() {
                SettlementKind::Onchain
            } else {
                SettlementKind::OffchainEscrow
            },
            tx_reference,
            settled_at: Utc::now(),
        })
    }

    pub fn publish(&self, listing: ToolListing) {
        self.marketplace.publish(listing);
    }

    pub fn publish_bundle(
        &self,
        bundle_id: impl Into<String>,
        name: impl Into<String>,
        methods: Vec<String>,
        tier_overrides: Vec<PricingTier>,
        description: impl Into<String>,
    ) -> ToolBundle {
        let bundle = ToolBundle {
            bundle_id: bundle_id.into(),
            name: name.into(),
            description: description.into(),
            methods: methods.clone(),
            seller_id: self.gateway_id.clone(),
            tier_overrides: tier_overrides.clone(),
        };
        self.pricing.register_bundle_overrides(&methods, tier_overrides);
        self.marketplace.publish_bundle(bundle.clone());
        bundle
    }

    pub async fn process_x402_request(
        &self,
        method: &str,
        headers: &HashMap<String, String>,
    ) -> Result<PaywallOutcome, GatewayError> {
        let paywall = self
            .paywall
            .as_ref()
            .ok_or_else(|| GatewayError::Config("no paywall configured".into()))?;
        let outcome = paywall.process_request(method, headers).await?;
        match &outcome {
            PaywallOutcome::PaymentRequired { .. } => {
                self.bus.publish(Event::new(
                    EventType::X402PaymentRequired,
                    "",
                    serde_json::json!({ "method": method }),
                ));
            }
            PaywallOutcome::PaymentValid { .. } => {
                self.bus.publish(Event::new(
                    EventType::X402PaymentVerified,
                    "",
                    serde_json::json!({ "method": method }),
                ));
            }
            PaywallOutcome::NoPaymentNeeded => {}
        }
        Ok(outcome)
    }

    /// Combines the 402 paywall with metered (or per-call) execution.
    /// When `session` is `None`, the call is billed purely via the 402
    /// payment that was already verified by the caller: no session budget
    /// is touched, and the result is returned unattested.
    pub async fn execute_with_x402(
        &self,
        session: Option<Arc<Session>>,
        method: &str,
        params: Value,
        requirements: PaymentRequirements,
        payload: gateway_types::x402::PaymentPayload,
    ) -> Result<ExecuteX402Outcome, GatewayError> {
        let paywall = self
            .paywall
            .as_ref()
            .ok_or_else(|| GatewayError::Config("no paywall configured".into()))?;

        let result = match session {
            Some(session) => self.execute(&session.session_id, method, params).await?,
            None => {
                let raw = self.transport.request(method, &params).await?;
                gateway_types::AttestedResult {
                    result: raw,
                    attestation: None,
                    latency_ms: 0,
                    call_index: 0,
                }
            }
        };

        let (settlement, response_headers) = match paywall.settle(payload, requirements).await {
            Ok((settlement, headers)) => (Some(settlement), headers),
            Err(e) => {
                warn!(method, error = %e, "x402 settle failed, resource already delivered");
                (None, HashMap::new())
            }
        };

        if settlement.is_some() {
            self.bus
                .publish(Event::new(EventType::X402PaymentSettled, "", serde_json::json!({ "method": method })));
            let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
            metrics.x402_calls_served += 1;
        }

        Ok(ExecuteX402Outcome {
            result,
            settlement,
            response_headers,
        })
    }

    pub fn metrics(&self) -> GatewayMetrics {
        let inner = self.metrics.lock().expect("metrics lock poisoned");
        GatewayMetrics {
            total_calls_served: inner.total_calls_served,
            total_revenue: inner.total_revenue.clone(),
            active_sessions: self.active_session_count(),
            total_sessions: inner.total_sessions,
            avg_latency_ms: self.pricing.avg_latency_ms(),
            total_attestations: inner.total_attestations,
            x402_calls_served: inner.x402_calls_served,
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn log_startup(&self) {
        info!(gateway_id = %self.gateway_id, "gateway ready");
    }
}
