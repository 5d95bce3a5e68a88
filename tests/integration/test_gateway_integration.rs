use std::sync::Arc;

use chrono::Utc;
use gateway_core::{EchoTransport, Gateway, NullTransport, OpenSessionOptions, ResponseAttester};
use gateway_types::{AgentIdentity, BigAmount, PaymentIntent, PricingTier, SessionStatus, TokenDescriptor};
use uuid::Uuid;

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

fn intent(max_budget: u64, ttl_seconds: u64) -> PaymentIntent {
    PaymentIntent {
        nonce: Uuid::new_v4().to_string(),
        buyer_id: "buyer1".to_string(),
        seller_id: "gw1".to_string(),
        tier_id: "standard".to_string(),
        max_budget: BigAmount::from(max_budget),
        token: TokenDescriptor::Native {
            network: "solana:devnet".to_string(),
        },
        buyer_signature: "sig".to_string(),
        created_at: Utc::now(),
        ttl_seconds,
    }
}

fn gateway_with(tiers: Vec<PricingTier>, transport: Arc<dyn gateway_core::Transport>) -> Gateway {
    Gateway::new(
        "gw1",
        AgentIdentity::new("gw1", "Gateway", "0xgw"),
        10,
        tiers,
        Arc::new(ResponseAttester::new(None)),
        transport,
        false,
    )
}

/// Happy path: open a session, run a batch of calls, settle, and check the
/// receipt accounts for exactly what was charged.
#[tokio::test]
async fn happy_path_meters_and_settles_a_session() {
    let gateway = gateway_with(
        vec![tier(100, 50, 0)],
        Arc::new(EchoTransport::new()),
    );
    let buyer = AgentIdentity::new("buyer1", "Buyer", "0xabc");
    let session = gateway
        .open_session(intent(10_000, 3600), buyer, OpenSessionOptions::default())
        .expect("session should open");

    for i in 0..5 {
        let result = gateway
            .execute(&session.session_id, "tool.call", serde_json::json!({"i": i}))
            .await
            .expect("call should succeed");
        assert_eq!(result.result, serde_json::json!({"i": i}));
    }

    let receipt = gateway.settle_session(&session.session_id, None).unwrap();
    assert_eq!(receipt.amount_charged, BigAmount::from(500u64));
    assert_eq!(receipt.call_count, 5);
}

/// A tier with a tight per-second rate limit rejects the call that exceeds
/// it within the same window, without charging the session for it.
#[tokio::test]
async fn rate_limit_breach_is_rejected_without_charge() {
    let gateway = gateway_with(
        vec![tier(100, 1, 0)],
        Arc::new(EchoTransport::new()),
    );
    let buyer = AgentIdentity::new("buyer1", "Buyer", "0xabc");
    let session = gateway
        .open_session(intent(10_000, 3600), buyer, OpenSessionOptions::default())
        .unwrap();

    gateway
        .execute(&session.session_id, "tool.call", serde_json::json!({}))
        .await
        .unwrap();

    let err = gateway
        .execute(&session.session_id, "tool.call", serde_json::json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMIT_EXCEEDED");
    assert_eq!(session.snapshot().budget_remaining, BigAmount::from(9_900u64));
}

/// A session whose budget is fully consumed transitions to `exhausted` and
/// further calls are refused; the remaining calls from the batch are
/// discarded per the batch's abort-on-first-failure contract.
#[tokio::test]
async fn budget_exhaustion_stops_a_batch_midway() {
    let gateway = gateway_with(
        vec![tier(100, 50, 0)],
        Arc::new(EchoTransport::new()),
    );
    let buyer = AgentIdentity::new("buyer1", "Buyer", "0xabc");
    let session = gateway
        .open_session(intent(250, 3600), buyer, OpenSessionOptions::default())
        .unwrap();

    let calls = vec![
        ("tool.call".to_string(), serde_json::json!({"i": 0})),
        ("tool.call".to_string(), serde_json::json!({"i": 1})),
        ("tool.call".to_string(), serde_json::json!({"i": 2})),
    ];
    let result = gateway.execute_batch(&session.session_id, calls).await;
    assert!(result.is_err());
    assert_eq!(result.unwrap_err().code(), "BUDGET_EXHAUSTED");
    assert_eq!(session.snapshot().status, SessionStatus::Exhausted);
}

/// A session opened with a one-second ttl expires on the next call once that
/// second has elapsed.
#[tokio::test]
async fn ttl_expiry_rejects_calls_after_the_deadline() {
    let gateway = gateway_with(vec![tier(100, 50, 0)], Arc::new(EchoTransport::new()));
    let buyer = AgentIdentity::new("buyer1", "Buyer", "0xabc");
    let session = gateway
        .open_session(intent(10_000, 1), buyer, OpenSessionOptions::default())
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

    let err = gateway
        .execute(&session.session_id, "tool.call", serde_json::json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SESSION_EXPIRED");
    assert_eq!(session.snapshot().status, SessionStatus::Expired);
}

/// When the upstream transport fails, the call's reservation is refunded and
/// the session is left active, ready to retry.
#[tokio::test]
async fn transport_failure_refunds_the_reservation() {
    let gateway = gateway_with(vec![tier(100, 50, 0)], Arc::new(NullTransport));
    let buyer = AgentIdentity::new("buyer1", "Buyer", "0xabc");
    let session = gateway
        .open_session(intent(1_000, 3600), buyer, OpenSessionOptions::default())
        .unwrap();

    let err = gateway
        .execute(&session.session_id, "tool.call", serde_json::json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TRANSPORT_ERROR");
    assert_eq!(session.snapshot().budget_remaining, BigAmount::from(1_000u64));
    assert_eq!(session.snapshot().status, SessionStatus::Active);
}

/// Capacity limits are enforced independently of any single session's state.
#[tokio::test]
async fn capacity_limit_rejects_additional_sessions() {
    let gateway = Gateway::new(
        "gw1",
        AgentIdentity::new("gw1", "Gateway", "0xgw"),
        1,
        vec![tier(100, 50, 0)],
        Arc::new(ResponseAttester::new(None)),
        Arc::new(EchoTransport::new()),
        false,
    );
    let buyer = AgentIdentity::new("buyer1", "Buyer", "0xabc");
    gateway
        .open_session(intent(1_000, 3600), buyer.clone(), OpenSessionOptions::default())
        .unwrap();

    let err = gateway
        .open_session(intent(1_000, 3600), buyer, OpenSessionOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "CAPACITY_EXCEEDED");
}
