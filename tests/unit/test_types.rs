use std::str::FromStr;

use chrono::Utc;
use gateway_types::x402::{decode_header, encode_header, PaymentRequirements};
use gateway_types::{
    AgentIdentity, BigAmount, Event, EventType, GatewayError, PricingTier, Receipt, SessionStatus,
    SettlementKind, TokenDescriptor, ToolListing,
};
use serde_json::json;

#[test]
fn big_amount_round_trips_as_decimal_string() {
    let amount = BigAmount::from_str("9999999999999999999999").unwrap();
    let json = serde_json::to_string(&amount).unwrap();
    assert_eq!(json, "\"9999999999999999999999\"");
    let back: BigAmount = serde_json::from_str(&json).unwrap();
    assert_eq!(amount, back);
}

#[test]
fn big_amount_checked_sub_never_goes_negative() {
    let a = BigAmount::from(50u64);
    let b = BigAmount::from(100u64);
    assert!(a.checked_sub(&b).is_none());
    assert_eq!(a.saturating_sub(&b), BigAmount::zero());
    assert_eq!(b.checked_sub(&a), Some(BigAmount::from(50u64)));
}

#[test]
fn agent_identity_serializes_with_tags_default() {
    let identity = AgentIdentity::new("agent-1", "Agent One", "0xwallet");
    assert!(identity.tags.is_empty());
    let json = serde_json::to_value(&identity).unwrap();
    assert_eq!(json["agentId"], json!("agent-1"));
    let reparsed: AgentIdentity = serde_json::from_value(json!({
        "agentId": "agent-2",
        "displayName": "Agent Two",
        "walletKey": "0xwallet2",
        "createdAt": Utc::now().to_rfc3339(),
    }))
    .unwrap();
    assert!(reparsed.tags.is_empty());
}

#[test]
fn token_descriptor_reports_network_and_asset_id() {
    let native = TokenDescriptor::Native {
        network: "solana:devnet".to_string(),
    };
    assert_eq!(native.network(), "solana:devnet");
    assert_eq!(native.asset_id(), "native");

    let stablecoin = TokenDescriptor::Stablecoin {
        network: "eip155:8453".to_string(),
        contract: "0xUSDC".to_string(),
        symbol: "USDC".to_string(),
    };
    assert_eq!(stablecoin.asset_id(), "0xUSDC");
}

#[test]
fn pricing_tier_serializes_with_camel_case_fields() {
    let tier = PricingTier {
        tier_id: "standard".to_string(),
        label: "Standard".to_string(),
        price_per_call: BigAmount::from(100u64),
        max_calls_per_session: gateway_types::UNLIMITED,
        rate_limit_per_second: 20,
        token: TokenDescriptor::Native {
            network: "solana:devnet".to_string(),
        },
        includes_attestation: false,
    };
    let json = serde_json::to_value(&tier).unwrap();
    assert_eq!(json["tierId"], "standard");
    assert_eq!(json["pricePerCall"], "100");
}

#[test]
fn tool_listing_round_trips_through_json() {
    let now = Utc::now();
    let listing = ToolListing {
        method: "tool.call".to_string(),
        description: "does a thing".to_string(),
        seller: AgentIdentity::new("seller-1", "Seller", "0xabc"),
        available_tiers: vec!["standard".to_string()],
        cheapest_price: BigAmount::from(100u64),
        avg_latency_ms: 42.0,
        uptime_percentage: 99.9,
        total_served: 10,
        reputation_score: 700,
        attestation_available: true,
        region: Some("us-east".to_string()),
        commitments: vec!["finalized".to_string()],
        listed_at: now,
        updated_at: now,
    };
    let json = serde_json::to_string(&listing).unwrap();
    let back: ToolListing = serde_json::from_str(&json).unwrap();
    assert_eq!(back.method, listing.method);
    assert_eq!(back.cheapest_price, listing.cheapest_price);
}

#[test]
fn session_status_variants_round_trip() {
    for status in [
        SessionStatus::Pending,
        SessionStatus::Active,
        SessionStatus::Paused,
        SessionStatus::Exhausted,
        SessionStatus::Settled,
        SessionStatus::Expired,
    ] {
        let json = serde_json::to_string(&status).unwrap();
        let back: SessionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}

#[test]
fn receipt_distinguishes_settlement_kinds() {
    let receipt = Receipt {
        session_id: "s1".to_string(),
        intent_nonce: "n1".to_string(),
        amount_charged: BigAmount::from(500u64),
        call_count: 5,
        tx_reference: Some("tx123".to_string()),
        settlement_kind: SettlementKind::Onchain,
        settled_at: Utc::now(),
    };
    assert_eq!(receipt.settlement_kind, SettlementKind::Onchain);

    let offchain = Receipt {
        tx_reference: None,
        settlement_kind: SettlementKind::OffchainEscrow,
        ..receipt
    };
    assert_eq!(offchain.settlement_kind, SettlementKind::OffchainEscrow);
}

#[test]
fn gateway_error_codes_are_stable_and_nonempty() {
    let errors = vec![
        GatewayError::WrongSeller {
            expected: "gw1".to_string(),
            actual: "gw2".to_string(),
        },
        GatewayError::NonPositiveBudget,
        GatewayError::SessionNotFound("s1".to_string()),
        GatewayError::BudgetExhausted {
            session_id: "s1".to_string(),
        },
        GatewayError::RateLimitExceeded {
            session_id: "s1".to_string(),
            retry_after_ms: 250,
        },
        GatewayError::Transport("upstream down".to_string()),
    ];
    for error in errors {
        assert!(!error.code().is_empty());
        assert!(!error.to_string().is_empty());
        let _: Box<dyn std::error::Error> = Box::new(error);
    }
}

#[test]
fn event_carries_its_type_and_session() {
    let event = Event::new(EventType::CallAfter, "s1", json!({"latencyMs": 12}));
    assert_eq!(event.session_id, "s1");
    assert_eq!(event.event_type, EventType::CallAfter);
}

#[test]
fn payment_requirements_header_round_trips_through_base64_json() {
    let requirements = PaymentRequirements {
        scheme: "exact".to_string(),
        network: "solana:devnet".to_string(),
        asset: "USDC-devnet".to_string(),
        amount: "1000".to_string(),
        pay_to: "seller".to_string(),
        max_timeout_seconds: 60,
        extra: json!({}),
    };
    let encoded = encode_header(&requirements).unwrap();
    let decoded: PaymentRequirements = decode_header(&encoded).unwrap();
    assert_eq!(decoded, requirements);
}
