use std::collections::HashMap;
use std::sync::Arc;

use gateway_core::{EchoTransport, FacilitatorClient, Gateway, Paywall, ResponseAttester, RouteOffer};
use gateway_types::{AgentIdentity, PricingTier, TokenDescriptor, BigAmount};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tier() -> PricingTier {
    PricingTier {
        tier_id: "standard".to_string(),
        label: "Standard".to_string(),
        price_per_call: BigAmount::from(100u64),
        max_calls_per_session: gateway_types::UNLIMITED,
        rate_limit_per_second: 50,
        token: TokenDescriptor::Native {
            network: "solana:devnet".to_string(),
        },
        includes_attestation: false,
    }
}

fn offer() -> RouteOffer {
    RouteOffer {
        scheme: "exact".to_string(),
        network: "solana-devnet".to_string(),
        asset: "USDC-devnet".to_string(),
        amount: "1000".to_string(),
        pay_to: "seller".to_string(),
        max_timeout_seconds: 60,
        extra: json!({}),
    }
}

/// The seller-side 402 pipeline: a call with no payment header gets a
/// challenge back, and the same call with a payment header the facilitator
/// accepts is served and settled.
#[tokio::test]
async fn a_request_without_payment_is_challenged_then_served_once_paid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isValid": true,
            "payer": "buyer-wallet",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/settle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "transaction": "tx123",
            "network": "solana-devnet",
            "payer": "buyer-wallet",
        })))
        .mount(&server)
        .await;

    let facilitator = FacilitatorClient::new(server.uri());
    let paywall = Arc::new(Paywall::new(facilitator, vec![offer()]));
    let gateway = Gateway::new(
        "gw1",
        AgentIdentity::new("gw1", "Gateway", "0xgw"),
        10,
        vec![tier()],
        Arc::new(ResponseAttester::new(None)),
        Arc::new(EchoTransport::new()),
        false,
    )
    .with_paywall(paywall);

    let unpaid = gateway
        .process_x402_request("tool.call", &HashMap::new())
        .await
        .unwrap();
    assert!(matches!(unpaid, gateway_core::PaywallOutcome::PaymentRequired { .. }));

    let payload = gateway_types::x402::PaymentPayload {
        x402_version: 2,
        resource: None,
        accepted: gateway_types::x402::PaymentRequirements {
            scheme: offer().scheme,
            network: offer().network,
            asset: offer().asset,
            amount: offer().amount,
            pay_to: offer().pay_to,
            max_timeout_seconds: offer().max_timeout_seconds,
            extra: json!({}),
        },
        payload: json!({"signature": "abc"}),
        extensions: None,
    };
    let mut headers = HashMap::new();
    headers.insert(
        gateway_types::x402::HEADER_PAYMENT_SIGNATURE.to_string(),
        gateway_types::x402::encode_header(&payload).unwrap(),
    );

    let outcome = gateway.process_x402_request("tool.call", &headers).await.unwrap();
    let (payload, requirements) = match outcome {
        gateway_core::PaywallOutcome::PaymentValid {
            payload, requirements, ..
        } => (payload, requirements),
        _ => panic!("expected a verified payment"),
    };

    let result = gateway
        .execute_with_x402(None, "tool.call", json!({"q": 1}), requirements, payload)
        .await
        .unwrap();
    assert_eq!(result.result.result, json!({"q": 1}));
    assert!(result.settlement.unwrap().success);
}
