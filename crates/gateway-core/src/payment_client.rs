//! The buyer-side 402 protocol: issue a request, satisfy a 402 challenge by
//! invoking a caller-supplied signer, and retry with the signed payment
//! attached. Scheduling is cooperative — the whole pipeline suspends at
//! each HTTP round-trip and at the signer call, never holding any lock.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gateway_types::x402::{
    decode_header, encode_header, PaymentRequired, PaymentRequirements, ResourceDescriptor,
    SettlementResponse, HEADER_PAYMENT_REQUIRED, HEADER_PAYMENT_RESPONSE, HEADER_PAYMENT_SIGNATURE,
};
use gateway_types::{BigAmount, GatewayError};
use serde_json::Value;

const DEFAULT_MAX_RETRIES: u32 = 1;

/// Invoked with `(requirements, resource)` to produce a signed payment
/// payload for a selected requirement. May suspend.
#[async_trait]
pub trait PaymentSigner: Send + Sync {
    async fn sign_payment(
        &self,
        requirements: &PaymentRequirements,
        resource: Option<&ResourceDescriptor>,
    ) -> Result<gateway_types::x402::PaymentPayload, GatewayError>;
}

/// Consulted before signing; return `false` to abort the payment.
pub type BudgetCheck = Arc<dyn Fn(&str, &str, &str) -> bool + Send + Sync>;

/// The outcome of a request that went through the 402 flow.
pub struct PaymentOutcome {
    pub requirements: PaymentRequirements,
    pub settlement: Option<SettlementResponse>,
}

pub struct FetchOutcome {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub payment_outcome: Option<PaymentOutcome>,
}

#[derive(Default, Clone)]
struct NetworkAssetTotals {
    totals: HashMap<(String, String), BigAmount>,
}

/// Configuration and running state for the buyer-side payment client.
pub struct PaymentClient {
    http: reqwest::Client,
    signer: Arc<dyn PaymentSigner>,
    preferred_network: Option<String>,
    preferred_asset: Option<String>,
    max_amount_per_call: Option<BigAmount>,
    budget_check: Option<BudgetCheck>,
    max_retries: u32,
    totals: Mutex<NetworkAssetTotals>,
}

impl PaymentClient {
    pub fn new(signer: Arc<dyn PaymentSigner>) -> Self {
        Self {
            http: reqwest::Client::new(),
            signer,
            preferred_network: None,
            preferred_asset: None,
            max_amount_per_call: None,
            budget_check: None,
            max_retries: DEFAULT_MAX_RETRIES,
            totals: Mutex::new(NetworkAssetTotals::default()),
        }
    }

    pub fn with_preferred_network(mut self, network: impl Into<String>) -> Self {
        self.preferred_network = Some(network.into());
        self
    }

    pub fn with_preferred_asset(mut self, asset: impl Into<String>) -> Self {
        self.preferred_asset = Some(asset.into());
        self
    }

    pub fn with_max_amount_per_call(mut self, max_amount: BigAmount) -> Self {
        self.max_amount_per_call = Some(max_amount);
        self
    }

    pub fn with_budget_check(mut self, check: BudgetCheck) -> Self {
        self.budget_check = Some(check);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The default selector: filter by preferred network/asset/max amount,
    /// then pick the cheapest; ties keep the first (insertion) order.
    fn select_requirements(&self, accepts: &[PaymentRequirements]) -> Option<PaymentRequirements> {
        accepts
            .iter()
            .filter(|r| {
                self.preferred_network
                    .as_ref()
                    .map(|n| r.network == *n)
                    .unwrap_or(true)
            })
            .filter(|r| {
                self.preferred_asset
                    .as_ref()
                    .map(|a| r.asset == *a)
                    .unwrap_or(true)
            })
            .filter(|r| {
                self.max_amount_per_call
                    .as_ref()
                    .map(|max| {
                        BigAmount::from_str(&r.amount)
                            .map(|amount| amount <= *max)
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
            })
            .min_by(|a, b| {
                let amount_a = BigAmount::from_str(&a.amount).unwrap_or_else(|_| BigAmount::zero());
                let amount_b = BigAmount::from_str(&b.amount).unwrap_or_else(|_| BigAmount::zero());
                amount_a.cmp(&amount_b)
            })
            .cloned()
    }

    fn record_total(&self, requirements: &PaymentRequirements) {
        if let Ok(amount) = BigAmount::from_str(&requirements.amount) {
            let mut totals = self.totals.lock().expect("payment client totals lock poisoned");
            let key = (requirements.network.clone(), requirements.asset.clone());
            let entry = totals.totals.entry(key).or_insert_with(BigAmount::zero);
            *entry = entry.checked_add(&amount);
        }
    }

    pub fn total_spent(&self, network: &str, asset: &str) -> BigAmount {
        self.totals
            .lock()
            .expect("payment client totals lock poisoned")
            .totals
            .get(&(network.to_string(), asset.to_string()))
            .cloned()
            .unwrap_or_else(BigAmount::zero)
    }

    /// Perform `request`, transparently satisfying a 402 challenge if one
    /// comes back, up to `max_retries` additional attempts.
    pub async fn fetch(&self, request: reqwest::Request) -> Result<FetchOutcome, GatewayError> {
        self.fetch_with_attempt(request, 0).await
    }

    async fn fetch_with_attempt(
        &self,
        request: reqwest::Request,
        attempt: u32,
    ) -> Result<FetchOutcome, GatewayError> {
        let request_for_retry = request.try_clone();
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| GatewayError::Transport(format!("payment client request failed: {e}")))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        if status != 402 {
            if (200..300).contains(&status) {
                let settlement = Self::find_header(&headers, HEADER_PAYMENT_RESPONSE)
                    .map(|raw| decode_header::<SettlementResponse>(raw))
                    .transpose()?;
                let body: Value = response.json().await.unwrap_or(Value::Null);
                let payment_outcome = settlement.map(|settlement| PaymentOutcome {
                    requirements: PaymentRequirements {
                        scheme: "exact".to_string(),
                        network: settlement.network.clone(),
                        asset: String::new(),
                        amount: "0".to_string(),
                        pay_to: String::new(),
                        max_timeout_seconds: 0,
                        extra: Value::Null,
                    },
                    settlement: Some(settlement),
                });
                return Ok(FetchOutcome {
                    status,
                    headers,
                    body,
                    payment_outcome,
                });
            }
            let body_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::RetryError {
                status,
                body: body_text.chars().take(500).collect(),
            });
        }

        let challenge = match Self::find_header(&headers, HEADER_PAYMENT_REQUIRED) {
            Some(raw) => decode_header::<PaymentRequired>(raw)?,
            None => {
                let body: PaymentRequired = response
                    .json()
                    .await
                    .map_err(|e| GatewayError::MalformedPayment(format!("no challenge header or body: {e}")))?;
                body
            }
        };

        let requirements = self
            .select_requirements(&challenge.accepts)
            .ok_or(GatewayError::NoAcceptablePayment)?;

        if let Some(check) = &self.budget_check {
            if !check(&requirements.amount, &requirements.asset, &requirements.network) {
                return Err(GatewayError::NoAcceptablePayment);
            }
        }

        if let Some(max) = &self.max_amount_per_call {
            let amount = BigAmount::from_str(&requirements.amount)
                .map_err(|e| GatewayError::MalformedPayment(format!("invalid amount: {e}")))?;
            if amount > *max {
                return Err(GatewayError::NoAcceptablePayment);
            }
        }

        let payload = self
            .signer
            .sign_payment(&requirements, Some(&challenge.resource))
            .await?;

        let mut retry_request = request_for_retry
            .ok_or_else(|| GatewayError::Transport("request body is not cloneable for 402 retry".into()))?;
        let encoded = encode_header(&payload)?;
        retry_request
            .headers_mut()
            .insert(HEADER_PAYMENT_SIGNATURE, encoded.parse().map_err(|_| {
                GatewayError::MalformedPayment("payment signature header value is not valid ASCII".into())
            })?);

        if attempt >= self.max_retries {
            let body = serde_json::to_string(&challenge).unwrap_or_default();
            return Err(GatewayError::RetryError { status: 402, body });
        }

        let outcome = Box::pin(self.fetch_with_attempt(retry_request, attempt + 1)).await?;
        if (200..300).contains(&outcome.status) {
            self.record_total(&requirements);
        }
        Ok(outcome)
    }

    fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::x402::PaymentPayload;
    use serde_json::json;

    struct StubSigner;

    #[async_trait]
    impl PaymentSigner for StubSigner {
        async fn sign_payment(
            &self,
            requirements: &PaymentRequirements,
            _resource: Option<&ResourceDescriptor>,
        ) -> Result<PaymentPayload, GatewayError> {
            Ok(PaymentPayload {
                x402_version: 2,
                resource: None,
                accepted: requirements.clone(),
                payload: json!({"signature": "stub"}),
                extensions: None,
            })
        }
    }

    fn requirement(network: &str, asset: &str, amount: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: network.to_string(),
            asset: asset.to_string(),
            amount: amount.to_string(),
            pay_to: "seller".to_string(),
            max_timeout_seconds: 60,
            extra: json!({}),
        }
    }

    #[test]
    fn default_selector_picks_cheapest() {
        let client = PaymentClient::new(Arc::new(StubSigner));
        let accepts = vec![
            requirement("solana:devnet", "USDC", "500"),
            requirement("solana:devnet", "USDC", "100"),
        ];
        let selected = client.select_requirements(&accepts).unwrap();
        assert_eq!(selected.amount, "100");
    }

    #[test]
    fn selector_filters_by_preferred_network() {
        let client = PaymentClient::new(Arc::new(StubSigner)).with_preferred_network("eip155:8453");
        let accepts = vec![
            requirement("solana:devnet", "USDC", "100"),
            requirement("eip155:8453", "USDC", "300"),
        ];
        let selected = client.select_requirements(&accepts).unwrap();
        assert_eq!(selected.network, "eip155:8453");
    }

    #[test]
    fn selector_respects_max_amount_per_call() {
        let client =
            PaymentClient::new(Arc::new(StubSigner)).with_max_amount_per_call(BigAmount::from(200u64));
        let accepts = vec![requirement("solana:devnet", "USDC", "500")];
        assert!(client.select_requirements(&accepts).is_none());
    }

    #[test]
    fn total_spent_starts_at_zero() {
        let client = PaymentClient::new(Arc::new(StubSigner));
        assert_eq!(client.total_spent("solana:devnet", "USDC"), BigAmount::zero());
    }

    fn challenge_body(network: &str, asset: &str, amount: &str) -> serde_json::Value {
        json!({
            "x402Version": 2,
            "resource": {
                "url": "tool.call",
                "description": "a tool call",
                "mimeType": "application/json",
            },
            "accepts": [requirement(network, asset, amount)],
        })
    }

    #[tokio::test]
    async fn total_is_recorded_only_after_the_paid_retry_succeeds() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::header_exists(HEADER_PAYMENT_SIGNATURE))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .with_priority(1)
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(402)
                    .set_body_json(challenge_body("solana:devnet", "USDC", "100")),
            )
            .with_priority(2)
            .mount(&server)
            .await;

        let client = PaymentClient::new(Arc::new(StubSigner));
        let request = reqwest::Client::new()
            .get(server.uri())
            .build()
            .unwrap();

        let outcome = client.fetch(request).await.unwrap();
        assert_eq!(outcome.status, 200);
        assert_eq!(client.total_spent("solana:devnet", "USDC"), BigAmount::from(100u64));
    }

    #[tokio::test]
    async fn exhausted_retries_return_retry_error_without_recording_total() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(402)
                    .set_body_json(challenge_body("solana:devnet", "USDC", "100")),
            )
            .mount(&server)
            .await;

        let client = PaymentClient::new(Arc::new(StubSigner)).with_max_retries(0);
        let request = reqwest::Client::new()
            .get(server.uri())
            .build()
            .unwrap();

        let err = client.fetch(request).await.unwrap_err();
        assert_eq!(err.code(), "RETRY_ERROR");
        assert_eq!(client.total_spent("solana:devnet", "USDC"), BigAmount::zero());
    }
}
