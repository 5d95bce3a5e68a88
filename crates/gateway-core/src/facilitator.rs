//! HTTP client for the external facilitator service (§6.3): `/verify`,
//! `/settle`, `/supported`. Mirrors the bundler's RPC client in shape —
//! a `reqwest::Client` with a fixed timeout and an optional header factory
//! for authorization — but with no failover or retry: the paywall treats a
//! facilitator error as fatal for that request and does not retry at this
//! layer (retries, if any, are the buyer's responsibility).

use std::sync::Arc;
use std::time::Duration;

use gateway_types::x402::{SettleRequest, SettlementResponse, SupportedKinds, VerifyRequest, VerifyResponse};
use gateway_types::GatewayError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Produces an `(header name, header value)` pair to attach to every
/// outbound facilitator request, e.g. a bearer token or a custom API key
/// header. Returning `None` sends the request unauthenticated.
pub type AuthFactory = Arc<dyn Fn() -> Option<(String, String)> + Send + Sync>;

pub struct FacilitatorClient {
    http: reqwest::Client,
    base_url: String,
    auth_factory: Option<AuthFactory>,
}

impl FacilitatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("facilitator http client build");
        Self {
            http,
            base_url: base_url.into(),
            auth_factory: None,
        }
    }

    pub fn with_auth_factory(mut self, factory: AuthFactory) -> Self {
        self.auth_factory = Some(factory);
        self
    }

    fn request_builder(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut builder = self.http.post(url);
        if let Some(factory) = &self.auth_factory {
            if let Some((name, value)) = factory() {
                builder = builder.header(name, value);
            }
        }
        builder
    }

    async fn post_json<Req: serde::Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, GatewayError> {
        let response = self
            .request_builder(path)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Facilitator(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_snippet = response.text().await.unwrap_or_default();
            let body_snippet: String = body_snippet.chars().take(500).collect();
            return Err(GatewayError::Facilitator(format!(
                "facilitator {path} returned {status}: {body_snippet}"
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| GatewayError::Facilitator(format!("invalid response from {path}: {e}")))
    }

    pub async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, GatewayError> {
        self.post_json("/verify", request).await
    }

    pub async fn settle(&self, request: &SettleRequest) -> Result<SettlementResponse, GatewayError> {
        self.post_json("/settle", request).await
    }

    pub async fn supported(&self) -> Result<SupportedKinds, GatewayError> {
        self.post_json("/supported", &serde_json::json!({})).await
    }
}
