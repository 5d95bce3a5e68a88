//! HTTP front end for the agent gateway: session lifecycle, the metered
//! call pipeline, marketplace search, and the 402 payment endpoint, all
//! bound onto a single shared [`Gateway`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use gateway_config::GatewayConfig;
use gateway_core::{Gateway, OpenSessionOptions};
use gateway_types::{AgentIdentity, GatewayError, PaymentIntent, SessionSnapshot, ToolListing};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

impl From<&GatewayError> for ErrorResponse {
    fn from(e: &GatewayError) -> Self {
        Self {
            error: e.code().to_string(),
            details: Some(e.to_string()),
        }
    }
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::WrongSeller { .. }
        | GatewayError::NonPositiveBudget
        | GatewayError::NonPositiveTtl
        | GatewayError::IntentExpired
        | GatewayError::UnknownTier(_)
        | GatewayError::CustomVerifierRejected(_)
        | GatewayError::MalformedPayment(_)
        | GatewayError::NoAcceptablePayment => StatusCode::BAD_REQUEST,
        GatewayError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::BudgetExhausted { .. }
        | GatewayError::RateLimitExceeded { .. }
        | GatewayError::CallLimitExceeded { .. }
        | GatewayError::SessionExpired { .. }
        | GatewayError::InvalidState { .. } => StatusCode::CONFLICT,
        GatewayError::AttestationFailed(_) | GatewayError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::Transport(_) | GatewayError::Facilitator(_) | GatewayError::RetryError { .. } => {
            StatusCode::BAD_GATEWAY
        }
        GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: GatewayError) -> (StatusCode, Json<ErrorResponse>) {
    (status_for(&err), Json(ErrorResponse::from(&err)))
}

type HandlerResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub buyer: AgentIdentity,
    pub intent: PaymentIntent,
    #[serde(default)]
    pub tier_override: Option<String>,
    #[serde(default)]
    pub ttl_override: Option<u64>,
}

async fn open_session_handler(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<OpenSessionRequest>,
) -> HandlerResult<SessionSnapshot> {
    let options = OpenSessionOptions {
        tier_override: req.tier_override,
        ttl_override: req.ttl_override,
        custom_verifier: None,
    };
    let session = gateway
        .open_session(req.intent, req.buyer, options)
        .map_err(error_response)?;
    Ok(Json(session.snapshot()))
}

async fn get_session_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(session_id): Path<String>,
) -> HandlerResult<SessionSnapshot> {
    let session = gateway.get_session(&session_id).map_err(error_response)?;
    Ok(Json(session.snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<String>,
}

async fn list_sessions_handler(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<ListSessionsQuery>,
) -> HandlerResult<Vec<SessionSnapshot>> {
    let status_filter = query
        .status
        .as_deref()
        .and_then(|s| serde_json::from_value(serde_json::Value::String(s.to_string())).ok());
    Ok(Json(gateway.list_sessions(status_filter)))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

async fn execute_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(session_id): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> HandlerResult<gateway_types::AttestedResult<serde_json::Value>> {
    let result = gateway
        .execute(&session_id, &req.method, req.params)
        .await
        .map_err(error_response)?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize, Default)]
pub struct SettleRequest {
    #[serde(default)]
    pub tx_reference: Option<String>,
}

async fn settle_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(session_id): Path<String>,
    body: Option<Json<SettleRequest>>,
) -> HandlerResult<gateway_types::Receipt> {
    let tx_reference = body.and_then(|Json(req)| req.tx_reference);
    let receipt = gateway
        .settle_session(&session_id, tx_reference)
        .map_err(error_response)?;
    Ok(Json(receipt))
}

async fn publish_listing_handler(
    State(gateway): State<Arc<Gateway>>,
    Json(listing): Json<ToolListing>,
) -> HandlerResult<ToolListing> {
    gateway.publish(listing.clone());
    Ok(Json(listing))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequestQuery {
    pub method: Option<String>,
    pub seller_id: Option<String>,
    pub max_price: Option<String>,
    pub min_reputation: Option<u32>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

async fn marketplace_search_handler(
    State(gateway): State<Arc<Gateway>>,
    Query(q): Query<SearchRequestQuery>,
) -> HandlerResult<Vec<ToolListing>> {
    use gateway_core::{SearchQuery, SortDirection, SortKey};

    let mut query = SearchQuery::new();
    query.method = q.method;
    query.seller_id = q.seller_id;
    query.max_price = q
        .max_price
        .as_deref()
        .map(|s| s.parse().unwrap_or_else(|_| gateway_types::BigAmount::zero()));
    query.min_reputation = q.min_reputation;
    query.limit = q.limit.unwrap_or(50);
    query.offset = q.offset.unwrap_or(0);
    query.sort = q.sort.as_deref().map(|s| match s {
        "reputation" => SortKey::Reputation,
        "latency" => SortKey::Latency,
        "uptime" => SortKey::Uptime,
        "total-served" => SortKey::TotalServed,
        _ => SortKey::Price,
    });
    if matches!(query.sort, Some(SortKey::Reputation) | Some(SortKey::Uptime) | Some(SortKey::TotalServed)) {
        query.direction = SortDirection::Descending;
    }

    Ok(Json(gateway.marketplace().search(&query)))
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

async fn x402_call_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Option<Json<serde_json::Value>>,
) -> axum::response::Response {
    use axum::response::IntoResponse;
    use gateway_core::PaywallOutcome;

    let header_map = headers_to_map(&headers);
    let outcome = match gateway.process_x402_request(&method, &header_map).await {
        Ok(outcome) => outcome,
        Err(e) => return error_response(e).into_response(),
    };

    match outcome {
        PaywallOutcome::NoPaymentNeeded => {
            let params = body.map(|Json(v)| v).unwrap_or(serde_json::Value::Null);
            match gateway
                .pricing()
                .get_tier("standard", None)
                .ok_or_else(|| GatewayError::Config("no default tier for unmetered 402 route".into()))
            {
                Ok(_) => {}
                Err(e) => return error_response(e).into_response(),
            }
            let _ = params;
            (StatusCode::OK, Json(serde_json::json!({ "paid": false }))).into_response()
        }
        PaywallOutcome::PaymentRequired { status_code, headers } => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::PAYMENT_REQUIRED);
            let mut response_headers = HeaderMap::new();
            for (k, v) in headers {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::try_from(k),
                    axum::http::HeaderValue::try_from(v),
                ) {
                    response_headers.insert(name, value);
                }
            }
            (status, response_headers, Json(serde_json::json!({ "error": "PAYMENT_REQUIRED" }))).into_response()
        }
        PaywallOutcome::PaymentValid {
            payload,
            requirements,
            payer,
        } => {
            let params = body.map(|Json(v)| v).unwrap_or(serde_json::Value::Null);
            match gateway
                .execute_with_x402(None, &method, params, requirements, payload)
                .await
            {
                Ok(outcome) => {
                    let mut response_headers = HeaderMap::new();
                    for (k, v) in outcome.response_headers {
                        if let (Ok(name), Ok(value)) = (
                            axum::http::HeaderName::try_from(k),
                            axum::http::HeaderValue::try_from(v),
                        ) {
                            response_headers.insert(name, value);
                        }
                    }
                    (
                        StatusCode::OK,
                        response_headers,
                        Json(serde_json::json!({
                            "result": outcome.result.result,
                            "payer": payer,
                            "settled": outcome.settlement.map(|s| s.success).unwrap_or(false),
                        })),
                    )
                        .into_response()
                }
                Err(e) => error_response(e).into_response(),
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub timestamp: String,
    pub components: HashMap<String, ComponentHealth>,
}

async fn health_handler(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    let mut components = HashMap::new();
    components.insert(
        "sessions".to_string(),
        ComponentHealth {
            healthy: true,
            message: Some(format!("{} active", gateway.metrics().active_sessions)),
        },
    );
    Json(HealthResponse {
        healthy: true,
        timestamp: Utc::now().to_rfc3339(),
        components,
    })
}

async fn metrics_handler(State(gateway): State<Arc<Gateway>>) -> Json<gateway_core::GatewayMetrics> {
    Json(gateway.metrics())
}

async fn get_service_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "agent-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /v1/session",
            "GET /v1/session/:id",
            "GET /v1/session",
            "POST /v1/session/:id/execute",
            "POST /v1/session/:id/settle",
            "POST /v1/marketplace/listing",
            "GET /v1/marketplace/search",
            "POST /v1/x402/:method",
            "GET /v1/health",
            "GET /v1/metrics",
        ],
    }))
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "agent-gateway",
        "documentation": "/v1/info",
    }))
}

/// Owns the shared [`Gateway`] and assembles the axum router over it.
pub struct HttpService {
    gateway: Arc<Gateway>,
    config: GatewayConfig,
}

impl HttpService {
    pub fn new(gateway: Arc<Gateway>, config: GatewayConfig) -> Self {
        Self { gateway, config }
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins = &self.config.service.cors_allowed_origins;
        let allow_origin = if origins.iter().any(|o| o == "*") {
            AllowOrigin::any()
        } else {
            let parsed: Vec<_> = origins
                .iter()
                .filter_map(|o| axum::http::HeaderValue::from_str(o).ok())
                .collect();
            AllowOrigin::list(parsed)
        };
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    }

    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/v1/info", get(get_service_info))
            .route("/v1/health", get(health_handler))
            .route("/v1/metrics", get(metrics_handler))
            .route("/v1/session", post(open_session_handler).get(list_sessions_handler))
            .route("/v1/session/:id", get(get_session_handler))
            .route("/v1/session/:id/execute", post(execute_handler))
            .route("/v1/session/:id/settle", post(settle_handler))
            .route("/v1/marketplace/listing", post(publish_listing_handler))
            .route("/v1/marketplace/search", get(marketplace_search_handler))
            .route("/v1/x402/:method", post(x402_call_handler))
            .layer(self.cors_layer())
            .with_state(Arc::clone(&self.gateway))
    }

    pub async fn serve(&self, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = self.create_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// Build the gateway from config and a signer, bind, and serve. The signer
/// is constructed by the caller (the CLI's key-loading logic applies
/// equally here) so this crate stays free of key-material concerns.
pub async fn start_service(
    gateway: Arc<Gateway>,
    config: GatewayConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = HttpService::new(gateway, config.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.service.port));
    info!(%addr, "agent gateway service listening");
    if let Err(e) = service.serve(addr).await {
        error!(error = %e, "service failed");
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use gateway_core::{EchoTransport, ResponseAttester};
    use gateway_types::{BigAmount, PricingTier, TokenDescriptor};
    use serde_json::json;

    fn test_tier() -> PricingTier {
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

    fn test_service() -> HttpService {
        let gateway = Arc::new(Gateway::new(
            "gw1",
            AgentIdentity::new("gw1", "Gateway", "0xgw"),
            10,
            vec![test_tier()],
            Arc::new(ResponseAttester::new(None)),
            Arc::new(EchoTransport::new()),
            false,
        ));
        HttpService::new(gateway, GatewayConfig::default())
    }

    fn sample_intent() -> PaymentIntent {
        PaymentIntent {
            nonce: "n1".to_string(),
            buyer_id: "buyer1".to_string(),
            seller_id: "gw1".to_string(),
            tier_id: "standard".to_string(),
            max_budget: BigAmount::from(1000u64),
            token: TokenDescriptor::Native {
                network: "solana:devnet".to_string(),
            },
            buyer_signature: "sig".to_string(),
            created_at: Utc::now(),
            ttl_seconds: 3600,
        }
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let server = TestServer::new(test_service().create_router()).unwrap();
        let response = server.get("/v1/health").await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn info_and_root_return_json() {
        let server = TestServer::new(test_service().create_router()).unwrap();
        server.get("/v1/info").await.assert_status_ok();
        server.get("/").await.assert_status_ok();
    }

    #[tokio::test]
    async fn open_session_then_execute_then_settle() {
        let server = TestServer::new(test_service().create_router()).unwrap();
        let open_response = server
            .post("/v1/session")
            .json(&json!({
                "buyer": AgentIdentity::new("buyer1", "Buyer", "0xabc"),
                "intent": sample_intent(),
            }))
            .await;
        open_response.assert_status_ok();
        let snapshot: SessionSnapshot = open_response.json();

        let execute_response = server
            .post(&format!("/v1/session/{}/execute", snapshot.session_id))
            .json(&json!({"method": "m1", "params": {"x": 1}}))
            .await;
        execute_response.assert_status_ok();

        let settle_response = server
            .post(&format!("/v1/session/{}/settle", snapshot.session_id))
            .json(&json!({}))
            .await;
        settle_response.assert_status_ok();
    }

    #[tokio::test]
    async fn open_session_rejects_wrong_seller_with_bad_request() {
        let server = TestServer::new(test_service().create_router()).unwrap();
        let mut intent = sample_intent();
        intent.seller_id = "someone-else".to_string();
        let response = server
            .post("/v1/session")
            .json(&json!({
                "buyer": AgentIdentity::new("buyer1", "Buyer", "0xabc"),
                "intent": intent,
            }))
            .await;
        response.assert_status_bad_request();
    }

    #[tokio::test]
    async fn unknown_session_returns_not_found() {
        let server = TestServer::new(test_service().create_router()).unwrap();
        server.get("/v1/session/does-not-exist").await.assert_status_not_found();
    }

    #[tokio::test]
    async fn marketplace_search_returns_empty_list_initially() {
        let server = TestServer::new(test_service().create_router()).unwrap();
        let response = server.get("/v1/marketplace/search").await;
        response.assert_status_ok();
        let listings: Vec<ToolListing> = response.json();
        assert!(listings.is_empty());
    }
}
