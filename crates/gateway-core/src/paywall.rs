//! The seller-side 402 protocol: turn an incoming request's headers into
//! `no-payment-needed`, `payment-required`, or `payment-valid`, and settle a
//! verified payment once the resource has been served.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use gateway_types::x402::{
    decode_header, encode_header, PaymentPayload, PaymentRequired, PaymentRequirements,
    ResourceDescriptor, SettleRequest, SettlementResponse, VerifyRequest, HEADER_PAYMENT_REQUIRED,
    HEADER_PAYMENT_SIGNATURE, HEADER_PAYMENT_RESPONSE,
};
use gateway_types::GatewayError;
use serde_json::Value;

use crate::facilitator::FacilitatorClient;

/// A route-specific price/network/asset triple the paywall will accept for
/// a given method.
#[derive(Debug, Clone)]
pub struct RouteOffer {
    pub scheme: String,
    pub network: String,
    pub asset: String,
    pub amount: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub extra: Value,
}

impl RouteOffer {
    fn into_requirements(self) -> PaymentRequirements {
        PaymentRequirements {
            scheme: self.scheme,
            network: self.network,
            asset: self.asset,
            amount: self.amount,
            pay_to: self.pay_to,
            max_timeout_seconds: self.max_timeout_seconds,
            extra: self.extra,
        }
    }
}

/// A locally evaluated verifier, consulted before falling back to the
/// facilitator's `/verify` endpoint.
pub type LocalVerifier =
    Arc<dyn Fn(&PaymentPayload, &PaymentRequirements) -> Option<String> + Send + Sync>;

/// Outcome of routing an incoming request through the paywall.
pub enum PaywallOutcome {
    NoPaymentNeeded,
    PaymentRequired {
        status_code: u16,
        headers: HashMap<String, String>,
    },
    PaymentValid {
        payload: PaymentPayload,
        requirements: PaymentRequirements,
        payer: Option<String>,
    },
}

pub struct Paywall {
    routes: RwLock<HashMap<String, Vec<RouteOffer>>>,
    default_offers: Vec<RouteOffer>,
    facilitator: FacilitatorClient,
    local_verifier: Option<LocalVerifier>,
}

impl Paywall {
    pub fn new(facilitator: FacilitatorClient, default_offers: Vec<RouteOffer>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            default_offers,
            facilitator,
            local_verifier: None,
        }
    }

    pub fn with_local_verifier(mut self, verifier: LocalVerifier) -> Self {
        self.local_verifier = Some(verifier);
        self
    }

    pub fn configure_route(&self, method: impl Into<String>, offers: Vec<RouteOffer>) {
        self.routes
            .write()
            .expect("paywall routes lock poisoned")
            .insert(method.into(), offers);
    }

    fn offers_for(&self, method: &str) -> Vec<RouteOffer> {
        self.routes
            .read()
            .expect("paywall routes lock poisoned")
            .get(method)
            .cloned()
            .unwrap_or_else(|| self.default_offers.clone())
    }

    fn build_challenge(&self, method: &str) -> Result<PaymentRequired, GatewayError> {
        let accepts: Vec<PaymentRequirements> = self
            .offers_for(method)
            .into_iter()
            .map(RouteOffer::into_requirements)
            .collect();
        Ok(PaymentRequired::new(
            ResourceDescriptor {
                url: format!("/v1/x402/{method}"),
                description: format!("tool call: {method}"),
                mime_type: "application/json".to_string(),
            },
            accepts,
        ))
    }

    fn challenge_headers(&self, method: &str) -> Result<HashMap<String, String>, GatewayError> {
        let challenge = self.build_challenge(method)?;
        let encoded = encode_header(&challenge)?;
        let mut headers = HashMap::new();
        headers.insert(HEADER_PAYMENT_REQUIRED.to_string(), encoded);
        Ok(headers)
    }

    fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Route an incoming request. `headers` keys are compared
    /// case-insensitively, matching the protocol's tolerance for lowercase
    /// header names.
    pub async fn process_request(
        &self,
        method: &str,
        headers: &HashMap<String, String>,
    ) -> Result<PaywallOutcome, GatewayError> {
        let signature_header = match Self::find_header(headers, HEADER_PAYMENT_SIGNATURE) {
            None => {
                return Ok(PaywallOutcome::PaymentRequired {
                    status_code: 402,
                    headers: self.challenge_headers(method)?,
                })
            }
            Some(value) => value,
        };

        let payload: PaymentPayload = decode_header(signature_header)?;

        let accepted_requirements = self
            .offers_for(method)
            .into_iter()
            .map(RouteOffer::into_requirements)
            .find(|req| {
                req.matches(
                    &payload.accepted.scheme,
                    &payload.accepted.network,
                    &payload.accepted.asset,
                )
            });

        let requirements = match accepted_requirements {
            Some(r) => r,
            None => {
                return Ok(PaywallOutcome::PaymentRequired {
                    status_code: 402,
                    headers: self.challenge_headers(method)?,
                })
            }
        };

        if let Some(verifier) = &self.local_verifier {
            return match verifier(&payload, &requirements) {
                None => Ok(PaywallOutcome::PaymentValid {
                    payload,
                    requirements,
                    payer: None,
                }),
                Some(_reason) => Ok(PaywallOutcome::PaymentRequired {
                    status_code: 402,
                    headers: self.challenge_headers(method)?,
                }),
            };
        }

        let verify_response = self
            .facilitator
            .verify(&VerifyRequest {
                payload: payload.clone(),
                requirements: requirements.clone(),
            })
            .await?;

        if !verify_response.is_valid {
            return Ok(PaywallOutcome::PaymentRequired {
                status_code: 402,
                headers: self.challenge_headers(method)?,
            });
        }

        Ok(PaywallOutcome::PaymentValid {
            payload,
            requirements,
            payer: verify_response.payer,
        })
    }

    /// Settle a verified payment after the resource has been served. The
    /// resource is considered delivered regardless of settlement outcome;
    /// the caller surfaces failure but does not roll anything back.
    pub async fn settle(
        &self,
        payload: PaymentPayload,
        requirements: PaymentRequirements,
    ) -> Result<(SettlementResponse, HashMap<String, String>), GatewayError> {
        let settle_response = self
            .facilitator
            .settle(&SettleRequest {
                payload,
                requirements,
            })
            .await?;
        let encoded = encode_header(&settle_response)?;
        let mut headers = HashMap::new();
        headers.insert(HEADER_PAYMENT_RESPONSE.to_string(), encoded);
        Ok((settle_response, headers))
    }
}
