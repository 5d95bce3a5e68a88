//! Core runtime for the agent gateway: session metering, the attestation
//! pipeline, the tool marketplace, the 402 payment protocol on both sides of
//! the wire, and the orchestrator tying all of it together.

pub mod attester;
pub mod events;
pub mod facilitator;
pub mod gateway;
pub mod marketplace;
pub mod payment_client;
pub mod paywall;
pub mod pricing;
pub mod session;
pub mod signing;
pub mod transport;

pub use attester::ResponseAttester;
pub use events::{EventBus, Handler, SubscriptionId};
pub use facilitator::FacilitatorClient;
pub use gateway::{Gateway, GatewayMetrics, OpenSessionOptions};
pub use marketplace::{Marketplace, SearchQuery, SortDirection, SortKey};
pub use payment_client::{PaymentClient, PaymentSigner};
pub use paywall::{Paywall, PaywallOutcome, RouteOffer};
pub use pricing::PricingEngine;
pub use session::Session;
pub use signing::Ed25519Signer;
pub use transport::{EchoTransport, NullTransport, Signer, Transport};
