//! The pricing engine: tier catalog lookups and a gateway-wide exponentially
//! smoothed latency average, grounded on the bundler's fee EMA but without
//! its trend-regression machinery — the gateway only needs a single
//! smoothed figure, not fee-bump prediction.

use std::collections::HashMap;
use std::sync::RwLock;

use gateway_types::PricingTier;

const LATENCY_EMA_ALPHA: f64 = 0.2;

/// Owns the tier catalog (defaults + per-method + bundle overrides) and the
/// gateway-wide average latency.
pub struct PricingEngine {
    default_tiers: Vec<PricingTier>,
    method_tiers: RwLock<HashMap<String, Vec<PricingTier>>>,
    bundle_overrides: RwLock<HashMap<String, Vec<PricingTier>>>,
    avg_latency_ms: RwLock<Option<f64>>,
}

impl PricingEngine {
    pub fn new(default_tiers: Vec<PricingTier>) -> Self {
        Self {
            default_tiers,
            method_tiers: RwLock::new(HashMap::new()),
            bundle_overrides: RwLock::new(HashMap::new()),
            avg_latency_ms: RwLock::new(None),
        }
    }

    /// Register tiers specific to a method, taking priority over defaults.
    pub fn register_method_tiers(&self, method: impl Into<String>, tiers: Vec<PricingTier>) {
        self.method_tiers
            .write()
            .expect("pricing method_tiers lock poisoned")
            .insert(method.into(), tiers);
    }

    /// Register tier overrides that apply to every method in a bundle.
    pub fn register_bundle_overrides(&self, methods: &[String], tiers: Vec<PricingTier>) {
        let mut overrides = self
            .bundle_overrides
            .write()
            .expect("pricing bundle_overrides lock poisoned");
        for method in methods {
            overrides.insert(method.clone(), tiers.clone());
        }
    }

    /// Linear scan by tier id over the relevant tier list for the given
    /// method context (or the default catalog when `method` is `None`).
    pub fn get_tier(&self, tier_id: &str, method: Option<&str>) -> Option<PricingTier> {
        let candidates = match method {
            Some(m) => self.tiers_for_method(m),
            None => self.default_tiers.clone(),
        };
        candidates.into_iter().find(|t| t.tier_id == tier_id)
    }

    /// Resolve the tier list for a method: bundle override first, then a
    /// method-specific registration, else the default catalog.
    pub fn tiers_for_method(&self, method: &str) -> Vec<PricingTier> {
        if let Some(tiers) = self
            .bundle_overrides
            .read()
            .expect("pricing bundle_overrides lock poisoned")
            .get(method)
        {
            return tiers.clone();
        }
        if let Some(tiers) = self
            .method_tiers
            .read()
            .expect("pricing method_tiers lock poisoned")
            .get(method)
        {
            return tiers.clone();
        }
        self.default_tiers.clone()
    }

    /// Fold one more latency observation into the gateway-wide EMA. The
    /// first sample seeds the average rather than blending against zero.
    pub fn report_latency(&self, ms: f64) {
        let mut avg = self
            .avg_latency_ms
            .write()
            .expect("pricing avg_latency_ms lock poisoned");
        *avg = Some(match *avg {
            None => ms,
            Some(prev) => LATENCY_EMA_ALPHA * ms + (1.0 - LATENCY_EMA_ALPHA) * prev,
        });
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.avg_latency_ms
            .read()
            .expect("pricing avg_latency_ms lock poisoned")
            .unwrap_or(0.0)
    }
}
