//! The tool marketplace: listings, bundles, and seller reputation scoring.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use gateway_types::{ListingsByMethod, ReputationSample, ToolBundle, ToolListing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Price,
    Reputation,
    Latency,
    Uptime,
    TotalServed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A marketplace search query. All filters are optional and compose with
/// AND semantics, except `tags`, which is a union match against a listing's
/// tag-like commitment set.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub method: Option<String>,
    pub method_substring: bool,
    pub seller_id: Option<String>,
    pub max_price: Option<gateway_types::BigAmount>,
    pub min_reputation: Option<u32>,
    pub min_uptime: Option<f64>,
    pub attestation_required: Option<bool>,
    pub region: Option<String>,
    pub tags: Vec<String>,
    pub sort: Option<SortKey>,
    pub direction: SortDirection,
    pub offset: usize,
    pub limit: usize,
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Ascending
    }
}

impl SearchQuery {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }
}

/// Owns the listings, bundles, and reputation tables. All mutating
/// operations take a write lock covering the whole map; this mirrors the
/// "process-wide mutable state behind a lock" discipline used for
/// gateway-level tables.
pub struct Marketplace {
    listings: RwLock<ListingsByMethod>,
    bundles: RwLock<HashMap<String, ToolBundle>>,
    reputation: RwLock<HashMap<String, ReputationSample>>,
}

impl Marketplace {
    pub fn new() -> Self {
        Self {
            listings: RwLock::new(HashMap::new()),
            bundles: RwLock::new(HashMap::new()),
            reputation: RwLock::new(HashMap::new()),
        }
    }

    /// Publish (or overwrite) a seller's listing for a method.
    pub fn publish(&self, listing: ToolListing) {
        let mut listings = self.listings.write().expect("listings lock poisoned");
        listings
            .entry(listing.method.clone())
            .or_default()
            .insert(listing.seller.agent_id.clone(), listing);
    }

    pub fn publish_bundle(&self, bundle: ToolBundle) {
        self.bundles
            .write()
            .expect("bundles lock poisoned")
            .insert(bundle.bundle_id.clone(), bundle);
    }

    pub fn get_listing(&self, method: &str, seller_id: &str) -> Option<ToolListing> {
        self.listings
            .read()
            .expect("listings lock poisoned")
            .get(method)
            .and_then(|sellers| sellers.get(seller_id))
            .cloned()
    }

    /// Record an attestation outcome for a seller, update their EMA latency
    /// and composite score, then propagate the refreshed figures onto every
    /// listing that seller owns.
    pub fn report_attestation(&self, seller_id: &str, verified: bool, latency_ms: f64) {
        let score;
        let avg_latency_ms;
        let total_served;
        {
            let mut reputation = self.reputation.write().expect("reputation lock poisoned");
            let sample = reputation
                .entry(seller_id.to_string())
                .or_insert_with(|| ReputationSample::new(Utc::now()));
            sample.total_attestations += 1;
            if verified {
                sample.verified_attestations += 1;
            }
            sample.total_calls += 1;
            sample.avg_latency_ms = if sample.total_calls == 1 {
                latency_ms
            } else {
                0.1 * latency_ms + 0.9 * sample.avg_latency_ms
            };
            sample.last_updated = Utc::now();
            score = sample.score();
            avg_latency_ms = sample.avg_latency_ms;
            total_served = sample.total_calls;
        }

        let mut listings = self.listings.write().expect("listings lock poisoned");
        let now = Utc::now();
        for sellers in listings.values_mut() {
            if let Some(listing) = sellers.get_mut(seller_id) {
                listing.reputation_score = score;
                listing.avg_latency_ms = avg_latency_ms;
                listing.total_served = total_served;
                listing.updated_at = now;
            }
        }
    }

    pub fn reputation_of(&self, seller_id: &str) -> Option<ReputationSample> {
        self.reputation
            .read()
            .expect("reputation lock poisoned")
            .get(seller_id)
            .cloned()
    }

    /// Apply filters, then sort, then paginate, in that order.
    pub fn search(&self, query: &SearchQuery) -> Vec<ToolListing> {
        let listings = self.listings.read().expect("listings lock poisoned");
        let mut matches: Vec<ToolListing> = listings
            .iter()
            .filter(|(method, _)| match (&query.method, query.method_substring) {
                (None, _) => true,
                (Some(m), true) => method.to_lowercase().contains(&m.to_lowercase()),
                (Some(m), false) => *method == m,
            })
            .flat_map(|(_, sellers)| sellers.values().cloned())
            .filter(|listing| {
                query
                    .seller_id
                    .as_ref()
                    .map(|s| listing.seller.agent_id == *s)
                    .unwrap_or(true)
            })
            .filter(|listing| {
                query
                    .max_price
                    .as_ref()
                    .map(|max| listing.cheapest_price <= *max)
                    .unwrap_or(true)
            })
            .filter(|listing| {
                query
                    .min_reputation
                    .map(|min| listing.reputation_score >= min)
                    .unwrap_or(true)
            })
            .filter(|listing| {
                query
                    .min_uptime
                    .map(|min| listing.uptime_percentage >= min)
                    .unwrap_or(true)
            })
            .filter(|listing| {
                query
                    .attestation_required
                    .map(|required| listing.attestation_available == required)
                    .unwrap_or(true)
            })
            .filter(|listing| {
                query
                    .region
                    .as_ref()
                    .map(|r| listing.region.as_deref() == Some(r.as_str()))
                    .unwrap_or(true)
            })
            .filter(|listing| {
                if query.tags.is_empty() {
                    return true;
                }
                query.tags.iter().any(|tag| listing.commitments.contains(tag))
            })
            .collect();

        if let Some(sort) = query.sort {
            matches.sort_by(|a, b| {
                let ordering = match sort {
                    SortKey::Price => a.cheapest_price.cmp(&b.cheapest_price),
                    SortKey::Reputation => a.reputation_score.cmp(&b.reputation_score),
                    SortKey::Latency => a
                        .avg_latency_ms
                        .partial_cmp(&b.avg_latency_ms)
                        .unwrap_or(Ordering::Equal),
                    SortKey::Uptime => a
                        .uptime_percentage
                        .partial_cmp(&b.uptime_percentage)
                        .unwrap_or(Ordering::Equal),
                    SortKey::TotalServed => a.total_served.cmp(&b.total_served),
                };
                match query.direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }

        matches.into_iter().skip(query.offset).take(query.limit.max(1)).collect()
    }

    pub fn cheapest(&self, method: &str) -> Option<ToolListing> {
        let mut query = SearchQuery::new();
        query.method = Some(method.to_string());
        query.sort = Some(SortKey::Price);
        query.limit = 1;
        self.search(&query).into_iter().next()
    }

    pub fn highest_reputation(&self, method: &str) -> Option<ToolListing> {
        let mut query = SearchQuery::new();
        query.method = Some(method.to_string());
        query.sort = Some(SortKey::Reputation);
        query.direction = SortDirection::Descending;
        query.limit = 1;
        self.search(&query).into_iter().next()
    }

    pub fn fastest(&self, method: &str) -> Option<ToolListing> {
        let mut query = SearchQuery::new();
        query.method = Some(method.to_string());
        query.sort = Some(SortKey::Latency);
        query.limit = 1;
        self.search(&query).into_iter().next()
    }
}

impl Default for Marketplace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::AgentIdentity;

    fn sample_listing(method: &str, seller_id: &str) -> ToolListing {
        let now = Utc::now();
        ToolListing {
            method: method.to_string(),
            description: "desc".to_string(),
            seller: AgentIdentity::new(seller_id, "Seller", "0xabc"),
            available_tiers: vec!["standard".to_string()],
            cheapest_price: gateway_types::BigAmount::from(100u64),
            avg_latency_ms: 100.0,
            uptime_percentage: 99.9,
            total_served: 0,
            reputation_score: 0,
            attestation_available: true,
            region: Some("us-east".to_string()),
            commitments: vec!["finalized".to_string()],
            listed_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn publish_then_search_by_method() {
        let marketplace = Marketplace::new();
        marketplace.publish(sample_listing("m1", "seller1"));
        let mut query = SearchQuery::new();
        query.method = Some("m1".to_string());
        let results = marketplace.search(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].seller.agent_id, "seller1");
    }

    #[test]
    fn report_attestation_updates_all_listings_for_seller() {
        let marketplace = Marketplace::new();
        marketplace.publish(sample_listing("m1", "seller1"));
        marketplace.publish(sample_listing("m2", "seller1"));
        marketplace.report_attestation("seller1", true, 50.0);
        let listing = marketplace.get_listing("m1", "seller1").unwrap();
        assert!(listing.reputation_score > 0);
        let listing2 = marketplace.get_listing("m2", "seller1").unwrap();
        assert_eq!(listing2.reputation_score, listing.reputation_score);
    }

    #[test]
    fn search_respects_min_reputation_filter() {
        let marketplace = Marketplace::new();
        marketplace.publish(sample_listing("m1", "seller1"));
        let mut query = SearchQuery::new();
        query.min_reputation = Some(500);
        assert!(marketplace.search(&query).is_empty());
    }

    #[test]
    fn pagination_applies_after_filter_and_sort() {
        let marketplace = Marketplace::new();
        for i in 0..5 {
            marketplace.publish(sample_listing("m1", &format!("seller{i}")));
        }
        let mut query = SearchQuery::new();
        query.method = Some("m1".to_string());
        query.offset = 2;
        query.limit = 2;
        let results = marketplace.search(&query);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn cheapest_is_single_result() {
        let marketplace = Marketplace::new();
        marketplace.publish(sample_listing("m1", "seller1"));
        marketplace.publish(sample_listing("m1", "seller2"));
        let result = marketplace.cheapest("m1");
        assert!(result.is_some());
    }
}
