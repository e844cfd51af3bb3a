// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Strict regional provider selection.
//!
//! The router owns the provider registry and enforces the region lock: a
//! unit that requests region R is served by a provider in region R or not at
//! all. There is no cross-region fallback. When no region preference is
//! given, healthy providers are ordered by observed latency.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::jobs::{Region, ALL_REGIONS};
use crate::providers::client::ProviderClient;
use crate::providers::error::ProviderError;
use crate::providers::types::{
    InferenceRequest, ProviderCallOutcome, ProviderEndpoint, ProviderSnapshot,
};

/// Weight of a new observation in the latency EWMA
const LATENCY_EWMA_WEIGHT: f64 = 0.2;

/// Rolling success and latency metrics for one provider.
#[derive(Debug, Clone, Default)]
struct RollingMetrics {
    total_calls: u64,
    successes: u64,
    avg_latency_ms: f64,
}

impl RollingMetrics {
    fn record(&mut self, success: bool, latency: Duration) {
        self.total_calls += 1;
        if success {
            self.successes += 1;
        }
        let latency_ms = latency.as_secs_f64() * 1000.0;
        if self.total_calls == 1 {
            self.avg_latency_ms = latency_ms;
        } else {
            self.avg_latency_ms = self.avg_latency_ms * (1.0 - LATENCY_EWMA_WEIGHT)
                + latency_ms * LATENCY_EWMA_WEIGHT;
        }
    }

    fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            1.0
        } else {
            self.successes as f64 / self.total_calls as f64
        }
    }
}

/// One registered provider with its mutable health state.
///
/// Health is written only by the health-check task; readers observe a
/// consistent snapshot through atomics and short lock holds.
#[derive(Debug)]
pub struct ProviderState {
    name: String,
    endpoint: String,
    region: Region,
    healthy: AtomicBool,
    last_check: RwLock<Option<DateTime<Utc>>>,
    metrics: RwLock<RollingMetrics>,
}

impl ProviderState {
    fn new(config: &ProviderEndpoint) -> Self {
        Self {
            name: config.name.clone(),
            endpoint: config.endpoint.clone(),
            region: config.region,
            healthy: AtomicBool::new(false),
            last_check: RwLock::new(None),
            metrics: RwLock::new(RollingMetrics::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Record the outcome of a health probe.
    pub fn set_health(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
        *self.last_check.write() = Some(Utc::now());
    }

    /// A provider is usable when its last check succeeded and is not stale.
    pub fn is_fresh(&self, staleness: Duration) -> bool {
        if !self.healthy.load(Ordering::Acquire) {
            return false;
        }
        match *self.last_check.read() {
            Some(checked) => {
                let age = Utc::now().signed_duration_since(checked);
                age.num_milliseconds() >= 0
                    && (age.num_milliseconds() as u128) < staleness.as_millis()
            }
            None => false,
        }
    }

    fn record_outcome(&self, success: bool, latency: Duration) {
        self.metrics.write().record(success, latency);
    }

    fn avg_latency_ms(&self) -> f64 {
        self.metrics.read().avg_latency_ms
    }

    /// Point-in-time view for introspection.
    pub fn snapshot(&self) -> ProviderSnapshot {
        let metrics = self.metrics.read().clone();
        ProviderSnapshot {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            region: self.region,
            healthy: self.healthy.load(Ordering::Acquire),
            last_check: *self.last_check.read(),
            avg_latency_ms: metrics.avg_latency_ms,
            success_rate: metrics.success_rate(),
            total_calls: metrics.total_calls,
        }
    }
}

/// The provider router.
pub struct ProviderRouter {
    providers: Vec<Arc<ProviderState>>,
    client: ProviderClient,
    staleness: Duration,
}

impl ProviderRouter {
    /// Build the registry from configured endpoints.
    ///
    /// `staleness` is the window after which a passing health check no
    /// longer counts (conventionally twice the check interval).
    pub fn new(endpoints: &[ProviderEndpoint], client: ProviderClient, staleness: Duration) -> Self {
        let providers = endpoints
            .iter()
            .map(|e| Arc::new(ProviderState::new(e)))
            .collect();

        Self {
            providers,
            client,
            staleness,
        }
    }

    /// The registered providers.
    pub fn providers(&self) -> &[Arc<ProviderState>] {
        &self.providers
    }

    /// The HTTP client used for provider calls and health probes.
    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    /// Regions with at least one fresh, healthy provider.
    pub fn available_regions(&self) -> Vec<Region> {
        ALL_REGIONS
            .iter()
            .copied()
            .filter(|region| self.has_healthy_provider(*region))
            .collect()
    }

    /// Whether any fresh, healthy provider serves the region.
    pub fn has_healthy_provider(&self, region: Region) -> bool {
        self.providers
            .iter()
            .any(|p| p.region == region && p.is_fresh(self.staleness))
    }

    /// Select exactly one provider for a request.
    ///
    /// With a region preference, only healthy providers in that region are
    /// eligible; an empty set is a well-defined failure carrying the regions
    /// currently available. Without a preference, the healthy provider with
    /// the lowest observed latency wins.
    pub fn select_provider(
        &self,
        region_preference: Option<Region>,
    ) -> Result<Arc<ProviderState>, ProviderError> {
        let mut candidates: Vec<&Arc<ProviderState>> = self
            .providers
            .iter()
            .filter(|p| p.is_fresh(self.staleness))
            .filter(|p| region_preference.map_or(true, |region| p.region == region))
            .collect();

        candidates.sort_by(|a, b| {
            a.avg_latency_ms()
                .partial_cmp(&b.avg_latency_ms())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        match candidates.first().copied() {
            Some(provider) => Ok(Arc::clone(provider)),
            None => Err(ProviderError::NoHealthyProviders {
                region: region_preference.unwrap_or(Region::UsEast),
                available: self.available_regions(),
            }),
        }
    }

    /// Route and execute one inference call.
    ///
    /// Selects a provider for `region`, invokes it bounded by `timeout`, and
    /// updates the provider's rolling metrics. A 2xx body with
    /// `success: false` is reported as [`ProviderError::InferenceFailed`].
    pub async fn execute(
        &self,
        region: Region,
        request: &InferenceRequest,
        timeout: Duration,
    ) -> Result<ProviderCallOutcome, ProviderError> {
        let provider = self.select_provider(Some(region))?;

        debug!(
            provider = %provider.name,
            region = %region,
            model = %request.model,
            "routing inference call"
        );

        let result = self.client.infer(&provider.endpoint, request, timeout).await;

        match result {
            Ok((response, duration)) => {
                provider.record_outcome(response.success, duration);
                if response.success {
                    Ok(ProviderCallOutcome {
                        provider_name: provider.name.clone(),
                        provider_region: provider.region,
                        provider_endpoint: provider.endpoint.clone(),
                        response,
                        duration,
                    })
                } else {
                    let message = response
                        .error
                        .unwrap_or_else(|| "provider reported failure".to_string());
                    Err(ProviderError::InferenceFailed(message))
                }
            }
            Err(e) => {
                provider.record_outcome(false, timeout);
                Err(e)
            }
        }
    }

    /// Introspection snapshot of every provider.
    pub fn snapshots(&self) -> Vec<ProviderSnapshot> {
        self.providers.iter().map(|p| p.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str, region: Region) -> ProviderEndpoint {
        ProviderEndpoint {
            name: name.to_string(),
            endpoint: format!("http://{name}.test"),
            region,
        }
    }

    fn router_with(endpoints: &[ProviderEndpoint]) -> ProviderRouter {
        ProviderRouter::new(endpoints, ProviderClient::new(), Duration::from_secs(30))
    }

    #[test]
    fn test_unhealthy_until_checked() {
        let router = router_with(&[endpoint("p1", Region::UsEast)]);
        assert!(!router.has_healthy_provider(Region::UsEast));
        assert!(router.select_provider(Some(Region::UsEast)).is_err());
    }

    #[test]
    fn test_strict_region_selection() {
        let router = router_with(&[
            endpoint("us", Region::UsEast),
            endpoint("eu", Region::EuWest),
        ]);
        router.providers()[0].set_health(true);
        router.providers()[1].set_health(true);

        let picked = router.select_provider(Some(Region::EuWest)).unwrap();
        assert_eq!(picked.region(), Region::EuWest);
        assert_eq!(picked.name(), "eu");
    }

    #[test]
    fn test_no_cross_region_fallback() {
        let router = router_with(&[
            endpoint("us", Region::UsEast),
            endpoint("eu", Region::EuWest),
        ]);
        // Only us-east is healthy; an eu-west request must fail rather than
        // silently route across regions.
        router.providers()[0].set_health(true);

        let err = router.select_provider(Some(Region::EuWest)).unwrap_err();
        match err {
            ProviderError::NoHealthyProviders { region, available } => {
                assert_eq!(region, Region::EuWest);
                assert_eq!(available, vec![Region::UsEast]);
            }
            other => panic!("expected NoHealthyProviders, got {other:?}"),
        }
    }

    #[test]
    fn test_no_preference_prefers_low_latency() {
        let router = router_with(&[
            endpoint("slow", Region::UsEast),
            endpoint("fast", Region::EuWest),
        ]);
        router.providers()[0].set_health(true);
        router.providers()[1].set_health(true);
        router.providers()[0].record_outcome(true, Duration::from_millis(900));
        router.providers()[1].record_outcome(true, Duration::from_millis(50));

        let picked = router.select_provider(None).unwrap();
        assert_eq!(picked.name(), "fast");
    }

    #[test]
    fn test_freshness_window() {
        let provider = ProviderState::new(&endpoint("p1", Region::UsEast));
        provider.set_health(true);
        assert!(provider.is_fresh(Duration::from_secs(30)));
        // A zero-width staleness window rejects even a just-checked provider.
        assert!(!provider.is_fresh(Duration::ZERO));
    }

    #[test]
    fn test_rolling_metrics() {
        let mut metrics = RollingMetrics::default();
        metrics.record(true, Duration::from_millis(100));
        assert_eq!(metrics.avg_latency_ms, 100.0);
        metrics.record(false, Duration::from_millis(200));
        assert!(metrics.avg_latency_ms > 100.0 && metrics.avg_latency_ms < 200.0);
        assert_eq!(metrics.success_rate(), 0.5);
    }
}
