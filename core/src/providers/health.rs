// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provider health monitoring.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::providers::router::ProviderRouter;

/// Default interval between provider health checks
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Background task probing every provider's health endpoint on a fixed
/// interval. Health flags are only ever written here; the router reads them.
pub struct HealthChecker {
    router: Arc<ProviderRouter>,
    check_interval: Duration,
}

impl HealthChecker {
    pub fn new(router: Arc<ProviderRouter>, check_interval: Duration) -> Self {
        Self {
            router,
            check_interval,
        }
    }

    /// Run until the shutdown token fires. The first sweep happens
    /// immediately so providers become eligible without waiting a full
    /// interval.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            providers = self.router.providers().len(),
            interval_secs = self.check_interval.as_secs(),
            "health checker starting"
        );

        let mut ticker = interval(self.check_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.check_all().await,
            }
        }

        info!("health checker stopped");
    }

    /// Probe every provider once.
    pub async fn check_all(&self) {
        for provider in self.router.providers() {
            let healthy = self.router.client().check_health(provider.endpoint()).await;
            let was_fresh = provider.is_fresh(self.check_interval * 2);
            provider.set_health(healthy);

            if healthy && !was_fresh {
                debug!(provider = %provider.name(), region = %provider.region(), "provider healthy");
            } else if !healthy && was_fresh {
                warn!(provider = %provider.name(), region = %provider.region(), "provider unhealthy");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Region;
    use crate::providers::client::ProviderClient;
    use crate::providers::types::ProviderEndpoint;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_check_all_marks_health() {
        let healthy_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&healthy_server)
            .await;

        let endpoints = vec![
            ProviderEndpoint {
                name: "up".to_string(),
                endpoint: healthy_server.uri(),
                region: Region::UsEast,
            },
            ProviderEndpoint {
                name: "down".to_string(),
                endpoint: "http://127.0.0.1:1".to_string(),
                region: Region::EuWest,
            },
        ];

        let router = Arc::new(ProviderRouter::new(
            &endpoints,
            ProviderClient::new(),
            Duration::from_secs(30),
        ));
        let checker = HealthChecker::new(Arc::clone(&router), Duration::from_secs(15));

        checker.check_all().await;

        assert!(router.has_healthy_provider(Region::UsEast));
        assert!(!router.has_healthy_provider(Region::EuWest));
    }
}
