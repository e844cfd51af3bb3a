// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! HTTP client for provider endpoints.

use reqwest::header::CONTENT_TYPE;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::providers::error::ProviderError;
use crate::providers::types::{InferenceRequest, InferenceResponse};

/// Default timeout for health probes
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin HTTP client over provider endpoints.
///
/// Per-call timeouts are set per request rather than on the client, because
/// each job carries its own provider deadline.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
}

impl ProviderClient {
    /// Create a new provider client.
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { http }
    }

    /// Call a provider's inference endpoint.
    ///
    /// Distinguishes timeouts, network errors, non-2xx responses, and
    /// malformed bodies; the parsed body is returned as-is (a 2xx body with
    /// `success: false` is the router's concern).
    pub async fn infer(
        &self,
        endpoint: &str,
        request: &InferenceRequest,
        timeout: Duration,
    ) -> Result<(InferenceResponse, Duration), ProviderError> {
        trace!(endpoint, model = %request.model, "dispatching inference request");
        let started = Instant::now();

        let result = self
            .http
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(request)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(ProviderError::Timeout(timeout)),
            Err(e) => return Err(ProviderError::NetworkError(e)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(ProviderError::Timeout(timeout)),
            Err(e) => return Err(ProviderError::NetworkError(e)),
        };

        if !status.is_success() {
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: InferenceResponse = serde_json::from_str(&body)?;
        let duration = started.elapsed();

        debug!(
            endpoint,
            model = %request.model,
            success = parsed.success,
            duration_ms = duration.as_millis() as u64,
            "inference request finished"
        );

        Ok((parsed, duration))
    }

    /// Probe a provider's health endpoint. Any 2xx counts as healthy.
    pub async fn check_health(&self, endpoint: &str) -> bool {
        let url = format!("{}/health", endpoint.trim_end_matches('/'));

        match self
            .http
            .get(&url)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                trace!(endpoint, error = %e, "health probe failed");
                false
            }
        }
    }
}

impl Default for ProviderClient {
    fn default() -> Self {
        Self::new()
    }
}
