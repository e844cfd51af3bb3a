// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared types for provider interactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::time::Duration;

use crate::jobs::Region;

/// Default sampling temperature for bias probes
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Default completion budget
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// The payload sent to a provider's inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceRequest {
    /// Model identifier
    pub model: String,
    /// Prompt text, already prefixed with the regional system phrase
    pub prompt: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Completion budget
    pub max_tokens: u32,
    /// The unit's requested region, echoed so the provider can log it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_preference: Option<Region>,
}

impl InferenceRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            region_preference: None,
        }
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region_preference = Some(region);
        self
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// A provider's inference response body.
///
/// The serialization is opaque to the core beyond success/failure and
/// response-text extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceResponse {
    /// Whether the provider considers the call successful
    pub success: bool,
    /// Response text
    #[serde(default)]
    pub response: Option<String>,
    /// Token usage
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    /// Provider-reported error
    #[serde(default)]
    pub error: Option<String>,
}

impl InferenceResponse {
    /// Extract the response text, empty when absent.
    pub fn text(&self) -> &str {
        self.response.as_deref().unwrap_or("")
    }
}

/// A provider endpoint as configured at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProviderEndpoint {
    /// Provider name
    #[validate(min_length = 1)]
    pub name: String,
    /// Base URL of the inference endpoint
    #[validate(min_length = 1)]
    pub endpoint: String,
    /// The single canonical region this provider serves
    pub region: Region,
}

/// Point-in-time view of a provider's health and rolling metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub name: String,
    pub endpoint: String,
    pub region: Region,
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    /// Exponentially weighted average latency (milliseconds)
    pub avg_latency_ms: f64,
    /// Fraction of calls that succeeded
    pub success_rate: f64,
    pub total_calls: u64,
}

/// The result of a successful routed call.
#[derive(Debug, Clone)]
pub struct ProviderCallOutcome {
    /// Name of the provider that served the call
    pub provider_name: String,
    /// The provider's canonical region (always the requested region)
    pub provider_region: Region,
    /// The provider's endpoint URL
    pub provider_endpoint: String,
    /// Parsed response body
    pub response: InferenceResponse,
    /// Wall-clock duration of the call
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = InferenceRequest::new("m1", "hello").with_region(Region::UsEast);
        assert_eq!(request.model, "m1");
        assert_eq!(request.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(request.region_preference, Some(Region::UsEast));
    }

    #[test]
    fn test_request_serializes_region_preference() {
        let request = InferenceRequest::new("m1", "hello").with_region(Region::EuWest);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["region_preference"], "eu-west");

        let without = InferenceRequest::new("m1", "hello");
        let json = serde_json::to_value(&without).unwrap();
        assert!(json.get("region_preference").is_none());
    }

    #[test]
    fn test_response_text_extraction() {
        let response = InferenceResponse {
            success: true,
            response: Some("answer".to_string()),
            usage: None,
            error: None,
        };
        assert_eq!(response.text(), "answer");

        let empty = InferenceResponse {
            success: false,
            response: None,
            usage: None,
            error: Some("overloaded".to_string()),
        };
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn test_response_parses_minimal_body() {
        let response: InferenceResponse =
            serde_json::from_str(r#"{"success": true, "response": "ok"}"#).unwrap();
        assert!(response.success);
        assert_eq!(response.text(), "ok");
        assert!(response.usage.is_none());
    }
}
