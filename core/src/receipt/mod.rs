// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Receipt assembly.
//!
//! After a provider returns, the scheduler assembles one canonical receipt
//! per execution: the request parameters (with a prompt hash rather than the
//! full prompt), the provider that served the call, timing, the response
//! classification, and the raw response text. The execution row persists the
//! receipt as an opaque JSON payload.

pub mod classify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::jobs::Region;
use crate::providers::ProviderCallOutcome;

pub use classify::{classify, Classification, MIN_SUBSTANTIVE_LEN};

/// Request parameters captured on the receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptRequest {
    pub model_id: String,
    pub question_id: Option<String>,
    /// SHA-256 of the full prompt text, hex encoded
    pub prompt_sha256: String,
    /// The regional system-prompt phrase derived from the canonical region
    pub system_prompt: String,
}

/// Provider metadata captured on the receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptProvider {
    pub name: String,
    pub region: Region,
    pub endpoint: String,
}

/// Timing captured on the receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptTiming {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration of the provider call (milliseconds)
    pub provider_duration_ms: u64,
}

/// The canonical per-execution record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Receipt {
    pub request: ReceiptRequest,
    pub provider: ReceiptProvider,
    pub timing: ReceiptTiming,
    pub classification: Classification,
    pub response_text: String,
}

impl Receipt {
    /// Assemble a receipt from a successful routed call.
    pub fn assemble(
        model_id: &str,
        question_id: Option<&str>,
        prompt: &str,
        region: Region,
        outcome: &ProviderCallOutcome,
        started_at: DateTime<Utc>,
    ) -> Self {
        let response_text = outcome.response.text().to_string();

        Self {
            request: ReceiptRequest {
                model_id: model_id.to_string(),
                question_id: question_id.map(str::to_string),
                prompt_sha256: sha256_hex(prompt),
                system_prompt: region.system_prompt_phrase(),
            },
            provider: ReceiptProvider {
                name: outcome.provider_name.clone(),
                region: outcome.provider_region,
                endpoint: outcome.provider_endpoint.clone(),
            },
            timing: ReceiptTiming {
                started_at,
                completed_at: Utc::now(),
                provider_duration_ms: duration_ms(outcome.duration),
            },
            classification: classify(&response_text),
            response_text,
        }
    }

    /// Serialize for the execution row's opaque receipt column.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Hex-encoded SHA-256 digest.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{InferenceResponse, ProviderCallOutcome};

    fn outcome(text: &str) -> ProviderCallOutcome {
        ProviderCallOutcome {
            provider_name: "modal-us".to_string(),
            provider_region: Region::UsEast,
            provider_endpoint: "https://us.example.com".to_string(),
            response: InferenceResponse {
                success: true,
                response: Some(text.to_string()),
                usage: None,
                error: None,
            },
            duration: Duration::from_millis(420),
        }
    }

    #[test]
    fn test_sha256_hex_stable() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_assemble_receipt() {
        let started_at = Utc::now();
        let receipt = Receipt::assemble(
            "m1",
            Some("q1"),
            "full prompt text",
            Region::UsEast,
            &outcome("A considered answer that is long enough to count."),
            started_at,
        );

        assert_eq!(receipt.request.model_id, "m1");
        assert_eq!(receipt.request.question_id.as_deref(), Some("q1"));
        assert_eq!(receipt.request.prompt_sha256, sha256_hex("full prompt text"));
        assert!(receipt
            .request
            .system_prompt
            .contains(Region::UsEast.display_name()));
        assert_eq!(receipt.provider.name, "modal-us");
        assert_eq!(receipt.provider.region, Region::UsEast);
        assert_eq!(receipt.timing.provider_duration_ms, 420);
        assert_eq!(receipt.classification, Classification::Substantive);
    }

    #[test]
    fn test_receipt_round_trips_as_json() {
        let receipt = Receipt::assemble(
            "m1",
            None,
            "prompt",
            Region::EuWest,
            &outcome("I cannot help with that."),
            Utc::now(),
        );
        assert_eq!(receipt.classification, Classification::ContentRefusal);

        let json = receipt.to_json();
        let back: Receipt = serde_json::from_value(json).unwrap();
        assert_eq!(back, receipt);
    }
}
