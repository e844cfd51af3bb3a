// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types for provider routing and calls.
//!
//! The taxonomy matters to the scheduler: transient transport failures are
//! retried per policy, deterministic provider rejections are not, and a
//! region with no healthy provider parks the unit on the global retry queue.

use std::time::Duration;
use thiserror::Error;

use crate::jobs::Region;

/// Errors that can occur when selecting or calling a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No healthy provider serves the requested region. There is never a
    /// cross-region fallback; the unit waits for the region to recover.
    #[error("No healthy providers for region {region}; available regions: {available:?}")]
    NoHealthyProviders {
        /// The region the unit requested
        region: Region,
        /// Regions that currently have at least one healthy provider
        available: Vec<Region>,
    },

    /// The provider call exceeded the per-call timeout.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The provider returned a non-2xx response.
    #[error("API error: {status} - {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the provider
        message: String,
    },

    /// A network error occurred while communicating with the provider.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Failed to parse the provider's response.
    #[error("JSON parsing error: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The provider answered 2xx but reported failure in the body.
    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    /// An internal routing error occurred.
    #[error("Router internal error: {0}")]
    InternalError(String),
}

impl ProviderError {
    /// Returns `true` if a retry of the unit might succeed.
    ///
    /// Deterministic provider rejections (4xx) and malformed responses are
    /// not retryable; everything transport-shaped is.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::NoHealthyProviders { .. } => true,
            ProviderError::Timeout(_) => true,
            ProviderError::NetworkError(_) => true,
            ProviderError::InferenceFailed(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` when the error means the region has no serving
    /// capacity right now.
    pub fn is_no_provider(&self) -> bool {
        matches!(self, ProviderError::NoHealthyProviders { .. })
    }
}
