// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Provider routing and health.
//!
//! Providers are opaque HTTP inference services, each pinned to exactly one
//! canonical region. This module owns the registry built from configuration,
//! the background health checker, and the router that selects exactly one
//! healthy provider per call under the strict region lock.

pub mod client;
pub mod error;
pub mod health;
pub mod router;
pub mod types;

pub use client::ProviderClient;
pub use error::ProviderError;
pub use health::{HealthChecker, DEFAULT_HEALTH_CHECK_INTERVAL};
pub use router::{ProviderRouter, ProviderState};
pub use types::{
    InferenceRequest, InferenceResponse, ProviderCallOutcome, ProviderEndpoint, ProviderSnapshot,
    TokenUsage,
};
