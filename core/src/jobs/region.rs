// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Canonical geographic regions.
//!
//! Every execution is pinned to exactly one canonical region. Submitters may
//! use looser aliases (`US`, `EU`, `APAC`, ...); those are normalized during
//! JobSpec ingestion and never leak past the domain boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A canonical inference region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// United States, east coast
    UsEast,
    /// Western Europe
    EuWest,
    /// Asia-Pacific
    AsiaPacific,
}

/// All canonical regions, in fixed canonical order.
pub const ALL_REGIONS: [Region; 3] = [Region::UsEast, Region::EuWest, Region::AsiaPacific];

/// Error for unrecognized region names
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown region: {0}")]
pub struct UnknownRegion(pub String);

impl Region {
    /// Canonical string form (`us-east`, `eu-west`, `asia-pacific`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsEast => "us-east",
            Self::EuWest => "eu-west",
            Self::AsiaPacific => "asia-pacific",
        }
    }

    /// Human-readable region name used when deriving prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::UsEast => "the United States (East)",
            Self::EuWest => "Western Europe",
            Self::AsiaPacific => "the Asia-Pacific region",
        }
    }

    /// The system-prompt phrase attached to every request served from this
    /// region, derived from the canonical region name.
    pub fn system_prompt_phrase(&self) -> String {
        format!(
            "You are an AI assistant responding to a user located in {}.",
            self.display_name()
        )
    }

    /// Parse a canonical name or a submitter alias.
    ///
    /// Accepts the canonical forms plus the aliases submitters have
    /// historically used (`US`, `USA`, `EU`, `EUROPE`, `ASIA`, `APAC`, and
    /// underscore variants). Matching is case-insensitive.
    pub fn parse(s: &str) -> Result<Self, UnknownRegion> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "us-east" | "us" | "usa" | "us-east-1" | "united-states" => Ok(Self::UsEast),
            "eu-west" | "eu" | "europe" | "eu-west-1" => Ok(Self::EuWest),
            "asia-pacific" | "asia" | "apac" | "ap" | "asia-pacific-1" => Ok(Self::AsiaPacific),
            _ => Err(UnknownRegion(s.to_string())),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Region {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Deserialization goes through the alias parser so submitted specs are
// normalized on ingestion.
impl<'de> Deserialize<'de> for Region {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
