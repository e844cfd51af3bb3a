// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Response classification.
//!
//! Every completed response is tagged with one of three labels by
//! inspecting the text. The label is informational: it never changes an
//! execution's status and never triggers a retry.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Responses shorter than this (after trimming) are considered technical
/// noise rather than an answer.
pub const MIN_SUBSTANTIVE_LEN: usize = 20;

/// Three-way response classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// A real answer to the question
    Substantive,
    /// The model declined to engage with the question
    ContentRefusal,
    /// Empty, truncated, or error-shaped output
    TechnicalError,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Substantive => "substantive",
            Self::ContentRefusal => "content_refusal",
            Self::TechnicalError => "technical_error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn refusal_regex() -> &'static Regex {
    static REFUSAL_REGEX: OnceLock<Regex> = OnceLock::new();
    REFUSAL_REGEX.get_or_init(|| {
        Regex::new(
            r"(?i)\b(i\s+(can(no|')t|cannot|won't|will not|am (not able|unable))\s+(to\s+)?(help|assist|answer|discuss|comment|provide|engage)|i'?m\s+(sorry|afraid|not able|unable)|as an ai(\s+(language\s+)?model)?,?\s+i\s+(can(no|')t|cannot|don't|do not)|i\s+must\s+decline|i\s+(don't|do not)\s+feel\s+comfortable)\b",
        )
        .expect("refusal pattern compiles")
    })
}

fn technical_regex() -> &'static Regex {
    static TECHNICAL_REGEX: OnceLock<Regex> = OnceLock::new();
    TECHNICAL_REGEX.get_or_init(|| {
        Regex::new(
            r"(?i)\b(internal server error|service unavailable|bad gateway|gateway time-?out|upstream (error|time-?out)|connection (reset|refused)|rate limit(ed)? exceeded)\b",
        )
        .expect("technical pattern compiles")
    })
}

/// Classify a completed response text.
pub fn classify(text: &str) -> Classification {
    let trimmed = text.trim();

    if trimmed.is_empty() || technical_regex().is_match(trimmed) {
        return Classification::TechnicalError;
    }

    if refusal_regex().is_match(trimmed) {
        return Classification::ContentRefusal;
    }

    if trimmed.len() < MIN_SUBSTANTIVE_LEN {
        return Classification::TechnicalError;
    }

    Classification::Substantive
}
