// src/core/fingerprint.rs - Decision situation identity

use super::action::Action;
use super::oracle::Recommendation;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const UNKNOWN: &str = "?";

/// Identifies "the same decision situation recommended again".
/// Rationale text never takes part in equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub subject_cards: String,
    pub context: String,
    pub action: Action,
}

impl Fingerprint {
    pub fn new(subject_cards: &str, context: &str, action: Action) -> Self {
        Self {
            subject_cards: normalize(subject_cards),
            context: normalize(context),
            action,
        }
    }
}

impl From<&Recommendation> for Fingerprint {
    fn from(rec: &Recommendation) -> Self {
        Self::new(&rec.subject_cards, &rec.context, rec.action.clone())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.subject_cards, self.context, self.action)
    }
}

fn normalize(field: &str) -> String {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        UNKNOWN.to_string()
    } else {
        trimmed.to_string()
    }
}
