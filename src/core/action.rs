use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Oracle vocabulary. Anything outside the table is kept verbatim as
/// `Unrecognized` and never actuates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Wait,
    Fold,
    Check,
    Call,
    Raise,
    Bet,
    SitBack,
    Unrecognized(String),
}

/// Dispatcher vocabulary: one entry per calibrated input target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gesture {
    #[serde(rename = "FOLD")]
    Fold,
    #[serde(rename = "CHECK/CALL")]
    CheckCall,
    #[serde(rename = "RAISE")]
    Raise,
    #[serde(rename = "SIT_BACK")]
    SitBack,
}

impl Action {
    pub fn parse(raw: &str) -> Self {
        let word = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match word.as_str() {
            "WAIT" => Action::Wait,
            "FOLD" => Action::Fold,
            "CHECK" => Action::Check,
            "CALL" | "IGUALAR" => Action::Call,
            "RAISE" => Action::Raise,
            "BET" => Action::Bet,
            "SIT_BACK" | "SITBACK" => Action::SitBack,
            _ => Action::Unrecognized(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Wait => "WAIT",
            Action::Fold => "FOLD",
            Action::Check => "CHECK",
            Action::Call => "CALL",
            Action::Raise => "RAISE",
            Action::Bet => "BET",
            Action::SitBack => "SIT_BACK",
            Action::Unrecognized(s) => s,
        }
    }

    /// Actions that only make sense while it is the actor's turn.
    pub fn requires_turn(&self) -> bool {
        matches!(
            self,
            Action::Fold | Action::Check | Action::Call | Action::Raise | Action::Bet
        )
    }

    pub fn gesture(&self) -> Option<Gesture> {
        match self {
            Action::Fold => Some(Gesture::Fold),
            Action::Check | Action::Call => Some(Gesture::CheckCall),
            Action::Raise | Action::Bet => Some(Gesture::Raise),
            Action::SitBack => Some(Gesture::SitBack),
            Action::Wait | Action::Unrecognized(_) => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Action::parse(&raw))
    }
}

impl Gesture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gesture::Fold => "FOLD",
            Gesture::CheckCall => "CHECK/CALL",
            Gesture::Raise => "RAISE",
            Gesture::SitBack => "SIT_BACK",
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
