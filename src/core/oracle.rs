use super::action::Action;
use super::snapshot::Snapshot;
use super::state::{Profile, VigilConfig};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

pub const FAST_VERIFY_PROMPT: &str =
    r#"QUICK CHECK: Is it the actor's turn right now? Answer only { "is_actor_turn": true/false }"#;

const RESPONSE_SCHEMA: &str = r#"Respond with JSON only:
{ "is_actor_turn": true/false, "subject_cards": "...", "context": "...", "action": "WAIT/FOLD/CHECK/CALL/RAISE/BET/SIT_BACK", "rationale": "...", "metrics": { "name": value } }"#;

#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("oracle rate limit reached (HTTP 429)")]
    RateLimited,
    #[error("oracle transport failure: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        OracleError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleMode {
    Full,
    FastVerify,
}

pub struct OracleRequest<'a> {
    pub snapshot: &'a Snapshot,
    pub credential: &'a str,
    pub profile: &'a Profile,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Recommendation {
    #[serde(default, alias = "is_hero_turn", deserialize_with = "asserted_true")]
    pub is_actor_turn: bool,
    #[serde(alias = "recommendation")]
    pub action: Action,
    #[serde(default, alias = "hero_cards", deserialize_with = "loose_string")]
    pub subject_cards: String,
    #[serde(default, alias = "board", deserialize_with = "loose_string")]
    pub context: String,
    #[serde(default, alias = "reasoning", deserialize_with = "loose_string")]
    pub rationale: String,
    #[serde(default, alias = "math")]
    pub metrics: Option<Map<String, Value>>,
}

impl Recommendation {
    /// "Wait" outright, or a turn-bound action offered outside the actor's turn.
    pub fn is_waiting(&self) -> bool {
        self.action == Action::Wait || (self.action.requires_turn() && !self.is_actor_turn)
    }
}

#[derive(Debug, Deserialize)]
struct TurnCheck {
    #[serde(default, alias = "is_hero_turn", deserialize_with = "asserted_true")]
    is_actor_turn: bool,
}

/// Turn validity is authoritative only when the payload says literally `true`.
fn asserted_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value == Value::Bool(true))
}

fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_string(),
    })
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Full recommendation: turn status, action and rationale.
    async fn recommend(&self, request: OracleRequest<'_>) -> Result<Recommendation, OracleError>;

    /// Cheap re-check that the actuation window is still open.
    async fn verify_turn(&self, request: OracleRequest<'_>) -> Result<bool, OracleError>;
}

pub struct GeminiOracle {
    pub client: reqwest::Client,
    pub api_base: String,
    pub model: String,
}

impl GeminiOracle {
    pub fn new(api_base: &str, model: &str, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &VigilConfig) -> Result<Self, OracleError> {
        Self::new(
            &config.api_base,
            &config.model,
            config.request_timeout(),
        )
    }

    fn payload(request: &OracleRequest<'_>, mode: OracleMode) -> Value {
        let prompt = match mode {
            OracleMode::Full => format!("{}\n\n{}", request.profile.render(), RESPONSE_SCHEMA),
            OracleMode::FastVerify => FAST_VERIFY_PROMPT.to_string(),
        };

        let mut generation_config = json!({
            "temperature": 0.1,
            "response_mime_type": "application/json"
        });
        if mode == OracleMode::FastVerify {
            generation_config["maxOutputTokens"] = json!(32);
        }

        json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": {
                        "mime_type": request.snapshot.mime_type(),
                        "data": STANDARD.encode(request.snapshot.bytes())
                    }}
                ]
            }],
            "generationConfig": generation_config
        })
    }

    async fn exchange(&self, request: &OracleRequest<'_>, mode: OracleMode) -> Result<String, OracleError> {
        if request.credential.trim().is_empty() {
            return Err(OracleError::Transport("API key missing".to_string()));
        }

        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);
        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", request.credential)
            .json(&Self::payload(request, mode))
            .send()
            .await?;

        let status = res.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            let err_text = res.text().await.unwrap_or_default();
            return Err(OracleError::Transport(format!("API Error {}: {}", status, err_text)));
        }

        let body: Value = res
            .json()
            .await
            .map_err(|e| OracleError::Transport(format!("malformed response body: {}", e)))?;
        extract_text(&body)
            .ok_or_else(|| OracleError::Transport("no candidate text in response".to_string()))
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn recommend(&self, request: OracleRequest<'_>) -> Result<Recommendation, OracleError> {
        let text = self.exchange(&request, OracleMode::Full).await?;
        parse_recommendation(&text)
    }

    async fn verify_turn(&self, request: OracleRequest<'_>) -> Result<bool, OracleError> {
        let text = self.exchange(&request, OracleMode::FastVerify).await?;
        let check: TurnCheck = serde_json::from_str(json_payload(&text))
            .map_err(|e| OracleError::Transport(format!("unparseable turn check: {}", e)))?;
        Ok(check.is_actor_turn)
    }
}

pub fn parse_recommendation(text: &str) -> Result<Recommendation, OracleError> {
    serde_json::from_str(json_payload(text))
        .map_err(|e| OracleError::Transport(format!("unparseable recommendation: {}", e)))
}

/// Strips a ```json fence if the model added one despite the JSON mime type.
fn json_payload(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn extract_text(body: &Value) -> Option<String> {
    body.get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}
