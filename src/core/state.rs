use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const VIGIL_DIR: &str = ".vigil";
pub const DEFAULT_PROFILE: &str = "default";

const DEFAULT_INSTRUCTIONS: &str = "You observe a turn-based interface on behalf of \"{identity}\". \
Decide whether it is {identity}'s turn to act and recommend exactly one action. \
Recommend WAIT whenever the situation is unclear.";

/// One entry of the strategy table: instruction text plus the identity the
/// oracle should act for.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Profile {
    pub identity: String,
    pub instructions: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            identity: "Hero".to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

impl Profile {
    pub fn render(&self) -> String {
        self.instructions.replace("{identity}", &self.identity)
    }
}

#[derive(Debug, Clone)]
pub struct ProfileTable {
    profiles: HashMap<String, Profile>,
    fallback: Profile,
}

impl ProfileTable {
    pub fn new(profiles: HashMap<String, Profile>) -> Self {
        let fallback = profiles.get(DEFAULT_PROFILE).cloned().unwrap_or_default();
        Self { profiles, fallback }
    }

    /// Unknown ids fall back to the `default` profile.
    pub fn resolve(&self, id: &str) -> &Profile {
        self.profiles.get(id).unwrap_or(&self.fallback)
    }

    pub fn contains(&self, id: &str) -> bool {
        id == DEFAULT_PROFILE || self.profiles.contains_key(id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DelayMode {
    /// Uniform random pause in `[min_ms, max_ms]`.
    Jitter { min_ms: u64, max_ms: u64 },
    /// Fixed pause before re-verification.
    Deliberate { ms: u64 },
}

impl Default for DelayMode {
    fn default() -> Self {
        DelayMode::Jitter {
            min_ms: 300,
            max_ms: 1100,
        }
    }
}

impl DelayMode {
    pub fn longest(&self) -> Duration {
        match *self {
            DelayMode::Jitter { min_ms, max_ms } => Duration::from_millis(min_ms.max(max_ms)),
            DelayMode::Deliberate { ms } => Duration::from_millis(ms),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CaptureConfig {
    /// Image file kept current by an external capturer.
    File { path: PathBuf, mime_type: String },
    /// Command printing one encoded frame to stdout.
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        mime_type: String,
    },
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig::File {
            path: PathBuf::from(format!("{}/frame.jpg", VIGIL_DIR)),
            mime_type: "image/jpeg".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CommandBinding {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VigilConfig {
    pub model: String,
    pub api_base: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub retry_window_ms: u64,
    pub cooldown_ms: u64,
    #[serde(default = "default_profile_id")]
    pub profile: String,
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub delay: DelayMode,
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Gesture name (`FOLD`, `CHECK/CALL`, `RAISE`, `SIT_BACK`) to command.
    #[serde(default)]
    pub actuation: HashMap<String, CommandBinding>,
}

fn default_request_timeout_ms() -> u64 {
    8_000
}

fn default_profile_id() -> String {
    DEFAULT_PROFILE.to_string()
}

fn default_history_path() -> PathBuf {
    PathBuf::from(format!("{}/history.jsonl", VIGIL_DIR))
}

fn default_listen() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for VigilConfig {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), Profile::default());
        Self {
            model: "gemini-2.0-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            request_timeout_ms: default_request_timeout_ms(),
            tick_interval_ms: 3_000,
            retry_window_ms: 10_000,
            cooldown_ms: 15_000,
            history_path: default_history_path(),
            listen: default_listen(),
            delay: DelayMode::default(),
            profile: default_profile_id(),
            profiles,
            capture: CaptureConfig::default(),
            actuation: HashMap::new(),
        }
    }
}

impl VigilConfig {
    pub fn default_path() -> PathBuf {
        Path::new(VIGIL_DIR).join("config.toml")
    }

    /// Reads the config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be positive");
        }
        if let DelayMode::Jitter { min_ms, max_ms } = self.delay {
            if min_ms > max_ms {
                bail!("delay.min_ms ({}) exceeds delay.max_ms ({})", min_ms, max_ms);
            }
        }
        // One oracle round trip plus the delay must fit inside the window.
        let budget = self.request_timeout() + self.delay.longest();
        if self.retry_window() <= budget {
            bail!(
                "retry_window_ms ({}) must exceed request_timeout_ms plus the longest actuation delay ({} ms)",
                self.retry_window_ms,
                budget.as_millis()
            );
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn retry_window(&self) -> Duration {
        Duration::from_millis(self.retry_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn profile_table(&self) -> ProfileTable {
        ProfileTable::new(self.profiles.clone())
    }
}
