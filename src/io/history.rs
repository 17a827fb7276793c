use crate::core::action::Action;
use crate::core::fingerprint::Fingerprint;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub fingerprint: Fingerprint,
    pub rationale: String,
    #[serde(default)]
    pub metrics: Option<Map<String, Value>>,
    pub verified_turn: bool,
    #[serde(default)]
    pub retry: bool,
}

/// Persistence seam for admitted decisions. Failures are the log's problem,
/// never the loop's.
pub trait DecisionLog: Send + Sync {
    fn record(&self, record: &DecisionRecord);
}

pub struct JsonlHistory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &DecisionRecord) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("history lock poisoned"))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    /// Newest first, like the dashboard shows them. Unreadable lines are skipped.
    pub fn read_all(&self) -> Result<Vec<DecisionRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read history {}", self.path.display()))?;
        let mut records: Vec<DecisionRecord> = raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        records.reverse();
        Ok(records)
    }

    /// Truncates the log. A missing file is already clear.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow::anyhow!("history lock poisoned"))?;
        if !self.path.exists() {
            return Ok(());
        }
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("Failed to clear history {}", self.path.display()))?;
        Ok(())
    }
}

impl DecisionLog for JsonlHistory {
    fn record(&self, record: &DecisionRecord) {
        if let Err(e) = self.append(record) {
            eprintln!("⚠️ Failed to write decision history: {}", e);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub by_action: BTreeMap<String, usize>,
    /// Share of decisions that were anything but FOLD, in whole percent.
    pub played_pct: u32,
}

pub fn stats(records: &[DecisionRecord]) -> HistoryStats {
    if records.is_empty() {
        return HistoryStats::default();
    }
    let mut by_action = BTreeMap::new();
    for r in records {
        *by_action.entry(r.action.to_string()).or_insert(0) += 1;
    }
    let folds = records.iter().filter(|r| r.action == Action::Fold).count();
    let played = records.len() - folds;
    HistoryStats {
        total: records.len(),
        by_action,
        played_pct: ((played as f64 / records.len() as f64) * 100.0).round() as u32,
    }
}

pub fn to_csv(records: &[DecisionRecord]) -> String {
    let mut out = String::from("Timestamp,Cards,Board,Action,Retry,Reasoning\n");
    for r in records {
        out.push_str(&format!(
            "{},{},{},{},{},\"{}\"\n",
            r.timestamp.to_rfc3339(),
            csv_field(&r.fingerprint.subject_cards),
            csv_field(&r.fingerprint.context),
            r.action,
            r.retry,
            r.rationale.replace('"', "\"\"")
        ));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
