// src/io/status.rs - Status telemetry for the decision loop

use crate::core::action::Action;
use chrono::{DateTime, Local, Utc};
use colored::*;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Started,
    Stopped,
    Analyzing,
    Waiting,
    Acting,
    Executed,
    Expired,
    Cancelled,
    Skipped,
    NotCalibrated,
    MissingCredential,
    RateLimited,
    Resumed,
    Error,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Started => "STARTED",
            Phase::Stopped => "STOPPED",
            Phase::Analyzing => "ANALYZING",
            Phase::Waiting => "WAITING",
            Phase::Acting => "ACTING",
            Phase::Executed => "EXECUTED",
            Phase::Expired => "EXPIRED",
            Phase::Cancelled => "CANCELLED",
            Phase::Skipped => "SKIPPED",
            Phase::NotCalibrated => "NOT CALIBRATED",
            Phase::MissingCredential => "NO API KEY",
            Phase::RateLimited => "API LIMIT",
            Phase::Resumed => "RESUMED",
            Phase::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub phase: Phase,
    pub action: Option<Action>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

impl Status {
    pub fn new(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            phase,
            action: None,
            reason: reason.into(),
            metrics: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: &Action) -> Self {
        self.action = Some(action.clone());
        self
    }

    pub fn with_metrics(mut self, metrics: Option<&Map<String, Value>>) -> Self {
        self.metrics = metrics.cloned();
        self
    }
}

/// Fire-and-forget consumer of loop transitions.
pub trait StatusSink: Send + Sync {
    fn publish(&self, status: Status);
}

pub struct ConsoleSink;

impl StatusSink for ConsoleSink {
    fn publish(&self, status: Status) {
        let time = status.timestamp.with_timezone(&Local).format("%H:%M:%S");
        let headline = match (&status.phase, &status.action) {
            (Phase::Executed, Some(action)) => paint_action(action),
            _ => paint_phase(status.phase),
        };
        match status.phase {
            Phase::Error | Phase::NotCalibrated | Phase::MissingCredential => {
                eprintln!("[{}] {} {}", time, headline, status.reason)
            }
            _ => println!("[{}] {} {}", time, headline, status.reason.dimmed()),
        }
    }
}

fn paint_action(action: &Action) -> ColoredString {
    let label = action.as_str().bold();
    match action {
        Action::Fold => label.red(),
        Action::Check => label.blue(),
        Action::Call => label.green(),
        Action::Raise | Action::Bet => label.yellow(),
        _ => label.bright_yellow(),
    }
}

fn paint_phase(phase: Phase) -> ColoredString {
    let label = phase.label().bold();
    match phase {
        Phase::Waiting | Phase::Stopped => label.bright_black(),
        Phase::Expired | Phase::Cancelled => label.magenta(),
        Phase::Error | Phase::NotCalibrated | Phase::MissingCredential => label.red(),
        Phase::RateLimited => label.bright_red(),
        Phase::Analyzing | Phase::Acting => label.purple(),
        Phase::Started | Phase::Resumed | Phase::Executed => label.green(),
        Phase::Skipped => label.yellow(),
    }
}

/// Keeps the latest status for the control API.
pub struct StatusBoard {
    tx: watch::Sender<Option<Status>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn latest(&self) -> Option<Status> {
        self.tx.borrow().clone()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for StatusBoard {
    fn publish(&self, status: Status) {
        self.tx.send_replace(Some(status));
    }
}

pub struct Fanout(pub Vec<Arc<dyn StatusSink>>);

impl StatusSink for Fanout {
    fn publish(&self, status: Status) {
        for sink in &self.0 {
            sink.publish(status.clone());
        }
    }
}
