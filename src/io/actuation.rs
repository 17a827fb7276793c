use crate::core::action::Gesture;
use crate::core::state::CommandBinding;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    /// No calibrated target for this gesture. Reported, never retried.
    NotCalibrated,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, gesture: Gesture) -> Result<DispatchOutcome>;
}

/// Runs one configured command per gesture, e.g. an `xdotool` click at the
/// calibrated coordinates.
pub struct CommandDispatcher {
    bindings: HashMap<String, CommandBinding>,
}

impl CommandDispatcher {
    pub fn new(bindings: HashMap<String, CommandBinding>) -> Self {
        Self { bindings }
    }

    pub fn is_calibrated(&self, gesture: Gesture) -> bool {
        self.bindings.contains_key(gesture.as_str())
    }
}

#[async_trait]
impl Dispatcher for CommandDispatcher {
    async fn dispatch(&self, gesture: Gesture) -> Result<DispatchOutcome> {
        let Some(binding) = self.bindings.get(gesture.as_str()) else {
            return Ok(DispatchOutcome::NotCalibrated);
        };

        let status = tokio::process::Command::new(&binding.command)
            .args(&binding.args)
            .status()
            .await
            .with_context(|| format!("Failed to spawn actuation `{}`", binding.command))?;
        if !status.success() {
            return Err(anyhow!("Actuation for {} exited with {}", gesture, status));
        }
        Ok(DispatchOutcome::Dispatched)
    }
}
