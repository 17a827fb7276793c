use crate::core::snapshot::Snapshot;
use crate::core::state::CaptureConfig;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Fails when the display surface is unavailable.
    async fn capture(&self) -> Result<Snapshot>;
}

pub struct FileSource {
    pub path: PathBuf,
    pub mime_type: String,
}

#[async_trait]
impl ObservationSource for FileSource {
    async fn capture(&self) -> Result<Snapshot> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Display surface unavailable: {}", self.path.display()))?;
        if bytes.is_empty() {
            bail!("Empty frame at {}", self.path.display());
        }
        Ok(Snapshot::new(bytes, self.mime_type.clone()))
    }
}

pub struct CommandSource {
    pub command: String,
    pub args: Vec<String>,
    pub mime_type: String,
}

#[async_trait]
impl ObservationSource for CommandSource {
    async fn capture(&self) -> Result<Snapshot> {
        let output = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .output()
            .await
            .with_context(|| format!("Failed to spawn capture command `{}`", self.command))?;
        if !output.status.success() {
            return Err(anyhow!(
                "Capture command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        if output.stdout.is_empty() {
            bail!("Capture command produced no frame");
        }
        Ok(Snapshot::new(output.stdout, self.mime_type.clone()))
    }
}

pub fn source_from_config(config: &CaptureConfig) -> Arc<dyn ObservationSource> {
    match config {
        CaptureConfig::File { path, mime_type } => Arc::new(FileSource {
            path: path.clone(),
            mime_type: mime_type.clone(),
        }),
        CaptureConfig::Command { command, args, mime_type } => Arc::new(CommandSource {
            command: command.clone(),
            args: args.clone(),
            mime_type: mime_type.clone(),
        }),
    }
}
