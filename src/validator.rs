use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::Command;
use tracing::trace;

use crate::engine_config::EngineConfig;

pub const DEFAULT_ENGINE: &str = "xray";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Success,
    /// Engine rejected the config or could not be run; carries its diagnostics.
    Failure(String),
    /// Deadline hit before the engine answered. Not a rejection.
    Timeout,
}

impl ValidationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ValidationOutcome::Success)
    }
}

/// Something that can tell whether an engine config is acceptable.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, config: &EngineConfig) -> ValidationOutcome;
}

/// Run `validator` under a hard deadline.
///
/// On expiry the in-flight validation future is dropped, which for
/// [`XrayValidator`] kills the engine process and removes its config file.
pub async fn validate_within(
    validator: &dyn Validator,
    config: &EngineConfig,
    deadline: Duration,
) -> ValidationOutcome {
    match tokio::time::timeout(deadline, validator.validate(config)).await {
        Ok(outcome) => outcome,
        Err(_) => ValidationOutcome::Timeout,
    }
}

/// Runs `<engine> -test -config <file>` for every config.
pub struct XrayValidator {
    engine: PathBuf,
}

impl XrayValidator {
    pub fn new(engine: impl Into<PathBuf>) -> Self {
        Self { engine: engine.into() }
    }

    pub fn engine(&self) -> &Path {
        &self.engine
    }

    /// The returned path deletes the file when dropped.
    fn write_config(config: &EngineConfig) -> Result<TempPath> {
        let json = config.to_json_pretty().context("Failed to serialize engine config")?;
        let mut file = tempfile::Builder::new()
            .prefix("xray-config-")
            .suffix(".json")
            .tempfile()
            .context("Failed to create temporary config file")?;
        file.write_all(&json).context("Failed to write temporary config file")?;
        file.flush().context("Failed to flush temporary config file")?;
        Ok(file.into_temp_path())
    }
}

#[async_trait]
impl Validator for XrayValidator {
    async fn validate(&self, config: &EngineConfig) -> ValidationOutcome {
        let config_path = match Self::write_config(config) {
            Ok(path) => path,
            Err(e) => return ValidationOutcome::Failure(format!("{:#}", e)),
        };
        trace!("Wrote engine config to {}", config_path.display());

        let child = Command::new(&self.engine)
            .arg("-test")
            .arg("-config")
            .arg(&*config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return ValidationOutcome::Failure(format!(
                    "failed to start {}: {}",
                    self.engine.display(),
                    e
                ));
            }
        };

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                return ValidationOutcome::Failure(format!(
                    "failed to wait for {}: {}",
                    self.engine.display(),
                    e
                ));
            }
        };

        if output.status.success() {
            ValidationOutcome::Success
        } else {
            ValidationOutcome::Failure(failure_reason(&output))
        }
    }
}

/// Xray prints most diagnostics on stdout, so fall back to it.
fn failure_reason(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        return stderr.trim().to_string();
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        return stdout.trim().to_string();
    }
    format!("engine exited with {}", output.status)
}
