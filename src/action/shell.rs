//! Shell action client - runs `run:` commands as subprocesses

use crate::action::{
    client::ActionClientConfig,
    response::{parse_exports, ActionCall, ActionError, ActionOutput},
    ActionExecutor,
};
use crate::core::ActionRef;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Environment variable naming the file a command may write exports to
pub const EXPORTS_ENV: &str = "MATRIX_CI_EXPORTS";

/// Parameter naming a coverage report file to read back after the action
pub const COVERAGE_PARAM: &str = "coverage-report";

/// Client executing shell commands under a timeout
#[derive(Debug, Clone)]
pub struct ShellActionClient {
    config: ActionClientConfig,
}

impl ShellActionClient {
    pub fn new(config: ActionClientConfig) -> Self {
        Self { config }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.config.working_dir {
            Some(dir) => dir.join(path),
            None => PathBuf::from(path),
        }
    }

    /// Run a shell command and capture stdout.
    ///
    /// # Errors
    /// Returns `ActionError` if:
    /// - The shell cannot be spawned
    /// - The command exits with a non-zero status
    /// - The command times out
    async fn run_command(&self, call: &ActionCall, command: &str) -> Result<ActionOutput, ActionError> {
        // Removed on drop, whichever way this returns
        let exports_path = tempfile::Builder::new()
            .prefix("matrix-ci-exports-")
            .tempfile()
            .map_err(|e| ActionError::Internal(format!("Failed to create exports file: {}", e)))?
            .into_temp_path();
        let timeout_secs = if call.timeout_secs > 0 {
            call.timeout_secs
        } else {
            self.config.timeout_secs
        };

        debug!("Step '{}' spawning {} -c {}", call.step, self.config.shell, command);

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(command)
            .envs(&call.env)
            .env(EXPORTS_ENV, exports_path.as_os_str())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let result = timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| ActionError::Timeout(timeout_secs))?;

        let output = result
            .map_err(|e| ActionError::Internal(format!("Failed to spawn {}: {}", self.config.shell, e)))?;

        let exports = match tokio::fs::read(&exports_path).await {
            Ok(content) => parse_exports(&String::from_utf8_lossy(&content)),
            Err(e) => {
                warn!("Step '{}': cannot read exports file: {}", call.step, e);
                Default::default()
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output.status.code().unwrap_or(-1);
            warn!("Step '{}' exited with code {}: {}", call.step, code, stderr.trim());
            return Err(ActionError::Failed {
                code,
                stderr: stderr.trim().to_string(),
            });
        }

        let content = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("Step '{}' returned {} bytes of output", call.step, content.len());

        Ok(ActionOutput {
            output: content,
            exports,
            ..Default::default()
        })
    }
}

impl Default for ShellActionClient {
    fn default() -> Self {
        Self::new(ActionClientConfig::default())
    }
}

#[async_trait]
impl ActionExecutor for ShellActionClient {
    async fn execute(&self, call: &ActionCall) -> Result<ActionOutput, ActionError> {
        let mut output = match &call.action {
            ActionRef::Shell { command } => self.run_command(call, command).await?,
            ActionRef::Uses(name) if self.config.strict => {
                return Err(ActionError::UnknownAction(name.clone()));
            }
            ActionRef::Uses(name) => {
                warn!("Step '{}': no local handler for '{}', treating as no-op", call.step, name);
                ActionOutput::default()
            }
        };

        if let Some(report) = call.params.get(COVERAGE_PARAM) {
            match tokio::fs::read_to_string(self.resolve(report)).await {
                Ok(content) => output.coverage = Some(content),
                Err(e) => {
                    warn!("Step '{}': cannot read coverage report {}: {}", call.step, report, e);
                    output.missing_coverage = Some(format!("{} ({})", report, e));
                }
            }
        }

        Ok(output)
    }
}
