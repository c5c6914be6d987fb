//! Action collaborators that execute individual steps

pub mod client;
pub mod response;
pub mod shell;

use async_trait::async_trait;
pub use client::ActionClientConfig;
pub use response::{ActionCall, ActionError, ActionOutput};
pub use shell::ShellActionClient;
use tracing::info;

/// Trait for action execution - allows for different implementations
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute a rendered step invocation
    async fn execute(&self, call: &ActionCall) -> Result<ActionOutput, ActionError>;
}

/// Client that logs what would run and always succeeds
#[derive(Debug, Clone, Default)]
pub struct DryRunActionClient;

impl DryRunActionClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionExecutor for DryRunActionClient {
    async fn execute(&self, call: &ActionCall) -> Result<ActionOutput, ActionError> {
        info!("[dry-run] {}: {}", call.step, call.action);
        Ok(ActionOutput::new(format!("[dry-run] {}", call.action)))
    }
}
