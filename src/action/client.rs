//! Action client configuration

use std::path::PathBuf;

/// Configuration for the shell action client
#[derive(Debug, Clone)]
pub struct ActionClientConfig {
    /// Shell used to run `run:` commands, invoked as `<shell> -c <command>`
    pub shell: String,

    /// Working directory for commands. Defaults to the current directory.
    pub working_dir: Option<PathBuf>,

    /// Fallback timeout in seconds when a call carries none
    pub timeout_secs: u64,

    /// Fail `uses:` steps that have no local handler instead of skipping them
    pub strict: bool,
}

impl Default for ActionClientConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
            timeout_secs: 3600,
            strict: false,
        }
    }
}

impl ActionClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}
