//! Step domain model

use crate::core::{
    condition::Condition,
    config::StepConfig,
    error::ConfigError,
};
use std::collections::HashMap;
use std::fmt;

/// What a step invokes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRef {
    /// Shell command from `run:`
    Shell { command: String },
    /// Named action from `uses:`
    Uses(String),
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRef::Shell { command } => write!(f, "run: {}", command),
            ActionRef::Uses(name) => write!(f, "uses: {}", name),
        }
    }
}

/// A single step of a job, shared read-only by every instance
#[derive(Debug, Clone)]
pub struct Step {
    /// Human-readable step name
    pub name: String,

    /// The action to invoke
    pub action: ActionRef,

    /// Parameters passed to the action (`with:`), rendered per instance
    pub params: HashMap<String, String>,

    /// Step environment, overlaid on the instance environment
    pub env: HashMap<String, String>,

    /// Condition gating the step; `None` means always run
    pub condition: Option<Condition>,

    /// Tolerate a failure of this step only
    pub continue_on_error: bool,

    /// Timeout in seconds
    pub timeout_secs: u64,
}

impl Step {
    /// Create a step from a step config, parsing its condition once
    pub fn from_config(
        job_id: &str,
        index: usize,
        config: &StepConfig,
        defaults: &StepDefaults,
    ) -> Result<Self, ConfigError> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("step {}", index + 1));

        let action = match (&config.run, &config.uses) {
            (Some(command), None) => ActionRef::Shell {
                command: command.clone(),
            },
            (None, Some(uses)) => ActionRef::Uses(uses.clone()),
            _ => {
                return Err(ConfigError::InvalidAction {
                    job: job_id.to_string(),
                    step: name,
                })
            }
        };

        let condition = config
            .condition
            .as_deref()
            .map(|text| {
                Condition::parse(text).map_err(|source| ConfigError::InvalidCondition {
                    context: format!("job '{}' step '{}'", job_id, name),
                    source,
                })
            })
            .transpose()?;

        Ok(Step {
            name,
            action,
            params: config.with.clone(),
            env: config.env.clone(),
            condition,
            continue_on_error: config.continue_on_error,
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
        })
    }

    /// Create a shell step with no condition
    pub fn shell(name: impl Into<String>, command: impl Into<String>) -> Self {
        Step {
            name: name.into(),
            action: ActionRef::Shell {
                command: command.into(),
            },
            params: HashMap::new(),
            env: HashMap::new(),
            condition: None,
            continue_on_error: false,
            timeout_secs: StepDefaults::default().timeout_secs,
        }
    }

    /// Gate the step on a condition
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn tolerating_failure(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: 3600, // 1 hour
        }
    }
}
