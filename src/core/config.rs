//! Pipeline configuration from YAML

use crate::core::{
    condition::Condition,
    error::ConfigError,
    matrix::{Axis, MatrixEntry, MatrixSpec},
    Pipeline,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Engine-wide limit on concurrently running instances
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Environment shared by every job
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: HashMap<String, String>,

    /// Jobs in declaration order
    pub jobs: Vec<JobConfig>,

    /// Default timeout for steps (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobConfig {
    /// Unique job identifier
    pub id: String,

    /// Human-readable job name
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs that must finish before this one starts
    #[serde(default)]
    pub needs: Vec<String>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub env: HashMap<String, String>,

    /// Tolerate failing instances: a flag or a condition over the bindings
    #[serde(default)]
    pub continue_on_error: ContinueOnError,

    /// Default step timeout for this job (in seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Present when the job produces coverage reports to merge and upload
    #[serde(default)]
    pub coverage: Option<CoverageConfig>,

    pub steps: Vec<StepConfig>,
}

/// `continue-on-error` on a job: `true`/`false` or a condition string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContinueOnError {
    Flag(bool),
    Expression(String),
}

impl Default for ContinueOnError {
    fn default() -> Self {
        ContinueOnError::Flag(false)
    }
}

/// Matrix strategy of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StrategyConfig {
    /// Cancel sibling instances after the first fatal failure
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,

    /// Maximum instances of this job running at once
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Raw matrix: axis lists plus optional `include` and `exclude`
    #[serde(default)]
    pub matrix: Option<Mapping>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fail_fast: default_fail_fast(),
            max_parallel: None,
            matrix: None,
        }
    }
}

fn default_fail_fast() -> bool {
    true
}

/// Coverage merging and upload settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoverageConfig {
    /// Escalate merge and upload problems to a fatal job failure
    #[serde(default)]
    pub fail_ci_if_error: bool,

    /// Environment variables attached to the upload as metadata
    #[serde(default)]
    pub env_vars: Vec<String>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command
    #[serde(default)]
    pub run: Option<String>,

    /// Named action
    #[serde(default)]
    pub uses: Option<String>,

    /// Action parameters
    #[serde(default, deserialize_with = "scalar_map")]
    pub with: HashMap<String, String>,

    #[serde(default, deserialize_with = "scalar_map")]
    pub env: HashMap<String, String>,

    /// Condition gating the step
    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    #[serde(default)]
    pub continue_on_error: bool,

    /// Timeout for this step (overrides job and pipeline defaults)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_ids = HashSet::new();
        for job in &self.jobs {
            if !seen_ids.insert(job.id.as_str()) {
                return Err(ConfigError::DuplicateJob(job.id.clone()));
            }
        }

        for job in &self.jobs {
            for needs in &job.needs {
                if !seen_ids.contains(needs.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        job: job.id.clone(),
                        needs: needs.clone(),
                    });
                }
            }

            job.continue_on_error_condition()?;
            job.matrix_spec()?;

            for (index, step) in job.steps.iter().enumerate() {
                let name = step
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("step {}", index + 1));
                if step.run.is_some() == step.uses.is_some() {
                    return Err(ConfigError::InvalidAction {
                        job: job.id.clone(),
                        step: name,
                    });
                }
                if let Some(condition) = &step.condition {
                    Condition::parse(condition).map_err(|source| {
                        ConfigError::InvalidCondition {
                            context: format!("job '{}' step '{}'", job.id, name),
                            source,
                        }
                    })?;
                }
            }
        }

        self.check_cycles()
    }

    /// Check for cycles in the `needs` graph
    fn check_cycles(&self) -> Result<(), ConfigError> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for job in &self.jobs {
            if !visited.contains(&job.id) {
                self.dfs_check(&job.id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        job_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<(), ConfigError> {
        visited.insert(job_id.to_string());
        recursion_stack.insert(job_id.to_string());

        if let Some(job) = self.jobs.iter().find(|j| j.id == job_id) {
            for dep in &job.needs {
                if recursion_stack.contains(dep) {
                    return Err(ConfigError::DependencyCycle(dep.clone()));
                }
                if !visited.contains(dep) {
                    self.dfs_check(dep, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(job_id);
        Ok(())
    }

    /// Override pipeline environment values (e.g. from `--var`)
    pub fn apply_env_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(overrides);
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, ConfigError> {
        Pipeline::from_config(self)
    }
}

impl JobConfig {
    /// Parse the job's continue-on-error expression, if it is one
    pub fn continue_on_error_condition(&self) -> Result<Option<Condition>, ConfigError> {
        match &self.continue_on_error {
            ContinueOnError::Flag(_) => Ok(None),
            ContinueOnError::Expression(text) => Condition::parse(text)
                .map(Some)
                .map_err(|source| ConfigError::InvalidCondition {
                    context: format!("job '{}' continue-on-error", self.id),
                    source,
                }),
        }
    }

    /// Interpret the raw matrix mapping. Key order is preserved.
    pub fn matrix_spec(&self) -> Result<MatrixSpec, ConfigError> {
        let mut spec = MatrixSpec::default();
        let Some(matrix) = &self.strategy.matrix else {
            return Ok(spec);
        };

        for (key, value) in matrix {
            let key = key.as_str().ok_or_else(|| self.invalid_matrix("axis names must be strings"))?;
            match key {
                "include" => spec.include = self.matrix_entries(key, value)?,
                "exclude" => spec.exclude = self.matrix_entries(key, value)?,
                axis => {
                    let values = value
                        .as_sequence()
                        .ok_or_else(|| self.invalid_matrix(format!("axis '{}' must be a list", axis)))?
                        .iter()
                        .map(|v| self.matrix_value(axis, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    if values.is_empty() {
                        return Err(ConfigError::EmptyAxis {
                            job: self.id.clone(),
                            axis: axis.to_string(),
                        });
                    }
                    spec.axes.push(Axis {
                        name: axis.to_string(),
                        values,
                    });
                }
            }
        }

        Ok(spec)
    }

    fn matrix_entries(&self, kind: &str, value: &Value) -> Result<Vec<MatrixEntry>, ConfigError> {
        let entries = value
            .as_sequence()
            .ok_or_else(|| self.invalid_matrix(format!("'{}' must be a list of mappings", kind)))?;

        entries
            .iter()
            .map(|entry| {
                let mapping = entry.as_mapping().ok_or_else(|| {
                    self.invalid_matrix(format!("'{}' entries must be mappings", kind))
                })?;
                mapping
                    .iter()
                    .map(|(k, v)| {
                        let k = k.as_str().ok_or_else(|| {
                            self.invalid_matrix(format!("'{}' entries must map names to scalar values", kind))
                        })?;
                        Ok((k.to_string(), self.matrix_value(k, v)?))
                    })
                    .collect()
            })
            .collect()
    }

    /// A matrix value as a string. Non-integer numbers are rejected since
    /// YAML has already lost their spelling (`1.70` parses as `1.7`).
    fn matrix_value(&self, name: &str, value: &Value) -> Result<String, ConfigError> {
        if let Value::Number(n) = value {
            if !(n.is_i64() || n.is_u64()) {
                return Err(self.invalid_matrix(format!(
                    "'{}' value {} must be quoted to keep its exact spelling",
                    name, n
                )));
            }
        }
        scalar_to_string(value)
            .ok_or_else(|| self.invalid_matrix(format!("'{}' has a non-scalar value", name)))
    }

    fn invalid_matrix(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidMatrix {
            job: self.id.clone(),
            reason: reason.into(),
        }
    }
}

/// Render a YAML scalar the way it was written
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Deserialize a mapping whose values may be any scalar into strings
fn scalar_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(key, value)| match scalar_to_string(&value) {
            Some(value) => Ok((key, value)),
            None if value.is_null() => Ok((key, String::new())),
            None => Err(serde::de::Error::custom(format!(
                "value of '{}' must be a scalar",
                key
            ))),
        })
        .collect()
}
