//! Instance context - the variables a step sees while it runs

use crate::core::condition::VariableLookup;
use crate::core::error::EvalError;
use crate::core::matrix::{Bindings, JobInstance};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Information about the machine executing the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub os: String,
    pub arch: String,
    pub family: String,
}

impl HostInfo {
    /// Describe the current host
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
        }
    }
}

impl Default for HostInfo {
    fn default() -> Self {
        Self::current()
    }
}

/// Execution context for one job instance
///
/// Owns the instance's environment. Variables exported by a step are merged
/// in and become visible to the following steps of the same instance only.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    /// The instance being executed
    pub instance: JobInstance,

    /// Environment variables passed to actions
    pub env: HashMap<String, String>,

    /// Host the instance runs on
    pub host: HostInfo,
}

impl InstanceContext {
    /// Create the starting context for an instance.
    ///
    /// The environment is seeded with the job env, `JOB`, and `MATRIX_<AXIS>`
    /// for every non-null binding.
    pub fn new(instance: JobInstance, job_env: &HashMap<String, String>, host: HostInfo) -> Self {
        let mut env = job_env.clone();
        env.insert("JOB".to_string(), instance.job.clone());
        for (name, value) in instance.bindings.iter() {
            if let Some(value) = value {
                env.insert(matrix_env_name(name), value.to_string());
            }
        }

        Self {
            instance,
            env,
            host,
        }
    }

    /// Get an environment variable
    pub fn get_env(&self, key: &str) -> Option<&String> {
        self.env.get(key)
    }

    /// Merge variables exported by a finished step
    pub fn apply_exports(&mut self, exports: &HashMap<String, String>) {
        self.env
            .extend(exports.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Build the environment handed to a step: instance env overlaid with the
    /// step's own (already rendered) env.
    pub fn step_env(&self, step_env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = self.env.clone();
        env.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Replace `${{ name }}` placeholders. Null bindings render as empty.
    pub fn render(&self, template: &str) -> Result<String, EvalError> {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let placeholder = PLACEHOLDER.get_or_init(|| {
            Regex::new(r"\$\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
        });

        let mut missing = None;
        let rendered = placeholder.replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match self.lookup(name) {
                Some(value) => value.unwrap_or_default().to_string(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(EvalError::UndefinedVariable(name)),
            None => Ok(rendered.into_owned()),
        }
    }

    /// Render every value of a map
    pub fn render_map<'a, I>(&self, entries: I) -> Result<HashMap<String, String>, EvalError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        entries
            .into_iter()
            .map(|(k, v)| Ok((k.clone(), self.render(v)?)))
            .collect()
    }
}

impl VariableLookup for InstanceContext {
    fn lookup(&self, name: &str) -> Option<Option<&str>> {
        VariableScope {
            job: &self.instance.job,
            bindings: &self.instance.bindings,
            env: &self.env,
            host: &self.host,
        }
        .resolve(name)
    }
}

/// Names visible to conditions and templates.
///
/// `env.NAME` and `host.*` are namespaced. A bare or `matrix.`-prefixed name
/// is a binding; a bare `job` that no binding claims is the job id.
pub struct VariableScope<'a> {
    pub job: &'a str,
    pub bindings: &'a Bindings,
    pub env: &'a HashMap<String, String>,
    pub host: &'a HostInfo,
}

impl<'a> VariableScope<'a> {
    pub fn resolve(&self, name: &str) -> Option<Option<&'a str>> {
        if let Some(var) = name.strip_prefix("env.") {
            return self.env.get(var).map(|v| Some(v.as_str()));
        }
        if let Some(field) = name.strip_prefix("host.") {
            return match field {
                "os" => Some(Some(self.host.os.as_str())),
                "arch" => Some(Some(self.host.arch.as_str())),
                "family" => Some(Some(self.host.family.as_str())),
                _ => None,
            };
        }
        if let Some(binding) = name.strip_prefix("matrix.") {
            return self.bindings.get(binding);
        }
        match self.bindings.get(name) {
            None if name == "job" => Some(Some(self.job)),
            found => found,
        }
    }
}

impl VariableLookup for VariableScope<'_> {
    fn lookup(&self, name: &str) -> Option<Option<&str>> {
        self.resolve(name)
    }
}

/// Environment variable name exposing a matrix binding, e.g. `MATRIX_TOOLCHAIN`
pub fn matrix_env_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("MATRIX_{}", sanitized)
}
