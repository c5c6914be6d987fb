//! Matrix expansion - turns axes and include/exclude entries into job instances

use crate::core::error::{ConfigError, EvalError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ordered variable bindings of a single instance.
///
/// A binding may be present but null (`None`): that is what a declared axis
/// looks like on an instance added by an include entry that never named it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bindings {
    entries: Vec<(String, Option<String>)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a binding. Outer `None` means the name is not bound at all.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_deref())
    }

    /// Set a binding, replacing an existing value in place
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when every pair in `pattern` is bound to the same value here
    fn agrees_with(&self, pattern: &[(String, String)]) -> bool {
        pattern
            .iter()
            .all(|(key, value)| self.get(key) == Some(Some(value.as_str())))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bindings = Bindings::new();
        for (key, value) in iter {
            bindings.set(key, Some(value.into()));
        }
        bindings
    }
}

/// One named dimension of the matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<String>,
}

/// Ordered name/value assignments used by include and exclude entries
pub type MatrixEntry = Vec<(String, String)>;

/// A job's matrix: axes in declaration order plus include/exclude entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSpec {
    pub axes: Vec<Axis>,
    pub include: Vec<MatrixEntry>,
    pub exclude: Vec<MatrixEntry>,
}

impl MatrixSpec {
    pub fn axis(mut self, name: &str, values: &[&str]) -> Self {
        self.axes.push(Axis {
            name: name.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn with_include(mut self, entry: &[(&str, &str)]) -> Self {
        self.include.push(to_entry(entry));
        self
    }

    pub fn with_exclude(mut self, entry: &[(&str, &str)]) -> Self {
        self.exclude.push(to_entry(entry));
        self
    }

    fn is_axis(&self, name: &str) -> bool {
        self.axes.iter().any(|axis| axis.name == name)
    }

    /// Number of instances the cross-product produces before includes
    pub fn base_size(&self) -> usize {
        self.axes.iter().map(|axis| axis.values.len()).product()
    }
}

fn to_entry(entry: &[(&str, &str)]) -> MatrixEntry {
    entry
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A fully resolved matrix combination for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    /// Owning job ID
    pub job: String,

    /// Position in the expanded matrix
    pub index: usize,

    /// Resolved variable bindings
    pub bindings: Bindings,

    /// Whether a failing step is tolerated for this instance
    pub continue_on_error: bool,
}

impl JobInstance {
    pub fn value(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).flatten()
    }

    /// Human-readable name, e.g. `build (stable, x86_64-unknown-linux-gnu)`
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = self.bindings.iter().filter_map(|(_, v)| v).collect();
        if parts.is_empty() {
            self.job.clone()
        } else {
            format!("{} ({})", self.job, parts.join(", "))
        }
    }
}

/// Expander for matrix configurations
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Expand a matrix into ordered job instances.
    ///
    /// `continue_on_error` is evaluated once per instance after includes have
    /// been applied.
    pub fn expand<P>(
        &self,
        job: &str,
        matrix: &MatrixSpec,
        continue_on_error: P,
    ) -> Result<Vec<JobInstance>, ConfigError>
    where
        P: Fn(&Bindings) -> Result<bool, EvalError>,
    {
        for axis in &matrix.axes {
            if axis.values.is_empty() {
                return Err(ConfigError::EmptyAxis {
                    job: job.to_string(),
                    axis: axis.name.clone(),
                });
            }
        }

        // With no axes, includes are the whole matrix
        let mut combinations = if matrix.axes.is_empty() && !matrix.include.is_empty() {
            Vec::new()
        } else {
            self.generate_combinations(&matrix.axes)
        };
        let base = combinations.len();

        combinations.retain(|combo| !matrix.exclude.iter().any(|ex| combo.agrees_with(ex)));
        if combinations.len() < base {
            debug!("Job {}: excluded {} combinations", job, base - combinations.len());
        }

        for include in &matrix.include {
            self.apply_include(matrix, &mut combinations, include);
        }

        combinations
            .into_iter()
            .enumerate()
            .map(|(index, bindings)| {
                let continue_on_error =
                    continue_on_error(&bindings).map_err(|source| ConfigError::Policy {
                        job: job.to_string(),
                        source,
                    })?;
                Ok(JobInstance {
                    job: job.to_string(),
                    index,
                    bindings,
                    continue_on_error,
                })
            })
            .collect()
    }

    fn generate_combinations(&self, axes: &[Axis]) -> Vec<Bindings> {
        let mut result = vec![Bindings::new()];

        for axis in axes {
            let mut next = Vec::with_capacity(result.len() * axis.values.len());
            for combo in &result {
                for value in &axis.values {
                    let mut extended = combo.clone();
                    extended.set(axis.name.clone(), Some(value.clone()));
                    next.push(extended);
                }
            }
            result = next;
        }

        result
    }

    /// Merge an include entry into every instance that agrees on its declared
    /// axes, or append it as a new instance when none does. Without declared
    /// axes every include is appended.
    fn apply_include(&self, matrix: &MatrixSpec, combinations: &mut Vec<Bindings>, include: &MatrixEntry) {
        if matrix.axes.is_empty() {
            let mut added = Bindings::new();
            for (key, value) in include {
                added.set(key.clone(), Some(value.clone()));
            }
            combinations.push(added);
            return;
        }

        let (axis_pairs, extra_pairs): (MatrixEntry, MatrixEntry) = include
            .iter()
            .cloned()
            .partition(|(key, _)| matrix.is_axis(key));

        let mut matched = false;
        for combo in combinations.iter_mut() {
            if combo.agrees_with(&axis_pairs) {
                matched = true;
                for (key, value) in &extra_pairs {
                    combo.set(key.clone(), Some(value.clone()));
                }
            }
        }

        if !matched {
            let mut added = Bindings::new();
            for axis in &matrix.axes {
                let value = axis_pairs
                    .iter()
                    .find(|(key, _)| *key == axis.name)
                    .map(|(_, value)| value.clone());
                added.set(axis.name.clone(), value);
            }
            for (key, value) in extra_pairs {
                added.set(key, Some(value));
            }
            combinations.push(added);
        }
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}
