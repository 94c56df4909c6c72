//! Environment variables for job commands and worker processes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::process::Command;

/// Variables layered on top of the parent's environment when a child
/// process is launched.
///
/// Ordered by name, so a child sees the same environment on every launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from any collection of owned pairs, e.g. a config map.
    pub fn from_map(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: vars.into_iter().collect(),
        }
    }

    /// Builder: set one variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// This environment with `overrides` layered on top.
    pub fn merged_with(&self, overrides: &Environment) -> Self {
        let mut vars = self.vars.clone();
        vars.extend(
            overrides
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Self { vars }
    }

    /// Set every variable on a child command. Inherited variables stay.
    pub fn apply(&self, command: &mut Command) {
        command.envs(&self.vars);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Environment {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self::from_map(iter.into_iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }
}
