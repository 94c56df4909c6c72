//! Identifier types shared by the calendar and the supervisor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Unique identifier for one invocation of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

/// Where a job was declared. Used only for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation(String);

impl RunId {
    /// Generate a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceLocation {
    /// Create a source location from any label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// A job declared in a file, optionally at an entry index.
    pub fn file(path: impl AsRef<Path>, entry: Option<usize>) -> Self {
        let path = path.as_ref().display();
        match entry {
            Some(index) => Self(format!("{}#{}", path, index)),
            None => Self(path.to_string()),
        }
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceLocation {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceLocation {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<PathBuf> for SourceLocation {
    fn from(path: PathBuf) -> Self {
        Self::file(path, None)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
