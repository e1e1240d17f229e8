// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single file's pipeline failure (or a stage-level failure when `path`
/// is `None`, e.g. a required stage matched no sources).
///
/// These are recorded in a `StageResult` and reported; they never abort
/// sibling files or stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    pub stage: String,
    pub path: Option<String>,
    pub message: String,
}

impl TransformError {
    pub fn for_file(stage: &str, path: &str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            path: Some(path.to_string()),
            message: message.into(),
        }
    }

    pub fn for_stage(stage: &str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            path: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "[{}] {}: {}", self.stage, path, self.message),
            None => write!(f, "[{}] {}", self.stage, self.message),
        }
    }
}

impl std::error::Error for TransformError {}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AssetdagError>;
