// src/config/mod.rs

//! Project descriptor loading and validation.
//!
//! - `model.rs` defines the TOML-backed data model.
//! - `loader.rs` reads a descriptor from disk.
//! - `validate.rs` checks invariants and produces the immutable `ConfigFile`.
//! - `interpolate.rs` expands `${var}` path placeholders.

pub mod interpolate;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load, load_from_path};
pub use model::{
    ConfigFile, ConfigSection, ProjectSection, RawConfigFile, ServerSection, StageConfig,
    TaskConfig, TaskSpec, TransformSpec, WatchConfig,
};
