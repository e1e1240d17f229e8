// src/stage/mod.rs

//! Transform stages.
//!
//! A [`Stage`] is built once from a validated `[stage.<name>]` entry and is
//! never mutated afterwards:
//! - [`sources`] resolves input globs to files,
//! - [`transform`] holds the compiled transform chain and the pure steps,
//! - [`hash`] fingerprints file contents,
//! - [`cache`] keeps the per-stage incremental cache partitions.
//!
//! Running a stage (reading, piping through commands, writing) lives in
//! `crate::exec`.

pub mod cache;
pub mod hash;
pub mod sources;
pub mod transform;

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::{ProjectSection, StageConfig};
use crate::types::ReloadMode;

pub use cache::{CachePartition, CacheStore};
pub use sources::{Source, SourceSet};
pub use transform::{Asset, Transform};

/// One source-to-output pipeline bound to a set of globs.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub sources: SourceSet,
    /// Output directory relative to the project root.
    pub dest: PathBuf,
    pub cache: bool,
    pub newer: bool,
    pub allow_empty: bool,
    /// False for check-only stages: the chain runs but nothing is written.
    pub write: bool,
    pub reload: ReloadMode,
    pub transforms: Vec<Transform>,
}

impl Stage {
    pub fn from_config(name: &str, cfg: &StageConfig, project: &ProjectSection) -> Result<Self> {
        let sources = SourceSet::new(&cfg.src, &cfg.exclude)
            .with_context(|| format!("compiling sources of stage {name}"))?;

        let transforms = cfg
            .transforms
            .iter()
            .map(|spec| Transform::from_spec(spec, project))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("compiling transforms of stage {name}"))?;

        Ok(Self {
            name: name.to_string(),
            sources,
            dest: PathBuf::from(&cfg.dest),
            cache: cfg.cache,
            newer: cfg.newer,
            allow_empty: cfg.allow_empty,
            write: cfg.write,
            reload: cfg.reload,
            transforms,
        })
    }

    /// Output path (relative to `dest`) a source is expected to end up at,
    /// used by the `newer` check.
    ///
    /// A concat replaces the path with the concat file; extension swaps and
    /// renames before or after it apply in chain order.
    pub fn expected_output(&self, out_rel: &str) -> String {
        let mut target = out_rel.to_string();
        for transform in &self.transforms {
            match transform {
                Transform::Concat { file } => target = file.clone(),
                Transform::Command { ext: Some(ext), .. } => {
                    target = transform::replace_extension(&target, ext);
                }
                Transform::Rename { suffix, ext, .. } => {
                    target = transform::rename_path(&target, suffix.as_deref(), ext.as_deref());
                }
                _ => {}
            }
        }
        target
    }
}
