// src/watch/patterns.rs

use std::fmt;

use anyhow::{Context, Result};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::config::WatchConfig;

/// Compile one glob with path semantics: `*` never crosses `/`, `**`
/// spans directories.
pub fn compile_glob(pattern: &str) -> std::result::Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// Build a GlobSet from simple string patterns.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = compile_glob(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Optional set: `None` when there are no patterns at all.
pub fn build_optional_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        Ok(None)
    } else {
        build_globset(patterns).map(Some)
    }
}

/// True if `set` matches the relative path or just its file name, so that
/// `*.min.js` style patterns also hit files in subdirectories.
pub fn matches_path_or_name(set: &GlobSet, rel_path: &str) -> bool {
    if set.is_match(rel_path) {
        return true;
    }
    match rel_path.rsplit_once('/') {
        Some((_, name)) => set.is_match(name),
        None => false,
    }
}

/// Compiled glob/exclude patterns for a single `[watch.<name>]` entry.
///
/// Patterns are relative to the project root; the watcher passes relative
/// paths (e.g. `"assets/src/scss/main.scss"`) into `matches`.
#[derive(Clone)]
pub struct WatchProfile {
    name: String,
    task: String,
    /// Stages reachable from `task`; their cache partitions are evicted
    /// when a watched file is deleted.
    stages: Vec<String>,
    glob_set: GlobSet,
    exclude_set: Option<GlobSet>,
}

impl fmt::Debug for WatchProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchProfile")
            .field("name", &self.name)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

impl WatchProfile {
    pub fn new(name: &str, cfg: &WatchConfig, stages: Vec<String>) -> Result<Self> {
        let glob_set = build_globset(&cfg.glob)
            .with_context(|| format!("building glob set for watch {name}"))?;
        let exclude_set = build_optional_globset(&cfg.exclude)
            .with_context(|| format!("building exclude set for watch {name}"))?;

        Ok(Self {
            name: name.to_string(),
            task: cfg.task.clone(),
            stages,
            glob_set,
            exclude_set,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task invoked when this watch fires.
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Returns true if this watch is interested in `rel_path`.
    pub fn matches(&self, rel_path: &str) -> bool {
        if !self.glob_set.is_match(rel_path) {
            return false;
        }
        if let Some(exclude) = &self.exclude_set {
            if matches_path_or_name(exclude, rel_path) {
                return false;
            }
        }
        true
    }
}
