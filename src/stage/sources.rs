// src/stage/sources.rs

//! Resolving a stage's input globs to concrete files.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobMatcher, GlobSet};
use tracing::debug;

use crate::fs::FileSystem;
use crate::watch::patterns::{build_optional_globset, compile_glob, matches_path_or_name};

/// A matched input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Absolute (root-joined) path on disk.
    pub path: PathBuf,
    /// Path relative to the project root; also the cache key.
    pub rel: String,
    /// Path relative to the glob's base directory; becomes the output path.
    pub out_rel: String,
}

struct IncludePattern {
    pattern: String,
    base: String,
    matcher: GlobMatcher,
}

/// Ordered include globs plus exclusions.
#[derive(Clone)]
pub struct SourceSet {
    includes: std::sync::Arc<Vec<IncludePattern>>,
    exclude: Option<GlobSet>,
}

impl fmt::Debug for SourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<&str> = self.includes.iter().map(|p| p.pattern.as_str()).collect();
        f.debug_struct("SourceSet")
            .field("include", &patterns)
            .finish_non_exhaustive()
    }
}

impl SourceSet {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let includes = include
            .iter()
            .map(|pat| {
                let glob =
                    compile_glob(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
                Ok(IncludePattern {
                    pattern: pat.clone(),
                    base: glob_base(pat),
                    matcher: glob.compile_matcher(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            includes: std::sync::Arc::new(includes),
            exclude: build_optional_globset(exclude)?,
        })
    }

    fn is_excluded(&self, rel: &str) -> bool {
        self.exclude
            .as_ref()
            .is_some_and(|set| matches_path_or_name(set, rel))
    }

    /// Walk the filesystem under each pattern's base directory and collect
    /// matching files.
    ///
    /// Order: pattern order first, then lexical path order within a pattern.
    /// A file matched by several patterns is returned once, at its first
    /// match. A missing base directory yields no files rather than an error.
    pub fn collect(&self, fs: &dyn FileSystem, root: &Path) -> Result<Vec<Source>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        for include in self.includes.iter() {
            let base_dir = if include.base.is_empty() {
                root.to_path_buf()
            } else {
                root.join(&include.base)
            };
            if !fs.is_dir(&base_dir) {
                debug!(pattern = %include.pattern, "glob base directory missing; no files");
                continue;
            }

            let mut matched = Vec::new();
            let mut stack = vec![base_dir];
            while let Some(dir) = stack.pop() {
                for path in fs.read_dir(&dir)? {
                    if fs.is_dir(&path) {
                        stack.push(path);
                    } else if fs.is_file(&path) {
                        let Ok(rel) = path.strip_prefix(root) else {
                            continue;
                        };
                        let rel = rel.to_string_lossy().replace('\\', "/");
                        if include.matcher.is_match(&rel) && !self.is_excluded(&rel) {
                            matched.push((rel, path));
                        }
                    }
                }
            }

            matched.sort();
            for (rel, path) in matched {
                if !seen.insert(rel.clone()) {
                    continue;
                }
                let out_rel = rel
                    .strip_prefix(include.base.as_str())
                    .unwrap_or(&rel)
                    .to_string();
                out.push(Source { path, rel, out_rel });
            }
        }

        Ok(out)
    }
}

fn has_glob_meta(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

/// Literal directory prefix of a glob, with a trailing `/` (or empty).
///
/// `assets/src/scss/**/*.scss` -> `assets/src/scss/`;
/// a glob without metacharacters names a file, so its base is its directory.
pub fn glob_base(pattern: &str) -> String {
    let components: Vec<&str> = pattern.split('/').collect();
    let literal: Vec<&str> = match components.iter().position(|c| has_glob_meta(c)) {
        Some(idx) => components[..idx].to_vec(),
        None => components[..components.len().saturating_sub(1)].to_vec(),
    };

    let joined = literal
        .into_iter()
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/");

    if joined.is_empty() {
        joined
    } else {
        format!("{joined}/")
    }
}
