// src/exec/executor.rs

//! Production stage backend.
//!
//! One run of a stage:
//! 1. resolve sources through the [`FileSystem`] seam,
//! 2. drop sources that are up to date (`newer`) or unchanged (`cache`),
//! 3. drive the transform chain (per-file steps isolate failures),
//! 4. write survivors under `dest`,
//! 5. send at most one reload notification.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::TransformError;
use crate::exec::backend::{StageBackend, StageResult};
use crate::exec::command::{pipe_through, run_check, CommandEnv};
use crate::fs::FileSystem;
use crate::server::reload::{ReloadHub, ReloadScope};
use crate::stage::cache::SOURCE_SET_KEY;
use crate::stage::hash::fingerprint;
use crate::stage::transform::{self, is_skipped};
use crate::stage::{Asset, CacheStore, Source, Stage, Transform};
use crate::types::ReloadMode;

/// Runs stages against a filesystem, a cache store and a reload hub.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    cache: CacheStore,
    reload: ReloadHub,
    reload_extensions: Vec<String>,
    /// Served directory, relative to `root`; used to turn written files
    /// into URL paths for style reloads.
    server_root: Option<PathBuf>,
}

impl StageExecutor {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>, cache: CacheStore) -> Self {
        Self {
            root: root.into(),
            fs,
            cache,
            reload: ReloadHub::new(),
            reload_extensions: vec!["css".into(), "js".into(), "html".into()],
            server_root: None,
        }
    }

    pub fn with_reload(mut self, hub: ReloadHub, extensions: Vec<String>) -> Self {
        self.reload = hub;
        self.reload_extensions = extensions;
        self
    }

    pub fn with_server_root(mut self, server_root: impl Into<PathBuf>) -> Self {
        self.server_root = Some(server_root.into());
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    async fn execute(&self, stage: &Stage) -> StageResult {
        let mut result = StageResult::default();

        let sources = match stage.sources.collect(self.fs.as_ref(), &self.root) {
            Ok(sources) => sources,
            Err(err) => {
                return StageResult::failed(TransformError::for_stage(
                    &stage.name,
                    format!("resolving sources: {err:#}"),
                ));
            }
        };

        if sources.is_empty() {
            if stage.allow_empty {
                debug!(stage = %stage.name, "no sources matched");
            } else {
                result.errors.push(TransformError::for_stage(
                    &stage.name,
                    "no source files matched",
                ));
            }
            return result;
        }

        let total = sources.len();
        let assets = self.select_sources(stage, sources, &mut result);
        if assets.is_empty() {
            info!(stage = %stage.name, skipped = result.files_skipped, "stage up to date");
            return result;
        }
        debug!(stage = %stage.name, processing = assets.len(), total, "running transform chain");

        let assets = self.apply_chain(stage, assets, &mut result).await;
        if !stage.write {
            info!(stage = %stage.name, passed = assets.len(), failed = result.errors.len(), "checked");
            return result;
        }
        let written = self.write_outputs(stage, assets, &mut result);
        self.notify(stage, &written);

        result
    }

    /// Read sources and apply the `newer` and `cache` filters.
    ///
    /// A stage that folds files together (concat) is all-or-nothing: every
    /// source is processed as soon as one of them is out of date.
    fn select_sources(
        &self,
        stage: &Stage,
        sources: Vec<Source>,
        result: &mut StageResult,
    ) -> Vec<Asset> {
        let aggregate = has_concat(stage);
        if !stage.newer {
            return self.read_and_check_cache(stage, sources, aggregate, result);
        }

        let dest = self.root.join(&stage.dest);
        let before = sources.len();
        let sources: Vec<Source> = if aggregate {
            if sources.iter().all(|s| self.is_up_to_date(stage, s, &dest)) {
                Vec::new()
            } else {
                sources
            }
        } else {
            sources
                .into_iter()
                .filter(|s| !self.is_up_to_date(stage, s, &dest))
                .collect()
        };
        result.files_skipped += before - sources.len();
        if sources.is_empty() {
            return Vec::new();
        }
        self.read_and_check_cache(stage, sources, aggregate, result)
    }

    fn read_and_check_cache(
        &self,
        stage: &Stage,
        sources: Vec<Source>,
        aggregate: bool,
        result: &mut StageResult,
    ) -> Vec<Asset> {
        let partition = stage.cache.then(|| self.cache.partition(&stage.name));

        let mut assets = Vec::with_capacity(sources.len());
        let mut any_changed = false;

        // A bundle also goes stale when a member disappears or joins, even
        // if every remaining file is unchanged.
        if aggregate {
            if let Some(p) = &partition {
                let mut rels: Vec<&str> = sources.iter().map(|s| s.rel.as_str()).collect();
                rels.sort_unstable();
                let listing = rels.join("\n");
                any_changed |= p.check_and_record(SOURCE_SET_KEY, &fingerprint(listing.as_bytes()));
            }
        }
        for source in sources {
            debug!(stage = %stage.name, path = %source.rel, "source");
            let contents = match self.fs.read(&source.path) {
                Ok(contents) => contents,
                Err(err) => {
                    result.errors.push(TransformError::for_file(
                        &stage.name,
                        &source.rel,
                        format!("{err:#}"),
                    ));
                    continue;
                }
            };

            let changed = match &partition {
                Some(p) => p.check_and_record(&source.rel, &fingerprint(&contents)),
                None => true,
            };
            any_changed |= changed;

            if changed || aggregate {
                assets.push(Asset::new(source.out_rel, contents, source.rel));
            } else {
                result.files_skipped += 1;
            }
        }

        if aggregate && !any_changed {
            result.files_skipped += assets.len();
            return Vec::new();
        }
        assets
    }

    fn is_up_to_date(&self, stage: &Stage, source: &Source, dest: &Path) -> bool {
        let output = dest.join(stage.expected_output(&source.out_rel));
        match (self.fs.modified(&source.path), self.fs.modified(&output)) {
            (Some(src), Some(out)) => out >= src,
            _ => false,
        }
    }

    async fn apply_chain(
        &self,
        stage: &Stage,
        mut assets: Vec<Asset>,
        result: &mut StageResult,
    ) -> Vec<Asset> {
        for step in &stage.transforms {
            assets = match step {
                Transform::Command { cmd, ext, skip } => {
                    let mut kept = Vec::with_capacity(assets.len());
                    for mut asset in assets {
                        if is_skipped(skip, &asset.rel) {
                            kept.push(asset);
                            continue;
                        }
                        let env = CommandEnv {
                            stage: &stage.name,
                            file: &asset.rel,
                            root: &self.root,
                        };
                        match pipe_through(cmd, &asset.contents, env).await {
                            Ok(out) => {
                                asset.contents = out;
                                if let Some(ext) = ext {
                                    asset.rel = transform::replace_extension(&asset.rel, ext);
                                }
                                kept.push(asset);
                            }
                            Err(err) => self.fail_asset(stage, asset, format!("{err:#}"), result),
                        }
                    }
                    kept
                }
                Transform::Check { cmd, skip } => {
                    let mut kept = Vec::with_capacity(assets.len());
                    for asset in assets {
                        if is_skipped(skip, &asset.rel) {
                            kept.push(asset);
                            continue;
                        }
                        let env = CommandEnv {
                            stage: &stage.name,
                            file: &asset.rel,
                            root: &self.root,
                        };
                        let outcome = run_check(cmd, &asset.contents, env).await;
                        match outcome {
                            Ok(()) => kept.push(asset),
                            Err(err) => self.fail_asset(stage, asset, format!("{err:#}"), result),
                        }
                    }
                    kept
                }
                Transform::Concat { file } => transform::concat(assets, file),
                Transform::Banner { text } => assets
                    .into_iter()
                    .map(|a| transform::banner(a, text))
                    .collect(),
                Transform::Rename { suffix, ext, skip } => assets
                    .into_iter()
                    .map(|mut a| {
                        if !is_skipped(skip, &a.rel) {
                            a.rel = transform::rename_path(&a.rel, suffix.as_deref(), ext.as_deref());
                        }
                        a
                    })
                    .collect(),
                Transform::Filter { include } => transform::filter(assets, include),
            };
            debug!(stage = %stage.name, step = step.label(), assets = assets.len(), "transform step done");
        }
        assets
    }

    /// Withhold a failed asset and make sure its sources are retried next run.
    fn fail_asset(&self, stage: &Stage, asset: Asset, message: String, result: &mut StageResult) {
        debug!(stage = %stage.name, path = %asset.rel, error = %message, "asset withheld");
        if stage.cache {
            let partition = self.cache.partition(&stage.name);
            for origin in &asset.origins {
                partition.forget(origin);
            }
        }
        result
            .errors
            .push(TransformError::for_file(&stage.name, &asset.rel, message));
    }

    /// Write assets and return their root-relative output paths.
    fn write_outputs(&self, stage: &Stage, assets: Vec<Asset>, result: &mut StageResult) -> Vec<PathBuf> {
        let mut written = Vec::with_capacity(assets.len());
        for asset in assets {
            let rel_out = stage.dest.join(&asset.rel);
            let path = self.root.join(&rel_out);
            match self.fs.write(&path, &asset.contents) {
                Ok(()) => {
                    let size = asset.contents.len() as u64;
                    info!(
                        stage = %stage.name,
                        path = %rel_out.display(),
                        size = %human_size(size),
                        "wrote"
                    );
                    result.files_written += 1;
                    result.bytes_written += size;
                    written.push(rel_out);
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    self.fail_asset(stage, asset, message, result);
                }
            }
        }
        written
    }

    fn notify(&self, stage: &Stage, written: &[PathBuf]) {
        let Some(scope) = reload_scope(stage.reload, written, &self.reload_extensions) else {
            return;
        };
        let scope = match scope {
            ReloadScope::Styles(paths) => ReloadScope::Styles(
                paths
                    .iter()
                    .map(|p| self.public_path(Path::new(p)))
                    .collect(),
            ),
            full => full,
        };
        debug!(stage = %stage.name, ?scope, "reload");
        self.reload.notify_reload(scope);
    }

    /// URL path of a written file under the served root, or its bare file
    /// name when it lives outside it.
    fn public_path(&self, rel_out: &Path) -> String {
        if let Some(stripped) = self
            .server_root
            .as_deref()
            .and_then(|root| rel_out.strip_prefix(root).ok())
        {
            return format!("/{}", stripped.to_string_lossy().replace('\\', "/"));
        }
        rel_out
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl StageBackend for StageExecutor {
    fn run_stage<'a>(
        &'a self,
        stage: &'a Stage,
    ) -> Pin<Box<dyn Future<Output = StageResult> + Send + 'a>> {
        Box::pin(self.execute(stage))
    }
}

fn has_concat(stage: &Stage) -> bool {
    stage
        .transforms
        .iter()
        .any(|t| matches!(t, Transform::Concat { .. }))
}

/// Decide what a stage's writes should refresh in connected browsers.
///
/// Only files whose extension is listed in `extensions` count. `Auto`
/// narrows to a style reload when all of those are stylesheets.
pub fn reload_scope(mode: ReloadMode, written: &[PathBuf], extensions: &[String]) -> Option<ReloadScope> {
    if mode == ReloadMode::None {
        return None;
    }

    let relevant: Vec<&PathBuf> = written
        .iter()
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        })
        .collect();
    if relevant.is_empty() {
        return None;
    }

    let all_css = relevant
        .iter()
        .all(|p| p.extension().and_then(|e| e.to_str()) == Some("css"));

    if mode == ReloadMode::Auto && all_css {
        Some(ReloadScope::Styles(
            relevant
                .iter()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .collect(),
        ))
    } else {
        Some(ReloadScope::Full)
    }
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProjectSection, StageConfig, TransformSpec};
    use crate::fs::mock::MockFileSystem;
    use crate::server::reload::ReloadMessage;

    fn stage(cfg: StageConfig) -> Stage {
        Stage::from_config("css", &cfg, &ProjectSection::default()).unwrap()
    }

    fn css_config(transforms: Vec<TransformSpec>) -> StageConfig {
        StageConfig {
            src: vec!["src/css/*.css".to_string()],
            exclude: vec![],
            dest: "dist/css".to_string(),
            cache: true,
            newer: false,
            allow_empty: false,
            write: true,
            reload: ReloadMode::Auto,
            transforms,
        }
    }

    fn executor(fs: &MockFileSystem) -> StageExecutor {
        StageExecutor::new("/p", Arc::new(fs.clone()), CacheStore::in_memory())
    }

    #[tokio::test]
    async fn concat_writes_one_file_and_sends_style_reload() {
        let fs = MockFileSystem::new();
        fs.add_file("/p/src/css/a.css", "a{}");
        fs.add_file("/p/src/css/b.css", "b{}");
        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();
        let exec = executor(&fs)
            .with_reload(hub, vec!["css".into()])
            .with_server_root("dist");

        let stage = stage(css_config(vec![TransformSpec::Concat {
            file: "site.css".to_string(),
        }]));
        let result = exec.run_stage(&stage).await;

        assert!(result.is_success(), "{:?}", result.errors);
        assert_eq!(result.files_written, 1);
        assert_eq!(fs.contents("/p/dist/css/site.css").unwrap(), b"a{}\nb{}");
        assert_eq!(
            rx.recv().await.unwrap(),
            ReloadMessage::Css {
                paths: vec!["/css/site.css".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn cached_stage_skips_unchanged_sources() {
        let fs = MockFileSystem::new();
        fs.add_file("/p/src/css/a.css", "a{}");
        fs.add_file("/p/src/css/b.css", "b{}");
        let exec = executor(&fs);
        let stage = stage(css_config(vec![]));

        let first = exec.run_stage(&stage).await;
        assert_eq!(first.files_written, 2);

        let second = exec.run_stage(&stage).await;
        assert_eq!(second.files_written, 0);
        assert_eq!(second.files_skipped, 2);

        fs.add_file("/p/src/css/b.css", "b{color:red}");
        let third = exec.run_stage(&stage).await;
        assert_eq!(third.files_written, 1);
    }

    #[tokio::test]
    async fn empty_match_fails_unless_allowed() {
        let fs = MockFileSystem::new();
        let exec = executor(&fs);

        let strict = exec.run_stage(&stage(css_config(vec![]))).await;
        assert_eq!(strict.errors.len(), 1);
        assert!(strict.errors[0].path.is_none());

        let mut cfg = css_config(vec![]);
        cfg.allow_empty = true;
        let lenient = exec.run_stage(&stage(cfg)).await;
        assert!(lenient.is_success());
        assert_eq!(lenient.files_written, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_file_is_isolated_and_retried() {
        let fs = MockFileSystem::new();
        fs.add_file("/p/src/css/bad.css", "BROKEN");
        fs.add_file("/p/src/css/good.css", "ok{}");
        let exec = StageExecutor::new("/", Arc::new(fs.clone()), CacheStore::in_memory());

        let mut cfg = css_config(vec![TransformSpec::Command {
            cmd: "if grep -q BROKEN; then echo bad input >&2; exit 1; else echo fine; fi".into(),
            ext: None,
            skip: vec![],
        }]);
        cfg.src = vec!["p/src/css/*.css".to_string()];
        cfg.dest = "p/dist".to_string();
        let stage = stage(cfg);

        let result = exec.run_stage(&stage).await;
        assert_eq!(result.files_written, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].path.as_deref(), Some("bad.css"));
        assert!(result.errors[0].message.contains("bad input"));
        assert_eq!(fs.contents("/p/dist/good.css").unwrap(), b"fine\n");

        let partition = exec.cache().partition("css");
        assert!(partition.contains("p/src/css/good.css"));
        assert!(!partition.contains("p/src/css/bad.css"));
    }

    #[test]
    fn reload_scope_rules() {
        let exts = vec!["css".to_string(), "js".to_string()];
        let css = vec![PathBuf::from("dist/a.css"), PathBuf::from("dist/a.css.map")];
        assert_eq!(
            reload_scope(ReloadMode::Auto, &css, &exts),
            Some(ReloadScope::Styles(vec!["dist/a.css".to_string()]))
        );
        assert_eq!(reload_scope(ReloadMode::Full, &css, &exts), Some(ReloadScope::Full));
        assert_eq!(reload_scope(ReloadMode::None, &css, &exts), None);

        let mixed = vec![PathBuf::from("dist/a.css"), PathBuf::from("dist/a.js")];
        assert_eq!(reload_scope(ReloadMode::Auto, &mixed, &exts), Some(ReloadScope::Full));

        let images = vec![PathBuf::from("dist/logo.png")];
        assert_eq!(reload_scope(ReloadMode::Auto, &images, &exts), None);
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2_500), "2.50 kB");
    }
}
