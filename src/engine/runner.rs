// src/engine/runner.rs

//! Executes tasks of a [`TaskGraph`].
//!
//! Stage leaves are delegated to a [`StageBackend`]; composites are driven
//! here: `series` members one at a time, stopping at the first failure,
//! `parallel` members together with join semantics. Every failure ends up
//! in the returned [`RunReport`]; nothing below `invoke` returns `Err`.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, ServerSection, WatchConfig};
use crate::dag::{RunReport, TaskGraph, TaskId, TaskKind};
use crate::engine::notifier::Notifier;
use crate::engine::services::Services;
use crate::errors::Result;
use crate::exec::StageBackend;
use crate::server::ReloadHub;
use crate::stage::{CacheStore, Stage};
use crate::watch::{spawn_watches, TaskInvoker, WatchProfile};

type NodeFuture<'a> = Pin<Box<dyn Future<Output = RunReport> + Send + 'a>>;

pub struct TaskRunner<B: StageBackend> {
    graph: Arc<TaskGraph>,
    stages: BTreeMap<String, Stage>,
    backend: B,
    root: PathBuf,
    server: Option<ServerSection>,
    watches: BTreeMap<String, WatchConfig>,
    debounce: Duration,
    cache: CacheStore,
    hub: ReloadHub,
    notifier: Notifier,
    services: Services,
}

impl<B: StageBackend> std::fmt::Debug for TaskRunner<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("root", &self.root)
            .field("tasks", &self.graph.len())
            .field("stages", &self.stages.len())
            .finish_non_exhaustive()
    }
}

impl<B: StageBackend + 'static> TaskRunner<B> {
    /// Build the task graph and compile every stage of `cfg`.
    pub fn new(cfg: &ConfigFile, backend: B, cache: CacheStore, hub: ReloadHub) -> Result<Self> {
        let graph = TaskGraph::from_config(cfg)?;

        let mut stages = BTreeMap::new();
        for (name, stage_cfg) in cfg.stages() {
            let stage = Stage::from_config(name, stage_cfg, cfg.project())?;
            stages.insert(name.clone(), stage);
        }

        let section = cfg.config_section();
        Ok(Self {
            graph: Arc::new(graph),
            stages,
            backend,
            root: cfg.root().to_path_buf(),
            server: cfg.server().cloned(),
            watches: cfg.watches().clone(),
            debounce: Duration::from_millis(section.debounce_ms),
            cache,
            hub,
            notifier: Notifier::new(section.desktop_notify),
            services: Services::new(),
        })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Run the named task to completion.
    ///
    /// Fails only for an unknown name; task failures are in the report.
    pub async fn invoke(self: &Arc<Self>, name: &str) -> Result<RunReport> {
        let id = self.graph.lookup(name)?;
        info!(task = %name, "invoking task");
        let started = Instant::now();

        let report = self.run_node(id).await;

        if report.is_success() {
            info!(
                task = %name,
                files_written = report.files_written,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "task finished"
            );
        } else {
            self.notifier.task_failed(name, &report);
        }
        Ok(report)
    }

    fn run_node(self: &Arc<Self>, id: TaskId) -> NodeFuture<'_> {
        Box::pin(async move {
            let node = self.graph.node(id);
            let mut report = RunReport::default();

            match &node.kind {
                TaskKind::Stage(stage_name) => {
                    self.run_stage(&node.name, stage_name, &mut report).await;
                }
                TaskKind::Series(members) => {
                    debug!(task = %node.name, members = members.len(), "running series");
                    for member in members {
                        let sub = self.run_node(*member).await;
                        let failed = !sub.is_success();
                        report.merge(sub);
                        if failed {
                            warn!(
                                task = %node.name,
                                failed_member = %self.graph.name(*member),
                                "series aborted"
                            );
                            break;
                        }
                    }
                }
                TaskKind::Parallel(members) => {
                    debug!(task = %node.name, members = members.len(), "running parallel");
                    let subs = join_all(members.iter().map(|m| self.run_node(*m))).await;
                    for sub in subs {
                        report.merge(sub);
                    }
                }
                TaskKind::Serve => self.start_server(&node.name, &mut report).await,
                TaskKind::Watch(names) => self.start_watches(&node.name, names, &mut report),
                TaskKind::Clean(dirs) => self.clean(&node.name, dirs, &mut report).await,
            }

            report
        })
    }

    async fn run_stage(&self, task: &str, stage_name: &str, report: &mut RunReport) {
        let Some(stage) = self.stages.get(stage_name) else {
            report.record_failure(task, format!("stage '{stage_name}' is not compiled"));
            return;
        };

        info!(task = %task, stage = %stage_name, "starting stage");
        let started = Instant::now();
        let result = self.backend.run_stage(stage).await;

        report.executed.push(task.to_string());
        report.files_written += result.files_written;
        report.bytes_written += result.bytes_written;
        for err in &result.errors {
            self.notifier.transform_failed(err);
            report.record_failure(task, err.to_string());
        }

        info!(
            task = %task,
            stage = %stage_name,
            written = result.files_written,
            skipped = result.files_skipped,
            errors = result.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished stage"
        );
    }

    async fn start_server(&self, task: &str, report: &mut RunReport) {
        report.executed.push(task.to_string());
        let Some(server) = &self.server else {
            report.record_failure(task, "no [server] section configured");
            return;
        };
        if let Err(err) = self
            .services
            .start_server(&self.root, server, self.hub.clone())
            .await
        {
            let message = format!("{err:#}");
            self.notifier.service_failed(task, &message);
            report.record_failure(task, message);
        }
    }

    fn start_watches(self: &Arc<Self>, task: &str, names: &[String], report: &mut RunReport) {
        report.executed.push(task.to_string());
        let fresh = self.services.claim_watches(names);
        if fresh.is_empty() {
            debug!(task = %task, "watches already running");
            return;
        }

        let started = self.watch_profiles(&fresh).and_then(|profiles| {
            let invoker: Arc<dyn TaskInvoker> = Arc::clone(self) as Arc<dyn TaskInvoker>;
            spawn_watches(
                self.root.clone(),
                profiles,
                self.debounce,
                self.cache.clone(),
                invoker,
            )
        });

        match started {
            Ok(handle) => self.services.add_watcher(handle),
            Err(err) => {
                self.services.release_watches(&fresh);
                let message = format!("{err:#}");
                self.notifier.service_failed(task, &message);
                report.record_failure(task, message);
            }
        }
    }

    fn watch_profiles(&self, names: &[String]) -> anyhow::Result<Vec<WatchProfile>> {
        names
            .iter()
            .map(|name| {
                let cfg = self
                    .watches
                    .get(name)
                    .with_context(|| format!("unknown watch '{name}'"))?;
                let stages = self
                    .graph
                    .watch_target(name)
                    .map(|target| self.graph.stages_under(target))
                    .unwrap_or_default();
                WatchProfile::new(name, cfg, stages)
            })
            .collect()
    }

    async fn clean(&self, task: &str, dirs: &[PathBuf], report: &mut RunReport) {
        report.executed.push(task.to_string());
        for dir in dirs {
            match clean_dir(&self.root, dir).await {
                Ok(removed) => info!(task = %task, dir = %dir.display(), removed, "cleaned"),
                Err(err) => report.record_failure(task, format!("{err:#}")),
            }
        }
    }
}

impl<B: StageBackend + 'static> TaskInvoker for TaskRunner<B> {
    fn invoke_task(self: Arc<Self>, task: String) -> Pin<Box<dyn Future<Output = Result<RunReport>> + Send>> {
        Box::pin(async move { self.invoke(&task).await })
    }
}

/// Remove everything inside `root/dir`, keeping (or creating) the directory.
async fn clean_dir(root: &Path, dir: &Path) -> anyhow::Result<usize> {
    let escapes = dir.as_os_str().is_empty()
        || dir.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        || dir.components().all(|c| matches!(c, Component::CurDir));
    if escapes {
        anyhow::bail!("refusing to clean {:?}: must be a subdirectory of the project", dir);
    }

    let target = root.join(dir);
    if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
        tokio::fs::create_dir_all(&target)
            .await
            .with_context(|| format!("creating {:?}", target))?;
        return Ok(0);
    }

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(&target)
        .await
        .with_context(|| format!("reading dir {:?}", target))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let res = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        res.with_context(|| format!("removing {:?}", path))?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_keeps_directory_and_removes_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let dist = tmp.path().join("dist");
        std::fs::create_dir_all(dist.join("css")).unwrap();
        std::fs::write(dist.join("css/site.css"), "x").unwrap();
        std::fs::write(dist.join("index.html"), "x").unwrap();

        let removed = clean_dir(tmp.path(), Path::new("dist")).await.unwrap();
        assert_eq!(removed, 2);
        assert!(dist.is_dir());
        assert_eq!(std::fs::read_dir(&dist).unwrap().count(), 0);

        let created = clean_dir(tmp.path(), Path::new("build/js")).await.unwrap();
        assert_eq!(created, 0);
        assert!(tmp.path().join("build/js").is_dir());
    }

    #[tokio::test]
    async fn clean_refuses_project_root_and_parents() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(clean_dir(tmp.path(), Path::new(".")).await.is_err());
        assert!(clean_dir(tmp.path(), Path::new("../x")).await.is_err());
        assert!(clean_dir(tmp.path(), Path::new("/etc")).await.is_err());
    }
}
