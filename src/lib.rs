// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod server;
pub mod stage;
pub mod types;
pub mod watch;

use std::sync::Arc;

use tracing::info;

use crate::cli::{CliArgs, Command};
use crate::config::ConfigFile;
use crate::dag::{TaskGraph, TaskKind};
use crate::engine::TaskRunner;
use crate::errors::Result;
use crate::exec::StageExecutor;
use crate::fs::{FileSystem, RealFileSystem};
use crate::server::ReloadHub;
use crate::stage::CacheStore;

/// High-level entry point used by `main.rs`.
///
/// Returns `Ok(false)` when the invoked task reported failures.
pub async fn run(args: CliArgs) -> Result<bool> {
    let cfg = config::load(&args.config)?;

    match args.command.unwrap_or(Command::Run { task: None }) {
        Command::List => {
            print!("{}", render_listing(&cfg));
            Ok(true)
        }
        Command::Plan { task } => {
            let graph = TaskGraph::from_config(&cfg)?;
            let name = task.unwrap_or_else(|| cfg.config_section().default_task.clone());
            let id = graph.lookup(&name)?;
            print!("{}", graph.render_plan(id));
            Ok(true)
        }
        Command::Run { task } => {
            let name = task.unwrap_or_else(|| cfg.config_section().default_task.clone());
            run_task(&cfg, &name).await
        }
    }
}

/// Invoke `name`, then keep serving/watching until Ctrl-C if the task
/// started any long-lived service.
pub async fn run_task(cfg: &ConfigFile, name: &str) -> Result<bool> {
    let section = cfg.config_section();

    let cache = CacheStore::open(section.cache_storage, cfg.root())?;
    let stage_names: Vec<&str> = cfg.stages().keys().map(|s| s.as_str()).collect();
    cache.prune(&stage_names);

    let hub = ReloadHub::new();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let mut executor = StageExecutor::new(cfg.root(), fs, cache.clone())
        .with_reload(hub.clone(), section.reload_extensions.clone());
    if let Some(server) = cfg.server() {
        executor = executor.with_server_root(&server.root);
    }

    let runner = Arc::new(TaskRunner::new(cfg, executor, cache.clone(), hub)?);
    let report = runner.invoke(name).await?;

    if runner.services().is_active().await {
        info!("serving and watching; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        info!("shutdown requested");
        runner.services().shutdown().await;
    }

    cache.persist()?;
    Ok(report.is_success())
}

/// Human-readable summary of what a descriptor declares.
pub fn render_listing(cfg: &ConfigFile) -> String {
    let mut out = String::new();

    out.push_str(&format!("stages ({}):\n", cfg.stages().len()));
    for (name, stage) in cfg.stages() {
        let target = if stage.write {
            stage.dest.as_str()
        } else {
            "(check only)"
        };
        out.push_str(&format!("  {name}: {} -> {target}\n", stage.src.join(", ")));
    }

    // Composite tasks are listed from the graph so stage aliases show up
    // with their resolved target.
    if let Ok(graph) = TaskGraph::from_config(cfg) {
        let tasks: Vec<_> = graph
            .iter()
            .filter(|(_, node)| cfg.tasks().contains_key(&node.name))
            .collect();
        out.push_str(&format!("tasks ({}):\n", tasks.len()));
        for (_, node) in tasks {
            let detail = match &node.kind {
                TaskKind::Series(members) | TaskKind::Parallel(members) => members
                    .iter()
                    .map(|m| graph.name(*m))
                    .collect::<Vec<_>>()
                    .join(", "),
                TaskKind::Stage(stage) => stage.clone(),
                TaskKind::Watch(watches) => watches.join(", "),
                TaskKind::Clean(dirs) => dirs
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                TaskKind::Serve => cfg
                    .server()
                    .map(|s| format!("{}:{} ({})", s.host, s.port, s.root))
                    .unwrap_or_default(),
            };
            out.push_str(&format!("  {} [{}] {detail}\n", node.name, node.kind.label()));
        }
    }

    out.push_str(&format!("watches ({}):\n", cfg.watches().len()));
    for (name, watch) in cfg.watches() {
        out.push_str(&format!(
            "  {name}: {} -> {}\n",
            watch.glob.join(", "),
            watch.task
        ));
    }

    out.push_str(&format!("default task: {}\n", cfg.config_section().default_task));
    out
}
