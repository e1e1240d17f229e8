// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::interpolate::{interpolate, interpolate_all};
use crate::config::model::{
    ConfigFile, RawConfigFile, ServerSection, StageConfig, TaskConfig, TaskSpec, TransformSpec,
    WatchConfig,
};
use crate::dag::TaskGraph;
use crate::errors::{AssetdagError, Result};
use crate::watch::patterns::compile_glob;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = AssetdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_stages(&raw)?;
        validate_global_config(&raw)?;

        let stages = resolve_stages(&raw)?;
        let server = resolve_server(&raw)?;
        let tasks = resolve_tasks(&raw, &stages, server.is_some())?;
        let watches = resolve_watches(&raw)?;

        // Unknown members and cycles are construction-time failures of the
        // task graph itself; building it once here rejects them at load.
        TaskGraph::from_parts(&stages, &tasks, &watches)?;

        Ok(ConfigFile::new_unchecked(
            raw.project,
            raw.config,
            server,
            stages,
            tasks,
            watches,
        ))
    }
}

fn config_error(msg: impl Into<String>) -> AssetdagError {
    AssetdagError::ConfigError(msg.into())
}

fn ensure_has_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stage.is_empty() {
        return Err(config_error(
            "descriptor must contain at least one [stage.<name>] section",
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.debounce_ms == 0 {
        return Err(config_error("[config].debounce_ms must be >= 1 (got 0)"));
    }
    if cfg.config.default_task.trim().is_empty() {
        return Err(config_error("[config].default_task must not be empty"));
    }
    Ok(())
}

fn check_globs(patterns: &[String], context: &str) -> Result<()> {
    for pat in patterns {
        if pat.trim().is_empty() {
            return Err(config_error(format!("{context}: empty glob pattern")));
        }
        compile_glob(pat).map_err(|e| config_error(format!("{context}: {e}")))?;
    }
    Ok(())
}

fn resolve_stages(cfg: &RawConfigFile) -> Result<BTreeMap<String, StageConfig>> {
    let mut out = BTreeMap::new();

    for (name, stage) in cfg.stage.iter() {
        let ctx = format!("stage '{name}'");

        if stage.src.is_empty() {
            return Err(config_error(format!("{ctx}: `src` must list at least one glob")));
        }
        let src = interpolate_all(&stage.src, &cfg.paths, &format!("{ctx} src"))?;
        let exclude = interpolate_all(&stage.exclude, &cfg.paths, &format!("{ctx} exclude"))?;
        check_globs(&src, &format!("{ctx} src"))?;
        check_globs(&exclude, &format!("{ctx} exclude"))?;

        let dest = interpolate(&stage.dest, &cfg.paths, &format!("{ctx} dest"))?;
        if stage.write && dest.trim().is_empty() {
            return Err(config_error(format!("{ctx}: `dest` is required")));
        }
        if !stage.write && stage.newer {
            return Err(config_error(format!(
                "{ctx}: `newer` compares against outputs and needs `write = true`"
            )));
        }

        for transform in stage.transforms.iter() {
            validate_transform(transform, &ctx)?;
        }

        out.insert(
            name.clone(),
            StageConfig {
                src,
                exclude,
                dest,
                ..stage.clone()
            },
        );
    }

    Ok(out)
}

fn validate_transform(spec: &TransformSpec, ctx: &str) -> Result<()> {
    match spec {
        TransformSpec::Command { cmd, skip, .. } => {
            if cmd.trim().is_empty() {
                return Err(config_error(format!("{ctx}: command transform needs `cmd`")));
            }
            check_globs(skip, &format!("{ctx} command skip"))
        }
        TransformSpec::Check { cmd, skip } => {
            if cmd.trim().is_empty() {
                return Err(config_error(format!("{ctx}: check transform needs `cmd`")));
            }
            check_globs(skip, &format!("{ctx} check skip"))
        }
        TransformSpec::Concat { file } => {
            if file.trim().is_empty() {
                return Err(config_error(format!("{ctx}: concat transform needs `file`")));
            }
            Ok(())
        }
        TransformSpec::Banner { .. } => Ok(()),
        TransformSpec::Rename { skip, .. } => check_globs(skip, &format!("{ctx} rename skip")),
        TransformSpec::Filter { include } => {
            if include.is_empty() {
                return Err(config_error(format!(
                    "{ctx}: filter transform needs at least one `include` glob"
                )));
            }
            check_globs(include, &format!("{ctx} filter include"))
        }
    }
}

fn resolve_server(cfg: &RawConfigFile) -> Result<Option<ServerSection>> {
    let Some(server) = cfg.server.as_ref() else {
        return Ok(None);
    };

    let root = interpolate(&server.root, &cfg.paths, "[server].root")?;
    if root.trim().is_empty() {
        return Err(config_error("[server].root is required"));
    }

    let cert = server
        .cert
        .as_deref()
        .map(|c| interpolate(c, &cfg.paths, "[server].cert"))
        .transpose()?;
    let key = server
        .key
        .as_deref()
        .map(|k| interpolate(k, &cfg.paths, "[server].key"))
        .transpose()?;

    if server.https && (cert.is_none() || key.is_none()) {
        return Err(config_error(
            "[server].https = true requires both `cert` and `key`",
        ));
    }

    Ok(Some(ServerSection {
        root,
        cert,
        key,
        ..server.clone()
    }))
}

impl TaskConfig {
    /// Collapse the optional fields into a single [`TaskSpec`].
    ///
    /// Exactly one of `series`, `parallel`, `stage`, `serve = true`, `watch`,
    /// `clean` must be present.
    pub fn spec(&self, name: &str) -> Result<TaskSpec> {
        let mut kinds = Vec::new();

        if let Some(members) = &self.series {
            kinds.push(TaskSpec::Series(members.clone()));
        }
        if let Some(members) = &self.parallel {
            kinds.push(TaskSpec::Parallel(members.clone()));
        }
        if let Some(stage) = &self.stage {
            kinds.push(TaskSpec::Stage(stage.clone()));
        }
        if self.serve == Some(true) {
            kinds.push(TaskSpec::Serve);
        }
        if let Some(watches) = &self.watch {
            kinds.push(TaskSpec::Watch(watches.clone()));
        }
        if let Some(dirs) = &self.clean {
            kinds.push(TaskSpec::Clean(dirs.clone()));
        }

        match kinds.len() {
            1 => Ok(kinds.remove(0)),
            0 => Err(config_error(format!(
                "task '{name}' must set one of series, parallel, stage, serve, watch, clean"
            ))),
            _ => Err(config_error(format!(
                "task '{name}' sets more than one of series, parallel, stage, serve, watch, clean"
            ))),
        }
    }
}

fn resolve_tasks(
    cfg: &RawConfigFile,
    stages: &BTreeMap<String, StageConfig>,
    has_server: bool,
) -> Result<BTreeMap<String, TaskSpec>> {
    let mut out = BTreeMap::new();

    for (name, task) in cfg.task.iter() {
        if stages.contains_key(name) {
            return Err(config_error(format!(
                "task '{name}' collides with the stage of the same name"
            )));
        }

        let spec = match task.spec(name)? {
            TaskSpec::Series(members) | TaskSpec::Parallel(members) if members.is_empty() => {
                return Err(config_error(format!("task '{name}' has an empty member list")));
            }
            TaskSpec::Watch(watches) if watches.is_empty() => {
                return Err(config_error(format!("task '{name}' lists no watches")));
            }
            TaskSpec::Serve if !has_server => {
                return Err(config_error(format!(
                    "task '{name}' serves but the descriptor has no [server] section"
                )));
            }
            TaskSpec::Clean(dirs) => {
                if dirs.is_empty() {
                    return Err(config_error(format!("task '{name}' cleans nothing")));
                }
                let dirs = interpolate_all(&dirs, &cfg.paths, &format!("task '{name}' clean"))?;
                if dirs.iter().any(|d| d.trim().is_empty()) {
                    return Err(config_error(format!("task '{name}' has an empty clean path")));
                }
                TaskSpec::Clean(dirs)
            }
            other => other,
        };

        out.insert(name.clone(), spec);
    }

    Ok(out)
}

fn resolve_watches(cfg: &RawConfigFile) -> Result<BTreeMap<String, WatchConfig>> {
    let mut out = BTreeMap::new();

    for (name, watch) in cfg.watch.iter() {
        let ctx = format!("watch '{name}'");
        if watch.glob.is_empty() {
            return Err(config_error(format!("{ctx}: `glob` must list at least one pattern")));
        }
        if watch.task.trim().is_empty() {
            return Err(config_error(format!("{ctx}: `task` is required")));
        }

        let glob = interpolate_all(&watch.glob, &cfg.paths, &format!("{ctx} glob"))?;
        let exclude = interpolate_all(&watch.exclude, &cfg.paths, &format!("{ctx} exclude"))?;
        check_globs(&glob, &format!("{ctx} glob"))?;
        check_globs(&exclude, &format!("{ctx} exclude"))?;

        out.insert(
            name.clone(),
            WatchConfig {
                glob,
                exclude,
                task: watch.task.clone(),
            },
        );
    }

    Ok(out)
}
