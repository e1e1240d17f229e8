use std::path::PathBuf;

use assetdag::config::{
    ConfigFile, RawConfigFile, ServerSection, StageConfig, TaskConfig, TransformSpec, WatchConfig,
};
use assetdag::errors::Result;
use assetdag::types::ReloadMode;

/// Builder for `ConfigFile` to simplify test setup.
#[derive(Debug, Default)]
pub struct ConfigFileBuilder {
    config: RawConfigFile,
    root: Option<PathBuf>,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, name: &str, value: &str) -> Self {
        self.config.paths.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_stage(mut self, name: &str, stage: StageConfig) -> Self {
        self.config.stage.insert(name.to_string(), stage);
        self
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_watch(mut self, name: &str, glob: &[&str], task: &str) -> Self {
        self.config.watch.insert(
            name.to_string(),
            WatchConfig {
                glob: glob.iter().map(|s| s.to_string()).collect(),
                exclude: Vec::new(),
                task: task.to_string(),
            },
        );
        self
    }

    pub fn with_server(mut self, root: &str, port: u16) -> Self {
        self.config.server = Some(ServerSection {
            root: root.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            https: false,
            cert: None,
            key: None,
            index: "index.html".to_string(),
            close_clients_on_exit: true,
        });
        self
    }

    pub fn with_default_task(mut self, name: &str) -> Self {
        self.config.config.default_task = name.to_string();
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.config.config.debounce_ms = ms;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        let cfg = ConfigFile::try_from(self.config)?;
        Ok(match self.root {
            Some(root) => cfg.with_root(root),
            None => cfg,
        })
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

/// Builder for `StageConfig`.
#[derive(Debug)]
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(src: &str, dest: &str) -> Self {
        Self {
            stage: StageConfig {
                src: vec![src.to_string()],
                exclude: Vec::new(),
                dest: dest.to_string(),
                cache: false,
                newer: false,
                allow_empty: true,
                write: true,
                reload: ReloadMode::Auto,
                transforms: Vec::new(),
            },
        }
    }

    pub fn src(mut self, pattern: &str) -> Self {
        self.stage.src.push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.stage.exclude.push(pattern.to_string());
        self
    }

    pub fn cache(mut self, val: bool) -> Self {
        self.stage.cache = val;
        self
    }

    pub fn newer(mut self, val: bool) -> Self {
        self.stage.newer = val;
        self
    }

    pub fn allow_empty(mut self, val: bool) -> Self {
        self.stage.allow_empty = val;
        self
    }

    pub fn write(mut self, val: bool) -> Self {
        self.stage.write = val;
        self
    }

    pub fn reload(mut self, mode: ReloadMode) -> Self {
        self.stage.reload = mode;
        self
    }

    pub fn transform(mut self, spec: TransformSpec) -> Self {
        self.stage.transforms.push(spec);
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn series(members: &[&str]) -> TaskConfig {
    TaskConfig {
        series: Some(names(members)),
        ..TaskConfig::default()
    }
}

pub fn parallel(members: &[&str]) -> TaskConfig {
    TaskConfig {
        parallel: Some(names(members)),
        ..TaskConfig::default()
    }
}

pub fn serve() -> TaskConfig {
    TaskConfig {
        serve: Some(true),
        ..TaskConfig::default()
    }
}

pub fn watch(watches: &[&str]) -> TaskConfig {
    TaskConfig {
        watch: Some(names(watches)),
        ..TaskConfig::default()
    }
}

pub fn clean(dirs: &[&str]) -> TaskConfig {
    TaskConfig {
        clean: Some(names(dirs)),
        ..TaskConfig::default()
    }
}
