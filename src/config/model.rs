// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::types::{CacheStorageMode, ReloadMode};

/// Top-level descriptor exactly as read from TOML, before validation and
/// `${var}` interpolation.
///
/// ```toml
/// [paths]
/// src = "assets/src/"
/// dist = "assets/dist/"
///
/// [stage.fonts]
/// src = ["${src}fonts/**/*"]
/// dest = "${dist}fonts"
///
/// [task.build]
/// series = ["clean_dist", "fonts"]
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub project: ProjectSection,

    /// Named path variables, referenced elsewhere as `${name}`.
    #[serde(default)]
    pub paths: BTreeMap<String, String>,

    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub server: Option<ServerSection>,

    /// `[stage.<name>]`; every stage is also a leaf task of the same name.
    #[serde(default)]
    pub stage: BTreeMap<String, StageConfig>,

    /// `[task.<name>]` composites and service tasks.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,

    /// `[watch.<name>]` glob -> task bindings.
    #[serde(default)]
    pub watch: BTreeMap<String, WatchConfig>,
}

/// `[project]`: metadata rendered into banners.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub copyright: String,
}

/// `[config]`: global behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Task run when the CLI is given no task name.
    #[serde(default = "default_task_name")]
    pub default_task: String,

    /// Debounce window for watch triggers, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub cache_storage: CacheStorageMode,

    /// Output extensions that cause a dev server notification when written.
    #[serde(default = "default_reload_extensions")]
    pub reload_extensions: Vec<String>,

    /// Also raise a desktop notification (`notify-send`) on failures.
    #[serde(default)]
    pub desktop_notify: bool,
}

fn default_task_name() -> String {
    "default".to_string()
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_reload_extensions() -> Vec<String> {
    vec!["css".to_string(), "js".to_string(), "html".to_string()]
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            default_task: default_task_name(),
            debounce_ms: default_debounce_ms(),
            cache_storage: CacheStorageMode::default(),
            reload_extensions: default_reload_extensions(),
            desktop_notify: false,
        }
    }
}

/// `[server]`: the development server.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Directory served as the site root.
    pub root: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub https: bool,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_index")]
    pub index: String,
    /// Ask connected browsers to close their tab when the server stops.
    #[serde(default = "default_true")]
    pub close_clients_on_exit: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_index() -> String {
    "index.html".to_string()
}

fn default_true() -> bool {
    true
}

/// `[stage.<name>]`: one source-to-output pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Input globs, relative to the project root.
    #[serde(default)]
    pub src: Vec<String>,

    /// Explicit negations applied on top of `src`.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Output directory, relative to the project root.
    #[serde(default)]
    pub dest: String,

    /// Skip sources whose content fingerprint is unchanged since last run.
    #[serde(default)]
    pub cache: bool,

    /// Skip sources that are older than their existing output.
    #[serde(default)]
    pub newer: bool,

    /// When false, matching no source at all is a stage failure.
    #[serde(default)]
    pub allow_empty: bool,

    /// When false the chain only checks its inputs (lint) and nothing is
    /// written; `dest` may then be omitted.
    #[serde(default = "default_true")]
    pub write: bool,

    #[serde(default)]
    pub reload: ReloadMode,

    #[serde(default)]
    pub transforms: Vec<TransformSpec>,
}

/// One typed step of a stage's transform chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransformSpec {
    /// Pipe each asset through an external program (stdin -> stdout).
    Command {
        cmd: String,
        #[serde(default)]
        ext: Option<String>,
        #[serde(default)]
        skip: Vec<String>,
    },
    /// Run a program over each asset as a pass/fail check; contents pass
    /// through unchanged and a non-zero exit withholds the asset.
    Check {
        cmd: String,
        #[serde(default)]
        skip: Vec<String>,
    },
    /// Fold every surviving asset into one output file.
    Concat { file: String },
    /// Prepend a header comment rendered from `[project]`.
    Banner {
        #[serde(default)]
        template: Option<String>,
    },
    /// Add a suffix before the extension and/or swap the extension.
    Rename {
        #[serde(default)]
        suffix: Option<String>,
        #[serde(default)]
        ext: Option<String>,
        #[serde(default)]
        skip: Vec<String>,
    },
    /// Keep only assets whose path matches one of `include`.
    Filter { include: Vec<String> },
}

/// `[task.<name>]` as written. Exactly one field must be set; see
/// [`TaskConfig::spec`].
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    #[serde(default)]
    pub series: Option<Vec<String>>,
    #[serde(default)]
    pub parallel: Option<Vec<String>>,
    /// Alias a stage under another task name.
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub serve: Option<bool>,
    /// Names of `[watch.<name>]` entries to start.
    #[serde(default)]
    pub watch: Option<Vec<String>>,
    /// Directories whose contents are removed.
    #[serde(default)]
    pub clean: Option<Vec<String>>,
}

/// Validated shape of a task, still referring to members by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSpec {
    Series(Vec<String>),
    Parallel(Vec<String>),
    Stage(String),
    Serve,
    Watch(Vec<String>),
    Clean(Vec<String>),
}

/// `[watch.<name>]`: re-run `task` whenever a matching file changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    #[serde(default)]
    pub glob: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub task: String,
}

/// Validated, interpolated project configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>` (see `validate.rs`),
/// so every value here has passed validation. Read-only for the lifetime of
/// the process.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    project: ProjectSection,
    config: ConfigSection,
    server: Option<ServerSection>,
    stages: BTreeMap<String, StageConfig>,
    tasks: BTreeMap<String, TaskSpec>,
    watches: BTreeMap<String, WatchConfig>,
    root: PathBuf,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        project: ProjectSection,
        config: ConfigSection,
        server: Option<ServerSection>,
        stages: BTreeMap<String, StageConfig>,
        tasks: BTreeMap<String, TaskSpec>,
        watches: BTreeMap<String, WatchConfig>,
    ) -> Self {
        Self {
            project,
            config,
            server,
            stages,
            tasks,
            watches,
            root: PathBuf::from("."),
        }
    }

    /// Anchor all relative paths at `root` (the directory holding the
    /// descriptor).
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project(&self) -> &ProjectSection {
        &self.project
    }

    pub fn config_section(&self) -> &ConfigSection {
        &self.config
    }

    pub fn server(&self) -> Option<&ServerSection> {
        self.server.as_ref()
    }

    pub fn stages(&self) -> &BTreeMap<String, StageConfig> {
        &self.stages
    }

    pub fn tasks(&self) -> &BTreeMap<String, TaskSpec> {
        &self.tasks
    }

    pub fn watches(&self) -> &BTreeMap<String, WatchConfig> {
        &self.watches
    }
}
