// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::PathBuf;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::{ConfigFile, StageConfig, TaskSpec, WatchConfig};
use crate::errors::{AssetdagError, Result};

/// Index of a task in its [`TaskGraph`].
///
/// Only a graph hands these out, so a `TaskId` always resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Run one stage (by stage name).
    Stage(String),
    /// Run members one after another, stopping at the first failure.
    Series(Vec<TaskId>),
    /// Run members concurrently and wait for all of them.
    Parallel(Vec<TaskId>),
    /// Start the dev server.
    Serve,
    /// Start the named `[watch.*]` entries.
    Watch(Vec<String>),
    /// Empty these directories (relative to the project root).
    Clean(Vec<PathBuf>),
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Stage(_) => "stage",
            TaskKind::Series(_) => "series",
            TaskKind::Parallel(_) => "parallel",
            TaskKind::Serve => "serve",
            TaskKind::Watch(_) => "watch",
            TaskKind::Clean(_) => "clean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
    pub name: String,
    pub kind: TaskKind,
}

/// Immutable graph of every named task.
///
/// Each `[stage.X]` is a leaf task `X`; `[task.*]` entries compose them.
/// Construction resolves every name once and rejects unknown references
/// and cycles, so running a task never hits either.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    index: HashMap<String, TaskId>,
    /// Watch name -> task it re-runs.
    watch_targets: BTreeMap<String, TaskId>,
}

impl TaskGraph {
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        Self::from_parts(cfg.stages(), cfg.tasks(), cfg.watches())
    }

    pub fn from_parts(
        stages: &BTreeMap<String, StageConfig>,
        tasks: &BTreeMap<String, TaskSpec>,
        watches: &BTreeMap<String, WatchConfig>,
    ) -> Result<Self> {
        let mut index: HashMap<String, TaskId> = HashMap::new();
        let names: Vec<&String> = stages.keys().chain(tasks.keys()).collect();
        for (i, name) in names.iter().enumerate() {
            if index.insert((*name).clone(), TaskId(i)).is_some() {
                return Err(AssetdagError::ConfigError(format!(
                    "task '{name}' has the same name as a stage"
                )));
            }
        }

        let resolve = |owner: &str, member: &str| -> Result<TaskId> {
            index.get(member).copied().ok_or_else(|| {
                AssetdagError::TaskNotFound(format!("'{member}' (referenced by task '{owner}')"))
            })
        };

        let mut watch_targets = BTreeMap::new();
        for (name, watch) in watches {
            let target = index.get(&watch.task).copied().ok_or_else(|| {
                AssetdagError::TaskNotFound(format!(
                    "'{}' (referenced by watch '{name}')",
                    watch.task
                ))
            })?;
            watch_targets.insert(name.clone(), target);
        }

        let mut nodes = Vec::with_capacity(names.len());
        for name in stages.keys() {
            nodes.push(TaskNode {
                name: name.clone(),
                kind: TaskKind::Stage(name.clone()),
            });
        }
        for (name, spec) in tasks {
            let kind = match spec {
                TaskSpec::Stage(stage) => {
                    if !stages.contains_key(stage) {
                        return Err(AssetdagError::TaskNotFound(format!(
                            "stage '{stage}' (referenced by task '{name}')"
                        )));
                    }
                    TaskKind::Stage(stage.clone())
                }
                TaskSpec::Series(members) => TaskKind::Series(
                    members
                        .iter()
                        .map(|m| resolve(name, m))
                        .collect::<Result<_>>()?,
                ),
                TaskSpec::Parallel(members) => TaskKind::Parallel(
                    members
                        .iter()
                        .map(|m| resolve(name, m))
                        .collect::<Result<_>>()?,
                ),
                TaskSpec::Serve => TaskKind::Serve,
                TaskSpec::Watch(names) => {
                    for watch in names {
                        if !watches.contains_key(watch) {
                            return Err(AssetdagError::ConfigError(format!(
                                "task '{name}' starts unknown watch '{watch}'"
                            )));
                        }
                    }
                    TaskKind::Watch(names.clone())
                }
                TaskSpec::Clean(dirs) => TaskKind::Clean(dirs.iter().map(PathBuf::from).collect()),
            };
            nodes.push(TaskNode {
                name: name.clone(),
                kind,
            });
        }

        let graph = Self {
            nodes,
            index,
            watch_targets,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Edge direction: parent -> member. A watch task also points at the
    /// tasks its watches re-run.
    fn check_acyclic(&self) -> Result<()> {
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for i in 0..self.nodes.len() {
            graph.add_node(i);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            for child in self.children(&node.kind) {
                graph.add_edge(i, child.0, ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(AssetdagError::DagCycle(format!(
                "cycle detected in task graph involving task '{}'",
                self.nodes[cycle.node_id()].name
            ))),
        }
    }

    fn children(&self, kind: &TaskKind) -> Vec<TaskId> {
        match kind {
            TaskKind::Series(members) | TaskKind::Parallel(members) => members.clone(),
            TaskKind::Watch(watches) => watches
                .iter()
                .filter_map(|w| self.watch_targets.get(w).copied())
                .collect(),
            TaskKind::Stage(_) | TaskKind::Serve | TaskKind::Clean(_) => Vec::new(),
        }
    }

    /// Resolve a task name.
    pub fn lookup(&self, name: &str) -> Result<TaskId> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| AssetdagError::TaskNotFound(name.to_string()))
    }

    pub fn node(&self, id: TaskId) -> &TaskNode {
        &self.nodes[id.0]
    }

    pub fn name(&self, id: TaskId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &TaskNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (TaskId(i), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Task a watch re-runs on change.
    pub fn watch_target(&self, watch: &str) -> Option<TaskId> {
        self.watch_targets.get(watch).copied()
    }

    /// Every stage a task runs, directly or through series/parallel
    /// members. Watches started by the task are not followed.
    pub fn stages_under(&self, id: TaskId) -> Vec<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match &self.node(current).kind {
                TaskKind::Stage(stage) => {
                    out.insert(stage.clone());
                }
                TaskKind::Series(members) | TaskKind::Parallel(members) => {
                    stack.extend(members.iter().copied());
                }
                TaskKind::Serve | TaskKind::Watch(_) | TaskKind::Clean(_) => {}
            }
        }
        out.into_iter().collect()
    }

    /// Indented tree of what invoking `id` would do.
    pub fn render_plan(&self, id: TaskId) -> String {
        let mut out = String::new();
        self.render_into(id, 0, &mut out);
        out
    }

    fn render_into(&self, id: TaskId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let indent = "  ".repeat(depth);
        let detail = match &node.kind {
            TaskKind::Stage(stage) if *stage != node.name => format!(" -> {stage}"),
            TaskKind::Watch(watches) => format!(": {}", watches.join(", ")),
            TaskKind::Clean(dirs) => format!(
                ": {}",
                dirs.iter()
                    .map(|d| d.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            _ => String::new(),
        };
        let _ = writeln!(out, "{indent}{} ({}){detail}", node.name, node.kind.label());

        if let TaskKind::Series(members) | TaskKind::Parallel(members) = &node.kind {
            for member in members {
                self.render_into(*member, depth + 1, out);
            }
        }
    }
}
