// src/watch/watcher.rs

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dag::RunReport;
use crate::errors;
use crate::stage::CacheStore;
use crate::watch::debounce::DebounceMachine;
use crate::watch::path_utils::relative_str;
use crate::watch::patterns::WatchProfile;

/// Something that can run a named task on behalf of a watch.
///
/// The task runner implements this; tests plug in recorders.
pub trait TaskInvoker: Send + Sync + 'static {
    fn invoke_task(
        self: Arc<Self>,
        task: String,
    ) -> Pin<Box<dyn Future<Output = errors::Result<RunReport>> + Send>>;
}

/// What the router forwards to a watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Changed(String),
    Removed(String),
}

/// Keeps the OS watcher and the per-watch loops alive.
///
/// Dropping the handle stops watching; [`WatcherHandle::stop`] also aborts
/// the loops right away.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("loops", &self.tasks.len())
            .finish()
    }
}

impl WatcherHandle {
    pub fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Start one OS watcher over `root` and a debounce loop per profile.
///
/// Deletes evict the file from the cache partitions of every stage the
/// watch's task runs, immediately, and then count as a change.
pub fn spawn_watches(
    root: impl Into<PathBuf>,
    profiles: Vec<WatchProfile>,
    window: Duration,
    cache: CacheStore,
    invoker: Arc<dyn TaskInvoker>,
) -> Result<WatcherHandle> {
    let root = root.into();
    let root = root.canonicalize().unwrap_or_else(|_| root.clone());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    eprintln!("assetdag: failed to forward notify event: {err}");
                }
            }
            Err(err) => eprintln!("assetdag: file watch error: {err}"),
        },
        Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;

    let names: Vec<&str> = profiles.iter().map(|p| p.name()).collect();
    info!(root = ?root, watches = ?names, "file watcher started");

    let mut tasks = Vec::with_capacity(profiles.len() + 1);
    let mut routes = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let profile = Arc::new(profile);
        let (tx, handle) = spawn_watch_loop(Arc::clone(&profile), window, Arc::clone(&invoker));
        routes.push((profile, tx));
        tasks.push(handle);
    }

    tasks.push(tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!(?event, "received notify event");
            route_event(&root, &event, &routes, &cache);
        }
        debug!("watcher event loop finished");
    }));

    Ok(WatcherHandle {
        _inner: watcher,
        tasks,
    })
}

fn is_removal(kind: &EventKind) -> Option<bool> {
    match kind {
        EventKind::Remove(_) => Some(true),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(true),
        EventKind::Create(_) | EventKind::Modify(_) => Some(false),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

fn route_event(
    root: &Path,
    event: &Event,
    routes: &[(Arc<WatchProfile>, mpsc::UnboundedSender<WatchSignal>)],
    cache: &CacheStore,
) {
    let Some(removed) = is_removal(&event.kind) else {
        return;
    };

    for path in &event.paths {
        let Some(rel) = relative_str(root, path) else {
            warn!(?path, ?root, "could not relativize path");
            continue;
        };

        for (profile, tx) in routes {
            if !profile.matches(&rel) {
                continue;
            }
            let signal = if removed {
                let evicted = cache.evict(profile.stages(), &rel);
                debug!(watch = %profile.name(), path = %rel, evicted, "watched file removed");
                WatchSignal::Removed(rel.clone())
            } else {
                WatchSignal::Changed(rel.clone())
            };
            if tx.send(signal).is_err() {
                debug!(watch = %profile.name(), "watch loop gone; dropping event");
            }
        }
    }
}

/// Start the debounce loop for one watch and return the sender feeding it.
///
/// The loop ends when every sender is dropped and no invocation is running.
pub fn spawn_watch_loop(
    profile: Arc<WatchProfile>,
    window: Duration,
    invoker: Arc<dyn TaskInvoker>,
) -> (mpsc::UnboundedSender<WatchSignal>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run_watch_loop(profile, window, invoker, rx));
    (tx, handle)
}

type Invocation = JoinHandle<errors::Result<RunReport>>;

async fn run_watch_loop(
    profile: Arc<WatchProfile>,
    window: Duration,
    invoker: Arc<dyn TaskInvoker>,
    mut rx: mpsc::UnboundedReceiver<WatchSignal>,
) {
    let mut machine = DebounceMachine::new(window);
    let mut running: Option<Invocation> = None;
    let mut open = true;

    loop {
        if !open && running.is_none() && machine.deadline().is_none() {
            break;
        }
        let deadline = machine.deadline();

        tokio::select! {
            signal = rx.recv(), if open => match signal {
                Some(signal) => {
                    debug!(watch = %profile.name(), ?signal, "change observed");
                    machine.on_change(now());
                }
                None => open = false,
            },

            _ = sleep_until(deadline), if deadline.is_some() => {
                if machine.poll(now()) {
                    info!(watch = %profile.name(), task = %profile.task(), "change detected; running task");
                    let invoker = Arc::clone(&invoker);
                    let task = profile.task().to_string();
                    running = Some(tokio::spawn(invoker.invoke_task(task)));
                    machine.on_invoked();
                }
            },

            outcome = join_running(&mut running), if running.is_some() => {
                running = None;
                match outcome {
                    Ok(Ok(report)) if report.is_success() => {
                        debug!(watch = %profile.name(), task = %profile.task(), "watch run finished");
                    }
                    Ok(Ok(report)) => warn!(
                        watch = %profile.name(),
                        task = %profile.task(),
                        failures = report.failures.len(),
                        "watch run failed; still watching"
                    ),
                    Ok(Err(err)) => error!(
                        watch = %profile.name(),
                        task = %profile.task(),
                        error = %err,
                        "watch run errored; still watching"
                    ),
                    Err(err) => error!(watch = %profile.name(), error = %err, "watch run panicked"),
                }
                machine.on_finished(now());
            },
        }
    }
    debug!(watch = %profile.name(), "watch loop finished");
}

/// Current time on tokio's clock, so paused-time tests stay consistent.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn join_running(
    running: &mut Option<Invocation>,
) -> Result<errors::Result<RunReport>, tokio::task::JoinError> {
    match running {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl TaskInvoker for Recorder {
        fn invoke_task(
            self: Arc<Self>,
            task: String,
        ) -> Pin<Box<dyn Future<Output = errors::Result<RunReport>> + Send>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(task);
                Ok(RunReport::default())
            })
        }
    }

    /// Errors on the first run, reports a failed stage on the second and
    /// succeeds afterwards.
    #[derive(Default)]
    struct Flaky {
        calls: Mutex<usize>,
    }

    impl TaskInvoker for Flaky {
        fn invoke_task(
            self: Arc<Self>,
            task: String,
        ) -> Pin<Box<dyn Future<Output = errors::Result<RunReport>> + Send>> {
            Box::pin(async move {
                let call = {
                    let mut calls = self.calls.lock().unwrap();
                    *calls += 1;
                    *calls
                };
                let mut report = RunReport::default();
                match call {
                    1 => return Err(errors::AssetdagError::ConfigError("broken".to_string())),
                    2 => report.record_failure(&task, "stage failed"),
                    _ => report.executed.push(task),
                }
                Ok(report)
            })
        }
    }

    fn profile() -> Arc<WatchProfile> {
        let cfg = WatchConfig {
            glob: vec!["src/**/*.scss".to_string()],
            exclude: vec![],
            task: "styles".to_string(),
        };
        Arc::new(WatchProfile::new("scss", &cfg, vec!["scss".to_string()]).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn burst_triggers_single_invocation() {
        let recorder = Arc::new(Recorder::default());
        let (tx, handle) =
            spawn_watch_loop(profile(), Duration::from_millis(100), recorder.clone());

        for i in 0..5 {
            tx.send(WatchSignal::Changed(format!("src/a{i}.scss"))).unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*recorder.calls.lock().unwrap(), vec!["styles".to_string()]);
    }

    #[tokio::test]
    async fn removal_evicts_matching_stage_entries() {
        let cache = CacheStore::in_memory();
        let partition = cache.partition("scss");
        partition.check_and_record("src/a.scss", "h1");
        partition.check_and_record("src/b.scss", "h2");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let routes = vec![(profile(), tx)];
        let event = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(PathBuf::from("/proj/src/a.scss"));

        route_event(Path::new("/proj"), &event, &routes, &cache);

        assert!(!partition.contains("src/a.scss"));
        assert!(partition.contains("src/b.scss"));
        assert_eq!(
            rx.try_recv().unwrap(),
            WatchSignal::Removed("src/a.scss".to_string())
        );
    }

    #[tokio::test]
    async fn non_matching_paths_are_ignored() {
        let cache = CacheStore::in_memory();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let routes = vec![(profile(), tx)];
        let event = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/proj/src/app.js"));

        route_event(Path::new("/proj"), &event, &routes, &cache);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_keep_the_watch_alive() {
        let flaky = Arc::new(Flaky::default());
        let (tx, handle) = spawn_watch_loop(profile(), Duration::from_millis(100), flaky.clone());

        for i in 0..3 {
            tx.send(WatchSignal::Changed(format!("src/a{i}.scss"))).unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*flaky.calls.lock().unwrap(), 3);
    }
}
