use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetdag::errors::TransformError;
use assetdag::exec::{StageBackend, StageResult};
use assetdag::stage::Stage;

/// A fake stage backend that:
/// - records which stages were run, in start order
/// - fails the stages it was told to fail
/// - optionally sleeps, so tests can observe concurrency.
#[derive(Debug, Clone, Default)]
pub struct FakeStageBackend {
    executed: Arc<Mutex<Vec<String>>>,
    failing: Arc<HashSet<String>>,
    delay: Option<Duration>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeStageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, stages: &[&str]) -> Self {
        self.failing = Arc::new(stages.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stage names in the order they started.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Highest number of stages that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl StageBackend for FakeStageBackend {
    fn run_stage<'a>(
        &'a self,
        stage: &'a Stage,
    ) -> Pin<Box<dyn Future<Output = StageResult> + Send + 'a>> {
        Box::pin(async move {
            self.executed.lock().unwrap().push(stage.name.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&stage.name) {
                StageResult::failed(TransformError::for_stage(&stage.name, "simulated failure"))
            } else {
                StageResult {
                    files_written: 1,
                    bytes_written: 10,
                    ..StageResult::default()
                }
            }
        })
    }
}
