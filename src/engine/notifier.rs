// src/engine/notifier.rs

//! Failure reporting.

use tokio::process::Command;
use tracing::{debug, error};

use crate::dag::RunReport;
use crate::errors::TransformError;

/// Surfaces failures on the console and, optionally, as desktop
/// notifications through `notify-send`.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    desktop: bool,
}

impl Notifier {
    pub fn new(desktop: bool) -> Self {
        Self { desktop }
    }

    pub fn transform_failed(&self, err: &TransformError) {
        error!(
            stage = %err.stage,
            path = err.path.as_deref().unwrap_or("-"),
            error = %err.message,
            "transform failed"
        );
        eprintln!("assetdag: {err}");
        self.desktop(&format!("Error running {}", err.stage), &err.to_string());
    }

    pub fn task_failed(&self, task: &str, report: &RunReport) {
        error!(
            task = %task,
            failures = report.failures.len(),
            "task failed"
        );
    }

    pub fn service_failed(&self, task: &str, message: &str) {
        error!(task = %task, error = %message, "service failed to start");
        eprintln!("assetdag: {task}: {message}");
        self.desktop(&format!("Error running {task}"), message);
    }

    fn desktop(&self, title: &str, body: &str) {
        if !self.desktop {
            return;
        }
        if let Err(err) = Command::new("notify-send")
            .arg("--app-name=assetdag")
            .arg(title)
            .arg(body)
            .spawn()
        {
            debug!(error = %err, "desktop notification unavailable");
        }
    }
}
