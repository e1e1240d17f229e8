// src/dag/report.rs

//! Outcome of invoking one task.

use std::fmt;

/// One failed leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: String,
    pub message: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task, self.message)
    }
}

/// Everything that ran during an invocation and everything that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Leaf tasks in completion order.
    pub executed: Vec<String>,
    pub failures: Vec<TaskFailure>,
    pub files_written: usize,
    pub bytes_written: u64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record_failure(&mut self, task: &str, message: impl Into<String>) {
        self.failures.push(TaskFailure {
            task: task.to_string(),
            message: message.into(),
        });
    }

    pub fn merge(&mut self, other: RunReport) {
        self.executed.extend(other.executed);
        self.failures.extend(other.failures);
        self.files_written += other.files_written;
        self.bytes_written += other.bytes_written;
    }
}
