// src/watch/debounce.rs

//! Pure per-watch debounce state machine.
//!
//! `Idle -> ChangeDetected -> Debounced -> TaskInvoked -> Idle`
//!
//! The machine owns no timers or channels; the watch loop in
//! [`super::watcher`] feeds it events and the current time and acts on
//! what it returns.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Idle,
    /// A change arrived; waiting for the window to pass quietly.
    ChangeDetected,
    /// Window elapsed; the invocation is about to start.
    Debounced,
    /// The bound task is running.
    TaskInvoked,
}

#[derive(Debug, Clone)]
pub struct DebounceMachine {
    phase: WatchPhase,
    window: Duration,
    deadline: Option<Instant>,
    rerun_pending: bool,
}

impl DebounceMachine {
    pub fn new(window: Duration) -> Self {
        Self {
            phase: WatchPhase::Idle,
            window,
            deadline: None,
            rerun_pending: false,
        }
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    /// When the pending change should fire, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn rerun_pending(&self) -> bool {
        self.rerun_pending
    }

    /// A matching change (or delete) was observed at `now`.
    ///
    /// While waiting, every change pushes the deadline out, so a burst of
    /// writes yields one invocation. Once an invocation is committed, changes
    /// collapse into a single pending rerun.
    pub fn on_change(&mut self, now: Instant) {
        match self.phase {
            WatchPhase::Idle | WatchPhase::ChangeDetected => {
                self.phase = WatchPhase::ChangeDetected;
                self.deadline = Some(now + self.window);
            }
            WatchPhase::Debounced | WatchPhase::TaskInvoked => {
                self.rerun_pending = true;
            }
        }
    }

    /// Returns `true` (and moves to `Debounced`) when the window has elapsed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match (self.phase, self.deadline) {
            (WatchPhase::ChangeDetected, Some(deadline)) if now >= deadline => {
                self.phase = WatchPhase::Debounced;
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// The invocation has started.
    pub fn on_invoked(&mut self) {
        if self.phase == WatchPhase::Debounced {
            self.phase = WatchPhase::TaskInvoked;
        }
    }

    /// The invocation settled (success or failure) at `now`.
    pub fn on_finished(&mut self, now: Instant) {
        if self.phase != WatchPhase::TaskInvoked {
            return;
        }
        if std::mem::take(&mut self.rerun_pending) {
            self.phase = WatchPhase::ChangeDetected;
            self.deadline = Some(now + self.window);
        } else {
            self.phase = WatchPhase::Idle;
            self.deadline = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    #[test]
    fn burst_of_changes_fires_once_after_quiet_window() {
        let t0 = Instant::now();
        let mut m = DebounceMachine::new(WINDOW);

        m.on_change(t0);
        m.on_change(t0 + Duration::from_millis(150));
        assert_eq!(m.phase(), WatchPhase::ChangeDetected);

        // The first deadline has been superseded.
        assert!(!m.poll(t0 + Duration::from_millis(250)));
        assert!(m.poll(t0 + Duration::from_millis(350)));
        assert_eq!(m.phase(), WatchPhase::Debounced);
        assert!(!m.poll(t0 + Duration::from_millis(400)));
    }

    #[test]
    fn changes_during_run_coalesce_into_one_rerun() {
        let t0 = Instant::now();
        let mut m = DebounceMachine::new(WINDOW);

        m.on_change(t0);
        assert!(m.poll(t0 + WINDOW));
        m.on_invoked();
        assert_eq!(m.phase(), WatchPhase::TaskInvoked);

        m.on_change(t0 + Duration::from_millis(300));
        m.on_change(t0 + Duration::from_millis(310));
        assert!(m.rerun_pending());
        assert_eq!(m.deadline(), None);

        let done = t0 + Duration::from_millis(500);
        m.on_finished(done);
        assert_eq!(m.phase(), WatchPhase::ChangeDetected);
        assert_eq!(m.deadline(), Some(done + WINDOW));
        assert!(!m.rerun_pending());
    }

    #[test]
    fn quiet_run_returns_to_idle() {
        let t0 = Instant::now();
        let mut m = DebounceMachine::new(WINDOW);
        m.on_change(t0);
        m.poll(t0 + WINDOW);
        m.on_invoked();
        m.on_finished(t0 + WINDOW * 2);
        assert_eq!(m.phase(), WatchPhase::Idle);
        assert_eq!(m.deadline(), None);
    }
}
