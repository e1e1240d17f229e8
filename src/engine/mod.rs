// src/engine/mod.rs

//! Orchestration engine for assetdag.
//!
//! This module ties together:
//! - the task graph and the stage backend that runs its leaves
//!   ([`runner`]),
//! - long-lived services started by tasks: the dev server and file
//!   watches ([`services`]),
//! - failure reporting to the console and the desktop ([`notifier`]).

pub mod notifier;
pub mod runner;
pub mod services;

pub use notifier::Notifier;
pub use runner::TaskRunner;
pub use services::Services;
