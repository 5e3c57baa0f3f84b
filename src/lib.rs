//! Cube: a small container-task orchestrator.
//!
//! Workers run tasks through a container engine and own the task records;
//! the manager queues task events, places tasks on workers and mirrors what
//! they report.

pub mod api;
pub mod config;
pub mod manager;
pub mod scheduler;
pub mod tasks;
pub mod worker;

use std::error::Error;

/// Renders an error followed by each of its sources, `outer: inner: root`.
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
