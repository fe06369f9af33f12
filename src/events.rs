//! Event definitions for observers of an `up` run.
//!
//! This module defines the `Event` enum which carries every task status
//! transition and every line of task output to whoever holds the receiving end
//! of the run's event channel.

use crate::output::StreamKind;
use crate::task::TerminationReason;

/// Represents an event emitted by a running task node.
#[derive(Debug, Clone)]
pub enum Event {
    /// A task is waiting on its dependencies to become healthy.
    TaskWaiting { name: String, deps: Vec<String> },
    /// A task is about to spawn its process.
    TaskLaunching { name: String },
    /// A task's process has started.
    TaskStarted { name: String, pid: u32 },
    /// A line of output (stdout or stderr) was received from a task.
    TaskOutput {
        name: String,
        line: String,
        stream: StreamKind,
    },
    /// A health probe failed; `attempt` of `tries`.
    HealthCheckFailed { name: String, attempt: u32, tries: u32 },
    /// A task passed its health check on `attempts = (attempt, tries)`, or has
    /// no health check (`attempts` is `None`).
    TaskHealthy {
        name: String,
        attempts: Option<(u32, u32)>,
    },
    /// A task reached the `Terminated` state.
    TaskTerminated {
        name: String,
        reason: TerminationReason,
    },
}

