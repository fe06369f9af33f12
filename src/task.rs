//! Data structures describing a task and its runtime status.
//!
//! This module defines the validated specification of a task (`TaskSpec`), its
//! readiness probe (`HealthCheck`) with polling parameters (`HealthCheckFrequency`),
//! and the lifecycle status (`TaskStatus`) a running task moves through.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PROBE_TRIES: u32 = 5;
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(1);

/// Specification for a task to be launched.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSpec {
    /// Unique task name.
    pub name: String,
    /// Working directory; the orchestrator's own directory when unset.
    pub base_dir: Option<String>,
    /// `KEY=VALUE` entries handed to the child verbatim.
    pub envs: Vec<String>,
    /// The command executable.
    pub executable: String,
    /// Arguments for the command.
    pub args: Vec<String>,
    /// Names of the tasks this task depends on.
    pub depends_on: Vec<String>,
    /// Readiness probe, if any.
    pub healthcheck: Option<HealthCheck>,
    /// Polling parameters for the readiness probe.
    pub frequency: HealthCheckFrequency,
}

impl TaskSpec {
    pub fn has_healthcheck(&self) -> bool {
        self.healthcheck.is_some()
    }
}

/// A readiness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheck {
    /// GET the URL and inspect the response.
    Http {
        url: String,
        expect: Option<HttpExpectation>,
    },
    /// Run an argv to completion; exit status zero means healthy.
    Command { argv: Vec<String> },
}

/// What an HTTP probe requires of the response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpExpectation {
    /// JSON body where `jsonpath` selects a value, optionally equal to `value`.
    Json {
        jsonpath: String,
        value: Option<String>,
    },
    /// Raw body containing a substring.
    Plain { contains: String },
}

/// Probe polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthCheckFrequency {
    pub interval: Duration,
    pub timeout: Duration,
    pub tries: u32,
    pub delay: Duration,
}

impl Default for HealthCheckFrequency {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PROBE_INTERVAL,
            timeout: DEFAULT_PROBE_TIMEOUT,
            tries: DEFAULT_PROBE_TRIES,
            delay: DEFAULT_PROBE_DELAY,
        }
    }
}

/// The lifecycle status of a task during `up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet started.
    Pending,
    /// Blocked until every dependency is healthy.
    WaitingOnDependencies,
    /// Spawning the child process.
    Launching,
    /// Process started; probing readiness.
    HealthChecking,
    /// Readiness confirmed.
    Healthy,
    /// Failed, or never started because a dependency failed.
    Terminated,
}

impl TaskStatus {
    /// Whether the status is final for the startup phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Healthy | TaskStatus::Terminated)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::WaitingOnDependencies => "waiting",
            TaskStatus::Launching => "launching",
            TaskStatus::HealthChecking => "health-checking",
            TaskStatus::Healthy => "healthy",
            TaskStatus::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// Why a task ended `Terminated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// A dependency was terminated, so this task never spawned.
    DependencyTerminated(String),
    /// The child process could not be started.
    SpawnFailed(String),
    /// Every probe attempt failed.
    HealthCheckExhausted { tries: u32 },
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::DependencyTerminated(dep) => {
                write!(f, "dependency {} terminated", dep)
            }
            TerminationReason::SpawnFailed(err) => write!(f, "failed to start: {}", err),
            TerminationReason::HealthCheckExhausted { tries } => {
                write!(f, "health check failed {} times", tries)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_healthy_and_terminated_are_terminal() {
        assert!(TaskStatus::Healthy.is_terminal());
        assert!(TaskStatus::Terminated.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::WaitingOnDependencies.is_terminal());
        assert!(!TaskStatus::Launching.is_terminal());
        assert!(!TaskStatus::HealthChecking.is_terminal());
    }

    #[test]
    fn default_frequency_matches_documented_defaults() {
        let freq = HealthCheckFrequency::default();
        assert_eq!(freq.timeout, Duration::from_secs(10));
        assert_eq!(freq.interval, Duration::from_secs(1));
        assert_eq!(freq.tries, 5);
        assert_eq!(freq.delay, Duration::from_secs(1));
    }
}
