//! Runtime wrapper around one task.
//!
//! A `TaskNode` owns its child process and publishes its `TaskStatus` on a watch
//! channel. Dependents subscribe to that channel, so a node wakes as soon as any
//! dependency changes state instead of polling:
//!
//! `Pending -> WaitingOnDependencies -> Launching -> HealthChecking -> Healthy | Terminated`
//!
//! A dependency observed `Terminated` terminates the node before it ever spawns,
//! which cascades through the graph transitively.

use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use futures::future::select_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::events::Event;
use crate::health::HealthChecker;
use crate::output::StreamKind;
use crate::process::{kill_tree, new_process_group, split_env};
use crate::registry::ProcessRegistry;
use crate::task::{TaskSpec, TaskStatus, TerminationReason};

/// State shared by every node of one `up` run.
#[derive(Clone)]
pub struct RunContext {
    pub events: mpsc::Sender<Event>,
    pub registry: Arc<Mutex<ProcessRegistry>>,
    pub checker: HealthChecker,
    /// Detached runs discard child output instead of streaming it.
    pub detach: bool,
}

pub struct TaskNode {
    spec: TaskSpec,
    dependencies: Vec<Arc<TaskNode>>,
    status: watch::Sender<TaskStatus>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl TaskNode {
    pub fn new(spec: TaskSpec, dependencies: Vec<Arc<TaskNode>>) -> Self {
        let (status, _) = watch::channel(TaskStatus::Pending);
        Self {
            spec,
            dependencies,
            status,
            child: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn dependencies(&self) -> &[Arc<TaskNode>] {
        &self.dependencies
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    /// Receives every status transition of this node.
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    /// Drives the node to a terminal status and returns it.
    pub async fn run(&self, ctx: &RunContext) -> TaskStatus {
        let _guard = TerminalGuard(self);

        if let Err(dep) = self.wait_for_dependencies(ctx).await {
            return self
                .terminate(ctx, TerminationReason::DependencyTerminated(dep))
                .await;
        }

        self.set_status(TaskStatus::Launching);
        emit(ctx, Event::TaskLaunching {
            name: self.spec.name.clone(),
        })
        .await;

        let pid = match self.spawn(ctx).await {
            Ok(pid) => pid,
            Err(err) => {
                return self
                    .terminate(ctx, TerminationReason::SpawnFailed(format!("{:#}", err)))
                    .await;
            }
        };

        {
            let mut registry = ctx.registry.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(err) = registry.record(&self.spec.name, pid) {
                warn!(task = %self.spec.name, error = %err, "failed to write process registry");
            }
        }
        emit(ctx, Event::TaskStarted {
            name: self.spec.name.clone(),
            pid,
        })
        .await;

        self.set_status(TaskStatus::HealthChecking);
        self.check_health(ctx).await
    }

    /// Kills the node's process tree, if it has one.
    pub async fn kill(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            if let Some(pid) = child.id() {
                if let Err(err) = kill_tree(pid) {
                    debug!(task = %self.spec.name, pid, error = %err, "process group kill failed");
                }
            }
            if let Err(err) = child.kill().await {
                debug!(task = %self.spec.name, error = %err, "failed to kill process");
            }
        }
    }

    /// Whether the node still holds a child process.
    pub async fn is_running(&self) -> bool {
        self.child.lock().await.is_some()
    }

    // Ok once every dependency is healthy; Err(name) as soon as one is terminated.
    async fn wait_for_dependencies(&self, ctx: &RunContext) -> Result<(), String> {
        if self.dependencies.is_empty() {
            return Ok(());
        }
        self.set_status(TaskStatus::WaitingOnDependencies);

        let mut watchers: Vec<(&str, watch::Receiver<TaskStatus>)> = self
            .dependencies
            .iter()
            .map(|dep| (dep.name(), dep.subscribe()))
            .collect();
        let mut announced: Vec<String> = Vec::new();

        loop {
            let mut pending = Vec::new();
            for (name, rx) in watchers.iter_mut() {
                let status = *rx.borrow_and_update();
                match status {
                    TaskStatus::Terminated => return Err(name.to_string()),
                    TaskStatus::Healthy => {}
                    _ => pending.push(name.to_string()),
                }
            }
            if pending.is_empty() {
                return Ok(());
            }
            if pending != announced {
                announced = pending.clone();
                emit(ctx, Event::TaskWaiting {
                    name: self.spec.name.clone(),
                    deps: pending,
                })
                .await;
            }

            let changes = watchers.iter_mut().map(|(_, rx)| Box::pin(rx.changed()));
            let (changed, index, rest) = select_all(changes).await;
            drop(rest);
            if changed.is_err() {
                // The dependency's channel closed without a terminal status.
                return Err(watchers[index].0.to_string());
            }
        }
    }

    async fn spawn(&self, ctx: &RunContext) -> Result<u32> {
        let spec = &self.spec;
        let mut command = Command::new(&spec.executable);
        command.args(&spec.args);
        if let Some(dir) = &spec.base_dir {
            command.current_dir(dir);
        }
        if !spec.envs.is_empty() {
            command.env_clear();
            for entry in &spec.envs {
                match split_env(entry) {
                    Some((key, value)) => {
                        command.env(key, value);
                    }
                    None => warn!(task = %spec.name, entry = %entry, "ignoring malformed env entry"),
                }
            }
        }
        command.stdin(Stdio::null());
        if ctx.detach {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        command.kill_on_drop(!ctx.detach);
        new_process_group(&mut command);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", spec.executable))?;
        let pid = child
            .id()
            .with_context(|| format!("{} exited before its pid was read", spec.executable))?;

        if let Some(stdout) = child.stdout.take() {
            let tx = ctx.events.clone();
            tokio::spawn(read_stream(spec.name.clone(), StreamKind::Stdout, stdout, tx));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = ctx.events.clone();
            tokio::spawn(read_stream(spec.name.clone(), StreamKind::Stderr, stderr, tx));
        }

        *self.child.lock().await = Some(child);
        Ok(pid)
    }

    async fn check_health(&self, ctx: &RunContext) -> TaskStatus {
        let freq = self.spec.frequency;
        tokio::time::sleep(freq.delay).await;

        let Some(check) = self.spec.healthcheck.as_ref() else {
            return self.mark_healthy(ctx, None).await;
        };
        let tries = freq.tries.max(1);

        let mut ticker = tokio::time::interval(freq.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut failures = 0;
        loop {
            ticker.tick().await;
            if ctx.checker.probe(Some(check), freq.timeout).await {
                return self.mark_healthy(ctx, Some((failures + 1, tries))).await;
            }
            failures += 1;
            emit(ctx, Event::HealthCheckFailed {
                name: self.spec.name.clone(),
                attempt: failures,
                tries,
            })
            .await;
            if failures >= tries {
                self.kill().await;
                return self
                    .terminate(ctx, TerminationReason::HealthCheckExhausted { tries })
                    .await;
            }
        }
    }

    async fn mark_healthy(&self, ctx: &RunContext, attempts: Option<(u32, u32)>) -> TaskStatus {
        self.set_status(TaskStatus::Healthy);
        emit(ctx, Event::TaskHealthy {
            name: self.spec.name.clone(),
            attempts,
        })
        .await;
        TaskStatus::Healthy
    }

    async fn terminate(&self, ctx: &RunContext, reason: TerminationReason) -> TaskStatus {
        self.set_status(TaskStatus::Terminated);
        emit(ctx, Event::TaskTerminated {
            name: self.spec.name.clone(),
            reason,
        })
        .await;
        TaskStatus::Terminated
    }

    fn set_status(&self, status: TaskStatus) {
        debug!(task = %self.spec.name, %status, "status changed");
        self.status.send_replace(status);
    }
}

// Marks the node terminated if `run` unwinds before reaching a terminal status,
// so dependents waiting on it are released.
struct TerminalGuard<'a>(&'a TaskNode);

impl Drop for TerminalGuard<'_> {
    fn drop(&mut self) {
        if !self.0.status().is_terminal() {
            self.0.status.send_replace(TaskStatus::Terminated);
        }
    }
}

async fn emit(ctx: &RunContext, event: Event) {
    let _ = ctx.events.send(event).await;
}

async fn read_stream<R>(name: String, stream: StreamKind, reader: R, tx: mpsc::Sender<Event>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let _ = tx
            .send(Event::TaskOutput {
                name: name.clone(),
                line,
                stream,
            })
            .await;
    }
}
