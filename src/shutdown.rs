//! Bulk termination of the processes recorded by a previous `up`.

use std::io;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::process::{kill_tree, resolve_pid};
use crate::registry::ProcessRecord;

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("failed to find process {pid} for task {name}: {source}")]
    Resolve {
        name: String,
        pid: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to kill process {pid} for task {name}: {source}")]
    Kill {
        name: String,
        pid: u32,
        #[source]
        source: io::Error,
    },
}

/// Outcome of one shutdown batch.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub killed: Vec<ProcessRecord>,
    pub errors: Vec<ShutdownError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Resolves every recorded pid and kills the live ones concurrently.
///
/// A pid that no longer resolves, or a kill that fails, is reported and does
/// not stop the rest of the batch. Returns once every kill attempt finished.
pub async fn shutdown(records: Vec<ProcessRecord>) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    let mut kills = JoinSet::new();

    for record in records {
        if let Err(source) = resolve_pid(record.pid) {
            let err = ShutdownError::Resolve {
                name: record.name,
                pid: record.pid,
                source,
            };
            warn!("{}", err);
            report.errors.push(err);
            continue;
        }
        kills.spawn(async move {
            match kill_tree(record.pid) {
                Ok(()) => Ok(record),
                Err(source) => Err(ShutdownError::Kill {
                    name: record.name,
                    pid: record.pid,
                    source,
                }),
            }
        });
    }

    while let Some(joined) = kills.join_next().await {
        match joined {
            Ok(Ok(record)) => {
                info!(task = %record.name, pid = record.pid, "shutdown completed");
                report.killed.push(record);
            }
            Ok(Err(err)) => {
                warn!("{}", err);
                report.errors.push(err);
            }
            Err(err) => error!(error = %err, "kill task failed"),
        }
    }

    report
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::{CommandExt, ExitStatusExt};
    use std::process::Command;

    fn spawn_sleeper() -> std::process::Child {
        Command::new("sleep").arg("30").process_group(0).spawn().unwrap()
    }

    #[tokio::test]
    async fn dead_pid_is_reported_and_others_are_killed() {
        let mut first = spawn_sleeper();
        let mut second = spawn_sleeper();
        let mut gone = Command::new("true").spawn().unwrap();
        let gone_pid = gone.id();
        gone.wait().unwrap();

        let records = vec![
            ProcessRecord {
                name: "first".into(),
                pid: first.id(),
            },
            ProcessRecord {
                name: "gone".into(),
                pid: gone_pid,
            },
            ProcessRecord {
                name: "second".into(),
                pid: second.id(),
            },
        ];

        let report = shutdown(records).await;
        assert_eq!(report.killed.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            &report.errors[0],
            ShutdownError::Resolve { name, .. } if name == "gone"
        ));
        assert!(!report.is_clean());

        assert_eq!(first.wait().unwrap().signal(), Some(libc::SIGKILL));
        assert_eq!(second.wait().unwrap().signal(), Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn init_pid_in_registry_is_a_resolve_error() {
        let mut sleeper = spawn_sleeper();
        let records = vec![
            ProcessRecord {
                name: "init".into(),
                pid: 1,
            },
            ProcessRecord {
                name: "zero".into(),
                pid: 0,
            },
            ProcessRecord {
                name: "sleeper".into(),
                pid: sleeper.id(),
            },
        ];

        let report = shutdown(records).await;
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|err| matches!(err, ShutdownError::Resolve { .. })));
        assert!(matches!(
            &report.errors[0],
            ShutdownError::Resolve { name, pid: 1, .. } if name == "init"
        ));
        assert_eq!(report.killed.len(), 1);
        assert_eq!(report.killed[0].name, "sleeper");
        assert_eq!(sleeper.wait().unwrap().signal(), Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn empty_batch_is_clean() {
        let report = shutdown(Vec::new()).await;
        assert!(report.is_clean());
        assert!(report.killed.is_empty());
    }
}
