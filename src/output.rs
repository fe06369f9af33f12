//! Console presentation of a run.
//!
//! The `Reporter` consumes the run's event channel: task output lines are
//! printed with a colored, padded `name|` prefix, and status transitions are
//! logged through `tracing` with the task name attached.

use std::collections::HashMap;
use std::io::{self, Write};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::events::Event;

/// Indicates the source stream of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

const PALETTE: [&str; 6] = ["cyan", "magenta", "yellow", "blue", "green", "red"];

pub struct Reporter {
    colors: HashMap<String, &'static str>,
    width: usize,
    use_color: bool,
}

impl Reporter {
    pub fn new(names: &[String], use_color: bool) -> Self {
        let colors = names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), PALETTE[idx % PALETTE.len()]))
            .collect();
        let width = names.iter().map(|name| name.len()).max().unwrap_or(0);
        Self {
            colors,
            width,
            use_color,
        }
    }

    /// Drains the channel until every sender is gone.
    pub fn spawn(self, mut rx: mpsc::Receiver<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.handle(&event);
            }
        })
    }

    pub fn handle(&self, event: &Event) {
        match event {
            Event::TaskWaiting { name, deps } => {
                info!(task = %name, "waiting for {}", deps.join(", "));
            }
            Event::TaskLaunching { name } => info!(task = %name, "launching"),
            Event::TaskStarted { name, pid } => info!(task = %name, pid, "started"),
            Event::TaskOutput { name, line, stream } => {
                let text = format!("{}{}", self.prefix(name), line);
                match stream {
                    StreamKind::Stdout => {
                        let _ = writeln!(io::stdout().lock(), "{}", text);
                    }
                    StreamKind::Stderr => {
                        let _ = writeln!(io::stderr().lock(), "{}", text);
                    }
                }
            }
            Event::HealthCheckFailed {
                name,
                attempt,
                tries,
            } => warn!(task = %name, "health check {}/{} failed", attempt, tries),
            Event::TaskHealthy { name, attempts } => match attempts {
                Some((attempt, tries)) => {
                    info!(task = %name, "healthy, check {}/{} succeeded", attempt, tries)
                }
                None => info!(task = %name, "healthy"),
            },
            Event::TaskTerminated { name, reason } => {
                error!(task = %name, "terminated: {}", reason)
            }
        }
    }

    fn prefix(&self, name: &str) -> String {
        let padded = format!("{:<width$}| ", name, width = self.width);
        if !self.use_color {
            return padded;
        }
        apply_color(&padded, self.colors.get(name).copied())
    }
}

fn apply_color(prefix: &str, color: Option<&str>) -> String {
    let code = match color.unwrap_or("").to_lowercase().as_str() {
        "red" => "31",
        "green" => "32",
        "yellow" => "33",
        "blue" => "34",
        "magenta" => "35",
        "cyan" => "36",
        _ => "0",
    };
    if code == "0" {
        prefix.to_string()
    } else {
        format!("\u{1b}[{}m{}\u{1b}[0m", code, prefix)
    }
}
