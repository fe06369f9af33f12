//! Readiness probes.
//!
//! A probe answers one question, "is the task ready right now?", as a plain
//! `bool`. Every failure inside a probe (connection errors, unexpected content
//! type, malformed JSON, a JSONPath that selects nothing, non-zero exit, timeout)
//! is logged at debug level and collapses to `false`.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use serde_json_path::JsonPath;
use tokio::process::Command;
use tracing::debug;

use crate::process::{kill_tree, new_process_group};
use crate::task::{HealthCheck, HttpExpectation};

/// Runs health probes for every task of a run.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self { client })
    }

    /// Executes a single probe bounded by `timeout`.
    ///
    /// A task without a health check is always ready.
    pub async fn probe(&self, check: Option<&HealthCheck>, timeout: Duration) -> bool {
        match check {
            None => true,
            Some(HealthCheck::Http { url, expect }) => {
                self.probe_http(url, expect.as_ref(), timeout).await
            }
            Some(HealthCheck::Command { argv }) => probe_command(argv, timeout).await,
        }
    }

    async fn probe_http(
        &self,
        url: &str,
        expect: Option<&HttpExpectation>,
        timeout: Duration,
    ) -> bool {
        match tokio::time::timeout(timeout, self.fetch(url, timeout)).await {
            Ok(Ok((content_type, body))) => match expect {
                None => true,
                Some(HttpExpectation::Json { jsonpath, value }) => {
                    json_matches(&content_type, &body, jsonpath, value.as_deref())
                }
                Some(HttpExpectation::Plain { contains }) => plain_matches(&body, contains),
            },
            Ok(Err(err)) => {
                debug!(url, error = %err, "http probe failed");
                false
            }
            Err(_) => {
                debug!(url, "http probe timed out");
                false
            }
        }
    }

    // Any status code proceeds to body inspection.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<(String, String)> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.context("failed to read response body")?;
        Ok((content_type, body))
    }
}

/// Checks a JSON response: the JSONPath must select something, and when an
/// expected value is given the selection must be exactly that string.
pub fn json_matches(content_type: &str, body: &str, jsonpath: &str, expected: Option<&str>) -> bool {
    if jsonpath.is_empty() {
        debug!("jsonpath not set");
        return false;
    }
    if !content_type.contains("application/json") {
        debug!(content_type, "unexpected content type");
        return false;
    }
    let document: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "response body is not json");
            return false;
        }
    };
    let path = match JsonPath::parse(jsonpath) {
        Ok(path) => path,
        Err(err) => {
            debug!(jsonpath, error = %err, "invalid jsonpath");
            return false;
        }
    };
    let nodes = path.query(&document);
    if nodes.is_empty() {
        return false;
    }
    match expected {
        None => true,
        Some(expected) => matches!(
            nodes.exactly_one(),
            Ok(serde_json::Value::String(found)) if found == expected
        ),
    }
}

/// Checks a plain response body for a substring. An empty needle never matches.
pub fn plain_matches(body: &str, contains: &str) -> bool {
    !contains.is_empty() && body.contains(contains)
}

async fn probe_command(argv: &[String], timeout: Duration) -> bool {
    let Some((program, args)) = argv.split_first() else {
        return false;
    };
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    new_process_group(&mut command);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            debug!(program = %program, error = %err, "failed to spawn health check command");
            return false;
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(err)) => {
            debug!(program = %program, error = %err, "health check command failed");
            false
        }
        Err(_) => {
            debug!(program = %program, "health check command timed out");
            if let Some(pid) = child.id() {
                if let Err(err) = kill_tree(pid) {
                    debug!(pid, error = %err, "failed to kill health check command");
                }
            }
            let _ = child.kill().await;
            false
        }
    }
}
