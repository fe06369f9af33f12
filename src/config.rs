//! Configuration management for task-compose.
//!
//! This module defines the structure of the `task-compose.toml` (or `.yaml`)
//! configuration file, loads and parses it, and converts each entry into a
//! `TaskSpec` for validation and orchestration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::task::{
    HealthCheck, HealthCheckFrequency, HttpExpectation, TaskSpec, DEFAULT_PROBE_DELAY,
    DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT, DEFAULT_PROBE_TRIES,
};

pub const DEFAULT_FILE_NAMES: [&str; 3] =
    ["task-compose.toml", "task-compose.yaml", "task-compose.yml"];

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// List of tasks to launch.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// Configuration for a single task.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Unique task name.
    pub name: String,
    /// Working directory for the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
    /// `KEY=VALUE` environment entries; replaces the inherited environment when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<String>,
    /// Executable to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    /// Arguments for the executable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Shorthand for `executable` + `args`, split with shell quoting rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    /// Names of tasks that must be healthy first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Readiness check configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheckConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpCheckConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandCheckConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<FrequencyConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HttpCheckConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<ExpectConfig>,
}

/// Body expectation; `json` wins when both are given.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExpectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<JsonExpectConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain: Option<PlainExpectConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct JsonExpectConfig {
    #[serde(default)]
    pub jsonpath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlainExpectConfig {
    #[serde(default)]
    pub contains: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CommandCheckConfig {
    #[serde(default)]
    pub scripts: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FrequencyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<DurationValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<DurationValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tries: Option<TriesValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<DurationValue>,
}

/// A duration written either as a string (`"1m30s"`, `"500ms"`) or as whole seconds.
///
/// Any other value is kept as `Other` so the default applies instead of the
/// whole document failing to load.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
    Other(serde_json::Value),
}

impl DurationValue {
    fn to_duration(&self) -> Option<Duration> {
        match self {
            DurationValue::Seconds(secs) => Some(Duration::from_secs(*secs)),
            DurationValue::Text(text) => parse_duration(text),
            DurationValue::Other(_) => None,
        }
    }
}

/// Probe attempt count; anything that is not a positive integer means the default.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TriesValue {
    Count(i64),
    Other(serde_json::Value),
}

impl TriesValue {
    fn to_tries(&self) -> Option<u32> {
        match self {
            TriesValue::Count(count) if *count > 0 => u32::try_from(*count).ok(),
            _ => None,
        }
    }
}

/// Loads and parses the configuration from a file path.
///
/// `.yaml`/`.yml` files are read as YAML, everything else as TOML.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&raw, is_yaml(path))
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn parse_config(raw: &str, yaml: bool) -> Result<Config> {
    if yaml {
        if raw.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    } else {
        Ok(toml::from_str(raw)?)
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// The first default config file that exists in `dir`.
pub fn default_config_path(dir: &Path) -> Option<PathBuf> {
    DEFAULT_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.exists())
}

impl Config {
    /// Converts every task entry, failing on the first malformed one.
    pub fn to_specs(&self) -> Result<Vec<TaskSpec>> {
        self.tasks.iter().map(spec_from_config).collect()
    }
}

fn spec_from_config(config: &TaskConfig) -> Result<TaskSpec> {
    let name = config.name.trim();
    if name.is_empty() {
        bail!("task name must not be empty");
    }

    let (executable, args) = match (&config.executable, &config.cmd) {
        (Some(_), Some(_)) => bail!("task {} sets both executable and cmd", name),
        (Some(executable), None) if !executable.is_empty() => {
            (executable.clone(), config.args.clone())
        }
        (None, Some(cmd)) => {
            let mut parts = shell_words::split(cmd)
                .with_context(|| format!("failed to parse cmd for {}", name))?;
            if parts.is_empty() {
                bail!("empty cmd for {}", name);
            }
            let executable = parts.remove(0);
            parts.extend(config.args.iter().cloned());
            (executable, parts)
        }
        _ => bail!("task {} has no executable", name),
    };

    let healthcheck = match &config.healthcheck {
        Some(check) => healthcheck_from_config(name, check)?,
        None => None,
    };
    let frequency = config
        .healthcheck
        .as_ref()
        .and_then(|check| check.frequency.as_ref())
        .map(frequency_from_config)
        .unwrap_or_default();

    Ok(TaskSpec {
        name: name.to_string(),
        base_dir: config.base_dir.clone().filter(|dir| !dir.is_empty()),
        envs: config.envs.clone(),
        executable,
        args,
        depends_on: config.depends_on.clone(),
        healthcheck,
        frequency,
    })
}

fn healthcheck_from_config(name: &str, config: &HealthCheckConfig) -> Result<Option<HealthCheck>> {
    match (&config.http, &config.command) {
        (Some(_), Some(_)) => Err(anyhow!(
            "task {} configures both http and command health checks",
            name
        )),
        (Some(http), None) => {
            if http.url.trim().is_empty() {
                bail!("task {} has an http health check without a url", name);
            }
            Ok(Some(HealthCheck::Http {
                url: http.url.clone(),
                expect: http.expect.as_ref().and_then(expectation_from_config),
            }))
        }
        (None, Some(command)) => {
            if command.scripts.is_empty() {
                bail!("task {} has a command health check without scripts", name);
            }
            Ok(Some(HealthCheck::Command {
                argv: command.scripts.clone(),
            }))
        }
        (None, None) => Ok(None),
    }
}

fn expectation_from_config(config: &ExpectConfig) -> Option<HttpExpectation> {
    if let Some(json) = &config.json {
        return Some(HttpExpectation::Json {
            jsonpath: json.jsonpath.clone(),
            value: json.value.clone().filter(|value| !value.is_empty()),
        });
    }
    config.plain.as_ref().map(|plain| HttpExpectation::Plain {
        contains: plain.contains.clone(),
    })
}

fn frequency_from_config(config: &FrequencyConfig) -> HealthCheckFrequency {
    let positive = |value: &Option<DurationValue>, fallback: Duration| {
        value
            .as_ref()
            .and_then(DurationValue::to_duration)
            .filter(|duration| !duration.is_zero())
            .unwrap_or(fallback)
    };
    HealthCheckFrequency {
        interval: positive(&config.interval, DEFAULT_PROBE_INTERVAL),
        timeout: positive(&config.timeout, DEFAULT_PROBE_TIMEOUT),
        tries: config
            .tries
            .as_ref()
            .and_then(TriesValue::to_tries)
            .unwrap_or(DEFAULT_PROBE_TRIES),
        delay: config
            .delay
            .as_ref()
            .and_then(DurationValue::to_duration)
            .unwrap_or(DEFAULT_PROBE_DELAY),
    }
}

/// Parses a duration such as `"300ms"`, `"1.5s"` or `"2h45m"`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `"0"` is zero.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text == "0" {
        return Some(Duration::ZERO);
    }
    if text.is_empty() {
        return None;
    }

    let mut total = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total.round() as u64))
}

/// Template written by `init`.
pub fn template(yaml: bool) -> &'static str {
    if yaml {
        YAML_TEMPLATE
    } else {
        TOML_TEMPLATE
    }
}

/// Writes the template to `path`, refusing to overwrite an existing file.
pub fn write_template(path: &Path) -> Result<()> {
    if path.exists() {
        bail!(
            "{} already exists; delete it first if you want to regenerate it",
            path.display()
        );
    }
    fs::write(path, template(is_yaml(path)))
        .with_context(|| format!("failed to write {}", path.display()))
}

const TOML_TEMPLATE: &str = r#"# task-compose configuration.
#
# [[tasks]]
# name = "api"
# base_dir = "./api"
# envs = ["PORT=8080"]
# executable = "cargo"
# args = ["run"]
# depends_on = ["db"]
#
# [tasks.healthcheck.http]
# url = "http://localhost:8080/health"
#
# [tasks.healthcheck.http.expect.json]
# jsonpath = "$.status"
# value = "ready"
#
# [tasks.healthcheck.frequency]
# interval = "1s"
# timeout = "10s"
# tries = 5
# delay = "1s"

[[tasks]]
name = "echo"
executable = "echo"
args = ["hello", "world"]
"#;

const YAML_TEMPLATE: &str = r#"# task-compose configuration.
#
# tasks:
#   - name: api
#     base_dir: ./api
#     envs: ["PORT=8080"]
#     executable: cargo
#     args: ["run"]
#     depends_on: ["db"]
#     healthcheck:
#       http:
#         url: http://localhost:8080/health
#         expect:
#           json:
#             jsonpath: $.status
#             value: ready
#       frequency:
#         interval: 1s
#         timeout: 10s
#         tries: 5
#         delay: 1s
tasks:
  - name: echo
    executable: echo
    args: ["hello", "world"]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_toml_task() {
        let raw = r#"
[[tasks]]
name = "db"
executable = "postgres"
args = ["-D", "data"]
envs = ["PGPORT=5433"]
base_dir = "./db"

[tasks.healthcheck.command]
scripts = ["pg_isready", "-p", "5433"]

[tasks.healthcheck.frequency]
interval = "500ms"
timeout = 3
tries = 7
delay = "2s"

[[tasks]]
name = "api"
cmd = "cargo run --release"
depends_on = ["db"]

[tasks.healthcheck.http]
url = "http://localhost:8080/health"

[tasks.healthcheck.http.expect.plain]
contains = "ok"
"#;
        let specs = parse_config(raw, false).unwrap().to_specs().unwrap();
        assert_eq!(specs.len(), 2);

        let db = &specs[0];
        assert_eq!(db.base_dir.as_deref(), Some("./db"));
        assert_eq!(db.envs, vec!["PGPORT=5433"]);
        assert_eq!(
            db.healthcheck,
            Some(HealthCheck::Command {
                argv: vec!["pg_isready".into(), "-p".into(), "5433".into()],
            })
        );
        assert_eq!(db.frequency.interval, Duration::from_millis(500));
        assert_eq!(db.frequency.timeout, Duration::from_secs(3));
        assert_eq!(db.frequency.tries, 7);
        assert_eq!(db.frequency.delay, Duration::from_secs(2));

        let api = &specs[1];
        assert_eq!(api.executable, "cargo");
        assert_eq!(api.args, vec!["run", "--release"]);
        assert_eq!(api.depends_on, vec!["db"]);
        assert_eq!(
            api.healthcheck,
            Some(HealthCheck::Http {
                url: "http://localhost:8080/health".into(),
                expect: Some(HttpExpectation::Plain {
                    contains: "ok".into()
                }),
            })
        );
        assert_eq!(api.frequency, HealthCheckFrequency::default());
    }

    #[test]
    fn parses_yaml_with_json_expectation() {
        let raw = r#"
tasks:
  - name: web
    executable: node
    args: ["server.js"]
    healthcheck:
      http:
        url: http://localhost:3000/status
        expect:
          json:
            jsonpath: $.status
            value: ready
"#;
        let specs = parse_config(raw, true).unwrap().to_specs().unwrap();
        assert_eq!(
            specs[0].healthcheck,
            Some(HealthCheck::Http {
                url: "http://localhost:3000/status".into(),
                expect: Some(HttpExpectation::Json {
                    jsonpath: "$.status".into(),
                    value: Some("ready".into()),
                }),
            })
        );
    }

    #[test]
    fn bad_frequency_values_fall_back_to_defaults() {
        let config = FrequencyConfig {
            interval: Some(DurationValue::Text("soon".into())),
            timeout: Some(DurationValue::Text("0s".into())),
            tries: Some(TriesValue::Count(-2)),
            delay: Some(DurationValue::Text("".into())),
        };
        assert_eq!(frequency_from_config(&config), HealthCheckFrequency::default());
    }

    #[test]
    fn mistyped_frequency_values_fall_back_instead_of_failing() {
        let toml_raw = r#"
[[tasks]]
name = "db"
executable = "postgres"

[tasks.healthcheck.command]
scripts = ["pg_isready"]

[tasks.healthcheck.frequency]
interval = 1.5
timeout = -3
tries = "five"
delay = true
"#;
        let yaml_raw = r#"
tasks:
  - name: db
    executable: postgres
    healthcheck:
      command:
        scripts: [pg_isready]
      frequency:
        interval: [1, 2]
        timeout: -3
        tries: 2.5
        delay: {seconds: 1}
"#;
        for (raw, yaml) in [(toml_raw, false), (yaml_raw, true)] {
            let specs = parse_config(raw, yaml).unwrap().to_specs().unwrap();
            assert_eq!(specs[0].frequency, HealthCheckFrequency::default());
        }

        let partial = "[[tasks]]\nname = \"db\"\nexecutable = \"postgres\"\n\
                       [tasks.healthcheck.frequency]\ntimeout = -3\ntries = 9\n";
        let specs = parse_config(partial, false).unwrap().to_specs().unwrap();
        assert_eq!(specs[0].frequency.timeout, DEFAULT_PROBE_TIMEOUT);
        assert_eq!(specs[0].frequency.tries, 9);
    }

    #[test]
    fn rejects_malformed_tasks() {
        let cases = [
            TaskConfig {
                name: " ".into(),
                executable: Some("echo".into()),
                ..Default::default()
            },
            TaskConfig {
                name: "both".into(),
                executable: Some("echo".into()),
                cmd: Some("echo hi".into()),
                ..Default::default()
            },
            TaskConfig {
                name: "neither".into(),
                ..Default::default()
            },
            TaskConfig {
                name: "two-checks".into(),
                executable: Some("echo".into()),
                healthcheck: Some(HealthCheckConfig {
                    http: Some(HttpCheckConfig {
                        url: "http://localhost".into(),
                        expect: None,
                    }),
                    command: Some(CommandCheckConfig {
                        scripts: vec!["true".into()],
                    }),
                    frequency: None,
                }),
                ..Default::default()
            },
            TaskConfig {
                name: "no-url".into(),
                executable: Some("echo".into()),
                healthcheck: Some(HealthCheckConfig {
                    http: Some(HttpCheckConfig::default()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            TaskConfig {
                name: "no-scripts".into(),
                executable: Some("echo".into()),
                healthcheck: Some(HealthCheckConfig {
                    command: Some(CommandCheckConfig::default()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];
        for case in cases {
            assert!(spec_from_config(&case).is_err(), "{} should be rejected", case.name);
        }
    }

    #[test]
    fn parse_duration_accepts_go_style_values() {
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("10us"), Some(Duration::from_micros(10)));
        assert_eq!(parse_duration("5"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("3 days"), None);
    }

    #[test]
    fn templates_are_loadable() {
        for yaml in [false, true] {
            let specs = parse_config(template(yaml), yaml).unwrap().to_specs().unwrap();
            assert_eq!(specs.len(), 1);
            assert_eq!(specs[0].executable, "echo");
            assert_eq!(specs[0].args, vec!["hello", "world"]);
        }
    }

    #[test]
    fn write_template_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task-compose.yaml");
        write_template(&path).unwrap();
        assert!(load_config(&path).is_ok());
        assert!(write_template(&path).is_err());
        assert_eq!(default_config_path(dir.path()), Some(path));
    }
}
