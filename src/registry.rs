//! Persisted record of the processes started by `up`.
//!
//! The registry is an ordered list of `(name, pid)` pairs kept in memory and
//! rewritten wholesale to `.taskpid.yaml` after every append. `down` reads it
//! back to find what to kill. There is no cross-process locking: two `up` runs
//! sharing a directory will clobber each other's file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REGISTRY_FILE: &str = ".taskpid.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub name: String,
    pub pid: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    tasks: Vec<ProcessRecord>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to access process registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode process registry: {0}")]
    Encode(#[source] serde_yaml::Error),
    #[error("failed to parse process registry {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Records started processes for one `up` run.
#[derive(Debug)]
pub struct ProcessRegistry {
    path: PathBuf,
    records: Vec<ProcessRecord>,
}

impl ProcessRegistry {
    /// Creates an empty registry backed by `path`. Nothing is written until the
    /// first record.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    /// Registry backed by the default file name inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(REGISTRY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[ProcessRecord] {
        &self.records
    }

    /// Appends a record and rewrites the backing file.
    pub fn record(&mut self, name: &str, pid: u32) -> Result<(), RegistryError> {
        self.records.push(ProcessRecord {
            name: name.to_string(),
            pid,
        });
        self.flush()
    }

    fn flush(&self) -> Result<(), RegistryError> {
        let file = RegistryFile {
            tasks: self.records.clone(),
        };
        let data = serde_yaml::to_string(&file).map_err(RegistryError::Encode)?;
        fs::write(&self.path, data).map_err(|source| RegistryError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// Forgets every record and deletes the backing file if it exists.
    pub fn clear(&mut self) -> Result<(), RegistryError> {
        self.records.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RegistryError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Reads every record from a registry file.
    pub fn load(path: &Path) -> Result<Vec<ProcessRecord>, RegistryError> {
        let raw = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let file: RegistryFile =
            serde_yaml::from_str(&raw).map_err(|source| RegistryError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(file.tasks)
    }
}
