//! Static validation of the task dependency graph.
//!
//! Checks run in a fixed order and stop at the first failure: duplicate names,
//! missing dependencies, cycles, and finally that every depended-upon task has a
//! health check (otherwise "started" and "healthy" cannot be told apart).

use std::collections::HashMap;

use thiserror::Error;

use crate::task::TaskSpec;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate task name found: {0}")]
    DuplicateTaskName(String),
    #[error("task {task} missing dependency {dependency}")]
    MissingDependency { task: String, dependency: String },
    #[error("circular dependency detected: {from} -> {to}")]
    CircularDependency { from: String, to: String },
    #[error(
        "task {task} depends on {dependency}, but {dependency} has no healthcheck configured"
    )]
    UnhealthcheckedDependency { task: String, dependency: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

/// Validates the specs and returns them keyed by name.
pub fn validate(specs: &[TaskSpec]) -> Result<HashMap<String, TaskSpec>, ValidationError> {
    let mut tasks = HashMap::with_capacity(specs.len());
    for spec in specs {
        if tasks.insert(spec.name.clone(), spec.clone()).is_some() {
            return Err(ValidationError::DuplicateTaskName(spec.name.clone()));
        }
    }

    for spec in specs {
        for dep in &spec.depends_on {
            if !tasks.contains_key(dep) {
                return Err(ValidationError::MissingDependency {
                    task: spec.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    check_cycles(&tasks)?;

    for spec in specs {
        for dep in &spec.depends_on {
            let has_check = tasks.get(dep).map(TaskSpec::has_healthcheck).unwrap_or(false);
            if !has_check {
                return Err(ValidationError::UnhealthcheckedDependency {
                    task: spec.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(tasks)
}

fn check_cycles(tasks: &HashMap<String, TaskSpec>) -> Result<(), ValidationError> {
    let mut marks: HashMap<&str, Mark> =
        tasks.keys().map(|name| (name.as_str(), Mark::Unvisited)).collect();
    for name in tasks.keys() {
        if marks.get(name.as_str()) == Some(&Mark::Unvisited) {
            visit(name, tasks, &mut marks)?;
        }
    }
    Ok(())
}

// Depth-first walk; meeting a node that is still on the current path is a cycle.
fn visit<'a>(
    name: &'a str,
    tasks: &'a HashMap<String, TaskSpec>,
    marks: &mut HashMap<&'a str, Mark>,
) -> Result<(), ValidationError> {
    marks.insert(name, Mark::Visiting);
    if let Some(spec) = tasks.get(name) {
        for dep in &spec.depends_on {
            match marks.get(dep.as_str()).copied().unwrap_or(Mark::Unvisited) {
                Mark::Visiting => {
                    return Err(ValidationError::CircularDependency {
                        from: name.to_string(),
                        to: dep.clone(),
                    });
                }
                Mark::Unvisited => visit(dep, tasks, marks)?,
                Mark::Visited => {}
            }
        }
    }
    marks.insert(name, Mark::Visited);
    Ok(())
}
