//! Container dependency graph.
//!
//! The graph is built once, before a run starts, from the containers'
//! declared dependency names. Building validates the whole specification:
//! every dependency must resolve, the graph must be acyclic, and exactly one
//! container (the task container) must have no dependents. Dependent sets
//! are computed here as the inverse of the dependency relation so they are
//! plain lookups at runtime.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use super::container::Container;
use super::types::ContainerName;

/// Errors that can occur when building or querying the graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two containers share a name.
    #[error("duplicate container name: '{0}'")]
    DuplicateContainer(ContainerName),

    /// A dependency references a container that doesn't exist.
    #[error("container '{container}' depends on unknown container '{dependency}'")]
    UnknownDependency {
        container: ContainerName,
        dependency: ContainerName,
    },

    /// A dependency chain loops back on itself.
    #[error("dependency cycle detected: {}", format_chain(.chain))]
    DependencyCycle { chain: Vec<ContainerName> },

    /// No container is free of dependents, so no task container exists.
    #[error("no task container: every container is depended on by another")]
    NoTaskContainer,

    /// More than one container has no dependents.
    #[error("multiple candidate task containers: {}", format_names(.candidates))]
    MultipleTaskContainers { candidates: Vec<ContainerName> },

    /// Container not part of the graph. Indicates a programming error, not
    /// a problem with the task definition.
    #[error("container not found in graph: '{0}'")]
    UnknownContainer(ContainerName),
}

fn format_chain(chain: &[ContainerName]) -> String {
    chain
        .iter()
        .map(ContainerName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_names(names: &[ContainerName]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A node in the dependency graph: one container plus its resolved direct
/// dependency and dependent sets.
#[derive(Debug)]
pub struct ContainerNode {
    container: Container,
    dependencies: HashSet<ContainerName>,
    dependents: HashSet<ContainerName>,
}

impl ContainerNode {
    /// The container this node wraps.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Names of containers this one depends on.
    pub fn dependencies(&self) -> &HashSet<ContainerName> {
        &self.dependencies
    }

    /// Names of containers that depend on this one.
    pub fn dependents(&self) -> &HashSet<ContainerName> {
        &self.dependents
    }
}

/// The validated dependency graph for one task.
#[derive(Debug)]
pub struct ContainerGraph {
    nodes: HashMap<ContainerName, ContainerNode>,
    task_container: ContainerName,
}

impl ContainerGraph {
    /// Build and validate the graph from a set of container definitions.
    ///
    /// Fails if a dependency name does not match any container, if the
    /// dependency relation contains a cycle (including a container depending
    /// on itself), or if the task container cannot be determined (zero or
    /// more than one container with no dependents).
    pub fn build(containers: Vec<Container>) -> Result<Self, GraphError> {
        let mut definitions: HashMap<ContainerName, Container> = HashMap::new();

        for container in containers {
            if definitions.contains_key(container.name()) {
                return Err(GraphError::DuplicateContainer(container.name().clone()));
            }
            definitions.insert(container.name().clone(), container);
        }

        for container in definitions.values() {
            for dependency in container.dependencies() {
                if !definitions.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        container: container.name().clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        for name in definitions.keys() {
            check_for_cycle(name, &definitions, &mut Vec::new())?;
        }

        let mut dependents: HashMap<ContainerName, HashSet<ContainerName>> = definitions
            .keys()
            .map(|name| (name.clone(), HashSet::new()))
            .collect();

        for container in definitions.values() {
            for dependency in container.dependencies() {
                dependents
                    .get_mut(dependency)
                    .expect("dependency resolved above")
                    .insert(container.name().clone());
            }
        }

        let mut candidates: Vec<ContainerName> = dependents
            .iter()
            .filter(|(_, dependent_set)| dependent_set.is_empty())
            .map(|(name, _)| name.clone())
            .collect();

        let task_container = match candidates.len() {
            0 => return Err(GraphError::NoTaskContainer),
            1 => candidates.remove(0),
            _ => {
                candidates.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                return Err(GraphError::MultipleTaskContainers {
                    candidates,
                });
            }
        };

        let nodes = definitions
            .into_iter()
            .map(|(name, container)| {
                let dependencies = container.dependencies().clone();
                let dependent_set = dependents.remove(&name).expect("initialized above");
                (
                    name,
                    ContainerNode {
                        container,
                        dependencies,
                        dependents: dependent_set,
                    },
                )
            })
            .collect();

        Ok(Self {
            nodes,
            task_container,
        })
    }

    /// All nodes in the graph, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &ContainerNode> {
        self.nodes.values()
    }

    /// The node for a given container.
    pub fn node(&self, name: &ContainerName) -> Result<&ContainerNode, GraphError> {
        self.nodes
            .get(name)
            .ok_or_else(|| GraphError::UnknownContainer(name.clone()))
    }

    /// The name of the task container: the one no other container depends
    /// on, whose exit ends the run.
    pub fn task_container(&self) -> &ContainerName {
        &self.task_container
    }

    /// Whether the given container is the task container.
    pub fn is_task_container(&self, name: &ContainerName) -> bool {
        &self.task_container == name
    }

    /// Direct dependencies of a container.
    pub fn dependencies_of(
        &self,
        name: &ContainerName,
    ) -> Result<&HashSet<ContainerName>, GraphError> {
        Ok(self.node(name)?.dependencies())
    }

    /// Direct dependents of a container.
    pub fn dependents_of(
        &self,
        name: &ContainerName,
    ) -> Result<&HashSet<ContainerName>, GraphError> {
        Ok(self.node(name)?.dependents())
    }

    /// Number of containers in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no containers. Never true for a built graph,
    /// since determining the task container requires at least one.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Walk one container's dependency chain depth-first, carrying the path
/// taken so far. Seeing a container twice in the same path is a cycle; the
/// error reports the path from the first occurrence back to it.
fn check_for_cycle(
    name: &ContainerName,
    definitions: &HashMap<ContainerName, Container>,
    path: &mut Vec<ContainerName>,
) -> Result<(), GraphError> {
    if let Some(position) = path.iter().position(|visited| visited == name) {
        let mut chain: Vec<ContainerName> = path[position..].to_vec();
        chain.push(name.clone());
        return Err(GraphError::DependencyCycle { chain });
    }

    path.push(name.clone());

    let container = definitions.get(name).expect("dependencies resolved");
    for dependency in container.dependencies() {
        check_for_cycle(dependency, definitions, path)?;
    }

    path.pop();
    Ok(())
}
