//! Core identifier types for the orchestrator.
//!
//! These types provide type-safe identifiers for containers, the handles
//! the container engine assigns to them, and image references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique name of a container within a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerName(String);

/// Identifier assigned by the container engine to a created container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle(String);

/// Reference to a container image (a tag, name or digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference(String);

impl ContainerName {
    /// Create a new ContainerName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContainerName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContainerName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl ContainerHandle {
    /// Create a new ContainerHandle from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ContainerHandle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContainerHandle {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl ImageReference {
    /// Create a new ImageReference from a string.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ImageReference {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ImageReference {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_creation() {
        let name = ContainerName::new("database");
        assert_eq!(name.as_str(), "database");
    }

    #[test]
    fn test_container_name_display() {
        let name = ContainerName::new("api");
        assert_eq!(format!("{}", name), "api");
    }

    #[test]
    fn test_container_name_equality() {
        let a = ContainerName::new("db");
        let b = ContainerName::new("db");
        let c = ContainerName::new("cache");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_container_name_from_str() {
        let a: ContainerName = "db".into();
        assert_eq!(a, ContainerName::new("db"));
    }

    #[test]
    fn test_container_handle_creation() {
        let handle = ContainerHandle::new("a1b2c3");
        assert_eq!(handle.as_str(), "a1b2c3");
    }

    #[test]
    fn test_image_reference_display() {
        let image = ImageReference::new("postgres:16");
        assert_eq!(format!("{}", image), "postgres:16");
    }

    #[test]
    fn test_names_are_hashable() {
        use std::collections::HashSet;

        let mut names: HashSet<ContainerName> = HashSet::new();
        names.insert(ContainerName::new("db"));
        names.insert(ContainerName::new("api"));
        names.insert(ContainerName::new("db"));

        assert_eq!(names.len(), 2);
    }
}
