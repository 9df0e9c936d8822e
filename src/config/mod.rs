//! Task definitions loaded from YAML files.

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::load_task_from_file;
pub use types::{
    ContainerConfig, HealthCheckConfig, RunAsCurrentUserConfig, TaskConfig, VolumeMountConfig,
};
