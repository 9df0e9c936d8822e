//! Task file loading.

use std::path::Path;

use super::error::ConfigError;
use super::types::TaskConfig;

/// Load a task definition from a YAML file.
pub fn load_task_from_file(path: impl AsRef<Path>) -> Result<TaskConfig, ConfigError> {
    let path = path.as_ref();

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&contents).map_err(|source| ConfigError::YamlFileError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_missing_file_reports_path() {
        let path = std::env::temp_dir().join(format!("caravan-missing-{}.yaml", Uuid::new_v4()));

        let result = load_task_from_file(&path);

        match result {
            Err(ConfigError::FileReadError { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected FileReadError, got {:?}", other),
        }
    }

    #[test]
    fn test_load_round_trip() {
        let path = std::env::temp_dir().join(format!("caravan-task-{}.yaml", Uuid::new_v4()));
        std::fs::write(
            &path,
            "name: demo\ncontainers:\n  - name: task\n    image: alpine:3\n",
        )
        .unwrap();

        let config = load_task_from_file(&path).unwrap();
        assert_eq!(config.name, "demo");
        assert_eq!(config.containers.len(), 1);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_malformed_yaml_reports_path() {
        let path = std::env::temp_dir().join(format!("caravan-bad-{}.yaml", Uuid::new_v4()));
        std::fs::write(&path, "name: [unclosed").unwrap();

        let result = load_task_from_file(&path);
        assert!(matches!(result, Err(ConfigError::YamlFileError { .. })));

        std::fs::remove_file(&path).unwrap();
    }
}
