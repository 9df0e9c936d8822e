//! Run-as-current-user configuration.
//!
//! Containers configured to run as the invoking host user get passwd and
//! group files generated on the fly, plus a writable home directory, all
//! created under the system temp directory and mounted into the container.
//! Every file or directory created here is announced through a dedicated
//! event so the teardown rules can delete it once the container is gone.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;

use crate::core::container::{Container, RunAsUser, VolumeMount};
use crate::engine::UserAndGroup;
use crate::events::TaskEvent;
use crate::events::log::EventLog;

/// Errors preparing a run-as-current-user configuration.
#[derive(Debug, Error)]
pub enum UserConfigurationError {
    /// Failed to create a temporary file or directory.
    #[error("failed to create '{path}': {source}")]
    CreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to determine the host user identity.
    #[error("failed to determine host identity: {0}")]
    Identity(String),
}

/// The invoking host user's identity.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub user_id: u32,
    pub group_id: u32,
    pub user_name: String,
    pub group_name: String,
}

impl SystemInfo {
    /// Capture the current user's identity by querying `id(1)`.
    pub async fn capture() -> Result<Self, UserConfigurationError> {
        Ok(Self {
            user_id: id_output(&["-u"]).await?.parse().map_err(|_| {
                UserConfigurationError::Identity("unparseable user id".to_string())
            })?,
            group_id: id_output(&["-g"]).await?.parse().map_err(|_| {
                UserConfigurationError::Identity("unparseable group id".to_string())
            })?,
            user_name: id_output(&["-un"]).await?,
            group_name: id_output(&["-gn"]).await?,
        })
    }
}

async fn id_output(args: &[&str]) -> Result<String, UserConfigurationError> {
    let output = Command::new("id")
        .args(args)
        .output()
        .await
        .map_err(|e| UserConfigurationError::Identity(e.to_string()))?;

    if !output.status.success() {
        return Err(UserConfigurationError::Identity(format!(
            "'id {}' exited with {}",
            args.join(" "),
            output.status.code().unwrap_or(-1)
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// What the provider contributes to a container's creation: extra mounts
/// and, when running as the current user, the identity to run under.
#[derive(Debug, Default)]
pub struct RunAsCurrentUserConfiguration {
    pub volume_mounts: Vec<VolumeMount>,
    pub user: Option<UserAndGroup>,
}

/// Generates run-as-current-user configurations, one per container, while
/// that container's create step executes.
pub struct RunAsCurrentUserProvider {
    system_info: SystemInfo,
    temp_root: PathBuf,
}

impl RunAsCurrentUserProvider {
    /// Create a provider placing temporary files under the system temp
    /// directory.
    pub fn new(system_info: SystemInfo) -> Self {
        Self::with_temp_root(system_info, std::env::temp_dir())
    }

    /// Create a provider placing temporary files under a specific root.
    pub fn with_temp_root(system_info: SystemInfo, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            system_info,
            temp_root: temp_root.into(),
        }
    }

    /// Generate the configuration for one container, posting an event for
    /// every temporary file or directory created along the way.
    pub async fn generate_configuration(
        &self,
        container: &Container,
        log: &EventLog,
    ) -> Result<RunAsCurrentUserConfiguration, UserConfigurationError> {
        let home_directory = match container.run_as() {
            RunAsUser::DefaultContainerUser => {
                return Ok(RunAsCurrentUserConfiguration::default());
            }
            RunAsUser::CurrentUser { home_directory } => home_directory.clone(),
        };

        let passwd_path = self.temp_path("passwd");
        write_file(
            &passwd_path,
            passwd_file_contents(&self.system_info, &home_directory),
        )
        .await?;
        log.post_event(TaskEvent::TemporaryFileCreated {
            container: container.name().clone(),
            path: passwd_path.clone(),
        })
        .await;

        let group_path = self.temp_path("group");
        write_file(&group_path, group_file_contents(&self.system_info)).await?;
        log.post_event(TaskEvent::TemporaryFileCreated {
            container: container.name().clone(),
            path: group_path.clone(),
        })
        .await;

        let home_path = self.temp_path("home");
        tokio::fs::create_dir(&home_path)
            .await
            .map_err(|source| UserConfigurationError::CreationFailed {
                path: home_path.clone(),
                source,
            })?;
        log.post_event(TaskEvent::TemporaryDirectoryCreated {
            container: container.name().clone(),
            path: home_path.clone(),
        })
        .await;

        create_missing_mount_directories(container).await?;

        Ok(RunAsCurrentUserConfiguration {
            volume_mounts: vec![
                VolumeMount::with_options(passwd_path, "/etc/passwd", "ro"),
                VolumeMount::with_options(group_path, "/etc/group", "ro"),
                VolumeMount::with_options(home_path, home_directory, "delegated"),
            ],
            user: Some(UserAndGroup {
                uid: self.system_info.user_id,
                gid: self.system_info.group_id,
            }),
        })
    }

    fn temp_path(&self, kind: &str) -> PathBuf {
        self.temp_root
            .join(format!("caravan-{}-{}", kind, Uuid::new_v4().simple()))
    }
}

async fn write_file(path: &Path, contents: String) -> Result<(), UserConfigurationError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| UserConfigurationError::CreationFailed {
            path: path.to_path_buf(),
            source,
        })
}

/// Hosts a declared mount may point at a directory that doesn't exist yet;
/// create those so the engine doesn't refuse the mount.
async fn create_missing_mount_directories(
    container: &Container,
) -> Result<(), UserConfigurationError> {
    for mount in container.volume_mounts() {
        if !mount.local_path.exists() {
            tokio::fs::create_dir_all(&mount.local_path)
                .await
                .map_err(|source| UserConfigurationError::CreationFailed {
                    path: mount.local_path.clone(),
                    source,
                })?;
        }
    }
    Ok(())
}

fn passwd_file_contents(info: &SystemInfo, home_directory: &str) -> String {
    if info.user_id == 0 {
        format!("root:x:0:0:root:{}:/bin/sh\n", home_directory)
    } else {
        format!(
            "root:x:0:0:root:/root:/bin/sh\n{name}:x:{uid}:{gid}:{name}:{home}:/bin/sh\n",
            name = info.user_name,
            uid = info.user_id,
            gid = info.group_id,
            home = home_directory,
        )
    }
}

fn group_file_contents(info: &SystemInfo) -> String {
    let root_group = "root:x:0:root";

    if info.group_id == 0 {
        format!("{}\n", root_group)
    } else {
        format!(
            "{}\n{name}:x:{gid}:{user}\n",
            root_group,
            name = info.group_name,
            gid = info.group_id,
            user = info.user_name,
        )
    }
}
