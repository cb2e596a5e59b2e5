//! Container control through the docker CLI.
//!
//! The engine is an opaque external tool: every operation is a
//! short-timeout subprocess built from a structured argument vector.
//! Nothing here touches the registry.

use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::process::{self, RunOutput};
use std::time::Duration;

/// Derives the external container name for a project id.
pub fn container_name(id: &str) -> String {
    format!("sandbox-{id}")
}

/// Invokes docker for stop/remove/probe operations.
#[derive(Debug, Clone)]
pub struct ContainerControl {
    docker_bin: String,
    stop_timeout: Duration,
    remove_timeout: Duration,
    probe_timeout: Duration,
    drain_grace: Duration,
}

impl ContainerControl {
    pub fn new(config: &Config) -> Self {
        Self {
            docker_bin: config.tool.docker_bin.clone(),
            stop_timeout: config.timeouts.stop(),
            remove_timeout: config.timeouts.remove(),
            probe_timeout: config.timeouts.probe(),
            drain_grace: config.timeouts.drain_grace(),
        }
    }

    /// `docker stop <name>`.
    pub async fn stop(&self, name: &str) -> Result<RunOutput> {
        process::run_checked(
            &self.docker_bin,
            &stop_args(name),
            None,
            name,
            self.stop_timeout,
            self.drain_grace,
        )
        .await
    }

    /// `docker rm -f <name>`.
    pub async fn remove_container(&self, name: &str) -> Result<RunOutput> {
        process::run_checked(
            &self.docker_bin,
            &rm_args(name),
            None,
            name,
            self.remove_timeout,
            self.drain_grace,
        )
        .await
    }

    /// `docker rmi -f <name>`. The image shares the container's name.
    pub async fn remove_image(&self, name: &str) -> Result<RunOutput> {
        process::run_checked(
            &self.docker_bin,
            &rmi_args(name),
            None,
            name,
            self.remove_timeout,
            self.drain_grace,
        )
        .await
    }

    /// Probes the live status of a running container by name filter.
    /// Returns the human-readable status line, or `None` when the
    /// container is not running.
    pub async fn status(&self, name: &str) -> Result<Option<String>> {
        let result = process::run_checked(
            &self.docker_bin,
            &ps_status_args(name),
            None,
            name,
            self.probe_timeout,
            self.drain_grace,
        )
        .await?;
        let status = result.output.trim();
        debug!("Status probe for {}: {:?}", name, status);
        if status.is_empty() {
            Ok(None)
        } else {
            Ok(Some(status.to_string()))
        }
    }

    /// Checks whether a container exists at all (running or stopped).
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let result = process::run_checked(
            &self.docker_bin,
            &ps_exists_args(name),
            None,
            name,
            self.probe_timeout,
            self.drain_grace,
        )
        .await?;
        Ok(!result.output.trim().is_empty())
    }

    pub fn docker_bin(&self) -> &str {
        &self.docker_bin
    }
}

fn stop_args(name: &str) -> Vec<String> {
    vec!["stop".to_string(), name.to_string()]
}

fn rm_args(name: &str) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), name.to_string()]
}

fn rmi_args(name: &str) -> Vec<String> {
    vec!["rmi".to_string(), "-f".to_string(), name.to_string()]
}

fn ps_status_args(name: &str) -> Vec<String> {
    vec![
        "ps".to_string(),
        "--filter".to_string(),
        format!("name={name}"),
        "--format".to_string(),
        "{{.Status}}".to_string(),
    ]
}

fn ps_exists_args(name: &str) -> Vec<String> {
    vec![
        "ps".to_string(),
        "-a".to_string(),
        "--filter".to_string(),
        format!("name={name}"),
        "--format".to_string(),
        "{{.Names}}".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn test_container_name_derivation() {
        assert_eq!(container_name("abc123"), "sandbox-abc123");
    }

    #[test]
    fn test_argument_vectors() {
        assert_eq!(stop_args("sandbox-a"), ["stop", "sandbox-a"]);
        assert_eq!(rm_args("sandbox-a"), ["rm", "-f", "sandbox-a"]);
        assert_eq!(rmi_args("sandbox-a"), ["rmi", "-f", "sandbox-a"]);
        assert_eq!(
            ps_status_args("sandbox-a"),
            ["ps", "--filter", "name=sandbox-a", "--format", "{{.Status}}"]
        );
        assert_eq!(
            ps_exists_args("sandbox-a"),
            [
                "ps",
                "-a",
                "--filter",
                "name=sandbox-a",
                "--format",
                "{{.Names}}"
            ]
        );
    }

    /// Writes an executable stub standing in for the docker binary.
    fn write_stub(dir: &Path, body: &str) -> String {
        let path = dir.join("docker");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path.to_string_lossy().into_owned()
    }

    fn control_with_stub(docker_bin: String) -> ContainerControl {
        let mut config = Config::default();
        config.tool.docker_bin = docker_bin;
        ContainerControl::new(&config)
    }

    #[tokio::test]
    async fn test_status_running() {
        let dir = tempdir().unwrap();
        let control = control_with_stub(write_stub(dir.path(), "echo 'Up 5 minutes'"));
        let status = control.status("sandbox-abc").await.unwrap();
        assert_eq!(status.as_deref(), Some("Up 5 minutes"));
    }

    #[tokio::test]
    async fn test_status_stopped_is_none() {
        let dir = tempdir().unwrap();
        let control = control_with_stub(write_stub(dir.path(), "true"));
        let status = control.status("sandbox-abc").await.unwrap();
        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn test_exists_reflects_probe_output() {
        let dir = tempdir().unwrap();
        let control = control_with_stub(write_stub(dir.path(), "echo sandbox-abc"));
        assert!(control.exists("sandbox-abc").await.unwrap());

        let empty = tempdir().unwrap();
        let control = control_with_stub(write_stub(empty.path(), "true"));
        assert!(!control.exists("sandbox-abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_failure_surfaces_external_tool_error() {
        let dir = tempdir().unwrap();
        let control = control_with_stub(write_stub(
            dir.path(),
            "echo 'No such container' 1>&2; exit 1",
        ));
        let err = control.stop("sandbox-missing").await.unwrap_err();
        assert!(err
            .captured_output()
            .unwrap_or_default()
            .contains("No such container"));
    }
}
