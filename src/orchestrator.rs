//! End-to-end lifecycle of one sandboxed execution per project id.
//!
//! A run sequences retire-existing -> stage -> fetch -> extract ->
//! generate descriptor -> build/run -> register. Every non-success
//! path deletes the attempt's staging directory, and retirement of a
//! prior instance always completes before staging begins. Teardown is
//! best-effort against docker but authoritative against the registry.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::descriptor::{self, Runtime};
use crate::docker::{container_name, ContainerControl};
use crate::error::{Result, SandboxError};
use crate::fetch::{self, ArtifactSource};
use crate::logs::{LogQuery, LogRetriever, LogsResult};
use crate::process;
use crate::registry::InstanceRegistry;

/// One request to build and run a packaged project.
#[derive(Debug)]
pub struct RunRequest {
    pub id: String,
    pub source: ArtifactSource,
    pub runtime: Runtime,
    pub port: u16,
}

/// Successful run outcome; callers compose a reachable address.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub port: u16,
}

impl RunSummary {
    /// `id:port`, the original wire form of a run result.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.id, self.port)
    }
}

/// Live container state, probed directly from docker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Running { details: String },
    Stopped,
}

/// Owns the registry and drives the full instance lifecycle.
pub struct Orchestrator {
    config: Config,
    registry: InstanceRegistry,
    control: ContainerControl,
    log_retriever: LogRetriever,
    /// id -> staging directory of the current attempt. Deleted on
    /// stop, supersede, and failure.
    staging: Mutex<HashMap<String, PathBuf>>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let control = ContainerControl::new(&config);
        let log_retriever = LogRetriever::new(&config);
        Self {
            config,
            registry: InstanceRegistry::new(),
            control,
            log_retriever,
            staging: Mutex::new(HashMap::new()),
        }
    }

    /// Builds and runs a project, replacing any existing instance for
    /// the same id. Returns `{id, port}` once the external tool exits
    /// successfully and the handle is registered.
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary> {
        info!(
            "Starting project execution - id: {}, runtime: {}, port: {}",
            request.id, request.runtime, request.port
        );

        // Retirement of the previous instance always completes before
        // staging of the new one begins.
        self.retire(&request.id).await;

        let staging_dir = self.create_staging_dir(&request.id).await?;

        match self.execute(&request, &staging_dir).await {
            Ok(()) => {
                let name = container_name(&request.id);
                self.registry.insert(&request.id, &name).await;
                info!(
                    "Project execution completed - id: {}, port: {}",
                    request.id, request.port
                );
                Ok(RunSummary {
                    id: request.id,
                    port: request.port,
                })
            }
            Err((phase, source)) => {
                error!(
                    "Project execution failed - id: {}, phase: {}: {}",
                    request.id, phase, source
                );
                self.cleanup_staging(&request.id).await;
                Err(SandboxError::execution(&request.id, phase, source))
            }
        }
    }

    /// Stops a project's instance. Returns `false` when nothing was
    /// registered; a leftover staging directory is cleaned up either
    /// way.
    pub async fn stop(&self, id: &str) -> bool {
        if self.registry.get(id).await.is_none() {
            info!("No running container found for id: {}", id);
            self.cleanup_staging(id).await;
            return false;
        }
        self.retire(id).await;
        info!("Successfully stopped project: {}", id);
        true
    }

    /// Probes docker for the live state of `sandbox-<id>`. Does not
    /// consult the registry - this is a direct check of ground truth.
    pub async fn status(&self, id: &str) -> Result<InstanceStatus> {
        let name = container_name(id);
        match self.control.status(&name).await? {
            Some(details) => Ok(InstanceStatus::Running { details }),
            None => Ok(InstanceStatus::Stopped),
        }
    }

    /// Retrieves container logs with tail/follow/since filters.
    pub async fn logs(&self, id: &str, query: &LogQuery) -> Result<LogsResult> {
        self.log_retriever.logs(id, query).await
    }

    /// Snapshot of the registry.
    pub async fn list_active(&self) -> HashMap<String, String> {
        self.registry.snapshot().await
    }

    /// Retires every registered instance and deletes all remaining
    /// staging directories. Invoked on graceful shutdown.
    pub async fn shutdown(&self) {
        info!("Cleaning up all containers and staging directories...");
        for id in self.registry.snapshot().await.into_keys() {
            self.retire(&id).await;
        }
        let leftovers: Vec<String> = self.staging.lock().await.keys().cloned().collect();
        for id in leftovers {
            self.cleanup_staging(&id).await;
        }
        info!("Container and staging cleanup completed");
    }

    /// Runs the staging phases, tagging any failure with its phase.
    async fn execute(
        &self,
        request: &RunRequest,
        staging_dir: &Path,
    ) -> std::result::Result<(), (&'static str, SandboxError)> {
        let archive = fetch::fetch(&request.source, staging_dir)
            .await
            .map_err(|e| ("fetch", e))?;
        fetch::extract(&archive, staging_dir).map_err(|e| ("extract", e))?;
        descriptor::generate(staging_dir, request.runtime).map_err(|e| ("descriptor", e))?;
        self.invoke_build_tool(request, staging_dir)
            .await
            .map_err(|e| ("build/run", e))?;
        Ok(())
    }

    /// Invokes the external build-and-run tool with positional
    /// `(id, port, runtime, stagingPath)` under the long timeout.
    async fn invoke_build_tool(&self, request: &RunRequest, staging_dir: &Path) -> Result<()> {
        let args = vec![
            request.id.clone(),
            request.port.to_string(),
            request.runtime.to_string(),
            staging_dir.display().to_string(),
        ];
        info!(
            "Running build tool - id: {}, script: {}",
            request.id,
            self.config.tool.build_script.display()
        );
        process::run_checked(
            &self.config.tool.build_script,
            &args,
            None,
            &request.id,
            self.config.timeouts.build(),
            self.config.timeouts.drain_grace(),
        )
        .await?;
        Ok(())
    }

    /// Stops and removes a registered instance's external resources
    /// (best-effort) and its bookkeeping (unconditional).
    async fn retire(&self, id: &str) {
        if let Some(name) = self.registry.get(id).await {
            info!("Stopping existing container for id {}: {}", id, name);
            if let Err(e) = self.control.stop(&name).await {
                warn!("Failed to stop container {}: {}", name, e);
            }
            if let Err(e) = self.control.remove_container(&name).await {
                warn!("Failed to remove container {}: {}", name, e);
            }
            if let Err(e) = self.control.remove_image(&name).await {
                warn!("Failed to remove image {}: {}", name, e);
            }
        }
        self.registry.remove(id).await;
        self.cleanup_staging(id).await;
    }

    /// Creates the fresh, exclusively-owned staging directory for one
    /// run attempt.
    async fn create_staging_dir(&self, id: &str) -> Result<PathBuf> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let dir = self
            .config
            .staging
            .root
            .join(format!("sandbox-{id}-{}", &suffix[..8]));
        fs::create_dir_all(&dir)
            .map_err(|e| SandboxError::io(format!("creating staging dir {}", dir.display()), &e))?;
        self.staging
            .lock()
            .await
            .insert(id.to_string(), dir.clone());
        Ok(dir)
    }

    /// Deletes the staging directory for an id, if tracked. Failures
    /// are logged, never propagated.
    async fn cleanup_staging(&self, id: &str) {
        let dir = self.staging.lock().await.remove(id);
        if let Some(dir) = dir {
            if dir.exists() {
                match fs::remove_dir_all(&dir) {
                    Ok(()) => info!("Deleted staging dir for id {}: {}", id, dir.display()),
                    Err(e) => warn!("Failed to clean staging dir {}: {}", dir.display(), e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write;
    use tempfile::{tempdir, TempDir};

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn project_zip() -> Vec<u8> {
        build_zip(&[
            ("main.py", b"print('hi')"),
            ("requirements.txt", b"fastapi"),
        ])
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    /// Test fixture: stub build script and docker binary, isolated
    /// staging root, docker invocations recorded to a log file.
    struct Fixture {
        dir: TempDir,
        config: Config,
    }

    impl Fixture {
        fn new(build_body: &str) -> Self {
            let dir = tempdir().unwrap();
            let calls = dir.path().join("docker-calls.log");
            let build_script = write_script(dir.path(), "build_and_run.sh", build_body);
            let docker_stub = write_script(
                dir.path(),
                "docker",
                &format!("echo \"$@\" >> {}\nexit 0", calls.display()),
            );
            let staging_root = dir.path().join("staging");
            fs::create_dir_all(&staging_root).unwrap();

            let mut config = Config::default();
            config.tool.build_script = build_script;
            config.tool.docker_bin = docker_stub.to_string_lossy().into_owned();
            config.staging.root = staging_root;
            Self { dir, config }
        }

        fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(self.config.clone())
        }

        fn docker_calls(&self) -> String {
            fs::read_to_string(self.dir.path().join("docker-calls.log")).unwrap_or_default()
        }

        fn staging_dirs_for(&self, id: &str) -> Vec<PathBuf> {
            let prefix = format!("sandbox-{id}-");
            fs::read_dir(&self.config.staging.root)
                .unwrap()
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
                })
                .collect()
        }
    }

    fn request(id: &str, port: u16) -> RunRequest {
        RunRequest {
            id: id.to_string(),
            source: ArtifactSource::Bytes(project_zip()),
            runtime: Runtime::Fastapi,
            port,
        }
    }

    #[tokio::test]
    async fn test_run_success_registers_instance() {
        let fixture = Fixture::new("echo building \"$@\"; exit 0");
        let orchestrator = fixture.orchestrator();

        let summary = orchestrator.run(request("abc123", 12345)).await.unwrap();
        assert_eq!(summary.id, "abc123");
        assert_eq!(summary.port, 12345);
        assert_eq!(summary.endpoint(), "abc123:12345");

        let active = orchestrator.list_active().await;
        assert_eq!(active.get("abc123").map(String::as_str), Some("sandbox-abc123"));

        // Staging dir survives a successful run, fully populated
        let dirs = fixture.staging_dirs_for("abc123");
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].join("main.py").exists());
        assert!(dirs[0].join("Dockerfile").exists());
        assert!(!dirs[0].join("project.zip").exists());
    }

    #[tokio::test]
    async fn test_run_failure_cleans_up() {
        let fixture = Fixture::new("echo build exploded; exit 1");
        let orchestrator = fixture.orchestrator();

        let err = orchestrator.run(request("abc123", 12345)).await.unwrap_err();
        match &err {
            SandboxError::Execution { id, phase, .. } => {
                assert_eq!(id, "abc123");
                assert_eq!(*phase, "build/run");
            }
            other => panic!("expected Execution, got {other:?}"),
        }
        assert!(err.captured_output().unwrap_or_default().contains("build exploded"));

        // No registry entry, no staging leftovers
        assert!(orchestrator.list_active().await.is_empty());
        assert!(fixture.staging_dirs_for("abc123").is_empty());
    }

    #[tokio::test]
    async fn test_run_fetch_failure_tags_phase() {
        let fixture = Fixture::new("exit 0");
        let orchestrator = fixture.orchestrator();

        let err = orchestrator
            .run(RunRequest {
                id: "abc123".to_string(),
                source: ArtifactSource::Url("http://127.0.0.1:1/p.zip".to_string()),
                runtime: Runtime::Fastapi,
                port: 12345,
            })
            .await
            .unwrap_err();
        match err {
            SandboxError::Execution { phase, .. } => assert_eq!(phase, "fetch"),
            other => panic!("expected Execution, got {other:?}"),
        }
        assert!(fixture.staging_dirs_for("abc123").is_empty());
    }

    #[tokio::test]
    async fn test_run_corrupt_archive_tags_extract_phase() {
        let fixture = Fixture::new("exit 0");
        let orchestrator = fixture.orchestrator();

        let err = orchestrator
            .run(RunRequest {
                id: "abc123".to_string(),
                source: ArtifactSource::Bytes(b"not a zip".to_vec()),
                runtime: Runtime::Fastapi,
                port: 12345,
            })
            .await
            .unwrap_err();
        match err {
            SandboxError::Execution { phase, .. } => assert_eq!(phase, "extract"),
            other => panic!("expected Execution, got {other:?}"),
        }
        assert!(orchestrator.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_build_timeout_escalates() {
        let mut fixture = Fixture::new("echo started; sleep 30");
        fixture.config.timeouts.build_secs = 1;
        let orchestrator = fixture.orchestrator();

        let err = orchestrator.run(request("slow", 9000)).await.unwrap_err();
        match err {
            SandboxError::Execution { ref source, .. } => assert!(source.is_timeout()),
            ref other => panic!("expected Execution, got {other:?}"),
        }
        assert!(err.captured_output().unwrap_or_default().contains("started"));
        assert!(fixture.staging_dirs_for("slow").is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let fixture = Fixture::new("exit 0");
        let orchestrator = fixture.orchestrator();

        orchestrator.run(request("abc123", 12345)).await.unwrap();
        assert!(orchestrator.stop("abc123").await);
        assert!(!orchestrator.stop("abc123").await);
        assert!(orchestrator.list_active().await.is_empty());

        // Stop drove the external teardown and deleted the staging dir
        let calls = fixture.docker_calls();
        assert!(calls.contains("stop sandbox-abc123"));
        assert!(calls.contains("rm -f sandbox-abc123"));
        assert!(fixture.staging_dirs_for("abc123").is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_id_returns_false() {
        let fixture = Fixture::new("exit 0");
        let orchestrator = fixture.orchestrator();
        assert!(!orchestrator.stop("never-ran").await);
    }

    #[tokio::test]
    async fn test_rerun_retires_previous_instance_first() {
        let fixture = Fixture::new("exit 0");
        let orchestrator = fixture.orchestrator();

        orchestrator.run(request("abc123", 12345)).await.unwrap();
        orchestrator.run(request("abc123", 12346)).await.unwrap();

        // At most one entry and one staging dir for the id
        let active = orchestrator.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(fixture.staging_dirs_for("abc123").len(), 1);

        // The second run stopped and removed the first container
        let calls = fixture.docker_calls();
        assert!(calls.contains("stop sandbox-abc123"));
        assert!(calls.contains("rmi -f sandbox-abc123"));
    }

    #[tokio::test]
    async fn test_failed_rerun_leaves_id_unregistered() {
        let fixture = Fixture::new("exit 0");
        let orchestrator = fixture.orchestrator();
        orchestrator.run(request("abc123", 12345)).await.unwrap();

        // Make the build tool fail for the rerun
        write_script(
            fixture.config.tool.build_script.parent().unwrap(),
            "build_and_run.sh",
            "exit 1",
        );

        let err = orchestrator.run(request("abc123", 12345)).await;
        assert!(err.is_err());
        // The old handle was retired and the new one never registered
        assert!(orchestrator.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_maps_probe_output() {
        let fixture = Fixture::new("exit 0");
        // Status probe sees a running container
        write_script(
            fixture.dir.path(),
            "docker",
            "case \"$1\" in ps) echo 'Up 2 minutes' ;; esac",
        );
        let orchestrator = fixture.orchestrator();
        assert_eq!(
            orchestrator.status("abc123").await.unwrap(),
            InstanceStatus::Running {
                details: "Up 2 minutes".to_string()
            }
        );

        // Silent probe means stopped
        write_script(fixture.dir.path(), "docker", "exit 0");
        assert_eq!(
            orchestrator.status("abc123").await.unwrap(),
            InstanceStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_shutdown_retires_everything() {
        let fixture = Fixture::new("exit 0");
        let orchestrator = fixture.orchestrator();

        orchestrator.run(request("one", 9001)).await.unwrap();
        orchestrator.run(request("two", 9002)).await.unwrap();
        assert_eq!(orchestrator.list_active().await.len(), 2);

        orchestrator.shutdown().await;

        assert!(orchestrator.list_active().await.is_empty());
        assert!(fixture.staging_dirs_for("one").is_empty());
        assert!(fixture.staging_dirs_for("two").is_empty());
        let calls = fixture.docker_calls();
        assert!(calls.contains("stop sandbox-one"));
        assert!(calls.contains("stop sandbox-two"));
    }
}
