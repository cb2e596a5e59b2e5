//! Domain-specific error types for sandbox operations.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

use std::time::Duration;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while orchestrating a sandboxed project.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Network or IO failure while retrieving the project archive.
    #[error("Artifact fetch failed: {message}")]
    Fetch { message: String },

    /// An archive entry resolved outside the staging directory.
    #[error("Archive entry escapes the staging directory: {entry}")]
    PathTraversal { entry: String },

    /// The requested runtime tag is not in the supported set.
    #[error("Unsupported runtime: '{runtime}'. Supported: spring, react, fastapi")]
    UnsupportedRuntime { runtime: String },

    /// An external call exceeded its deadline and was forcibly killed.
    /// Carries whatever output was captured before the kill.
    #[error("External command timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64, output: String },

    /// An external call exited nonzero. Carries the combined output
    /// for diagnosis.
    #[error("External command failed with exit code {exit_code}")]
    ExternalTool { exit_code: i32, output: String },

    /// The build/run tool is missing or the configuration is unusable.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Filesystem or process-spawn failure outside the fetch path.
    #[error("IO error while {context}: {message}")]
    Io { context: String, message: String },

    /// Wrapper raised by `run` around any phase failure, carrying the
    /// project id and the phase that failed.
    #[error("Execution failed for '{id}' during {phase}: {source}")]
    Execution {
        id: String,
        phase: &'static str,
        #[source]
        source: Box<SandboxError>,
    },
}

impl SandboxError {
    /// Creates a `Fetch` error.
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }

    /// Creates a `PathTraversal` error for an archive entry.
    pub fn path_traversal(entry: impl Into<String>) -> Self {
        Self::PathTraversal {
            entry: entry.into(),
        }
    }

    /// Creates an `UnsupportedRuntime` error.
    pub fn unsupported_runtime(runtime: impl Into<String>) -> Self {
        Self::UnsupportedRuntime {
            runtime: runtime.into(),
        }
    }

    /// Creates a `Timeout` error from a `Duration` and captured output.
    pub fn timeout(duration: Duration, output: impl Into<String>) -> Self {
        Self::Timeout {
            timeout_secs: duration.as_secs(),
            output: output.into(),
        }
    }

    /// Creates an `ExternalTool` error.
    pub fn external_tool(exit_code: i32, output: impl Into<String>) -> Self {
        Self::ExternalTool {
            exit_code,
            output: output.into(),
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an `Io` error with a short activity description.
    pub fn io(context: impl Into<String>, source: &std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: source.to_string(),
        }
    }

    /// Wraps an error in an `Execution` error for the given phase.
    pub fn execution(id: impl Into<String>, phase: &'static str, source: SandboxError) -> Self {
        Self::Execution {
            id: id.into(),
            phase,
            source: Box::new(source),
        }
    }

    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if this is a path traversal error.
    pub fn is_path_traversal(&self) -> bool {
        matches!(self, Self::PathTraversal { .. })
    }

    /// Returns true if this is an unsupported runtime error.
    pub fn is_unsupported_runtime(&self) -> bool {
        matches!(self, Self::UnsupportedRuntime { .. })
    }

    /// Returns the captured external output, if any was carried.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::Timeout { output, .. } | Self::ExternalTool { output, .. } => Some(output),
            Self::Execution { source, .. } => source.captured_output(),
            _ => None,
        }
    }
}
