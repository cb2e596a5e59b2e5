//! Build descriptor generation for the supported runtimes.
//!
//! The runtime tag is a closed set; anything else is rejected before
//! any filesystem access. The descriptor itself is a fixed Dockerfile
//! chosen by tag - pure data handed to the external build tool.

use std::fs;
use std::path::Path;

use crate::error::{Result, SandboxError};
use crate::templates;

/// Supported project runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// Spring Boot (Java 17, Gradle or Maven).
    Spring,
    /// React (Node 20, static build served on port 3000).
    React,
    /// FastAPI (Python 3.11, uvicorn).
    Fastapi,
}

impl Runtime {
    /// Internal port the runtime's container listens on.
    pub fn container_port(&self) -> u16 {
        match self {
            Self::Spring => 8080,
            Self::React => 3000,
            Self::Fastapi => 8000,
        }
    }

    fn dockerfile(&self) -> &'static str {
        match self {
            Self::Spring => templates::SPRING_DOCKERFILE,
            Self::React => templates::REACT_DOCKERFILE,
            Self::Fastapi => templates::FASTAPI_DOCKERFILE,
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spring => write!(f, "spring"),
            Self::React => write!(f, "react"),
            Self::Fastapi => write!(f, "fastapi"),
        }
    }
}

impl std::str::FromStr for Runtime {
    type Err = SandboxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spring" => Ok(Self::Spring),
            "react" => Ok(Self::React),
            "fastapi" => Ok(Self::Fastapi),
            _ => Err(SandboxError::unsupported_runtime(s)),
        }
    }
}

/// Writes the Dockerfile for `runtime` into `dest_dir`.
pub fn generate(dest_dir: &Path, runtime: Runtime) -> Result<()> {
    let path = dest_dir.join("Dockerfile");
    fs::write(&path, runtime.dockerfile())
        .map_err(|e| SandboxError::io(format!("writing {}", path.display()), &e))
}
