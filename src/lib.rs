//! Sandbox execution orchestrator.
//!
//! Accepts a packaged project and a runtime tag, stages it in an
//! isolated directory, generates a build descriptor, delegates the
//! actual build and launch to an external tool, and tracks the
//! resulting container instance for stop/status/log operations.

pub mod api;
pub mod config;
pub mod descriptor;
pub mod docker;
pub mod error;
pub mod fetch;
pub mod logs;
pub mod orchestrator;
pub mod process;
pub mod registry;

mod templates;

pub use config::Config;
pub use descriptor::Runtime;
pub use error::{Result, SandboxError};
pub use orchestrator::{InstanceStatus, Orchestrator, RunRequest, RunSummary};
