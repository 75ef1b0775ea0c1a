//! # devforge-install
//!
//! Installs planned features into a running container.
//!
//! Handles:
//! - **Exec**: the container-exec collaborator and its Docker CLI implementation.
//! - **Orchestrator**: strictly sequential, cancellable, fail-fast installation.
//! - **Pipeline**: configuration, resolution, planning, and installation end to end.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod exec;
pub mod orchestrator;
pub mod pipeline;

pub use exec::{ContainerExec, DockerExec, ExecError, ExecOutput};
pub use orchestrator::{InstallReport, Orchestrator};
pub use pipeline::{Pipeline, Prepared};
