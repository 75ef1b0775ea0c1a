//! Running commands inside the target container.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use devforge_common::types::ContainerTarget;
use thiserror::Error;
use tokio::process::Command;

/// Output from an exec command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code returned by the command.
    pub exit_code: i32,
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Failures of the exec collaborator itself, as opposed to a command
/// that ran and exited non-zero.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The container tool is not installed.
    #[error("{program} not found on PATH: {source}")]
    NotFound {
        /// Program searched for.
        program: String,
        /// Lookup failure.
        source: which::Error,
    },

    /// The container tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program being run.
        program: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A helper command the collaborator relies on failed.
    #[error("{action} failed with code {exit_code}: {stderr}")]
    Command {
        /// What was being done.
        action: String,
        /// Exit code.
        exit_code: i32,
        /// Standard error.
        stderr: String,
    },
}

/// Executes commands in, and copies files into, a running container.
#[async_trait]
pub trait ContainerExec: Send + Sync {
    /// Runs `command` with `args` inside `target`.
    ///
    /// A non-zero exit is reported in [`ExecOutput::exit_code`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be run at all.
    async fn exec(
        &self,
        target: &ContainerTarget,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        working_dir: &str,
    ) -> Result<ExecOutput, ExecError>;

    /// Copies the contents of `host_dir` into `container_dir`, creating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    async fn copy_dir(
        &self,
        target: &ContainerTarget,
        host_dir: &Path,
        container_dir: &str,
    ) -> Result<(), ExecError>;
}

/// [`ContainerExec`] backed by the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerExec {
    binary: PathBuf,
}

impl DockerExec {
    /// Name of the client binary looked up on `PATH`.
    pub const PROGRAM: &'static str = "docker";

    /// Locates `docker` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `ExecError::NotFound` if it is not installed.
    pub fn locate() -> Result<Self, ExecError> {
        let binary = which::which(Self::PROGRAM).map_err(|source| ExecError::NotFound {
            program: Self::PROGRAM.into(),
            source,
        })?;
        tracing::debug!(path = %binary.display(), "using docker client");
        Ok(Self { binary })
    }

    /// Uses a specific client binary, e.g. a `podman` with a docker-compatible CLI.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<ExecOutput, ExecError> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                program: self.binary.clone(),
                source,
            })?;
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Arguments for `docker exec`.
fn exec_args(
    target: &ContainerTarget,
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
    working_dir: &str,
) -> Vec<String> {
    let mut argv = vec!["exec".to_string(), "-w".into(), working_dir.into()];
    for (key, value) in env {
        argv.push("-e".into());
        argv.push(format!("{key}={value}"));
    }
    argv.push(target.as_str().into());
    argv.push(command.into());
    argv.extend(args.iter().cloned());
    argv
}

#[async_trait]
impl ContainerExec for DockerExec {
    async fn exec(
        &self,
        target: &ContainerTarget,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        working_dir: &str,
    ) -> Result<ExecOutput, ExecError> {
        tracing::info!(container = %target, cmd = command, args = ?args, "exec into container");
        self.run(&exec_args(target, command, args, env, working_dir)).await
    }

    async fn copy_dir(
        &self,
        target: &ContainerTarget,
        host_dir: &Path,
        container_dir: &str,
    ) -> Result<(), ExecError> {
        let mkdir = self
            .run(&[
                "exec".into(),
                target.as_str().into(),
                "mkdir".into(),
                "-p".into(),
                container_dir.into(),
            ])
            .await?;
        if !mkdir.success() {
            return Err(ExecError::Command {
                action: format!("creating {container_dir}"),
                exit_code: mkdir.exit_code,
                stderr: mkdir.stderr,
            });
        }

        // A trailing `/.` copies the directory's contents, not the directory.
        let source = format!("{}/.", host_dir.display());
        let copy = self
            .run(&[
                "cp".into(),
                source,
                format!("{target}:{container_dir}"),
            ])
            .await?;
        if !copy.success() {
            return Err(ExecError::Command {
                action: format!("copying {} to {container_dir}", host_dir.display()),
                exit_code: copy.exit_code,
                stderr: copy.stderr,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_args_put_options_before_target() {
        let env = BTreeMap::from([
            ("VERSION".to_string(), "20".to_string()),
            ("_FEATURE_ID".to_string(), "node".to_string()),
        ]);
        let argv = exec_args(
            &ContainerTarget::new("dev-1"),
            "/bin/sh",
            &["-c".into(), "./install.sh".into()],
            &env,
            "/tmp/f",
        );
        assert_eq!(
            argv,
            vec![
                "exec", "-w", "/tmp/f", "-e", "VERSION=20", "-e", "_FEATURE_ID=node", "dev-1",
                "/bin/sh", "-c", "./install.sh"
            ]
        );
    }

    #[test]
    fn success_means_zero_exit() {
        assert!(ExecOutput::default().success());
        let failed = ExecOutput {
            exit_code: 1,
            ..ExecOutput::default()
        };
        assert!(!failed.success());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let exec = DockerExec::with_binary("/nonexistent/docker");
        let err = exec
            .exec(&ContainerTarget::new("c"), "true", &[], &BTreeMap::new(), "/")
            .await
            .expect_err("spawn");
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
