use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{FleetError, Result};
use crate::models::{ContainerInfo, ContainerStats};
use crate::services::compose_output::{parse_ps, parse_stats};
use crate::services::runtime::{ContainerRuntime, StackRef};

/// Production runtime adapter: shells out to `<binary> compose` for stack
/// commands and `<binary> stats` for resource usage.
#[derive(Debug, Clone)]
pub struct ComposeRuntime {
    binary: String,
    timeout: Duration,
}

impl ComposeRuntime {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, args: &[&str], working_directory: Option<&Path>) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = working_directory {
            cmd.current_dir(dir);
        }
        tracing::debug!(binary = %self.binary, args = %args.join(" "), "running runtime command");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                FleetError::RuntimeOperation(format!(
                    "{} {} timed out after {}s",
                    self.binary,
                    args.join(" "),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                FleetError::RuntimeOperation(format!("failed to run {}: {e}", self.binary))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::RuntimeOperation(format!(
                "{} {} failed (exit {}): {}",
                self.binary,
                args.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_compose(&self, stack: &StackRef, args: &[&str]) -> Result<String> {
        let compose_file = stack.compose_file();
        let env_file = stack.env_file();
        let compose_file = compose_file.to_string_lossy();
        let env_file = env_file.to_string_lossy();
        let mut full = vec![
            "compose",
            "-p",
            stack.name.as_str(),
            "-f",
            &*compose_file,
            "--env-file",
            &*env_file,
        ];
        full.extend_from_slice(args);
        self.run(&full, Some(&stack.directory)).await
    }
}

#[async_trait]
impl ContainerRuntime for ComposeRuntime {
    async fn validate(&self, stack: &StackRef) -> Result<()> {
        self.run_compose(stack, &["config", "--quiet"]).await?;
        Ok(())
    }

    async fn up(&self, stack: &StackRef) -> Result<()> {
        self.run_compose(stack, &["up", "-d"]).await?;
        Ok(())
    }

    async fn stop(&self, stack: &StackRef) -> Result<()> {
        self.run_compose(stack, &["stop"]).await?;
        Ok(())
    }

    async fn down(&self, stack: &StackRef, remove_volumes: bool) -> Result<()> {
        if remove_volumes {
            self.run_compose(stack, &["down", "-v", "--remove-orphans"])
                .await?;
        } else {
            self.run_compose(stack, &["down", "--remove-orphans"]).await?;
        }
        Ok(())
    }

    async fn restart_service(&self, stack: &StackRef, service: &str) -> Result<()> {
        self.run_compose(stack, &["restart", service]).await?;
        Ok(())
    }

    async fn list_containers(&self, stack: &StackRef) -> Result<Vec<ContainerInfo>> {
        let out = self
            .run_compose(stack, &["ps", "-a", "--format", "json"])
            .await?;
        parse_ps(&out)
    }

    async fn container_stats(&self, containers: &[String]) -> Result<Vec<ContainerStats>> {
        if containers.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["stats", "--no-stream", "--format", "{{json .}}"];
        args.extend(containers.iter().map(String::as_str));
        let out = self.run(&args, None).await?;
        parse_stats(&out)
    }
}
