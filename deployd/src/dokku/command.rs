//! Remote command execution over SSH

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DeployError;
use crate::validate;

/// Runs a platform command and returns its text output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn execute(&self, command: &str, args: &[&str]) -> Result<String, DeployError>;
}

/// SSH connection options
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub host: String,
    pub port: u16,
    pub user: String,

    /// Private key passed with `-i`, the ssh agent is used otherwise
    pub key_path: Option<PathBuf>,

    /// Upper bound of a single remote command
    pub command_timeout: Duration,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            user: "dokku".to_string(),
            key_path: None,
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Runs commands on the platform host through the `ssh` binary
pub struct SshCommandRunner {
    options: SshOptions,
}

impl SshCommandRunner {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// The remote side joins the arguments into a shell command line
    fn check_arguments(command: &str, args: &[&str]) -> Result<(), DeployError> {
        validate::arg("command", command, &[validate::is_valid_command])?;
        for arg in args {
            validate::arg("argument", arg, &[validate::is_safe_argument])?;
        }
        Ok(())
    }

    fn ssh_args(&self, command: &str, args: &[&str]) -> Vec<String> {
        let mut ssh_args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.options.port.to_string(),
        ];
        if let Some(key_path) = &self.options.key_path {
            ssh_args.push("-i".to_string());
            ssh_args.push(key_path.display().to_string());
        }
        ssh_args.push(format!("{}@{}", self.options.user, self.options.host));
        ssh_args.push(command.to_string());
        ssh_args.extend(args.iter().map(|a| a.to_string()));
        ssh_args
    }
}

#[async_trait]
impl CommandRunner for SshCommandRunner {
    async fn execute(&self, command: &str, args: &[&str]) -> Result<String, DeployError> {
        Self::check_arguments(command, args)?;
        debug!("Running remote command: {} {}", command, args.join(" "));

        let child = Command::new("ssh")
            .args(self.ssh_args(command, args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DeployError::Command(format!("Failed to run ssh: {}", e)))?;

        let output = tokio::time::timeout(self.options.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                DeployError::Command(format!(
                    "{} timed out after {:?}",
                    command, self.options.command_timeout
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployError::Command(format!(
                "{} failed ({}): {}",
                command,
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
