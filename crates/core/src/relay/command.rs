//! Helper process invocation.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;

use super::error::RelayError;
use crate::config::HelperConfig;

/// File index meaning "first file enumerated by the helper".
pub const DEFAULT_FILE_INDEX: usize = 0;

/// Builds and launches the streaming helper for one session.
#[derive(Debug, Clone)]
pub struct HelperCommand {
    config: HelperConfig,
}

impl HelperCommand {
    pub fn new(config: HelperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HelperConfig {
        &self.config
    }

    /// Builds helper arguments: `<magnet> --select <index> --stdout [extra...]`.
    pub fn build_args(&self, magnet: &str, file_index: usize) -> Vec<String> {
        let mut args = vec![
            magnet.to_string(),
            "--select".to_string(),
            file_index.to_string(),
            "--stdout".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// Spawns the helper with stdout and stderr piped.
    ///
    /// The child is killed if its handle is dropped without being reaped.
    pub fn spawn(&self, magnet: &str, file_index: usize) -> Result<Child, RelayError> {
        Command::new(&self.config.program)
            .args(self.build_args(magnet, file_index))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::from_spawn(self.config.program.clone(), e))
    }

    /// Checks that the helper can be launched by running `<program> --version`.
    ///
    /// Only launchability matters; the exit status and output are ignored.
    pub async fn validate(&self) -> Result<(), RelayError> {
        let mut child = Command::new(&self.config.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RelayError::from_spawn(self.config.program.clone(), e))?;

        if timeout(VALIDATE_TIMEOUT, child.wait()).await.is_err() {
            let _ = child.kill().await;
        }
        Ok(())
    }
}

const VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);
