// src/query/subprocess.rs

//! Probe that runs a shell command and returns its stdout.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::Value;
use crate::errors::{CheckdagError, Failure, ProbeErrorKind, Result};
use crate::query::{Probe, QueryConfig, scalar_to_string};

/// Exit status the shell uses for "command not found".
const EXIT_NOT_FOUND: i32 = 127;

/// Runs `command` through `sh -c`.
///
/// - `data` (optional) is written to the child's stdin.
/// - `environment.*` entries are added to the inherited environment.
/// - exit 0 yields stdout; any other exit is a probe failure carrying stdout
///   as the triggering value and stderr as detail.
#[derive(Debug, Clone)]
pub struct SubprocessProbe {
    command: String,
    data: Option<String>,
    environment: BTreeMap<String, String>,
}

impl SubprocessProbe {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            data: None,
            environment: BTreeMap::new(),
        }
    }

    pub fn from_config(conf: &QueryConfig) -> Result<Arc<dyn Probe>> {
        let command = conf.param_str("command").ok_or_else(|| {
            CheckdagError::ConfigError(format!(
                "subprocess query '{}' requires a 'command'",
                conf.label
            ))
        })?;

        let mut environment = BTreeMap::new();
        if let Some(table) = conf.param_table("environment") {
            for (key, value) in table {
                let value = scalar_to_string(value).ok_or_else(|| {
                    CheckdagError::ConfigError(format!(
                        "subprocess query '{}': environment.{} must be a scalar",
                        conf.label, key
                    ))
                })?;
                environment.insert(key.clone(), value);
            }
        }

        Ok(Arc::new(Self {
            command,
            data: conf.param_str("data"),
            environment,
        }))
    }
}

#[async_trait::async_trait]
impl Probe for SubprocessProbe {
    async fn run(&self) -> std::result::Result<Value, Failure> {
        debug!(cmd = %self.command, "starting subprocess query");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .envs(&self.environment)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Failure::probe(ProbeErrorKind::Process, "Failed to start command.").with_detail(e)
        })?;

        // Feed stdin and close it so the child sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            if let Some(data) = &self.data {
                // A child that exits without reading stdin is not an error.
                if let Err(e) = stdin.write_all(data.as_bytes()).await {
                    debug!(cmd = %self.command, error = %e, "failed to write stdin");
                }
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            Failure::probe(ProbeErrorKind::Process, "Failed waiting for command.").with_detail(e)
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        match output.status.code() {
            Some(0) => Ok(stdout),
            Some(EXIT_NOT_FOUND) => Err(Failure::probe(
                ProbeErrorKind::Process,
                "Command not found.",
            )
            .with_detail(stderr)),
            code => {
                info!(cmd = %self.command, exit_code = ?code, "subprocess query failed");
                let message = match code {
                    Some(code) => format!("Command exited with status {code}."),
                    None => "Command terminated by a signal.".to_string(),
                };
                Err(Failure::probe(ProbeErrorKind::Process, message)
                    .with_result(stdout)
                    .with_detail(stderr))
            }
        }
    }
}
