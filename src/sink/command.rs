// src/sink/command.rs

//! Writer for the monitoring authority's external command file.
//!
//! Every command is one line:
//!
//! ```text
//! [1700000000] PROCESS_SERVICE_CHECK_RESULT;web1;HTTP;2;text\nmore text
//! ```
//!
//! The file is normally a named pipe, so it is opened for non-blocking
//! append. A failed write reopens the file once and retries before giving up.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::check::Report;
use crate::dag::runnable::lock;
use crate::errors::{CheckdagError, Result};

pub const PROCESS_SERVICE_CHECK_RESULT: &str = "PROCESS_SERVICE_CHECK_RESULT";

#[derive(Debug)]
pub struct CommandWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl CommandWriter {
    /// Open the command file. A file that cannot be opened is an init error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_command_file(&path)?;
        debug!(path = %path.display(), "opened command file");
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one command with the given unix timestamp.
    pub fn command(&self, timestamp: i64, name: &str, args: &[&str]) -> Result<()> {
        let line = format_command(timestamp, name, args)?;
        self.write_line(line.as_bytes())
    }

    /// Submit a passive service check result for `report`.
    pub fn submit_report(&self, report: &Report) -> Result<()> {
        let host = report.host.as_deref().unwrap_or("localhost");
        let state = report.state.index().to_string();
        self.command(
            report.time.timestamp(),
            PROCESS_SERVICE_CHECK_RESULT,
            &[host, &report.service, &state, &report.text],
        )
    }

    fn write_line(&self, line: &[u8]) -> Result<()> {
        let mut file = lock(&self.file);

        if let Some(f) = file.as_mut() {
            match f.write_all(line) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "write to command file failed; reopening");
                }
            }
        }

        *file = None;
        let mut reopened = open_command_file(&self.path)?;
        reopened.write_all(line).map_err(|e| {
            CheckdagError::InitError(format!(
                "Failed to write to command file {}: {e}",
                self.path.display()
            ))
        })?;
        *file = Some(reopened);
        Ok(())
    }
}

fn open_command_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .append(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| {
            CheckdagError::InitError(format!(
                "Failed to open command file {}: {e}",
                path.display()
            ))
        })
}

/// Build one command line. Only the last argument may carry newlines (they
/// are escaped) and `|` (replaced, it separates performance data).
pub fn format_command(timestamp: i64, name: &str, args: &[&str]) -> Result<String> {
    let mut fields = Vec::with_capacity(args.len() + 1);
    fields.push(name.to_string());

    if let Some((last, rest)) = args.split_last() {
        for arg in rest {
            if arg.contains('\n') || arg.contains(';') {
                return Err(CheckdagError::Other(anyhow::anyhow!(
                    "invalid command argument {arg:?}: must not contain newlines or ';'"
                )));
            }
            fields.push((*arg).to_string());
        }
        fields.push(last.trim_end().replace('\n', "\\n").replace('|', "_"));
    }

    Ok(format!("[{timestamp}] {}\n", fields.join(";")))
}
