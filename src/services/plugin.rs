//! Executable plugin bridge
//!
//! Runs an external decision executable with the request on stdin. Writing
//! stdin, draining stdout, draining stderr and waiting for exit are joined
//! concurrently so that neither side can stall on a full pipe buffer.
//! The CA chooser, CSR verifier and subject filter all use this primitive
//! with their own output decoders.

use std::ffi::OsStr;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::utils::PluginError;

/// Owner, group and other execute bits
const EXECUTE_BITS: u32 = 0o111;

/// The decision points that can be delegated to an executable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    CaChooser,
    CsrVerifier,
    SubjectFilter,
}

impl PluginKind {
    /// Human readable name used in errors
    pub fn name(self) -> &'static str {
        match self {
            PluginKind::CaChooser => "CA Chooser",
            PluginKind::CsrVerifier => "CSR Verifier",
            PluginKind::SubjectFilter => "Subject Filter",
        }
    }

    fn log_tag(self) -> &'static str {
        match self {
            PluginKind::CaChooser => "cachooser",
            PluginKind::CsrVerifier => "verifier",
            PluginKind::SubjectFilter => "subjectfilter",
        }
    }
}

/// What to do with the plugin's stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdoutMode {
    /// Collect stdout as the plugin's answer
    Capture,
    /// Forward stdout to the log like stderr
    Log,
}

/// Exit status and captured stdout of a finished plugin
#[derive(Debug)]
pub struct PluginOutput {
    pub status: ExitStatus,
    /// Empty when stdout was logged instead of captured
    pub stdout: Vec<u8>,
}

impl PluginOutput {
    /// Fail unless the plugin exited with status zero
    pub fn ensure_success(&self, kind: PluginKind) -> Result<(), PluginError> {
        if self.status.success() {
            Ok(())
        } else {
            Err(PluginError::Exit {
                kind: kind.name(),
                status: self.status,
            })
        }
    }
}

/// A validated plugin executable
#[derive(Debug, Clone)]
pub struct PluginExecutable {
    kind: PluginKind,
    path: PathBuf,
    timeout: Option<Duration>,
}

impl PluginExecutable {
    /// Validate `path` and create the plugin.
    ///
    /// The path must exist, must not be a directory and must have at least
    /// one execute bit set.
    pub fn new(kind: PluginKind, path: impl Into<PathBuf>) -> Result<Self, PluginError> {
        let path = path.into();
        let invalid = |reason: String| PluginError::InvalidExecutable {
            kind: kind.name(),
            path: path.clone(),
            reason,
        };

        let metadata = std::fs::metadata(&path)
            .map_err(|e| invalid(format!("cannot be accessed: {}", e)))?;

        if metadata.is_dir() {
            return Err(invalid("is a directory".to_string()));
        }

        if metadata.permissions().mode() & EXECUTE_BITS == 0 {
            return Err(invalid("is not executable".to_string()));
        }

        Ok(Self {
            kind,
            path,
            timeout: None,
        })
    }

    /// Kill the plugin and fail the call when it runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the plugin and decode its output with `decode`
    pub async fn invoke<T, F>(
        &self,
        payload: &[u8],
        env: &[(&str, &OsStr)],
        stdout_mode: StdoutMode,
        decode: F,
    ) -> Result<T, PluginError>
    where
        F: FnOnce(PluginOutput) -> Result<T, PluginError>,
    {
        let output = self.run(payload, env, stdout_mode).await?;
        decode(output)
    }

    /// Run the plugin to completion.
    ///
    /// `env` is added to the inherited environment of the child only.
    pub async fn run(
        &self,
        payload: &[u8],
        env: &[(&str, &OsStr)],
        stdout_mode: StdoutMode,
    ) -> Result<PluginOutput, PluginError> {
        let kind = self.kind;

        let mut cmd = Command::new(&self.path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        debug!(plugin = kind.log_tag(), path = ?self.path, payload_len = payload.len(), "Executing plugin");

        let mut child = cmd.spawn().map_err(|source| PluginError::Spawn {
            kind: kind.name(),
            source,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let write_input = async move {
            let Some(mut stdin) = stdin else { return };
            match stdin.write_all(payload).await {
                Ok(()) => {}
                // The plugin may legitimately exit without reading its input
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(plugin = kind.log_tag(), "Plugin closed stdin before reading the payload");
                }
                Err(e) => {
                    warn!(plugin = kind.log_tag(), "Failed to write plugin stdin: {}", e);
                }
            }
            // stdin is dropped here, closing the pipe
        };

        let read_output = async move {
            let mut buf = Vec::new();
            if let Some(mut stdout) = stdout {
                match stdout_mode {
                    StdoutMode::Capture => {
                        stdout.read_to_end(&mut buf).await?;
                    }
                    StdoutMode::Log => log_lines(stdout, kind, "stdout").await?,
                }
            }
            Ok::<_, std::io::Error>(buf)
        };

        let drain_stderr = async move {
            match stderr {
                Some(stderr) => log_lines(stderr, kind, "stderr").await,
                None => Ok(()),
            }
        };

        let run = async {
            let ((), stdout_result, stderr_result, status) =
                tokio::join!(write_input, read_output, drain_stderr, child.wait());

            if let Err(e) = stderr_result {
                warn!(plugin = kind.log_tag(), "Failed to drain plugin stderr: {}", e);
            }
            let stdout = stdout_result.map_err(|source| PluginError::Io {
                kind: kind.name(),
                source,
            })?;
            let status = status.map_err(|source| PluginError::Io {
                kind: kind.name(),
                source,
            })?;

            Ok::<_, PluginError>(PluginOutput { status, stdout })
        };

        let finished = match self.timeout {
            None => Some(run.await),
            Some(limit) => timeout(limit, run).await.ok(),
        };

        match finished {
            Some(result) => {
                if let Ok(ref output) = result {
                    debug!(
                        plugin = kind.log_tag(),
                        status = %output.status,
                        stdout_len = output.stdout.len(),
                        "Plugin finished"
                    );
                }
                result
            }
            None => {
                let limit = self.timeout.unwrap_or_default();
                error!(plugin = kind.log_tag(), path = ?self.path, "Plugin TIMEOUT after {:?}", limit);
                let _ = child.kill().await;
                Err(PluginError::Timeout {
                    kind: kind.name(),
                    timeout: limit,
                })
            }
        }
    }
}

/// Forward every line of `reader` to the log
async fn log_lines<R>(reader: R, kind: PluginKind, stream: &'static str) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line);
        info!(
            plugin = kind.log_tag(),
            "{} {}: {}",
            kind.log_tag(),
            stream,
            text.trim_end_matches(|c| c == '\n' || c == '\r')
        );
    }
}
