use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::error::ProcessError;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    /// Deadline hit; the process was killed, stdout may be partial
    Timeout,
    /// Cancelled by the caller; the process was killed
    Cancelled,
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            _ => None,
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

pub struct TokioProcessRunner;

async fn drain_pipe<R>(mut pipe: R, buf: std::sync::Arc<std::sync::Mutex<Vec<u8>>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.lock().unwrap().extend_from_slice(&chunk[..n]),
        }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let start = std::time::Instant::now();

        tracing::debug!(
            "Executing subprocess: {} {}",
            command.program,
            command.args.join(" ")
        );

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::CommandNotFound(command.program.clone())
            } else {
                ProcessError::Io(e)
            }
        })?;

        if let Some(stdin_data) = &command.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(stdin_data.as_bytes())
                    .await
                    .map_err(ProcessError::Io)?;
                stdin.shutdown().await.map_err(ProcessError::Io)?;
            }
        }

        // Drain pipes incrementally into shared buffers so a killed process
        // still yields whatever it wrote before dying, even if an orphaned
        // grandchild keeps the pipe open.
        let stdout_buf = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let stderr_buf = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let stdout_pipe = child.stdout.take().expect("stdout was piped");
        let stdout_task = tokio::spawn(drain_pipe(stdout_pipe, std::sync::Arc::clone(&stdout_buf)));
        let stderr_pipe = child.stderr.take().expect("stderr was piped");
        let stderr_task = tokio::spawn(drain_pipe(stderr_pipe, std::sync::Arc::clone(&stderr_buf)));

        let deadline = async {
            match command.timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match &command.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let status = tokio::select! {
            exit = child.wait() => {
                let exit = exit.map_err(ProcessError::Io)?;
                if exit.success() {
                    ExitStatus::Success
                } else if let Some(code) = exit.code() {
                    ExitStatus::Error(code)
                } else {
                    #[cfg(unix)]
                    {
                        use std::os::unix::process::ExitStatusExt;
                        match exit.signal() {
                            Some(signal) => ExitStatus::Signal(signal),
                            None => ExitStatus::Error(1),
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        ExitStatus::Error(1)
                    }
                }
            }
            _ = deadline => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                ExitStatus::Timeout
            }
            _ = cancelled => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                ExitStatus::Cancelled
            }
        };

        // the killed cases get a short grace period in case something
        // inherited the pipe and never closes it
        let grace = match status {
            ExitStatus::Timeout | ExitStatus::Cancelled => Duration::from_millis(250),
            _ => Duration::from_secs(5),
        };
        let _ = tokio::time::timeout(grace, stdout_task).await;
        let _ = tokio::time::timeout(grace, stderr_task).await;

        let stdout = std::mem::take(&mut *stdout_buf.lock().unwrap());
        let stderr = std::mem::take(&mut *stderr_buf.lock().unwrap());
        let duration = start.elapsed();

        let result = ProcessOutput {
            status: status.clone(),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration,
        };

        match &status {
            ExitStatus::Success => {
                tracing::debug!(
                    "Subprocess completed in {:?}: {} ({} bytes stdout)",
                    duration,
                    command.program,
                    result.stdout.len()
                );
            }
            ExitStatus::Error(code) => {
                tracing::warn!(
                    "Subprocess failed with exit code {} in {:?}: {}",
                    code,
                    duration,
                    command.program
                );
            }
            ExitStatus::Signal(signal) => {
                tracing::warn!(
                    "Subprocess terminated by signal {} in {:?}: {}",
                    signal,
                    duration,
                    command.program
                );
            }
            ExitStatus::Timeout => {
                tracing::warn!(
                    "Subprocess killed after deadline {:?}: {} ({} bytes partial stdout)",
                    command.timeout,
                    command.program,
                    result.stdout.len()
                );
            }
            ExitStatus::Cancelled => {
                tracing::debug!("Subprocess cancelled after {:?}: {}", duration, command.program);
            }
        }

        Ok(result)
    }
}
