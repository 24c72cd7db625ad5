//! Transcoder subprocess handle
//!
//! Wraps one external transcoder. Standard output carries the encoded media
//! and is exposed as an [`OutputChannel`]; standard error carries diagnostics
//! and is drained into the log so it can never reach a client.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use super::command::TranscoderCommand;

/// How a transcoder process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal (unix only)
    pub signal: Option<i32>,
    /// Whether the exit followed a stop or replacement request
    pub requested: bool,
}

impl ProcessExit {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            requested: false,
        }
    }

    /// Exit whose status could not be collected
    pub fn unknown(requested: bool) -> Self {
        Self {
            code: None,
            signal: None,
            requested,
        }
    }

    /// Mark the exit as requested
    pub fn as_requested(mut self) -> Self {
        self.requested = true;
        self
    }

    /// Whether the process exited with status 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exited unsuccessfully without anyone asking it to
    pub fn is_fault(&self) -> bool {
        !self.requested && !self.success()
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Result of [`TranscoderProcess::kill`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The process had already exited
    AlreadyExited(ProcessExit),
    /// The process stopped after the interrupt signal
    Interrupted(ProcessExit),
    /// The interrupt timed out and the process was killed
    Forced(ProcessExit),
}

impl KillOutcome {
    /// Exit status carried by the outcome
    pub fn exit(&self) -> ProcessExit {
        match *self {
            KillOutcome::AlreadyExited(exit)
            | KillOutcome::Interrupted(exit)
            | KillOutcome::Forced(exit) => exit,
        }
    }
}

/// Transcoder standard output as a sequence of chunks
///
/// Lazy and non-restartable. Yields `None` once the process closes its
/// output, which happens when it exits.
pub struct OutputChannel {
    stdout: ChildStdout,
    buf: BytesMut,
    chunk_size: usize,
}

impl OutputChannel {
    fn new(stdout: ChildStdout, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            stdout,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
        }
    }

    /// Read the next chunk of output
    ///
    /// Returns whatever the process has written so far, up to the chunk size.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        self.buf.reserve(self.chunk_size);
        let n = self.stdout.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf.split().freeze()))
    }
}

/// Handle to a running transcoder subprocess
pub struct TranscoderProcess {
    id: String,
    pid: Option<u32>,
    child: Child,
    stdout: Option<ChildStdout>,
}

impl TranscoderProcess {
    /// Launch the transcoder for `source_url`
    ///
    /// The child is killed if the handle is dropped without being reaped.
    pub fn spawn(id: &str, command: &TranscoderCommand, source_url: &str) -> io::Result<Self> {
        let mut child = Command::new(&command.program)
            .args(command.render_args(source_url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let stdout = child.stdout.take();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_diagnostics(id.to_string(), stderr));
        }

        tracing::debug!(stream = %id, pid = ?pid, program = %command.program.display(), "Transcoder spawned");

        Ok(Self {
            id: id.to_string(),
            pid,
            child,
            stdout,
        })
    }

    /// Stream id this process was started for
    pub fn id(&self) -> &str {
        &self.id
    }

    /// OS process id at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the output channel. Only the first call returns `Some`.
    pub fn take_output(&mut self, chunk_size: usize) -> Option<OutputChannel> {
        self.stdout
            .take()
            .map(|stdout| OutputChannel::new(stdout, chunk_size))
    }

    /// Wait for the process to exit on its own
    pub async fn wait(&mut self) -> io::Result<ProcessExit> {
        let status = self.child.wait().await?;
        Ok(ProcessExit::from_status(status))
    }

    /// Stop the process
    ///
    /// Sends an interrupt first so the transcoder can flush, then kills it if
    /// it is still running after `timeout`.
    pub async fn kill(&mut self, timeout: Duration) -> io::Result<KillOutcome> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(KillOutcome::AlreadyExited(ProcessExit::from_status(status)));
        }

        if self.interrupt() {
            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(status) => {
                    return Ok(KillOutcome::Interrupted(ProcessExit::from_status(status?)));
                }
                Err(_) => {
                    tracing::warn!(
                        stream = %self.id,
                        pid = ?self.pid,
                        timeout_ms = timeout.as_millis() as u64,
                        "Transcoder ignored interrupt, killing"
                    );
                }
            }
        }

        self.child.kill().await?;
        let status = self.child.wait().await?;
        Ok(KillOutcome::Forced(ProcessExit::from_status(status)))
    }

    #[cfg(unix)]
    fn interrupt(&self) -> bool {
        let Some(pid) = self.child.id() else {
            return false;
        };
        // SAFETY: `pid` belongs to a child we have not reaped yet.
        unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) == 0 }
    }

    #[cfg(not(unix))]
    fn interrupt(&self) -> bool {
        false
    }
}

async fn drain_diagnostics(id: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                tracing::trace!(stream = %id, "transcoder: {}", text.trim_end());
            }
            Err(e) => {
                tracing::debug!(stream = %id, error = %e, "Transcoder stderr read failed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> TranscoderCommand {
        TranscoderCommand::new("sh", ["-c", script, "{source}"])
    }

    #[tokio::test]
    async fn test_output_channel_reads_until_exit() {
        let cmd = shell("printf '%s' \"$0\"");
        let mut process = TranscoderProcess::spawn("cam1", &cmd, "rtsp://host/cam1").unwrap();
        let mut output = process.take_output(1024).unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = output.next_chunk().await.unwrap() {
            collected.extend_from_slice(&chunk);
        }

        assert_eq!(collected, b"rtsp://host/cam1");
        let exit = process.wait().await.unwrap();
        assert!(exit.success());
        assert!(!exit.is_fault());
    }

    #[tokio::test]
    async fn test_take_output_once() {
        let cmd = shell("exit 0");
        let mut process = TranscoderProcess::spawn("cam1", &cmd, "src").unwrap();

        assert!(process.take_output(16).is_some());
        assert!(process.take_output(16).is_none());
        process.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_diagnostics_not_on_output() {
        let cmd = shell("echo noise >&2; printf data");
        let mut process = TranscoderProcess::spawn("cam1", &cmd, "src").unwrap();
        let mut output = process.take_output(1024).unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = output.next_chunk().await.unwrap() {
            collected.extend_from_slice(&chunk);
        }

        assert_eq!(collected, b"data");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_fault() {
        let cmd = shell("exit 3");
        let mut process = TranscoderProcess::spawn("cam1", &cmd, "src").unwrap();

        let exit = process.wait().await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(exit.is_fault());
        assert!(!exit.as_requested().is_fault());
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let cmd = TranscoderCommand::new("/nonexistent/transcoder", ["{source}"]);
        let result = TranscoderProcess::spawn("cam1", &cmd, "src");

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_kill_interrupts() {
        let cmd = shell("exec sleep 30");
        let mut process = TranscoderProcess::spawn("cam1", &cmd, "src").unwrap();

        let outcome = process.kill(Duration::from_secs(2)).await.unwrap();
        assert!(matches!(outcome, KillOutcome::Interrupted(_)));
        assert_eq!(outcome.exit().signal, Some(libc::SIGINT));
    }

    #[tokio::test]
    async fn test_kill_escalates_when_interrupt_ignored() {
        let cmd = shell("trap '' INT; exec sleep 30");
        let mut process = TranscoderProcess::spawn("cam1", &cmd, "src").unwrap();
        // give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = process.kill(Duration::from_millis(200)).await.unwrap();
        assert!(matches!(outcome, KillOutcome::Forced(_)));
        assert_eq!(outcome.exit().signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_kill_after_exit() {
        let cmd = shell("exit 0");
        let mut process = TranscoderProcess::spawn("cam1", &cmd, "src").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcome = process.kill(Duration::from_millis(200)).await.unwrap();
        assert!(matches!(outcome, KillOutcome::AlreadyExited(_)));
    }
}
