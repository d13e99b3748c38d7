use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;
use crate::error::{AcquireError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output is drained after the child exits. A background process
/// started by the child can hold the pipes open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Shared cancellation flag. Cloning hands out another handle to the same flag.
///
/// Long-running subprocesses started through [`run_captured`] are killed as
/// soon as the flag is set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Exit status and interleaved stdout/stderr of a finished command.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Human readable exit status (`exit code 2`, `terminated by signal`).
    pub fn describe_status(&self) -> String {
        match self.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Renders a command line for logs and error messages.
pub fn display_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().to_string()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().to_string()));
    parts.join(" ")
}

/// Runs `cmd` to completion, capturing stdout and stderr into one buffer.
///
/// The child is killed when `cancel` fires or `timeout` elapses. Both still
/// apply while the remaining output is drained after the child exits. A
/// non-zero exit is not an error here; callers inspect [`CommandOutput::status`].
pub fn run_captured(
    mut cmd: Command,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let label = display_command(&cmd);
    if cancel.is_cancelled() {
        return Err(AcquireError::Cancelled);
    }
    debug!(command = %label, "spawning");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| AcquireError::Command {
            command: label.clone(),
            message: e.to_string(),
        })?;

    let sink = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();
    let mut open_pipes = 0;
    if let Some(stdout) = child.stdout.take() {
        pump(stdout, Arc::clone(&sink), done_tx.clone());
        open_pipes += 1;
    }
    if let Some(stderr) = child.stderr.take() {
        pump(stderr, Arc::clone(&sink), done_tx.clone());
        open_pipes += 1;
    }
    drop(done_tx);

    let started = Instant::now();
    let timed_out = || timeout.is_some_and(|t| started.elapsed() >= t);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => return Err(AcquireError::io(format!("waiting for `{label}`"), e)),
        }
        if cancel.is_cancelled() || timed_out() {
            // Grandchildren may still hold the pipes open, so the pump
            // threads are left to finish on their own.
            let _ = child.kill();
            let _ = child.wait();
            return Err(interrupted(&label, cancel, timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let drain_until = Instant::now() + DRAIN_GRACE;
    while open_pipes > 0 {
        if cancel.is_cancelled() || timed_out() {
            return Err(interrupted(&label, cancel, timeout));
        }
        if Instant::now() >= drain_until {
            debug!(command = %label, "output still open after exit; a background process holds it");
            break;
        }
        match done_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) => open_pipes -= 1,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let bytes = sink.lock().map(|b| b.clone()).unwrap_or_default();
    Ok(CommandOutput {
        status,
        output: String::from_utf8_lossy(&bytes).to_string(),
    })
}

fn interrupted(label: &str, cancel: &CancelToken, timeout: Option<Duration>) -> AcquireError {
    if cancel.is_cancelled() {
        return AcquireError::Cancelled;
    }
    AcquireError::Timeout {
        command: label.to_string(),
        seconds: timeout.map(|t| t.as_secs()).unwrap_or_default(),
    }
}

fn pump<R: Read + Send + 'static>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>, done: Sender<()>) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut sink) = sink.lock() {
                        sink.extend_from_slice(&buf[..n]);
                    }
                }
            }
        }
        let _ = done.send(());
    });
}
