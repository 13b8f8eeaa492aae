//! Running external deployment scripts.
//!
//! [`ScriptExecutor`] is the single execution primitive shared by every
//! deployer. It launches a script, captures bounded stdout/stderr, and kills
//! the script (with its whole process group on Unix) once the timeout
//! elapses. Non-zero exit codes are reported, not treated as errors.

use crate::error::ExecutionError;
use crate::types::ProcessOutcome;
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Default time a script may run before it is killed (30 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default capture limit per output stream (1 MiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Default interpreter used to run scripts.
pub const DEFAULT_INTERPRETER: &str = "bash";

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for output pipes to close after the script exits.
/// Background processes started by a script can hold them open.
const PIPE_GRACE: Duration = Duration::from_secs(2);

/// A single script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Script to run
    pub script: PathBuf,
    /// Working directory of the process
    pub working_dir: PathBuf,
    /// Arguments passed after the script path
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Create an invocation of `script` in `working_dir`.
    pub fn new(script: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            working_dir: working_dir.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the process.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Runs scripts as external processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptExecutor {
    timeout: Duration,
    max_output_bytes: usize,
    interpreter: Option<String>,
}

impl ScriptExecutor {
    /// Create an executor with default timeout, capture limit and interpreter.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            interpreter: Some(DEFAULT_INTERPRETER.to_string()),
        }
    }

    /// Set the time a script may run before it is killed.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the capture limit per output stream.
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Set the interpreter, or `None` to execute scripts directly.
    pub fn with_interpreter(mut self, interpreter: Option<String>) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured capture limit per stream.
    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Configured interpreter.
    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    /// Run `script` in `working_dir` with `args`.
    pub fn run(
        &self,
        script: &Path,
        working_dir: &Path,
        args: &[String],
    ) -> Result<ProcessOutcome, ExecutionError> {
        self.execute(&Invocation::new(script, working_dir).args(args.iter().cloned()))
    }

    /// Run an invocation and wait for it to finish or time out.
    ///
    /// # Errors
    ///
    /// - `LaunchFailure` if the process cannot be spawned
    /// - `WaitFailure` if its exit status cannot be collected
    /// - `Timeout` if it is still running after the configured timeout; the
    ///   process is killed and the output captured so far is attached
    pub fn execute(&self, invocation: &Invocation) -> Result<ProcessOutcome, ExecutionError> {
        // The child runs in `working_dir`, so a relative script path would
        // resolve against the wrong directory.
        let script = std::path::absolute(&invocation.script)
            .map_err(|e| ExecutionError::launch(invocation.script.display().to_string(), e))?;

        let (program, mut argv): (OsString, Vec<OsString>) = match &self.interpreter {
            Some(interpreter) => (interpreter.into(), vec![script.into_os_string()]),
            None => (script.into_os_string(), Vec::new()),
        };
        argv.extend(invocation.args.iter().map(OsString::from));
        let program_name = program.to_string_lossy().to_string();

        let mut command = Command::new(&program);
        command
            .args(&argv)
            .current_dir(&invocation.working_dir)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so a timeout kills the script's children too.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        log::debug!(
            "Running {} {} in {}",
            program_name,
            argv.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" "),
            invocation.working_dir.display()
        );

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| ExecutionError::launch(&program_name, e))?;

        let (done_tx, done_rx) = mpsc::channel();
        let stdout = child
            .stdout
            .take()
            .map(|s| spawn_reader(s, self.max_output_bytes, done_tx.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|s| spawn_reader(s, self.max_output_bytes, done_tx));
        let readers = usize::from(stdout.is_some()) + usize::from(stderr.is_some());

        // A timeout too large to represent means no deadline.
        let deadline = started.checked_add(self.timeout);
        let status = match wait_with_deadline(&mut child, deadline) {
            Ok(status) => status,
            Err(e) => {
                terminate(&mut child);
                return Err(ExecutionError::WaitFailure {
                    program: program_name,
                    source: e,
                });
            }
        };

        let pending = wait_for_readers(&done_rx, readers);
        if pending > 0 {
            log::warn!(
                "Output of {} is still held open by a background process; killing its process group",
                program_name
            );
            kill_group(child.id());
            if wait_for_readers(&done_rx, pending) > 0 {
                log::warn!("Using the output of {} captured so far", program_name);
            }
        }

        let (stdout, stdout_truncated) = stdout.map(snapshot).unwrap_or_default();
        let (stderr, stderr_truncated) = stderr.map(snapshot).unwrap_or_default();
        if stdout_truncated || stderr_truncated {
            log::warn!(
                "Output of {} exceeded {} bytes and was truncated",
                program_name,
                self.max_output_bytes
            );
        }

        let outcome = ProcessOutcome {
            exit_code: status.and_then(|s| s.code()),
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            duration: started.elapsed(),
        };

        match status {
            Some(_) => {
                log::debug!(
                    "{} exited with {:?} after {:.1}s",
                    program_name,
                    outcome.exit_code,
                    outcome.duration.as_secs_f64()
                );
                Ok(outcome)
            }
            None => Err(ExecutionError::Timeout {
                program: program_name,
                after: self.timeout,
                partial: Box::new(outcome),
            }),
        }
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Output captured from one stream.
#[derive(Debug, Default)]
struct Capture {
    buf: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.buf.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Drain `source` on a background thread, keeping at most `limit` bytes.
///
/// The stream is read to the end even past the limit so the child never
/// blocks on a full pipe.
fn spawn_reader<R>(mut source: R, limit: usize, done: mpsc::Sender<()>) -> Arc<Mutex<Capture>>
where
    R: Read + Send + 'static,
{
    let capture = Arc::new(Mutex::new(Capture::default()));
    let shared = Arc::clone(&capture);

    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => shared
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(&chunk[..n], limit),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        let _ = done.send(());
    });

    capture
}

fn snapshot(capture: Arc<Mutex<Capture>>) -> (String, bool) {
    let capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
    (
        String::from_utf8_lossy(&capture.buf).into_owned(),
        capture.truncated,
    )
}

/// Wait up to [`PIPE_GRACE`] for each of `pending` readers to finish.
///
/// Returns how many are still running.
fn wait_for_readers(done: &mpsc::Receiver<()>, mut pending: usize) -> usize {
    while pending > 0 && done.recv_timeout(PIPE_GRACE).is_ok() {
        pending -= 1;
    }
    pending
}

/// Wait for `child` to exit, killing it at `deadline` if there is one.
///
/// Returns `None` when the deadline passed and the child was killed.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Instant>,
) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    terminate(child);
                    return Ok(None);
                }
                POLL_INTERVAL.min(deadline - now)
            }
            None => POLL_INTERVAL,
        };
        thread::sleep(pause);
    }
}

/// Send SIGKILL to the process group led by `pid`.
///
/// The group outlives its leader while background children remain in it.
fn kill_group(pid: u32) {
    #[cfg(unix)]
    if let Ok(pgid) = libc::pid_t::try_from(pid) {
        // SAFETY: killpg only sends a signal; the group was created for this child.
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill `child` and everything in its process group, then reap it.
fn terminate(child: &mut Child) {
    kill_group(child.id());

    if let Err(e) = child.kill() {
        if e.kind() != io::ErrorKind::InvalidInput {
            log::warn!("Failed to kill process {}: {}", child.id(), e);
        }
    }
    if let Err(e) = child.wait() {
        log::warn!("Failed to reap process {}: {}", child.id(), e);
    }
}
