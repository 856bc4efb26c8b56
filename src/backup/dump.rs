//! Scoped invocation of the `sqlite3` shell for dumps and replays.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::DumpConfig;
use crate::error::{Result, ShelfError};

/// Bytes of stderr kept on a failed call.
pub const STDERR_TAIL_BYTES: usize = 2048;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Producing and replaying a full database dump.
///
/// Orchestrators only talk to this trait so they can run against the real
/// `sqlite3` process or an in-process implementation.
pub trait DumpOperations: Send + Sync {
    /// Write a complete dump of the live database to `target`, replacing
    /// whatever the file held.
    fn create_dump(&self, target: &Path) -> Result<()>;

    /// Replay the dump at `artifact` into the database file `into`.
    fn apply_dump(&self, artifact: &Path, into: &Path) -> Result<()>;
}

/// Runs the `sqlite3` shell against one database file.
#[derive(Debug, Clone)]
pub struct DumpExecutor {
    program: PathBuf,
    database: PathBuf,
    timeout: Duration,
    grace_period: Duration,
}

impl DumpExecutor {
    pub fn new(config: &DumpConfig, database: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from(&config.sqlite3_path),
            database: database.into(),
            timeout: config.timeout,
            grace_period: config.grace_period,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration, grace_period: Duration) -> Self {
        self.timeout = timeout;
        self.grace_period = grace_period;
        self
    }

    /// Whether the configured program resolves to an executable.
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Run `attempt` once more if it failed with a process-level error.
    fn with_retry(&self, action: &str, mut attempt: impl FnMut() -> Result<()>) -> Result<()> {
        match attempt() {
            Err(err @ (ShelfError::ExternalTool { .. } | ShelfError::Timeout { .. })) => {
                warn!(action, error = %err, "dump tool failed, retrying once");
                attempt()
            }
            other => other,
        }
    }

    fn run(&self, args: &[&OsStr], stdin: Stdio, stdout: Stdio) -> Result<Duration> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped());

        let start = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|err| ShelfError::ExternalToolUnavailable {
                program: self.program_name(),
                reason: err.to_string(),
            })?;
        debug!(program = %self.program_name(), pid = child.id(), "spawned dump tool");

        let stderr_handle = spawn_stderr_reader(&mut child);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() > self.timeout {
                terminate(&mut child, self.grace_period);
                // A grandchild may still hold stderr open; leave the reader detached.
                drop(stderr_handle);
                return Err(ShelfError::Timeout {
                    program: self.program_name(),
                    elapsed: start.elapsed(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stderr = join_stderr(stderr_handle);
        let elapsed = start.elapsed();
        check_status(status, &self.program_name(), &stderr, elapsed)?;
        Ok(elapsed)
    }
}

impl DumpOperations for DumpExecutor {
    fn create_dump(&self, target: &Path) -> Result<()> {
        self.with_retry("create_dump", || {
            let out = File::create(target)?;
            let elapsed = self.run(
                &[OsStr::new("-bail"), self.database.as_os_str(), OsStr::new(".dump")],
                Stdio::null(),
                Stdio::from(out),
            )?;
            info!(
                database = %self.database.display(),
                target = %target.display(),
                elapsed_ms = elapsed.as_millis(),
                "dump written"
            );
            Ok(())
        })
    }

    fn apply_dump(&self, artifact: &Path, into: &Path) -> Result<()> {
        self.with_retry("apply_dump", || {
            reset_database_file(into)?;
            let input = File::open(artifact)?;
            let elapsed = self.run(
                &[OsStr::new("-bail"), into.as_os_str()],
                Stdio::from(input),
                Stdio::null(),
            )?;
            info!(
                artifact = %artifact.display(),
                into = %into.display(),
                elapsed_ms = elapsed.as_millis(),
                "dump replayed"
            );
            Ok(())
        })
    }
}

/// Leave `path` as an empty file with no journal beside it, so a replay
/// always starts from a blank database.
fn reset_database_file(path: &Path) -> Result<()> {
    File::create(path)?;
    for suffix in ["-journal", "-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        match fs::remove_file(PathBuf::from(side)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn spawn_stderr_reader(child: &mut Child) -> Option<JoinHandle<Vec<u8>>> {
    let stderr = child.stderr.take()?;
    Some(std::thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = stderr;
        let _ = reader.read_to_end(&mut buf);
        buf
    }))
}

fn join_stderr(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn check_status(status: ExitStatus, program: &str, stderr: &[u8], elapsed: Duration) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    Err(ShelfError::ExternalTool {
        program: program.to_string(),
        exit_code: status.code(),
        stderr_tail: stderr_tail(stderr),
        elapsed,
    })
}

/// Last [`STDERR_TAIL_BYTES`] of stderr as text.
pub fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

/// Ask the child to stop, force-kill it after `grace`, and reap it.
fn terminate(child: &mut Child, grace: Duration) {
    let pid = child.id();
    if request_stop(pid) {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => {
                    debug!(pid, "dump tool stopped after termination request");
                    return;
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
    }
    warn!(pid, "dump tool did not stop in time, killing");
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn request_stop(pid: u32) -> bool {
    Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

#[cfg(not(unix))]
fn request_stop(_pid: u32) -> bool {
    false
}
