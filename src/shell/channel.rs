//! Long-lived superuser shell.
//!
//! The shell is spawned once and fed one command at a time over stdin.
//! After each command an end marker carrying the exit status is echoed, and
//! stdout is read up to that marker. Commands are strictly serialized: a
//! second caller blocks until the outstanding command has completed.

use super::command::PrivilegedCommand;
use crate::config::SU_LOCATIONS;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Prefix of the line that terminates a command's output.
const END_MARKER: &str = "__PROP_EDITOR_END__";

/// Result of a single command round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command ran and exited with status 0.
    pub success: bool,
    /// Exit status reported by the shell, if the round trip completed.
    pub exit_code: Option<i32>,
    /// Captured stdout lines.
    pub stdout: Vec<String>,
}

impl CommandOutput {
    /// A failed round trip: nothing was (known to be) applied.
    pub fn failed() -> Self {
        Self::default()
    }
}

/// A superuser command session.
///
/// Failures never escape as errors: a transport problem (binary missing,
/// elevation refused, process died, timeout) is reported as an unsuccessful
/// command, meaning "not applied".
pub trait CommandChannel: Send + Sync {
    /// Run one command line and capture its stdout.
    fn execute(&self, command: &str) -> CommandOutput;

    /// Whether a command is currently outstanding.
    fn is_busy(&self) -> bool;

    /// Terminate the session. Safe to call repeatedly or with no session.
    fn close(&self);

    /// Run one command line, reporting only success.
    fn run_command(&self, command: &str) -> bool {
        self.execute(command).success
    }

    /// Run a privileged command.
    fn run(&self, command: &PrivilegedCommand) -> bool {
        self.run_command(&command.to_shell())
    }

    /// Check that commands currently run as the superuser.
    ///
    /// Never cached: a grant can be revoked at any time.
    fn has_root_access(&self) -> bool {
        let output = self.execute(&PrivilegedCommand::RootCheck.to_shell());
        output.success
            && output
                .stdout
                .iter()
                .rev()
                .find(|line| !line.trim().is_empty())
                .is_some_and(|line| line.trim() == "0")
    }
}

/// Whether this process already runs as the superuser.
pub fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Find an escalation binary: `su` on `PATH`, then the usual locations.
pub fn find_su() -> Option<PathBuf> {
    if let Ok(path) = which::which("su") {
        return Some(path);
    }
    SU_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
}

impl Session {
    fn spawn(program: &Path) -> std::io::Result<Self> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "shell stdin unavailable")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "shell stdout unavailable")
        })?;

        // The reader thread ends when the shell closes stdout.
        let (tx, lines) = mpsc::channel();
        thread::Builder::new()
            .name("su-reader".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            child,
            stdin,
            lines,
        })
    }

    /// Send a command and collect output up to the end marker.
    ///
    /// `None` means the session is no longer usable.
    fn round_trip(&mut self, command: &str, marker: &str, timeout: Duration) -> Option<(i32, Vec<String>)> {
        let script = format!("{}\n__rc=$?; echo; echo {} $__rc\n", command, marker);
        if let Err(e) = self
            .stdin
            .write_all(script.as_bytes())
            .and_then(|_| self.stdin.flush())
        {
            warn!("shell write failed: {}", e);
            return None;
        }

        let deadline = Instant::now() + timeout;
        let mut stdout = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining) {
                Ok(line) => {
                    if let Some(rest) = line.strip_prefix(marker) {
                        // Drop the separator echoed before the marker.
                        if stdout.last().is_some_and(|l: &String| l.is_empty()) {
                            stdout.pop();
                        }
                        let code = rest.trim().parse::<i32>().ok()?;
                        return Some((code, stdout));
                    }
                    stdout.push(line);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!("command timed out after {:?}", timeout);
                    return None;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("shell exited unexpectedly");
                    return None;
                }
            }
        }
    }

    fn terminate(mut self) {
        let _ = self.stdin.write_all(b"exit\n");
        drop(self.stdin);
        let grace = Instant::now() + Duration::from_millis(500);
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < grace => thread::sleep(Duration::from_millis(20)),
                _ => break,
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// [`CommandChannel`] backed by a spawned escalation binary.
pub struct ShellChannel {
    program: Mutex<Option<PathBuf>>,
    session: Mutex<Option<Session>>,
    busy: AtomicBool,
    counter: AtomicU64,
    timeout: Duration,
}

impl ShellChannel {
    /// Create a channel. The shell is launched on the first command.
    ///
    /// Without a program the escalation binary is resolved lazily with
    /// [`find_su`].
    pub fn new(program: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: Mutex::new(program),
            session: Mutex::new(None),
            busy: AtomicBool::new(false),
            counter: AtomicU64::new(0),
            timeout,
        }
    }

    /// The escalation binary in use, if resolved.
    pub fn program(&self) -> Option<PathBuf> {
        self.program.lock().clone()
    }

    fn resolve_program(&self) -> Option<PathBuf> {
        let mut program = self.program.lock();
        if program.is_none() {
            // Already privileged: a plain shell needs no escalation.
            *program = if running_as_root() {
                which::which("sh").ok()
            } else {
                None
            }
            .or_else(find_su);
            match program.as_ref() {
                Some(path) => info!("using escalation binary {}", path.display()),
                None => warn!("no escalation binary found"),
            }
        }
        program.clone()
    }

    fn execute_locked(&self, session: &mut Option<Session>, command: &str) -> CommandOutput {
        if session.is_none() {
            let Some(program) = self.resolve_program() else {
                return CommandOutput::failed();
            };
            match Session::spawn(&program) {
                Ok(s) => {
                    debug!("spawned shell {}", program.display());
                    *session = Some(s);
                }
                Err(e) => {
                    warn!("unable to launch {}: {}", program.display(), e);
                    return CommandOutput::failed();
                }
            }
        }

        let marker = format!(
            "{}{}",
            END_MARKER,
            self.counter.fetch_add(1, Ordering::Relaxed)
        );
        let result = session
            .as_mut()
            .and_then(|s| s.round_trip(command, &marker, self.timeout));

        match result {
            Some((code, stdout)) => CommandOutput {
                success: code == 0,
                exit_code: Some(code),
                stdout,
            },
            None => {
                // The pipe state is unknown; start over on the next command.
                if let Some(dead) = session.take() {
                    dead.terminate();
                }
                CommandOutput::failed()
            }
        }
    }
}

impl CommandChannel for ShellChannel {
    fn execute(&self, command: &str) -> CommandOutput {
        let mut session = self.session.lock();
        self.busy.store(true, Ordering::SeqCst);
        debug!("$ {}", command);
        let output = self.execute_locked(&mut session, command);
        self.busy.store(false, Ordering::SeqCst);
        if !output.success {
            debug!("command failed (exit {:?}): {}", output.exit_code, command);
        }
        output
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if let Some(session) = self.session.lock().take() {
            debug!("closing shell");
            session.terminate();
        }
    }
}

impl Drop for ShellChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sh() -> ShellChannel {
        ShellChannel::new(Some(PathBuf::from("/bin/sh")), Duration::from_secs(10))
    }

    #[test]
    fn test_exit_status_reported() {
        let channel = sh();
        assert!(channel.run_command("true"));
        assert!(!channel.run_command("false"));
        assert_eq!(channel.execute("exit_with_three() { return 3; }; exit_with_three").exit_code, Some(3));
    }

    #[test]
    fn test_stdout_captured() {
        let channel = sh();
        let output = channel.execute("echo one; echo two");
        assert!(output.success);
        assert_eq!(output.stdout, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_output_without_trailing_newline() {
        let channel = sh();
        let output = channel.execute("printf partial");
        assert_eq!(output.stdout, vec!["partial".to_string()]);
    }

    #[test]
    fn test_session_survives_between_commands() {
        let channel = sh();
        assert!(channel.run_command("PROP_EDITOR_TEST=kept"));
        let output = channel.execute("echo $PROP_EDITOR_TEST");
        assert_eq!(output.stdout, vec!["kept".to_string()]);
    }

    #[test]
    fn test_missing_binary_fails_softly() {
        let channel = ShellChannel::new(
            Some(PathBuf::from("/nonexistent/su")),
            Duration::from_secs(1),
        );
        assert!(!channel.run_command("true"));
        assert!(!channel.has_root_access());
    }

    #[test]
    fn test_exited_shell_relaunches() {
        let channel = sh();
        assert!(!channel.run_command("exit 0"));
        assert!(channel.run_command("true"));
    }

    #[test]
    fn test_timeout_fails_and_recovers() {
        let channel = ShellChannel::new(Some(PathBuf::from("/bin/sh")), Duration::from_millis(200));
        assert!(!channel.run_command("sleep 2"));
        assert!(channel.run_command("true"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let channel = sh();
        channel.close();
        assert!(channel.run_command("true"));
        channel.close();
        channel.close();
    }

    #[test]
    fn test_busy_during_slow_command() {
        let channel = Arc::new(sh());
        let worker = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.run_command("sleep 1"))
        };

        let start = Instant::now();
        while !channel.is_busy() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(channel.is_busy());

        // A second command queues behind the first instead of interleaving.
        let output = channel.execute("echo second");
        assert_eq!(output.stdout, vec!["second".to_string()]);
        assert!(worker.join().unwrap());
        assert!(start.elapsed() >= Duration::from_millis(900));
        assert!(!channel.is_busy());
    }
}
