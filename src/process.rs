//! Subprocess helper used for every external tool call.
//!
//! `Cmd` is a small builder over [`std::process::Command`] that keeps the
//! last lines of stderr for error messages and can enforce a timeout.
//!
//! A command with a timeout runs as the leader of its own process group, so
//! that expiry takes down everything it started (compiler jobs under
//! `make -j`, for instance) and not just the direct child.

use std::collections::VecDeque;
use std::ffi::{OsStr, OsString};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::os::unix::process::CommandExt;
use std::process::{Child, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::ToolError;

/// Number of stderr lines kept for error reports.
pub const TAIL_LINES: usize = 20;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// Run with the child's output shown on our stderr, keeping the stderr
    /// tail. Our own stdout stays free for machine-readable output.
    pub fn run_interactive(&self) -> Result<(), ToolError> {
        log::debug!("$ {}", self.display());
        let mut child = self.spawn(Stdio::null(), Stdio::from(io::stderr()), Stdio::piped())?;
        let stderr = spawn_tail_reader(child.stderr.take(), true);

        let status = self.wait(&mut child);
        let tail = join_tail(stderr);
        self.check(status?, tail)
    }

    /// Run and return stdout. Nothing is echoed.
    pub fn run_captured(&self) -> Result<String, ToolError> {
        log::debug!("$ {}", self.display());
        let mut child = self.spawn(Stdio::null(), Stdio::piped(), Stdio::piped())?;
        let stderr = spawn_tail_reader(child.stderr.take(), false);
        let stdout = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });

        let status = self.wait(&mut child);
        let tail = join_tail(stderr);
        let stdout = stdout
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        self.check(status?, tail)?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    /// Run attached to our terminal: stdin and stderr are inherited and
    /// stdout goes to our stderr. No tail is kept and no timeout applies.
    pub fn run_terminal(&self) -> Result<(), ToolError> {
        log::debug!("$ {}", self.display());
        let attached = Self {
            timeout: None,
            ..self.clone()
        };
        let mut child =
            attached.spawn(Stdio::inherit(), Stdio::from(io::stderr()), Stdio::inherit())?;
        let status = attached.wait(&mut child)?;
        attached.check(status, String::new())
    }

    fn spawn(&self, stdin: Stdio, stdout: Stdio, stderr: Stdio) -> Result<Child, ToolError> {
        let mut command = std::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        if self.timeout.is_some() {
            command.process_group(0);
        }
        command.spawn().map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, ToolError> {
        let wait_err = |source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        };
        let Some(limit) = self.timeout else {
            return child.wait().map_err(wait_err);
        };

        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = child.try_wait().map_err(wait_err)? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                kill_process_group(child);
                let _ = child.wait();
                return Err(ToolError::TimedOut {
                    program: self.program.clone(),
                    after: limit,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn check(&self, status: ExitStatus, tail: String) -> Result<(), ToolError> {
        if status.success() {
            return Ok(());
        }
        Err(ToolError::Exit {
            program: self.program.clone(),
            code: status.code(),
            tail,
        })
    }
}

/// SIGKILL the child's process group, then the child itself.
///
/// Grandchildren hold the output pipes open; the reader threads only finish
/// once they are gone too.
fn kill_process_group(child: &mut Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: kill(2) takes plain integers and touches no memory of ours.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

fn spawn_tail_reader<R>(stream: Option<R>, echo: bool) -> Option<JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    stream.map(|stream| {
        thread::spawn(move || {
            let mut tail = VecDeque::with_capacity(TAIL_LINES);
            for line in BufReader::new(stream).lines().map_while(Result::ok) {
                if echo {
                    eprintln!("{line}");
                }
                if tail.len() == TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        })
    })
}

fn join_tail(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_run_ignores_timeout_and_reports_exit() {
        Cmd::new("sh")
            .args(["-c", "sleep 0.3"])
            .timeout(Some(Duration::from_millis(50)))
            .run_terminal()
            .unwrap();

        let err = Cmd::new("sh").args(["-c", "exit 4"]).run_terminal().unwrap_err();
        assert!(matches!(err, ToolError::Exit { code: Some(4), .. }));
    }

    #[test]
    fn captured_stdout_is_returned() {
        let out = Cmd::new("sh").args(["-c", "echo hello"]).run_captured().unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn failure_keeps_stderr_tail() {
        let err = Cmd::new("sh")
            .args(["-c", "echo first >&2; echo boom >&2; exit 3"])
            .run_captured()
            .unwrap_err();
        match err {
            ToolError::Exit { code, tail, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(tail, "first\nboom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tail_is_bounded() {
        let script = format!("for i in $(seq 1 {}); do echo line$i >&2; done; exit 1", TAIL_LINES + 5);
        let err = Cmd::new("sh").args(["-c", &script]).run_captured().unwrap_err();
        let ToolError::Exit { tail, .. } = err else {
            panic!("expected exit error");
        };
        assert_eq!(tail.lines().count(), TAIL_LINES);
        assert!(tail.ends_with(&format!("line{}", TAIL_LINES + 5)));
    }

    #[test]
    fn environment_and_cwd_are_applied() {
        let temp = tempfile::tempdir().unwrap();
        let out = Cmd::new("sh")
            .args(["-c", "echo \"$KP_TEST_VAR\"; pwd"])
            .env("KP_TEST_VAR", "set")
            .current_dir(temp.path())
            .run_captured()
            .unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("set"));
        let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(cwd, std::fs::canonicalize(temp.path()).unwrap());
    }

    #[test]
    fn timeout_kills_child() {
        let err = Cmd::new("sh")
            .args(["-c", "exec sleep 5"])
            .timeout(Some(Duration::from_millis(200)))
            .run_interactive()
            .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }

    #[test]
    fn timeout_also_ends_grandchildren() {
        let started = Instant::now();
        let err = Cmd::new("sh")
            .args(["-c", "sleep 4; true"])
            .timeout(Some(Duration::from_millis(200)))
            .run_interactive()
            .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "returned after {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn captured_run_times_out_with_grandchildren() {
        let started = Instant::now();
        let err = Cmd::new("sh")
            .args(["-c", "sleep 4; echo late"])
            .timeout(Some(Duration::from_millis(200)))
            .run_captured()
            .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = Cmd::new("definitely_not_a_real_command_12345")
            .run_captured()
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }
}
