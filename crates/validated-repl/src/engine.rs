use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::config::{ReplConfig, ReplMode};
use crate::error::ToolError;
use crate::sandbox::ResourceLimits;

const CHILD_PATH: &str = "/usr/bin:/bin";

// Runs inside the long-lived interpreter. Reads one JSON request per line,
// executes it against a shared globals dict and answers with a single line
// tagged by the session sentinel.
const DRIVER: &str = r#"
import contextlib, io, json, os, sys, traceback
sentinel = sys.argv[1]
requests = sys.stdin
replies = sys.stdout
sys.stdin = open(os.devnull)
scope = {"__name__": "__main__", "__builtins__": __builtins__}
for line in requests:
    code = json.loads(line)["code"]
    out, err, error = io.StringIO(), io.StringIO(), None
    with contextlib.redirect_stdout(out), contextlib.redirect_stderr(err):
        try:
            exec(compile(code, "<repl>", "exec"), scope)
        except BaseException:
            error = traceback.format_exc()
    replies.write(sentinel + json.dumps({"stdout": out.getvalue(), "stderr": err.getvalue(), "error": error}) + "\n")
    replies.flush()
"#;

/// Something that can run a string of source code.
///
/// `run` is blocking and never suspends; async callers invoke it directly.
pub trait ExecutionEngine: Send + Sync {
    type Output: Send;

    fn run(&self, code: &str) -> Result<Self::Output, ToolError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[derive(Deserialize)]
struct DriverReply {
    stdout: String,
    stderr: String,
    error: Option<String>,
}

/// Python interpreter driven through stdin.
///
/// In [`ReplMode::Persistent`] one interpreter is kept per `PythonRepl` and
/// globals survive between calls; it is restarted after a timeout or crash,
/// which loses that state. [`ReplMode::Fresh`] starts a new interpreter for
/// every call.
#[derive(Debug)]
pub struct PythonRepl {
    interpreter: String,
    args: Vec<String>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    limits: Option<ResourceLimits>,
    mode: ReplMode,
    session: Mutex<Option<Session>>,
}

impl Default for PythonRepl {
    fn default() -> Self {
        Self::from_config(&ReplConfig::default())
    }
}

impl PythonRepl {
    pub fn from_config(config: &ReplConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            args: config.args.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            working_dir: config.working_dir.clone(),
            env: config.env.clone(),
            limits: config.limits,
            mode: config.mode,
            session: Mutex::new(None),
        }
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn mode(&self) -> ReplMode {
        self.mode
    }

    /// Drops the persistent interpreter, if any, along with its globals.
    pub fn reset(&self) {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn command(&self, extra: &[&str]) -> Result<Command, ToolError> {
        // Resolved against our own PATH; the child only gets a minimal one
        let program = which::which(&self.interpreter).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: {}", self.interpreter, e),
            )
        })?;

        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .args(extra)
            .env_clear()
            .env("PATH", CHILD_PATH)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;

            let limits = self.limits;
            unsafe {
                cmd.pre_exec(move || {
                    // New session so a timeout can take down the whole group
                    libc::setsid();
                    if let Some(limits) = &limits {
                        limits.apply()?;
                    }
                    Ok(())
                });
            }
        }

        Ok(cmd)
    }

    fn run_persistent(&self, code: &str) -> Result<ReplOutput, ToolError> {
        let deadline = Instant::now() + self.timeout;
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        if !guard.as_mut().is_some_and(Session::is_alive) {
            *guard = Some(self.spawn_session()?);
        }
        let Some(session) = guard.as_mut() else {
            return Err(ToolError::Execution("Interpreter session unavailable".into()));
        };

        match session.exchange(code, deadline) {
            Ok(reply) => match reply.error {
                Some(traceback) => Err(ToolError::Execution(traceback.trim().to_string())),
                None => Ok(ReplOutput {
                    stdout: reply.stdout,
                    stderr: reply.stderr,
                    exit_code: Some(0),
                }),
            },
            Err(e) => {
                if matches!(e, ToolError::Timeout) {
                    warn!(
                        "Interpreter timed out after {}ms; restarting session",
                        self.timeout.as_millis()
                    );
                }
                *guard = None;
                Err(e)
            }
        }
    }

    fn spawn_session(&self) -> Result<Session, ToolError> {
        let sentinel = format!("__validated_repl_{}__", uuid::Uuid::new_v4().simple());
        let mut child = self
            .command(&["-u", "-c", DRIVER, sentinel.as_str()])?
            .spawn()?;
        info!("Started {} session (pid {})", self.interpreter, child.id());

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            kill_group(child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Err(ToolError::Execution("Interpreter pipes unavailable".into()));
        };

        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&stderr_buf);
        thread::spawn(move || {
            let mut stderr = stderr;
            let mut chunk = [0u8; 4096];
            while let Ok(n) = stderr.read(&mut chunk) {
                if n == 0 {
                    break;
                }
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend_from_slice(&chunk[..n]);
            }
        });

        Ok(Session {
            child,
            stdin,
            lines,
            stderr: stderr_buf,
            sentinel,
        })
    }

    fn run_fresh(&self, code: &str) -> Result<ReplOutput, ToolError> {
        let deadline = Instant::now() + self.timeout;
        let mut child = self.command(&["-"])?.spawn()?;
        let pgid = child.id();

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        // Fed from its own thread so an interpreter that never reads stdin
        // cannot block us past the timeout
        let stdin = child.stdin.take();
        let source = code.to_owned();
        let (written_tx, written) = mpsc::channel();
        thread::spawn(move || {
            let mut result = Ok(());
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(source.as_bytes()) {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        result = Err(e);
                    }
                }
            }
            let _ = written_tx.send(result);
        });

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!("Interpreter timed out after {}ms", self.timeout.as_millis());
                kill_group(pgid);
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Timeout);
            }
            Err(e) => {
                kill_group(pgid);
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Spawn(e));
            }
        };

        // Anything the code left running still holds the pipes open
        let (Some(stdout), Some(stderr)) = (collect(&stdout, deadline), collect(&stderr, deadline))
        else {
            warn!(
                "Interpreter output still open after {}ms; killing process group",
                self.timeout.as_millis()
            );
            kill_group(pgid);
            return Err(ToolError::Timeout);
        };

        if let Ok(Err(e)) = written.try_recv() {
            return Err(ToolError::Spawn(e));
        }

        let output = ReplOutput {
            stdout,
            stderr,
            exit_code: status.code(),
        };

        if !status.success() {
            let message = output.stderr.trim();
            return Err(ToolError::Execution(if message.is_empty() {
                format!("Interpreter exited with {}", status)
            } else {
                message.to_string()
            }));
        }

        Ok(output)
    }
}

impl ExecutionEngine for PythonRepl {
    type Output = ReplOutput;

    fn run(&self, code: &str) -> Result<ReplOutput, ToolError> {
        debug!(
            "Running {} bytes of code with {} ({:?})",
            code.len(),
            self.interpreter,
            self.mode
        );

        match self.mode {
            ReplMode::Persistent => self.run_persistent(code),
            ReplMode::Fresh => self.run_fresh(code),
        }
    }
}

/// A live interpreter running the line protocol driver.
struct Session {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    stderr: Arc<Mutex<Vec<u8>>>,
    sentinel: String,
}

impl Session {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn exchange(&mut self, code: &str, deadline: Instant) -> Result<DriverReply, ToolError> {
        let mut request = json!({ "code": code }).to_string();
        request.push('\n');
        self.stdin.write_all(request.as_bytes())?;
        self.stdin.flush()?;

        // Output written straight to fd 1 bypasses the driver's capture and
        // shows up as untagged text ahead of the reply
        let mut stray = String::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.lines.recv_timeout(remaining) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => return Err(ToolError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(self.exited()),
            };

            let Some(at) = line.find(&self.sentinel) else {
                stray.push_str(&line);
                continue;
            };
            stray.push_str(&line[..at]);

            let mut reply: DriverReply =
                serde_json::from_str(line[at + self.sentinel.len()..].trim_end()).map_err(|e| {
                    ToolError::Execution(format!("Malformed interpreter reply: {}", e))
                })?;
            if !stray.is_empty() {
                reply.stdout.insert_str(0, &stray);
            }
            return Ok(reply);
        }
    }

    fn exited(&mut self) -> ToolError {
        let status = self.child.wait();
        let stderr = self.stderr.lock().unwrap_or_else(PoisonError::into_inner);
        let message = String::from_utf8_lossy(&stderr).trim().to_string();
        if !message.is_empty() {
            return ToolError::Execution(message);
        }
        match status {
            Ok(status) => ToolError::Execution(format!("Interpreter exited with {}", status)),
            Err(e) => ToolError::Spawn(e),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        kill_group(self.child.id());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}

fn kill_group(pgid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// Waits for a drained pipe until `deadline`; `None` if it is still open.
fn collect(rx: &Receiver<Vec<u8>>, deadline: Instant) -> Option<String> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}
