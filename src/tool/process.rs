use crate::time::ParsedDuration;
use crate::tool::{
    ExitReport, HttpChallenge, PromptParser, ToolControl, ToolError, ToolEvent, ToolSession,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// How long stderr may stay open after the client exited
const STDERR_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// A client invocation: program, arguments and extra environment variables
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    env_vars: HashMap<OsString, OsString>,
}

impl ToolCommand {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: HashMap::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I: IntoIterator<Item = S>, S: AsRef<OsStr>>(mut self, args: I) -> Self {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, key: K, value: V) -> Self {
        self.env_vars
            .insert(key.as_ref().to_os_string(), value.as_ref().to_os_string());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Start the program with piped standard streams and hand it to a driver task
    pub fn spawn(&self) -> Result<ToolProcess, ToolError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env_vars)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!("Running {} {:?}", self.program.display(), self.args);
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ToolError::Disconnected);
        };
        let (event_tx, event_rx) = mpsc::channel(4);
        let (control_tx, control_rx) = mpsc::channel(1);
        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut buffer = String::new();
            if let Err(e) = stderr.read_to_string(&mut buffer).await {
                warn!("Reading ACME client stderr failed: {e}");
            }
            buffer
        });
        let driver = Driver {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            stdout_text: String::new(),
            stderr_task,
            events: event_tx,
            control: control_rx,
        };
        Ok(ToolProcess {
            events: event_rx,
            control: control_tx,
            driver: tokio::spawn(driver.run()),
        })
    }
}

/// Handle to a running client process
#[derive(Debug)]
pub struct ToolProcess {
    events: mpsc::Receiver<ToolEvent>,
    control: mpsc::Sender<ToolControl>,
    driver: JoinHandle<()>,
}

impl ToolProcess {
    /// Wait up to `timeout` for the client's next move
    pub async fn next_event(&mut self, timeout: Duration) -> Result<ToolEvent, ToolError> {
        match tokio::time::timeout(timeout, self.events.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(ToolError::Disconnected),
            Err(_elapsed) => Err(ToolError::TimedOut(timeout.into())),
        }
    }

    pub async fn send(&self, control: ToolControl) -> Result<(), ToolError> {
        self.control
            .send(control)
            .await
            .map_err(|_| ToolError::Disconnected)
    }

    /// Kill the client and wait for the driver to clean up
    pub async fn abort(self) {
        // The driver may have finished on its own already
        let _ = self.control.send(ToolControl::Abort).await;
        if let Err(e) = self.driver.await {
            warn!("ACME client driver task failed: {e}");
        }
    }
}

/// Owns the child process and translates between its pipes and the channels
struct Driver {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    stdout_text: String,
    stderr_task: JoinHandle<String>,
    events: mpsc::Sender<ToolEvent>,
    control: mpsc::Receiver<ToolControl>,
}

enum Step {
    Continue,
    Stop,
}

impl Driver {
    async fn run(mut self) {
        let mut parser = PromptParser::default();
        let mut waiting_for_proceed = false;
        loop {
            tokio::select! {
                line = self.stdout.next_line(), if !waiting_for_proceed => {
                    match line {
                        Ok(Some(line)) => {
                            trace!("ACME client: {line}");
                            self.stdout_text.push_str(&line);
                            self.stdout_text.push('\n');
                            if let Some(challenge) = parser.feed(&line) {
                                waiting_for_proceed = true;
                                if let Step::Stop = self.report_challenge(challenge).await {
                                    return self.kill().await;
                                }
                            }
                        }
                        Ok(None) => return self.finish().await,
                        Err(e) => {
                            warn!("Reading ACME client output failed: {e}");
                            return self.finish().await;
                        }
                    }
                }
                control = self.control.recv() => {
                    match control {
                        Some(ToolControl::Proceed) if waiting_for_proceed => {
                            waiting_for_proceed = false;
                            self.resume().await;
                        }
                        Some(ToolControl::Proceed) => debug!("Ignoring proceed, no challenge is pending"),
                        Some(ToolControl::Abort) | None => return self.kill().await,
                    }
                }
            }
        }
    }

    async fn report_challenge(&self, challenge: HttpChallenge) -> Step {
        debug!(
            "ACME client waits for {} to be published",
            challenge.path()
        );
        match self.events.send(ToolEvent::Challenge(challenge)).await {
            Ok(()) => Step::Continue,
            Err(_) => Step::Stop,
        }
    }

    /// Answer the client's "Press Enter to Continue"
    async fn resume(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let written = async {
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                // The client exiting early shows up as EOF on stdout
                warn!("Resuming the ACME client failed: {e}");
            }
        }
    }

    async fn finish(mut self) {
        // Closing stdin unblocks a client still waiting for input
        self.stdin.take();
        let status = loop {
            tokio::select! {
                status = self.child.wait() => break status,
                control = self.control.recv() => match control {
                    Some(ToolControl::Proceed) => debug!("Ignoring proceed, the client closed its output"),
                    Some(ToolControl::Abort) | None => return self.kill().await,
                },
            }
        };
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                warn!("Waiting for the ACME client failed: {e}");
                self.stderr_task.abort();
                return;
            }
        };
        // A leftover grandchild may hold stderr open long after the client exited
        let stderr = match tokio::time::timeout(STDERR_GRACE_PERIOD, &mut self.stderr_task).await {
            Ok(stderr) => stderr.unwrap_or_default(),
            Err(_elapsed) => {
                debug!("ACME client stderr still open after exit, discarding it");
                self.stderr_task.abort();
                String::new()
            }
        };
        let report = ExitReport {
            code: status.code(),
            success: status.success(),
            stdout: self.stdout_text,
            stderr,
        };
        debug!("ACME client exited with {status}");
        let _ = self.events.send(ToolEvent::Exited(report)).await;
    }

    async fn kill(mut self) {
        debug!("Killing ACME client");
        if let Err(e) = self.child.kill().await {
            warn!("Killing the ACME client failed: {e}");
        }
        self.stderr_task.abort();
    }
}

/// [`ToolSession`] of a process paused at its challenge prompt
#[derive(Debug)]
pub struct ProcessSession {
    process: ToolProcess,
    completion_timeout: ParsedDuration,
}

impl ProcessSession {
    pub fn new(process: ToolProcess, completion_timeout: ParsedDuration) -> Self {
        Self {
            process,
            completion_timeout,
        }
    }
}

#[async_trait]
impl ToolSession for ProcessSession {
    async fn proceed(self: Box<Self>) -> Result<ExitReport, ToolError> {
        let mut process = self.process;
        process.send(ToolControl::Proceed).await?;
        match process.next_event(*self.completion_timeout).await {
            Ok(ToolEvent::Exited(report)) => Ok(report),
            Ok(ToolEvent::Challenge(_)) => {
                process.abort().await;
                Err(ToolError::UnexpectedChallenge)
            }
            Err(e) => {
                process.abort().await;
                Err(e)
            }
        }
    }

    async fn abort(self: Box<Self>) {
        self.process.abort().await;
    }
}
