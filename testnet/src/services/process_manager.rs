//! Real process management service implementation
//!
//! Spawns node processes, captures their output into a per-process log file
//! and records whether each process was stopped on purpose or died on its own.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{TestnetError, TestnetResult};
use crate::services::process_output_handler::{self, LogSink};
use shared::{node_debug, node_error, node_warn};

/// Default directory for node log files, relative to the working directory
pub const DEFAULT_LOG_DIR: &str = "tmp/node_logs";

/// Literal used in log names for launches that carry no port argument
const NO_PORT_LITERAL: &str = "undefined";

/// Time a process gets to honour SIGTERM before it is killed
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Time to wait for a process to disappear after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Upper bound on draining remaining output once the process has exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a managed process ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitSummary {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub intentional: bool,
    pub reason: Option<String>,
}

impl ExitSummary {
    fn from_status(status: Option<ExitStatus>, termination: Termination) -> Self {
        Self {
            code: status.and_then(|s| s.code()),
            signal: status.and_then(|s| exit_signal(&s)),
            intentional: termination.intentional,
            reason: termination.reason,
        }
    }

    /// Final line appended to the process log
    pub fn trailer(&self) -> String {
        let timestamp = chrono::Utc::now().to_rfc3339();
        if self.intentional {
            format!(
                "{timestamp} [testnet] process killed intentionally. reason: {}",
                self.reason.as_deref().unwrap_or("unspecified")
            )
        } else if let Some(code) = self.code {
            format!("{timestamp} [testnet] process exited with status code {code}")
        } else if let Some(signal) = self.signal {
            format!("{timestamp} [testnet] process terminated by signal {}", signal_name(signal))
        } else {
            format!("{timestamp} [testnet] process terminated unexpectedly")
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Termination {
    intentional: bool,
    reason: Option<String>,
}

/// State shared between the handle, its cleanup action and the exit observer
struct ProcessState {
    pid: u32,
    termination: Mutex<Termination>,
    reaped: AtomicBool,
    exit: watch::Sender<Option<ExitSummary>>,
    sink: LogSink,
}

impl ProcessState {
    fn termination(&self) -> Termination {
        match self.termination.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Record an intentional stop; the first recorded reason wins
    fn mark_intentional(&self, reason: &str) {
        if self.reaped.load(Ordering::SeqCst) {
            return;
        }
        let mut termination = match self.termination.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !termination.intentional {
            termination.intentional = true;
            termination.reason = Some(reason.to_string());
        }
    }

    fn signal(&self, sig: Signal) -> TestnetResult<()> {
        if self.reaped.load(Ordering::SeqCst) {
            return Ok(());
        }
        match signal::kill(Pid::from_raw(self.pid as i32), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(TestnetError::operation(Some(self.pid), format!("send {sig}"), e)),
        }
    }

    async fn wait_for_exit(&self) -> ExitSummary {
        let mut rx = self.exit.subscribe();
        let summary = match rx.wait_for(Option::is_some).await {
            Ok(summary) => summary.clone().unwrap_or_default(),
            Err(_) => ExitSummary::default(),
        };
        summary
    }
}

/// Handle onto a spawned node process
#[derive(Clone)]
pub struct ProcessHandle {
    pub pid: u32,
    pub command: String,
    pub args: Vec<String>,
    pub log_path: PathBuf,
    state: Arc<ProcessState>,
}

impl ProcessHandle {
    pub fn is_intentional_termination(&self) -> bool {
        self.state.termination().intentional
    }

    pub fn termination_reason(&self) -> Option<String> {
        self.state.termination().reason
    }

    /// Whether the exit of the process has been observed and logged
    pub fn has_exited(&self) -> bool {
        self.state.exit.borrow().is_some()
    }

    /// Resolves once the process has exited and its log trailer is written
    pub async fn wait_for_exit(&self) -> ExitSummary {
        self.state.wait_for_exit().await
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("log_path", &self.log_path)
            .field("intentional_termination", &self.is_intentional_termination())
            .field("termination_reason", &self.termination_reason())
            .finish()
    }
}

/// Outcome of a launch
#[derive(Debug, Clone)]
pub struct LaunchResult {
    pub process: ProcessHandle,
    pub log_path: PathBuf,
    pub discovered_port: Option<u16>,
}

impl LaunchResult {
    pub fn with_discovered_port(mut self, port: u16) -> Self {
        self.discovered_port = Some(port);
        self
    }
}

/// Stops a launched process; safe to call any number of times
#[derive(Clone)]
pub struct ProcessCleanup {
    state: Arc<ProcessState>,
    grace_period: Duration,
}

impl ProcessCleanup {
    pub fn pid(&self) -> u32 {
        self.state.pid
    }

    /// Record `reason`, send SIGTERM (SIGKILL after the grace period) and close the log sink
    pub async fn run(&self, reason: &str) -> TestnetResult<()> {
        let pid = self.state.pid;
        self.state.mark_intentional(reason);

        let mut outcome = Ok(());
        if !self.state.reaped.load(Ordering::SeqCst) {
            outcome = self.terminate().await;
        }

        self.state.sink.close().await;
        node_debug!(pid, "🛑 Cleaned up process {}: {}", pid, reason);
        outcome
    }

    /// Synchronous best-effort stop for drop paths: SIGTERM only, no waiting
    pub fn abort(&self, reason: &str) {
        self.state.mark_intentional(reason);
        if let Err(e) = self.state.signal(Signal::SIGTERM) {
            node_warn!(self.state.pid, "⚠️ Abort signal failed: {}", e);
        }
        self.state.sink.try_close();
    }

    async fn terminate(&self) -> TestnetResult<()> {
        let pid = self.state.pid;
        self.state.signal(Signal::SIGTERM)?;

        if timeout(self.grace_period, self.state.wait_for_exit()).await.is_ok() {
            return Ok(());
        }

        node_warn!(pid, "🔨 Process {} didn't respond to SIGTERM, using SIGKILL", pid);
        self.state.signal(Signal::SIGKILL)?;

        match timeout(KILL_WAIT, self.state.wait_for_exit()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                node_error!(pid, "💀 Process {} still running after SIGKILL", pid);
                Err(TestnetError::operation(Some(pid), "terminate", "process still running after SIGKILL"))
            }
        }
    }
}

impl fmt::Debug for ProcessCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessCleanup")
            .field("pid", &self.state.pid)
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

/// Spawns node processes and wires their log capture
#[derive(Debug, Clone)]
pub struct ProcessManager {
    log_dir: PathBuf,
    working_dir: Option<PathBuf>,
    grace_period: Duration,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            working_dir: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Configure default log directory (fluent API)
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    /// Configure the working directory of spawned processes (fluent API)
    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    /// Configure SIGTERM grace period (fluent API)
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Spawn `command` and start capturing its output.
    ///
    /// Spawn failure is returned as `ProcessLaunch`. Problems with the log
    /// directory or file are logged and the process runs without a log sink.
    pub async fn launch(
        &self,
        command: &str,
        args: &[String],
        name: &str,
        log_dir: Option<&Path>,
    ) -> TestnetResult<(LaunchResult, ProcessCleanup)> {
        let log_dir = log_dir.map(Path::to_path_buf).unwrap_or_else(|| self.log_dir.clone());
        let log_dir_ready = match fs::create_dir_all(&log_dir).await {
            Ok(()) => true,
            Err(e) => {
                let error = TestnetError::operation(None, format!("create log directory {}", log_dir.display()), e);
                node_warn!(name, "⚠️ {}", error);
                false
            }
        };

        let mut cmd = Command::new(command);
        cmd.args(args);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        process_output_handler::configure_child_stdio(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| TestnetError::ProcessLaunch {
            command: command.to_string(),
            args: args.to_vec(),
            source,
        })?;

        let pid = child.id().unwrap_or(0);
        let log_path = log_dir.join(log_file_name(command, args, pid));

        let (sink, writer) = if log_dir_ready {
            match LogSink::open(&log_path).await {
                Ok((sink, writer)) => (sink, Some(writer)),
                Err(e) => {
                    let error = TestnetError::operation(Some(pid), format!("open log file {}", log_path.display()), e);
                    node_warn!(name, "⚠️ {}", error);
                    (LogSink::closed(), None)
                }
            }
        } else {
            (LogSink::closed(), None)
        };

        let state = Arc::new(ProcessState {
            pid,
            termination: Mutex::new(Termination::default()),
            reaped: AtomicBool::new(false),
            exit: watch::channel(None).0,
            sink: sink.clone(),
        });

        let pumps = process_output_handler::spawn_output_pumps(&mut child, &sink);
        let trailer_path = writer.is_some().then(|| log_path.clone());
        tokio::spawn(observe_exit(child, state.clone(), pumps, writer, trailer_path, name.to_string()));

        node_debug!(name, "🏭 Spawned {} (PID: {}) logging to {}", command, pid, log_path.display());

        let process = ProcessHandle {
            pid,
            command: command.to_string(),
            args: args.to_vec(),
            log_path: log_path.clone(),
            state: state.clone(),
        };
        let cleanup = ProcessCleanup {
            state,
            grace_period: self.grace_period,
        };

        Ok((
            LaunchResult {
                process,
                log_path,
                discovered_port: None,
            },
            cleanup,
        ))
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the child, flush its output, write the trailer, then publish the exit
async fn observe_exit(
    mut child: Child,
    state: Arc<ProcessState>,
    pumps: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    log_path: Option<PathBuf>,
    name: String,
) {
    let status = child.wait().await;
    state.reaped.store(true, Ordering::SeqCst);

    for pump in pumps {
        let _ = timeout(OUTPUT_DRAIN_TIMEOUT, pump).await;
    }

    let summary = ExitSummary::from_status(status.ok(), state.termination());
    let trailer = summary.trailer();

    if summary.intentional {
        node_debug!(name, "{}", trailer);
    } else {
        node_warn!(name, "⚠️ {}", trailer);
    }

    if let Err(e) = state.sink.finish(&trailer, log_path.as_deref(), writer).await {
        let error = TestnetError::operation(Some(state.pid), "write log trailer", e);
        node_warn!(name, "⚠️ {}", error);
    }

    state.exit.send_replace(Some(summary));
}

/// Log file name: `<binary>_node_<port-or-undefined>_<pid>.log`, with
/// `node_node_undefined` (a port-less launch through `node`) shortened to `chopsticks`
pub fn log_file_name(command: &str, args: &[String], pid: u32) -> String {
    let binary = Path::new(command)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string());
    let port = port_from_args(args)
        .map(|port| port.to_string())
        .unwrap_or_else(|| NO_PORT_LITERAL.to_string());

    format!("{binary}_node_{port}_{pid}.log").replace("node_node_undefined", "chopsticks")
}

/// First port found in `--*port*=<p>` or `--*port* <p>` form
pub fn port_from_args(args: &[String]) -> Option<u16> {
    for (index, arg) in args.iter().enumerate() {
        if !arg.contains("port") {
            continue;
        }
        if let Some((_, value)) = arg.split_once('=') {
            if let Ok(port) = value.trim().parse() {
                return Some(port);
            }
        } else if let Some(next) = args.get(index + 1) {
            if let Ok(port) = next.trim().parse() {
                return Some(port);
            }
        }
    }
    None
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

fn signal_name(signal: i32) -> String {
    Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| signal.to_string())
}
