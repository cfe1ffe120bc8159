//! Lifecycle of the crawl child process and the shared log buffer.
//!
//! Exactly one crawl runs at a time. Its stdout and stderr are drained by
//! background tasks into a [`LogBuffer`] that the control service tails.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

pub const LOG_BUFFER_MAX_LINES: usize = 2000;
pub const DATASET_DIR_ENV: &str = "INTERMEDIATE_DATASET_DIR";

// ── Log buffer ──

/// Fixed-capacity line buffer; the oldest line is evicted when full.
pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.trim_end_matches(['\r', '\n']).to_string());
    }

    /// Append `[source] line`.
    pub fn push_tagged(&self, source: &str, line: &str) {
        self.push(format!("[{}] {}", source, line));
    }

    /// Up to the last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let n = n.min(self.capacity).min(lines.len());
        lines.iter().skip(lines.len() - n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(LOG_BUFFER_MAX_LINES)
    }
}

// ── Child process ──

/// The bits of a running child the supervisor needs.
pub trait CrawlChild: Send {
    fn id(&self) -> Option<u32>;
    fn is_alive(&mut self) -> bool;
    /// Ask the process to exit.
    fn terminate(&mut self) -> io::Result<()>;
    /// Force the process to exit.
    fn kill(&mut self) -> io::Result<()>;
}

/// Starts crawl children pointed at a dataset directory.
pub trait Launcher: Send + Sync {
    fn launch(&self, dataset_dir: &Path, logs: Arc<LogBuffer>) -> Result<Box<dyn CrawlChild>>;
}

struct ProcessChild(Child);

impl CrawlChild for ProcessChild {
    fn id(&self) -> Option<u32> {
        self.0.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.0.try_wait(), Ok(None))
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        let Some(pid) = self.0.id() else {
            return Ok(());
        };
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.0.start_kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.0.start_kill()
    }
}

/// Runs `program args...` with the dataset dir exported in the environment.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    workdir: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            workdir: None,
        }
    }

    /// This executable's `crawl` subcommand.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().context("Cannot locate own executable")?;
        Ok(Self::new(exe, vec!["crawl".to_string()]))
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, dataset_dir: &Path, logs: Arc<LogBuffer>) -> Result<Box<dyn CrawlChild>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(DATASET_DIR_ENV, dataset_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.program.display()))?;

        if let Some(out) = child.stdout.take() {
            tokio::spawn(drain(out, Arc::clone(&logs)));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(drain(err, logs));
        }
        Ok(Box::new(ProcessChild(child)))
    }
}

async fn drain<R: AsyncRead + Unpin>(stream: R, logs: Arc<LogBuffer>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => logs.push_tagged("scraper", &line),
            Ok(None) => break,
            Err(e) => {
                logs.push_tagged("server", &format!("log reader error: {}", e));
                break;
            }
        }
    }
}

// ── Supervisor ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub status: StartStatus,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    NotRunning,
    FailedToStop,
}

/// Grace window after terminate, then confirmation window after kill.
#[derive(Debug, Clone, Copy)]
pub struct StopTimeouts {
    pub grace: Duration,
    pub confirm: Duration,
    pub poll: Duration,
}

impl Default for StopTimeouts {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(10),
            confirm: Duration::from_secs(5),
            poll: Duration::from_millis(100),
        }
    }
}

pub struct Supervisor {
    launcher: Box<dyn Launcher>,
    logs: Arc<LogBuffer>,
    timeouts: StopTimeouts,
    current: tokio::sync::Mutex<Option<Box<dyn CrawlChild>>>,
}

impl Supervisor {
    pub fn new(launcher: Box<dyn Launcher>, logs: Arc<LogBuffer>, timeouts: StopTimeouts) -> Self {
        Self {
            launcher,
            logs,
            timeouts,
            current: tokio::sync::Mutex::new(None),
        }
    }

    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    fn note(&self, msg: &str) {
        info!("{}", msg);
        self.logs.push_tagged("server", msg);
    }

    /// Start a crawl into `dataset_dir`, or report the one already running.
    pub async fn start(&self, dataset_dir: &Path) -> Result<StartOutcome> {
        let mut current = self.current.lock().await;
        if let Some(child) = current.as_mut() {
            if child.is_alive() {
                return Ok(StartOutcome {
                    status: StartStatus::AlreadyRunning,
                    pid: child.id(),
                });
            }
        }

        self.note(&format!(
            "starting scraper with {}={}",
            DATASET_DIR_ENV,
            dataset_dir.display()
        ));
        let child = self.launcher.launch(dataset_dir, Arc::clone(&self.logs))?;
        let pid = child.id();
        *current = Some(child);
        Ok(StartOutcome {
            status: StartStatus::Started,
            pid,
        })
    }

    /// Terminate, wait, kill, wait. The handle is cleared whatever happens.
    pub async fn stop(&self) -> StopStatus {
        let mut current = self.current.lock().await;
        let Some(mut child) = current.take() else {
            return StopStatus::NotRunning;
        };
        if !child.is_alive() {
            return StopStatus::NotRunning;
        }

        let pid = child.id().map(|p| p.to_string()).unwrap_or_else(|| "?".into());
        self.note(&format!("stopping scraper pid={}", pid));
        if let Err(e) = child.terminate() {
            self.note(&format!("terminate error: {}", e));
        }

        if !self.wait_exit(child.as_mut(), self.timeouts.grace).await {
            warn!("Scraper pid={} ignored terminate, killing", pid);
            self.logs
                .push_tagged("server", "scraper did not exit, sending SIGKILL");
            if let Err(e) = child.kill() {
                self.note(&format!("kill error: {}", e));
            }
            self.wait_exit(child.as_mut(), self.timeouts.confirm).await;
        }

        if child.is_alive() {
            self.note(&format!("scraper pid={} failed to stop", pid));
            StopStatus::FailedToStop
        } else {
            StopStatus::Stopped
        }
    }

    pub async fn is_running(&self) -> bool {
        let mut current = self.current.lock().await;
        current.as_mut().is_some_and(|c| c.is_alive())
    }

    pub fn tail(&self, n: usize) -> Vec<String> {
        self.logs.tail(n)
    }

    async fn wait_exit(&self, child: &mut dyn CrawlChild, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            if !child.is_alive() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.timeouts.poll).await;
        }
    }
}
