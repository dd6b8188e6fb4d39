//! Process control for the proxy under test
//!
//! Handles spawning, output capture and unconditional termination.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, trace, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};

/// How to launch the subject binary
#[derive(Debug, Clone)]
pub struct SubjectCommand {
    /// Binary to execute
    pub program: String,
    /// Arguments placed before the configuration flag
    pub args: Vec<String>,
    /// Flag passed as `<flag>=<path>`
    pub config_flag: String,
}

impl SubjectCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            config_flag: "--configFile".to_string(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_config_flag(mut self, flag: impl Into<String>) -> Self {
        self.config_flag = flag.into();
        self
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(&config.proxy_binary)
            .with_args(config.proxy_args.iter().cloned())
            .with_config_flag(&config.config_flag)
    }

    /// Full argument list for `config_file`
    pub fn argv(&self, config_file: &Path) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.push(format!("{}={}", self.config_flag, config_file.display()));
        argv
    }
}

/// Combined stdout/stderr of a subject, in arrival order
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputBuffer {
    pub fn push(&self, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contents(&self) -> String {
        let mut out = self.lines().join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Spawn a task draining `stream` line by line into `buffer`
fn spawn_reader<R>(stream: R, buffer: OutputBuffer) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            trace!(line = %line, "subject output");
            buffer.push(line);
        }
    })
}

/// Upper bound on waiting for the output readers once the subject is killed
pub const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A running instance of the proxy under test
///
/// On unix the subject leads its own process group, so wrapper scripts that
/// fork the real proxy are killed together with everything they started.
pub struct SubjectProcess {
    child: Child,
    /// Process group to signal; cleared once the group was killed
    pgid: Option<u32>,
    output: OutputBuffer,
    config_file: PathBuf,
    readers: Vec<tokio::task::JoinHandle<()>>,
}

impl SubjectProcess {
    /// Launch without waiting for readiness; poll the listening port for that.
    pub fn start(command: &SubjectCommand, config_file: &Path) -> Result<Self> {
        let argv = command.argv(config_file);
        info!(program = %command.program, ?argv, "Starting subject process");

        let mut cmd = Command::new(&command.program);
        cmd.args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| {
                HarnessError::Process(format!("failed to spawn {}: {}", command.program, e))
            })?;

        let output = OutputBuffer::default();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, output.clone()));
        }

        Ok(Self {
            pgid: child.id(),
            child,
            output,
            config_file: config_file.to_path_buf(),
            readers,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// Check if process is still running
    pub fn is_running(&mut self) -> bool {
        self.child.try_wait().map(|s| s.is_none()).unwrap_or(false)
    }

    /// SIGKILL the whole process group, once
    fn kill_group(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            let Ok(pgid) = libc::pid_t::try_from(pgid) else {
                return;
            };
            // SAFETY: killpg only sends a signal; no memory is shared
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
                trace!(pgid, error = %std::io::Error::last_os_error(), "Process group already gone");
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }

    /// Forcefully terminate and wait for exit. Safe to call more than once.
    ///
    /// Captured output is drained for at most `READER_DRAIN_TIMEOUT`.
    pub async fn stop(&mut self) -> Result<()> {
        debug!(pid = ?self.child.id(), "Killing subject process");
        self.kill_group();
        if self.is_running() {
            self.child
                .kill()
                .await
                .map_err(|e| HarnessError::Process(format!("failed to kill subject: {}", e)))?;
        }

        let readers = &mut self.readers;
        let drained = tokio::time::timeout(READER_DRAIN_TIMEOUT, async {
            for reader in readers.iter_mut() {
                let _ = reader.await;
            }
        })
        .await;
        if drained.is_err() {
            warn!("Subject output still open after kill, dropping the rest");
        }
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        Ok(())
    }

    /// Write captured output to the log, one event per line
    pub fn dump_output(&self, label: &str) {
        let lines = self.output.lines();
        if lines.is_empty() {
            warn!(case = %label, "Subject produced no output");
            return;
        }
        warn!(case = %label, lines = lines.len(), "Subject output follows");
        for line in lines {
            warn!(case = %label, "| {}", line);
        }
    }
}

impl Drop for SubjectProcess {
    fn drop(&mut self) {
        self.kill_group();
        if let Err(e) = self.child.start_kill() {
            trace!(error = %e, "Subject already exited");
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}
