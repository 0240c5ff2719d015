//! Pseudoterminal process supervision for the wrapped agent.
//!
//! Spawns the agent binary under a PTY of fixed dimensions and exposes a
//! byte-stream read channel, an ordered write sink, and a graceful close
//! (SIGINT, bounded wait, SIGKILL).

use std::{
    env,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::mpsc;

pub struct PtyProcess {
    master: Mutex<Box<dyn portable_pty::MasterPty>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn portable_pty::Child + Send>>,
    child_pid: Option<i32>,
    // Sticky: once the child has been observed gone, it stays gone.
    exited: AtomicBool,
}

/// The agent must resolve to an executable file before any PTY is allocated.
/// Anything path-like is taken as given; bare names are searched on PATH.
fn locate_program(program: &str) -> Result<PathBuf> {
    let given = Path::new(program);
    if program.contains(std::path::MAIN_SEPARATOR) || program.starts_with('.') {
        if is_executable(given) {
            return Ok(given.to_path_buf());
        }
        anyhow::bail!("agent binary '{program}' is not an executable file");
    }

    env::var_os("PATH")
        .and_then(|path| {
            env::split_paths(&path)
                .map(|dir| dir.join(program))
                .find(|candidate| is_executable(candidate))
        })
        .with_context(|| format!("agent binary '{program}' not found in PATH"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Drain the PTY master on a dedicated thread; the channel closes when the
/// child hangs up or the receiver is dropped.
fn pump_output(mut reader: Box<dyn Read + Send>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(256);
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        while let Ok(n) = reader.read(&mut buf) {
            if n == 0 || tx.blocking_send(buf[..n].to_vec()).is_err() {
                break;
            }
        }
    });
    rx
}

impl PtyProcess {
    /// Spawn `program` under a fresh PTY sized `rows` x `cols`. The returned
    /// receiver yields byte batches in production order and closes on child
    /// exit.
    pub fn spawn(
        program: &str,
        args: &[String],
        rows: u16,
        cols: u16,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>)> {
        let program_path = locate_program(program)?;

        let pty = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to allocate pty")?;

        let mut cmd = CommandBuilder::new(&program_path);
        cmd.cwd(env::current_dir().context("failed to get current directory")?);
        cmd.env("TERM", "xterm-256color");
        for arg in args {
            cmd.arg(arg);
        }

        let child = pty
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("failed to start agent '{}'", program_path.display()))?;
        let child_pid = child.process_id().map(|pid| pid as i32);

        let reader = pty
            .master
            .try_clone_reader()
            .context("failed to clone pty reader")?;
        let writer = pty
            .master
            .take_writer()
            .context("failed to take pty writer")?;
        let output_rx = pump_output(reader);

        Ok((
            Self {
                master: Mutex::new(pty.master),
                writer: Mutex::new(writer),
                child: Mutex::new(child),
                child_pid,
                exited: AtomicBool::new(false),
            },
            output_rx,
        ))
    }

    /// Write the full buffer to the PTY master, retrying partial writes.
    pub fn write_all(&self, bytes: &[u8]) -> Result<()> {
        if self.has_exited() {
            anyhow::bail!("pty write after agent exit");
        }
        let mut writer = self.writer.lock();
        writer.write_all(bytes).context("pty write failed")?;
        writer.flush().context("pty flush failed")
    }

    /// Atomically resize the PTY window.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("failed to resize pty")
    }

    /// Non-blocking liveness check, sticky once the child is gone.
    pub fn has_exited(&self) -> bool {
        if self.exited.load(Ordering::Relaxed) {
            return true;
        }
        if self.probe_exit() {
            self.exited.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// One look at the child: reap it if it is done, and fall back to a
    /// liveness signal for the case where another path already reaped it.
    fn probe_exit(&self) -> bool {
        match self.child.lock().try_wait() {
            Ok(None) => !self.process_alive(),
            Ok(Some(_status)) => true,
            Err(error) => {
                // ECHILD: reaped elsewhere.
                tracing::debug!(
                    target = "agent_console::pty",
                    pid = ?self.child_pid,
                    %error,
                    "child already reaped"
                );
                true
            }
        }
    }

    #[cfg(unix)]
    fn process_alive(&self) -> bool {
        let Some(pid) = self.child_pid else {
            return true;
        };
        // SAFETY: signal 0 only checks that the process exists.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM still proves the pid exists; only ESRCH means it is gone.
        std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
    }

    #[cfg(not(unix))]
    fn process_alive(&self) -> bool {
        true
    }

    /// Interrupt the child, wait up to `grace` for it to exit, then kill it.
    pub async fn close(&self, grace: Duration) {
        self.interrupt();

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.has_exited() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tracing::warn!(
            target = "agent_console::pty",
            pid = ?self.child_pid,
            grace_ms = grace.as_millis() as u64,
            "agent did not exit after SIGINT, killing"
        );
        self.force_kill();
    }

    #[cfg(unix)]
    fn interrupt(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = self.child_pid {
            let _ = kill(Pid::from_raw(pid), Signal::SIGINT);
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&self) {}

    /// Immediate SIGKILL and reap, used on teardown paths that cannot wait.
    pub fn force_kill(&self) {
        let mut child = self.child.lock();
        let _ = child.kill();
        let _ = child.wait();
        self.exited.store(true, Ordering::Relaxed);
    }
}
