//! Fork node processes.
//!
//! The node runs detached with its output captured in a log file and its
//! pid written next to it, so later invocations can probe and stop it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::ForkSettings;
use crate::error::{Error, Result};

const READY_POLL_MS: u64 = 100;
const TERMINATE_GRACE_MS: u64 = 3_000;
const READY_MARKER: &str = "Listening on";

/// What to start.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub network: String,
    pub upstream_url: String,
    pub port: u16,
    pub log_file: PathBuf,
    pub pid_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle {
    pub pid: u32,
}

/// Lifecycle of fork node processes.
pub trait NodeSupervisor {
    /// Start a node and wait until it accepts requests.
    fn start(&self, spec: &NodeSpec) -> Result<NodeHandle>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Stop `pid`. Stopping a process that is already gone succeeds.
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Last `lines` lines of a node log.
    fn read_logs(&self, log_file: &Path, lines: usize) -> Result<Vec<String>> {
        tail_lines(log_file, lines)
    }
}

/// Runs `anvil --fork-url`.
#[derive(Debug, Clone)]
pub struct AnvilSupervisor {
    binary: PathBuf,
    ready_timeout: Duration,
}

impl AnvilSupervisor {
    pub fn new(settings: &ForkSettings) -> Self {
        Self {
            binary: resolve_binary(&settings.anvil),
            ready_timeout: Duration::from_secs(settings.ready_timeout_secs),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn build_args(spec: &NodeSpec) -> Vec<String> {
        vec![
            "--fork-url".to_string(),
            spec.upstream_url.clone(),
            "--port".to_string(),
            spec.port.to_string(),
        ]
    }

    fn wait_for_ready(&self, spec: &NodeSpec, child: &mut std::process::Child) -> Result<()> {
        let poll_interval = Duration::from_millis(READY_POLL_MS);
        let start = Instant::now();

        loop {
            if let Some(status) = child.try_wait().context("Failed to poll fork node")? {
                return Err(anyhow::anyhow!(
                    "Fork node exited unexpectedly (status: {}). Check {} for details.",
                    status,
                    spec.log_file.display()
                )
                .into());
            }

            if let Ok(content) = fs::read_to_string(&spec.log_file)
                && content.contains(READY_MARKER)
            {
                return Ok(());
            }

            if start.elapsed() > self.ready_timeout {
                return Err(Error::Timeout {
                    operation: format!("starting fork node for '{}'", spec.network),
                    seconds: self.ready_timeout.as_secs(),
                });
            }

            thread::sleep(poll_interval);
        }
    }
}

impl NodeSupervisor for AnvilSupervisor {
    fn start(&self, spec: &NodeSpec) -> Result<NodeHandle> {
        if let Some(parent) = spec.log_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let log = fs::File::create(&spec.log_file)
            .with_context(|| format!("Failed to create log file: {}", spec.log_file.display()))?;

        let mut command = Command::new(&self.binary);
        command
            .args(Self::build_args(spec))
            .stdout(log.try_clone().context("Failed to clone log handle")?)
            .stderr(log)
            .stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so a Ctrl-C in the terminal does not reach the node.
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.binary.display()))?;
        let pid = child.id();

        if let Err(err) = self.wait_for_ready(spec, &mut child) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }

        fs::write(&spec.pid_file, format!("{pid}\n"))
            .with_context(|| format!("Failed to write pid file: {}", spec.pid_file.display()))?;
        info!(network = %spec.network, pid, port = spec.port, "fork node started");
        Ok(NodeHandle { pid })
    }

    fn is_alive(&self, pid: u32) -> bool {
        process_alive(pid)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        terminate_process(pid)
    }
}

/// Prefer a configured path, then PATH, then Foundry's install directory.
fn resolve_binary(name: &str) -> PathBuf {
    let configured = PathBuf::from(name);
    if configured.components().count() > 1 || on_path(name) {
        return configured;
    }
    dirs::home_dir()
        .map(|home| home.join(".foundry").join("bin").join(name))
        .filter(|candidate| candidate.is_file())
        .unwrap_or(configured)
}

fn on_path(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

/// A single positive pid. 0 and values that wrap negative would address a
/// process group or every process instead.
#[cfg(unix)]
fn signal_target(pid: u32) -> Option<nix::unistd::Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(nix::unistd::Pid::from_raw(raw)),
        _ => None,
    }
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::sys::wait::{WaitPidFlag, waitpid};

    let Some(target) = signal_target(pid) else {
        return false;
    };
    // Reap our own exited children so they do not linger as zombies.
    let _ = waitpid(target, Some(WaitPidFlag::WNOHANG));
    match kill(target, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
pub fn terminate_process(pid: u32) -> Result<()> {
    use nix::sys::signal::{Signal, kill};

    let Some(target) = signal_target(pid) else {
        return Err(anyhow::anyhow!("Refusing to signal invalid pid {pid}").into());
    };
    if !process_alive(pid) {
        debug!(pid, "process already gone");
        return Ok(());
    }
    let _ = kill(target, Signal::SIGTERM);

    let deadline = Instant::now() + Duration::from_millis(TERMINATE_GRACE_MS);
    while Instant::now() < deadline {
        if !process_alive(pid) {
            info!(pid, "fork node stopped");
            return Ok(());
        }
        thread::sleep(Duration::from_millis(READY_POLL_MS));
    }

    warn!(pid, "fork node ignored SIGTERM, sending SIGKILL");
    kill(target, Signal::SIGKILL)
        .with_context(|| format!("Failed to kill process {pid}"))?;
    let _ = process_alive(pid);
    Ok(())
}

#[cfg(not(unix))]
pub fn terminate_process(pid: u32) -> Result<()> {
    Err(anyhow::anyhow!("Stopping process {pid} requires a unix host").into())
}

/// Last `lines` lines of `path`; a missing file has none.
pub fn tail_lines(path: &Path, lines: usize) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read log file: {}", path.display()))?;
    let all: Vec<&str> = content.lines().collect();
    let skip = all.len().saturating_sub(lines);
    Ok(all[skip..].iter().map(|line| line.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(dir: &Path) -> NodeSpec {
        NodeSpec {
            network: "mainnet".to_string(),
            upstream_url: "https://rpc.example".to_string(),
            port: 8545,
            log_file: dir.join("anvil.log"),
            pid_file: dir.join("anvil.pid"),
        }
    }

    #[test]
    fn args_fork_upstream_on_port() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            AnvilSupervisor::build_args(&spec(temp.path())),
            vec!["--fork-url", "https://rpc.example", "--port", "8545"]
        );
    }

    #[test]
    fn tail_returns_last_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("anvil.log");
        fs::write(&path, "one\ntwo\nthree\n").unwrap();
        assert_eq!(tail_lines(&path, 2).unwrap(), vec!["two", "three"]);
        assert_eq!(tail_lines(&path, 10).unwrap().len(), 3);
        assert!(tail_lines(&temp.path().join("none"), 5).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn group_and_wrapping_pids_are_never_signalled() {
        for pid in [0, u32::MAX, i32::MAX as u32 + 1] {
            assert!(!process_alive(pid));
            let err = terminate_process(pid).unwrap_err();
            assert!(err.to_string().contains("invalid pid"));
        }
        assert!(process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn exited_node_fails_readiness() {
        let temp = TempDir::new().unwrap();
        let spec = spec(temp.path());
        let mut child = Command::new("false")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        thread::sleep(Duration::from_millis(100));

        let supervisor = AnvilSupervisor::new(&ForkSettings::default());
        let err = supervisor.wait_for_ready(&spec, &mut child).unwrap_err();
        assert!(err.to_string().contains("exited unexpectedly"));
    }

    #[cfg(unix)]
    #[test]
    fn ready_marker_in_log_is_ready() {
        let temp = TempDir::new().unwrap();
        let spec = spec(temp.path());
        fs::write(&spec.log_file, "Listening on 127.0.0.1:8545\n").unwrap();
        let mut child = Command::new("sleep")
            .arg("60")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let supervisor = AnvilSupervisor::new(&ForkSettings::default());
        assert!(supervisor.wait_for_ready(&spec, &mut child).is_ok());

        let _ = child.kill();
        let _ = child.wait();
    }

    #[cfg(unix)]
    #[test]
    fn terminate_stops_a_live_process() {
        let child = Command::new("sleep")
            .arg("60")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        assert!(process_alive(pid));

        terminate_process(pid).unwrap();
        assert!(!process_alive(pid));
        // Already gone is fine.
        terminate_process(pid).unwrap();
    }
}
