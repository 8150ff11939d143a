//! `forge script` runner.
//!
//! The script writes a JSON report to `$TREB_REPORT_PATH`; process output is
//! captured in a log file next to it.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info};

use super::{ScriptInvocation, ScriptOutcome, ScriptRunner};
use crate::config::ScriptSettings;
use crate::error::{Error, Result};
use crate::registry::STATE_DIR_NAME;

const POLL_INTERVAL_MS: u64 = 100;

pub const REPORT_PATH_ENV: &str = "TREB_REPORT_PATH";

#[derive(Debug, Clone)]
pub struct ForgeScriptRunner {
    command: String,
    timeout: Duration,
}

impl ForgeScriptRunner {
    pub fn new(settings: &ScriptSettings) -> Self {
        Self {
            command: settings.command.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn build_args(invocation: &ScriptInvocation) -> Vec<String> {
        vec![
            "script".to_string(),
            invocation.script.clone(),
            "--rpc-url".to_string(),
            invocation.rpc_url.clone(),
            "--broadcast".to_string(),
        ]
    }

    fn report_dir(project_root: &Path) -> PathBuf {
        project_root.join(STATE_DIR_NAME).join("priv").join("reports")
    }

    fn report_stem(script: &str) -> String {
        Path::new(script)
            .file_name()
            .map(|name| name.to_string_lossy().replace('.', "_"))
            .unwrap_or_else(|| "script".to_string())
    }
}

impl ScriptRunner for ForgeScriptRunner {
    fn run(&self, invocation: &ScriptInvocation) -> Result<ScriptOutcome> {
        let dir = Self::report_dir(&invocation.project_root);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report directory: {}", dir.display()))?;
        let stem = Self::report_stem(&invocation.script);
        let report_path = dir.join(format!("{stem}.json"));
        let log_path = dir.join(format!("{stem}.log"));
        if report_path.exists() {
            std::fs::remove_file(&report_path).with_context(|| {
                format!("Failed to clear stale report: {}", report_path.display())
            })?;
        }

        let log = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;
        let args = Self::build_args(invocation);
        info!(script = %invocation.script, network = %invocation.network, "running script");

        let mut child = Command::new(&self.command)
            .args(&args)
            .current_dir(&invocation.project_root)
            .envs(invocation.environment())
            .env(REPORT_PATH_ENV, &report_path)
            .stdout(log.try_clone().context("Failed to clone log handle")?)
            .stderr(log)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", self.command))?;

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().context("Failed to poll script process")? {
                break status;
            }
            if start.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout {
                    operation: format!("script {}", invocation.script),
                    seconds: self.timeout.as_secs(),
                });
            }
            thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        };

        if !status.success() {
            return Err(anyhow::anyhow!(
                "script {} exited with {}; see {}",
                invocation.script,
                status,
                log_path.display()
            )
            .into());
        }

        if !report_path.exists() {
            debug!(script = %invocation.script, "script wrote no report");
            return Ok(ScriptOutcome::default());
        }
        let raw = std::fs::read_to_string(&report_path)
            .with_context(|| format!("Failed to read report: {}", report_path.display()))?;
        let outcome: ScriptOutcome = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse report: {}", report_path.display()))?;
        debug!(
            script = %invocation.script,
            transactions = outcome.transactions.len(),
            "script finished"
        );
        Ok(outcome)
    }
}
