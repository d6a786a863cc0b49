//! Site build module
//!
//! Runs the external static-site generator. The dispatcher only sees the
//! `SiteBuilder` capability; `CommandBuilder` is the process-backed
//! implementation and `BuildGate` keeps overlapping rebuilds from racing on
//! the same output directory. Builds run on their own task, so a request that
//! goes away mid-build never leaves the output half written.

use crate::config::{BuildConfig, RebuildMode};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinError;

/// Result of a build that ran to completion (or was killed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStatus {
    /// Exit code, `None` when terminated by a signal or killed on timeout
    pub code: Option<i32>,
    pub elapsed: Duration,
    pub timed_out: bool,
}

impl BuildStatus {
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0)) && !self.timed_out
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            return write!(f, "timed out after {}ms", self.elapsed.as_millis());
        }
        match self.code {
            Some(code) => write!(f, "exit code {code} in {}ms", self.elapsed.as_millis()),
            None => write!(f, "terminated by signal in {}ms", self.elapsed.as_millis()),
        }
    }
}

/// The build could not be run at all
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to start `{command}` in {dir}: {source}")]
    Spawn {
        command: String,
        dir: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("build task for `{command}` did not finish: {source}")]
    Task {
        command: String,
        #[source]
        source: JoinError,
    },
}

/// Capability to regenerate the whole site
#[async_trait]
pub trait SiteBuilder: Send + Sync {
    /// Run one full build and wait for it to exit
    async fn run(&self) -> Result<BuildStatus, BuildError>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Runs the generator as a child process
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Option<Duration>,
    show_output: bool,
}

impl CommandBuilder {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            timeout: None,
            show_output: false,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(config.command.clone(), config.working_dir.clone())
            .args(config.args.iter().cloned())
            .timeout(config.timeout_secs.map(Duration::from_secs))
            .show_output(config.show_output)
    }

    #[must_use]
    pub fn args<I: IntoIterator<Item = String>>(mut self, args: I) -> Self {
        self.args.extend(args);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn show_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    fn stdio(&self) -> Stdio {
        if self.show_output {
            Stdio::inherit()
        } else {
            Stdio::null()
        }
    }
}

#[async_trait]
impl SiteBuilder for CommandBuilder {
    async fn run(&self) -> Result<BuildStatus, BuildError> {
        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(self.stdio())
            .stderr(self.stdio())
            .kill_on_drop(self.timeout.is_some())
            .spawn()
            .map_err(|source| BuildError::Spawn {
                command: self.describe(),
                dir: self.working_dir.display().to_string(),
                source,
            })?;

        let waited = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        match waited {
            Some(Ok(status)) => Ok(BuildStatus {
                code: status.code(),
                elapsed: started.elapsed(),
                timed_out: false,
            }),
            Some(Err(source)) => Err(BuildError::Wait {
                command: self.describe(),
                source,
            }),
            None => {
                // Child is reaped by the runtime once killed
                let _ = child.start_kill();
                Ok(BuildStatus {
                    code: None,
                    elapsed: started.elapsed(),
                    timed_out: true,
                })
            }
        }
    }

    fn describe(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// What the gate did for one rebuild request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// This request ran the build
    Completed(BuildStatus),
    /// A build that started after this request arrived already finished
    Coalesced,
}

/// Serializes rebuilds and optionally coalesces waiters
pub struct BuildGate {
    builder: Arc<dyn SiteBuilder>,
    mode: RebuildMode,
    // Number of builds started so far; only bumped while `last_clean` is locked
    started: AtomicU64,
    // Number of the latest build that ran to completion without timing out.
    // The lock is held for the whole build.
    last_clean: Arc<Mutex<u64>>,
}

impl BuildGate {
    pub fn new(builder: Arc<dyn SiteBuilder>, mode: RebuildMode) -> Self {
        Self {
            builder,
            mode,
            started: AtomicU64::new(0),
            last_clean: Arc::new(Mutex::new(0)),
        }
    }

    pub fn describe(&self) -> String {
        self.builder.describe()
    }

    /// Number of builds this gate has started
    pub fn builds_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Rebuild the site, waiting for any build already in progress
    ///
    /// The build itself runs on a spawned task that owns the lock, so dropping
    /// the returned future lets it finish instead of killing the generator.
    pub async fn rebuild(&self) -> Result<BuildOutcome, BuildError> {
        let ticket = self.started.load(Ordering::SeqCst);
        let mut last_clean = Arc::clone(&self.last_clean).lock_owned().await;

        // Holding the lock means no build is running. Builds numbered above
        // the ticket started after we arrived.
        if self.mode == RebuildMode::Coalesce && *last_clean > ticket {
            return Ok(BuildOutcome::Coalesced);
        }

        let number = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let builder = Arc::clone(&self.builder);
        let build = tokio::spawn(async move {
            let result = builder.run().await;
            if matches!(&result, Ok(status) if !status.timed_out) {
                *last_clean = number;
            }
            result
        });

        match build.await {
            Ok(result) => result.map(BuildOutcome::Completed),
            Err(source) => Err(BuildError::Task {
                command: self.describe(),
                source,
            }),
        }
    }
}

impl fmt::Debug for BuildGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildGate")
            .field("builder", &self.builder.describe())
            .field("mode", &self.mode)
            .field("started", &self.builds_started())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeBuilder;
    use super::*;

    #[test]
    fn test_status_success() {
        let ok = BuildStatus { code: Some(0), elapsed: Duration::ZERO, timed_out: false };
        let failed = BuildStatus { code: Some(1), ..ok };
        let killed = BuildStatus { code: None, timed_out: true, ..ok };
        assert!(ok.success());
        assert!(!failed.success());
        assert!(!killed.success());
        assert!(killed.to_string().starts_with("timed out"));
        assert_eq!(failed.to_string(), "exit code 1 in 0ms");
    }

    #[test]
    fn test_describe() {
        let builder = CommandBuilder::new("jekyll", ".")
            .args(["build".to_string(), "--quiet".to_string()]);
        assert_eq!(builder.describe(), "jekyll build --quiet");
        assert_eq!(CommandBuilder::new("make", ".").describe(), "make");
    }

    #[tokio::test]
    async fn test_gate_sequential_requests_each_build() {
        let fake = Arc::new(FakeBuilder::new());
        let gate = BuildGate::new(fake.clone(), RebuildMode::Coalesce);

        for _ in 0..3 {
            let outcome = gate.rebuild().await.unwrap();
            assert!(matches!(outcome, BuildOutcome::Completed(_)));
        }
        assert_eq!(fake.runs(), 3);
        assert_eq!(gate.builds_started(), 3);
    }

    #[tokio::test]
    async fn test_gate_serialize_never_overlaps() {
        let fake = Arc::new(FakeBuilder::new().delay(Duration::from_millis(20)));
        let gate = BuildGate::new(fake.clone(), RebuildMode::Serialize);

        let (a, b, c) = tokio::join!(gate.rebuild(), gate.rebuild(), gate.rebuild());
        for outcome in [a, b, c] {
            assert!(matches!(outcome.unwrap(), BuildOutcome::Completed(_)));
        }
        assert_eq!(fake.runs(), 3);
        assert_eq!(fake.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_coalesces_waiters() {
        let fake = Arc::new(FakeBuilder::new().delay(Duration::from_millis(50)));
        let gate = BuildGate::new(fake.clone(), RebuildMode::Coalesce);

        // Two requests arrive while the first build runs. One of them builds
        // again afterwards, the other reuses that second build.
        let gate = &gate;
        let arrive_late = move || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            gate.rebuild().await
        };
        let (first, b, c) = tokio::join!(gate.rebuild(), arrive_late(), arrive_late());
        assert!(matches!(first.unwrap(), BuildOutcome::Completed(_)));

        let late = [b.unwrap(), c.unwrap()];
        let coalesced = late.iter().filter(|o| **o == BuildOutcome::Coalesced).count();
        assert_eq!(coalesced, 1);
        assert_eq!(fake.runs(), 2);
        assert_eq!(fake.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_late_arrival_gets_fresh_build() {
        let fake = Arc::new(FakeBuilder::new().delay(Duration::from_millis(50)));
        let gate = BuildGate::new(fake.clone(), RebuildMode::Coalesce);

        let late = async {
            // Arrive while the first build is already running
            tokio::time::sleep(Duration::from_millis(10)).await;
            gate.rebuild().await
        };
        let (first, second) = tokio::join!(gate.rebuild(), late);
        assert!(matches!(first.unwrap(), BuildOutcome::Completed(_)));
        assert!(matches!(second.unwrap(), BuildOutcome::Completed(_)));
        assert_eq!(fake.runs(), 2);
    }

    #[tokio::test]
    async fn test_gate_propagates_spawn_error() {
        let gate = BuildGate::new(Arc::new(FakeBuilder::new().failing_spawn()), RebuildMode::Coalesce);
        assert!(matches!(gate.rebuild().await, Err(BuildError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_gate_waiter_does_not_coalesce_onto_spawn_failure() {
        let fake = Arc::new(
            FakeBuilder::new()
                .delay(Duration::from_millis(50))
                .failing_spawn_after(1),
        );
        let gate = BuildGate::new(fake.clone(), RebuildMode::Coalesce);

        let gate = &gate;
        let arrive_late = move || async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            gate.rebuild().await
        };
        let (first, b, c) = tokio::join!(gate.rebuild(), arrive_late(), arrive_late());
        assert!(matches!(first.unwrap(), BuildOutcome::Completed(_)));

        // Neither waiter may report a build that never started
        assert!(matches!(b, Err(BuildError::Spawn { .. })));
        assert!(matches!(c, Err(BuildError::Spawn { .. })));
        assert_eq!(fake.runs(), 1);
    }

    #[tokio::test]
    async fn test_command_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CommandBuilder::new("definitely-not-a-site-generator-binary", dir.path());
        let err = builder.run().await.unwrap_err();
        assert!(matches!(err, BuildError::Spawn { .. }));
        assert!(err.to_string().contains("definitely-not-a-site-generator-binary"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CommandBuilder::new("sh", dir.path())
            .args(["-c".to_string(), "echo built > marker.txt".to_string()]);

        let status = builder.run().await.unwrap();
        assert!(status.success());
        let marker = std::fs::read_to_string(dir.path().join("marker.txt")).unwrap();
        assert_eq!(marker.trim(), "built");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CommandBuilder::new("sh", dir.path())
            .args(["-c".to_string(), "exit 3".to_string()]);

        let status = builder.run().await.unwrap();
        assert_eq!(status.code, Some(3));
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_rebuild_still_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CommandBuilder::new("sh", dir.path()).args([
            "-c".to_string(),
            "sleep 0.5; echo done > marker.txt".to_string(),
        ]);
        let gate = BuildGate::new(Arc::new(builder), RebuildMode::Coalesce);

        // The request gives up long before the build is done
        let gave_up = tokio::time::timeout(Duration::from_millis(100), gate.rebuild()).await;
        assert!(gave_up.is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gate.builds_started(), 1);
        let marker = std::fs::read_to_string(dir.path().join("marker.txt")).unwrap();
        assert_eq!(marker.trim(), "done");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout_kills_build() {
        let dir = tempfile::tempdir().unwrap();
        let builder = CommandBuilder::new("sleep", dir.path())
            .args(["5".to_string()])
            .timeout(Some(Duration::from_millis(100)));

        let status = builder.run().await.unwrap();
        assert!(status.timed_out);
        assert!(status.elapsed < Duration::from_secs(5));
    }
}
