//! A named admission controller: bounded concurrent downloads under a
//! shared speed limit and an optional daily activation window.
//!
//! The scheduler is a polling loop. Each tick it counts `InProgress` tasks
//! and promotes `Pending` ones in insertion order until the concurrency cap
//! is reached. Stopping the queue (explicitly or because the activation
//! window closed) pauses every in-flight task; the queue can be started
//! again later and paused tasks resume from their recorded progress.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::SdmConfig;
use crate::limiter::SharedLimiter;
use crate::task::{DownloadStatus, Task};
use crate::time_window::{InvalidTimeWindow, TimeInterval};

/// Structured errors surfaced by queue construction and configuration.
#[derive(Debug)]
pub enum QueueError {
    /// Directory does not exist or is not a directory.
    InvalidDirectory(PathBuf),
    /// Malformed activation window string.
    InvalidTimeWindow(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::InvalidDirectory(path) => {
                write!(f, "directory does not exist: {}", path.display())
            }
            QueueError::InvalidTimeWindow(input) => {
                write!(
                    f,
                    "invalid time window {input:?} (expected HH:MM:SS-HH:MM:SS or \"always\")"
                )
            }
        }
    }
}

impl std::error::Error for QueueError {}

impl From<InvalidTimeWindow> for QueueError {
    fn from(e: InvalidTimeWindow) -> Self {
        QueueError::InvalidTimeWindow(e.0)
    }
}

/// Settings for a new queue. `directory` falls back to the user's downloads
/// directory when it does not exist.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub directory: PathBuf,
    pub max_concurrent: usize,
    pub threads_per_task: usize,
    pub max_retries: u32,
    pub speed_limit_bps: u64,
    pub active_interval: Option<TimeInterval>,
    pub poll_interval: Duration,
    pub buffer_size: usize,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self::with_defaults(name, directory, &SdmConfig::default())
    }

    /// Queue settings seeded from the global configuration file.
    pub fn with_defaults(
        name: impl Into<String>,
        directory: impl Into<PathBuf>,
        defaults: &SdmConfig,
    ) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            max_concurrent: defaults.max_concurrent,
            threads_per_task: defaults.threads_per_task,
            max_retries: defaults.max_retries,
            speed_limit_bps: defaults.speed_limit_bps,
            active_interval: None,
            poll_interval: defaults.poll_interval(),
            buffer_size: defaults.buffer_size,
        }
    }
}

pub struct Queue {
    id: u64,
    name: RwLock<String>,
    directory: RwLock<PathBuf>,
    max_concurrent: AtomicUsize,
    threads_per_task: usize,
    max_retries: u32,
    buffer_size: usize,
    poll_interval: Duration,
    speed_limit: AtomicU64,
    limiter: Arc<SharedLimiter>,
    active_interval: RwLock<Option<TimeInterval>>,
    tasks: RwLock<Vec<Arc<Task>>>,
    run_token: Mutex<Option<CancellationToken>>,
}

impl Queue {
    pub fn new(id: u64, config: QueueConfig) -> Self {
        let directory = resolve_queue_directory(config.directory);
        Self {
            id,
            name: RwLock::new(config.name),
            directory: RwLock::new(directory),
            max_concurrent: AtomicUsize::new(config.max_concurrent.max(1)),
            threads_per_task: config.threads_per_task.max(1),
            max_retries: config.max_retries,
            buffer_size: config.buffer_size,
            poll_interval: config.poll_interval,
            speed_limit: AtomicU64::new(config.speed_limit_bps),
            limiter: Arc::new(SharedLimiter::new(config.speed_limit_bps)),
            active_interval: RwLock::new(config.active_interval),
            tasks: RwLock::new(Vec::new()),
            run_token: Mutex::new(None),
        }
    }

    /// Append a task sharing this queue's live limiter. An explicit non-empty
    /// `directory` overrides the queue directory and must exist.
    pub fn add_task(&self, url: &str, directory: Option<&Path>) -> Result<Arc<Task>, QueueError> {
        let dir = match directory {
            None => self.directory(),
            Some(d) if d.as_os_str().is_empty() => self.directory(),
            Some(d) => {
                if d.is_dir() {
                    d.to_path_buf()
                } else {
                    return Err(QueueError::InvalidDirectory(d.to_path_buf()));
                }
            }
        };
        let task = Arc::new(Task::new(
            url,
            dir,
            self.threads_per_task,
            self.max_retries,
            self.buffer_size,
            Arc::clone(&self.limiter),
        ));
        self.tasks.write().unwrap().push(Arc::clone(&task));
        tracing::debug!(queue = %self.name(), url, "task added");
        Ok(task)
    }

    /// Start the scheduler loop. No-op while a loop is already running;
    /// valid again after `stop`.
    pub fn start(self: &Arc<Self>) {
        let token = {
            let mut guard = self.run_token.lock().unwrap();
            if let Some(existing) = guard.as_ref() {
                if !existing.is_cancelled() {
                    tracing::debug!(queue = %self.name(), "scheduler already running");
                    return;
                }
            }
            let token = CancellationToken::new();
            *guard = Some(token.clone());
            token
        };
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.run_loop(token).await });
    }

    /// Stop the scheduler and pause in-flight work. Idempotent.
    pub fn stop(&self) {
        if let Some(token) = self.run_token.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    /// True while a scheduler loop is active (including the pre-window wait).
    pub fn is_running(&self) -> bool {
        self.run_token
            .lock()
            .unwrap()
            .as_ref()
            .map(|token| !token.is_cancelled())
            .unwrap_or(false)
    }

    async fn run_loop(self: Arc<Self>, stop: CancellationToken) {
        let window = *self.active_interval.read().unwrap();
        let deadline = match window {
            Some(win) => {
                tokio::select! {
                    _ = stop.cancelled() => {
                        self.pause_in_flight();
                        return;
                    }
                    _ = win.wait_until_active() => {}
                }
                Some(tokio::time::Instant::now() + win.time_until_close())
            }
            None => None,
        };
        tracing::info!(queue = %self.name(), "scheduler started");

        loop {
            if stop.is_cancelled() {
                break;
            }
            if let Some(d) = deadline {
                if tokio::time::Instant::now() >= d {
                    tracing::info!(queue = %self.name(), "activation window closed");
                    break;
                }
            }
            self.admit_pending();
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        // Self-cancel so a deadline exit also reads as stopped and the
        // queue can be started again.
        stop.cancel();
        self.pause_in_flight();
        tracing::info!(queue = %self.name(), "scheduler stopped");
    }

    /// One scheduling pass: promote `Pending` tasks, oldest first, while
    /// fewer than `max_concurrent` are in flight.
    fn admit_pending(&self) {
        let tasks = self.tasks.read().unwrap().clone();
        let cap = self.max_concurrent.load(Ordering::Relaxed);
        let mut in_flight = tasks
            .iter()
            .filter(|t| t.status() == DownloadStatus::InProgress)
            .count();
        for task in &tasks {
            if in_flight >= cap {
                break;
            }
            if task.status() == DownloadStatus::Pending {
                tracing::info!(queue = %self.name(), url = %task.url(), "admitting task");
                task.resume();
                in_flight += 1;
            }
        }
    }

    fn pause_in_flight(&self) {
        for task in self.tasks.read().unwrap().iter() {
            if task.status() == DownloadStatus::InProgress {
                task.pause();
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap() = name.into();
    }

    pub fn directory(&self) -> PathBuf {
        self.directory.read().unwrap().clone()
    }

    /// Change the queue directory; applies to tasks added afterwards.
    pub fn set_directory(&self, directory: impl Into<PathBuf>) -> Result<(), QueueError> {
        let directory = directory.into();
        if !directory.is_dir() {
            return Err(QueueError::InvalidDirectory(directory));
        }
        *self.directory.write().unwrap() = directory;
        Ok(())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::Relaxed)
    }

    pub fn set_max_concurrent(&self, n: usize) {
        self.max_concurrent.store(n.max(1), Ordering::Relaxed);
    }

    pub fn speed_limit(&self) -> u64 {
        self.speed_limit.load(Ordering::Relaxed)
    }

    /// Replace the shared limiter; workers pick up the new rate on their
    /// next buffer acquire, including transfers already in flight.
    pub fn set_speed_limit(&self, bytes_per_sec: u64) {
        self.limiter.replace(bytes_per_sec);
        self.speed_limit.store(bytes_per_sec, Ordering::Relaxed);
        tracing::info!(queue = %self.name(), bytes_per_sec, "speed limit changed");
    }

    pub fn active_interval(&self) -> Option<TimeInterval> {
        *self.active_interval.read().unwrap()
    }

    pub fn set_active_interval(&self, window: Option<TimeInterval>) {
        *self.active_interval.write().unwrap() = window;
    }

    /// Parse and set the activation window. Takes effect the next time the
    /// scheduler starts.
    pub fn set_active_interval_from_string(&self, input: &str) -> Result<(), QueueError> {
        let window = TimeInterval::parse(input)?;
        *self.active_interval.write().unwrap() = window;
        Ok(())
    }

    /// Snapshot of the queue's tasks in insertion order.
    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.read().unwrap().clone()
    }
}

/// Validate the configured directory, falling back to the conventional
/// downloads directory when it is missing.
fn resolve_queue_directory(directory: PathBuf) -> PathBuf {
    if directory.is_dir() {
        return directory;
    }
    let fallback = dirs::download_dir().or_else(|| dirs::home_dir().map(|h| h.join("Downloads")));
    match fallback {
        Some(d) if d.is_dir() => {
            tracing::warn!(
                requested = %directory.display(),
                fallback = %d.display(),
                "queue directory missing, using downloads directory"
            );
            d
        }
        _ => {
            tracing::warn!(
                requested = %directory.display(),
                "queue directory missing and no downloads directory found"
            );
            directory
        }
    }
}
