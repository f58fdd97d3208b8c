//! A single download: state machine, per-segment progress, and the
//! pause/resume/cancel surface the UI drives.
//!
//! A task is created `Pending` by its queue and admitted by the scheduler
//! through [`Task::resume`], which spawns the run asynchronously. The run
//! probes the server once, resolves the output path once, then fans out one
//! blocking worker per segment. `pause` and `cancel` raise the run's cancel
//! flag; workers observe it between reads and inside the rate limiter, so
//! the task unwinds promptly without losing written bytes.

mod run;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::limiter::SharedLimiter;

/// Lifecycle states. `Completed`, `Canceled`, and `Failed` are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Canceled,
    Failed,
}

/// Output target, fixed on the first successful probe.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedTarget {
    pub file_name: String,
    pub file_path: PathBuf,
    pub accept_ranges: bool,
}

struct TaskState {
    status: DownloadStatus,
    /// Cancel flag of the current (or most recent) run. Replaced with a
    /// fresh flag on every admission so an old run cannot cancel a new one.
    cancel: Arc<AtomicBool>,
    /// Join handle of the current run. A resume after a pause awaits the
    /// draining run before starting the next one, so two runs never write
    /// or count bytes concurrently.
    run: Option<tokio::task::JoinHandle<()>>,
}

pub struct Task {
    url: String,
    directory: PathBuf,
    thread_count: usize,
    max_retries: u32,
    buffer_size: usize,
    limiter: Arc<SharedLimiter>,

    /// Total size in bytes; -1 until the probe discovers it (and it may
    /// stay -1 for servers that omit Content-Length).
    total_size: AtomicI64,
    /// Per-segment byte counters, advanced only by the owning worker.
    downloaded: Arc<Vec<AtomicU64>>,
    state: Mutex<TaskState>,
    resolved: Mutex<Option<ResolvedTarget>>,
}

impl Task {
    pub fn new(
        url: impl Into<String>,
        directory: impl Into<PathBuf>,
        thread_count: usize,
        max_retries: u32,
        buffer_size: usize,
        limiter: Arc<SharedLimiter>,
    ) -> Self {
        let thread_count = thread_count.max(1);
        Self {
            url: url.into(),
            directory: directory.into(),
            thread_count,
            max_retries,
            buffer_size,
            limiter,
            total_size: AtomicI64::new(-1),
            downloaded: Arc::new((0..thread_count).map(|_| AtomicU64::new(0)).collect()),
            state: Mutex::new(TaskState {
                status: DownloadStatus::Pending,
                cancel: Arc::new(AtomicBool::new(false)),
                run: None,
            }),
            resolved: Mutex::new(None),
        }
    }

    /// Start a `Pending` task or continue a `Paused` one from its current
    /// per-segment progress. Non-blocking: the run is spawned onto the
    /// runtime. No-op in any other state.
    pub fn resume(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        match state.status {
            DownloadStatus::Pending | DownloadStatus::Paused => {
                state.cancel = Arc::new(AtomicBool::new(false));
                state.status = DownloadStatus::InProgress;
            }
            other => {
                tracing::debug!(url = %self.url, status = ?other, "resume ignored");
                return;
            }
        }
        let cancel = Arc::clone(&state.cancel);
        let previous = state.run.take();
        let task = Arc::clone(self);
        state.run = Some(tokio::spawn(async move {
            if let Some(handle) = previous {
                let _ = handle.await;
            }
            task.run(cancel).await;
        }));
    }

    /// Stop an `InProgress` task, keeping its progress. No-op otherwise.
    pub fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status == DownloadStatus::InProgress {
            state.cancel.store(true, Ordering::Relaxed);
            state.status = DownloadStatus::Paused;
            tracing::info!(url = %self.url, "task paused");
        }
    }

    /// Cancel the task and delete the partial file best-effort. Valid from
    /// `Pending`, `InProgress`, and `Paused`; terminal.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock().unwrap();
            match state.status {
                DownloadStatus::Pending
                | DownloadStatus::InProgress
                | DownloadStatus::Paused => {
                    state.cancel.store(true, Ordering::Relaxed);
                    state.status = DownloadStatus::Canceled;
                }
                _ => return,
            }
        }
        tracing::info!(url = %self.url, "task canceled");
        if let Some(path) = self.file_path() {
            crate::storage::remove_partial(&path);
        }
    }

    /// Reset a `Failed` task back to `Pending` so the scheduler picks it up
    /// again. Per-segment progress and the cancel handle are cleared.
    /// Requires range support (otherwise progress could not be trusted) and
    /// the resolved output file still being present; returns false when the
    /// reset is not possible.
    pub fn retry(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.status != DownloadStatus::Failed {
            return false;
        }
        if let Some(target) = self.resolved.lock().unwrap().as_ref() {
            if !target.accept_ranges || !target.file_path.exists() {
                return false;
            }
        }
        for counter in self.downloaded.iter() {
            counter.store(0, Ordering::Relaxed);
        }
        state.cancel = Arc::new(AtomicBool::new(false));
        state.status = DownloadStatus::Pending;
        tracing::info!(url = %self.url, "failed task reset to pending");
        true
    }

    pub fn status(&self) -> DownloadStatus {
        self.state.lock().unwrap().status
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Total size in bytes, or -1 while unknown.
    pub fn total_size(&self) -> i64 {
        self.total_size.load(Ordering::Relaxed)
    }

    /// Bytes downloaded, summed across segments. Mid-flight reads may land
    /// between two consistent totals, which is fine for progress display.
    pub fn downloaded(&self) -> u64 {
        self.downloaded
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Per-segment progress snapshot.
    pub fn downloaded_per_segment(&self) -> Vec<u64> {
        self.downloaded
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    /// Resolved output path, once the first probe has succeeded.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.resolved
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.file_path.clone())
    }

    /// Resolved output filename, once the first probe has succeeded.
    pub fn file_name(&self) -> Option<String> {
        self.resolved
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.file_name.clone())
    }

    pub(crate) fn resolved_target(&self) -> Option<ResolvedTarget> {
        self.resolved.lock().unwrap().clone()
    }

    fn mark_failed(&self, reason: &str) {
        tracing::warn!(url = %self.url, reason, "task failed");
        let mut state = self.state.lock().unwrap();
        if state.status == DownloadStatus::InProgress {
            state.status = DownloadStatus::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task() -> Arc<Task> {
        Arc::new(Task::new(
            "http://example.invalid/file.bin",
            std::env::temp_dir(),
            4,
            0,
            64 * 1024,
            Arc::new(SharedLimiter::new(0)),
        ))
    }

    #[test]
    fn new_task_is_pending_with_unknown_size() {
        let task = make_task();
        assert_eq!(task.status(), DownloadStatus::Pending);
        assert_eq!(task.total_size(), -1);
        assert_eq!(task.downloaded(), 0);
        assert_eq!(task.downloaded_per_segment().len(), 4);
        assert!(task.file_path().is_none());
    }

    #[test]
    fn thread_count_is_clamped_to_one() {
        let task = Task::new(
            "http://example.invalid/x",
            std::env::temp_dir(),
            0,
            0,
            1024,
            Arc::new(SharedLimiter::new(0)),
        );
        assert_eq!(task.thread_count(), 1);
        assert_eq!(task.downloaded_per_segment().len(), 1);
    }

    #[test]
    fn pause_is_a_noop_unless_in_progress() {
        let task = make_task();
        task.pause();
        assert_eq!(task.status(), DownloadStatus::Pending);
    }

    #[test]
    fn cancel_from_pending_is_terminal() {
        let task = make_task();
        task.cancel();
        assert_eq!(task.status(), DownloadStatus::Canceled);
        // Terminal: further transitions are ignored.
        task.pause();
        assert_eq!(task.status(), DownloadStatus::Canceled);
        task.cancel();
        assert_eq!(task.status(), DownloadStatus::Canceled);
    }

    #[test]
    fn retry_only_applies_to_failed_tasks() {
        let task = make_task();
        assert!(!task.retry());

        task.state.lock().unwrap().status = DownloadStatus::Failed;
        task.downloaded[0].store(42, Ordering::Relaxed);
        assert!(task.retry());
        assert_eq!(task.status(), DownloadStatus::Pending);
        assert_eq!(task.downloaded(), 0);
    }

    #[test]
    fn retry_refuses_without_range_support() {
        let task = make_task();
        *task.resolved.lock().unwrap() = Some(ResolvedTarget {
            file_name: "x.bin".into(),
            file_path: std::env::temp_dir().join("sdm-retry-missing.bin"),
            accept_ranges: false,
        });
        task.state.lock().unwrap().status = DownloadStatus::Failed;
        assert!(!task.retry());
        assert_eq!(task.status(), DownloadStatus::Failed);
    }
}
