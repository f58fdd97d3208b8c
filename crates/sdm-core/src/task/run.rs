//! Task execution: probe, plan, fan out segment workers, settle the state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::worker::SegmentJob;
use super::{DownloadStatus, ResolvedTarget, Task};
use crate::probe;
use crate::retry::{run_with_retry, RetryPolicy, SegmentError};
use crate::segmenter::{plan_segments, Segment};
use crate::storage::OutputFile;
use crate::url_model;

impl Task {
    /// One admission of this task, ending in `Completed`, `Failed`, or with
    /// the state already moved to `Paused`/`Canceled` by the user. The
    /// `cancel` flag belongs to this run; `pause`/`cancel` raise it.
    pub(crate) async fn run(self: Arc<Self>, cancel: Arc<AtomicBool>) {
        let policy = RetryPolicy::for_retries(self.max_retries);

        if !self.directory.is_dir() {
            self.mark_failed(&format!(
                "target directory does not exist: {}",
                self.directory.display()
            ));
            return;
        }

        if self.resolved_target().is_none() && !self.probe_target(&policy, &cancel).await {
            return;
        }
        let Some(target) = self.resolved_target() else {
            return;
        };

        // Servers that ignore Range mid-flight demote the task to a single
        // streaming segment; one demotion at most, then the normal epilogue.
        let mut use_ranges = target.accept_ranges;
        loop {
            let outcome = self
                .download_once(&target, use_ranges, policy, &cancel)
                .await;
            match outcome {
                RunOutcome::RangeFallback if use_ranges => {
                    tracing::warn!(
                        url = %self.url,
                        "server ignored Range request, restarting as a single segment"
                    );
                    use_ranges = false;
                    if let Some(t) = self.resolved.lock().unwrap().as_mut() {
                        t.accept_ranges = false;
                    }
                    for counter in self.downloaded.iter() {
                        counter.store(0, Ordering::Relaxed);
                    }
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                }
                RunOutcome::RangeFallback => {
                    // Already on the fallback path; treat as a failure.
                    self.mark_failed("range fallback failed");
                    return;
                }
                RunOutcome::Done => return,
            }
        }
    }

    /// HEAD probe with retries; on success records size and resolves the
    /// output path (exactly once per task). Returns false when the run must
    /// stop (probe exhausted or canceled).
    async fn probe_target(&self, policy: &RetryPolicy, cancel: &Arc<AtomicBool>) -> bool {
        let url = self.url.clone();
        let policy = *policy;
        let cancel_flag = Arc::clone(cancel);
        let probed = tokio::task::spawn_blocking(move || {
            run_with_retry(&policy, &cancel_flag, || probe::probe(&url))
        })
        .await;

        let head = match probed {
            Ok(Ok(head)) => head,
            Ok(Err(SegmentError::Canceled)) => return false,
            Ok(Err(e)) => {
                self.mark_failed(&format!("metadata probe failed: {e}"));
                return false;
            }
            Err(e) => {
                self.mark_failed(&format!("probe task join failed: {e}"));
                return false;
            }
        };

        if let Some(len) = head.content_length {
            self.total_size.store(len as i64, Ordering::Relaxed);
        }
        let name = url_model::derive_filename(
            head.final_url.as_deref().unwrap_or(&self.url),
            head.content_disposition.as_deref(),
            head.content_type.as_deref(),
        );
        let path = url_model::unique_path(&self.directory, &name);
        tracing::info!(
            url = %self.url,
            path = %path.display(),
            size = self.total_size.load(Ordering::Relaxed),
            accept_ranges = head.accept_ranges,
            "resolved download target"
        );
        *self.resolved.lock().unwrap() = Some(ResolvedTarget {
            file_name: name,
            file_path: path,
            accept_ranges: head.accept_ranges,
        });
        true
    }

    /// One fan-out over the segment workers, plus the state epilogue.
    async fn download_once(
        &self,
        target: &ResolvedTarget,
        use_ranges: bool,
        policy: RetryPolicy,
        cancel: &Arc<AtomicBool>,
    ) -> RunOutcome {
        let total = match self.total_size.load(Ordering::Relaxed) {
            n if n >= 0 => Some(n as u64),
            _ => None,
        };
        let effective_threads = match total {
            Some(_) if use_ranges => self.thread_count,
            _ => 1,
        };

        let file = match OutputFile::open(&target.file_path) {
            Ok(f) => f,
            Err(e) => {
                self.mark_failed(&format!("open output file: {e:#}"));
                return RunOutcome::Done;
            }
        };
        if let Some(size) = total {
            if size > 0 && matches!(file.len(), Ok(0)) {
                if let Err(e) = file.preallocate(size) {
                    self.mark_failed(&format!("preallocate output file: {e:#}"));
                    return RunOutcome::Done;
                }
            }
        }

        let segments: Vec<Segment> = match total {
            Some(size) => plan_segments(size, effective_threads),
            // Unknown size: a single open-ended segment owns the whole body.
            None => vec![Segment {
                start: 0,
                end: u64::MAX,
            }],
        };

        let mut handles = Vec::with_capacity(segments.len());
        for (index, segment) in segments.into_iter().enumerate() {
            let job = SegmentJob {
                url: self.url.clone(),
                index,
                segment,
                total_known: total.is_some(),
                use_ranges,
                file: file.clone(),
                limiter: Arc::clone(&self.limiter),
                progress: Arc::clone(&self.downloaded),
                cancel: Arc::clone(cancel),
                policy,
                buffer_size: self.buffer_size,
            };
            handles.push(tokio::task::spawn_blocking(move || job.run()));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(Err(SegmentError::Storage(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("segment worker join failed: {e}"),
                )))),
            }
        }

        if use_ranges
            && results
                .iter()
                .any(|r| matches!(r, Err(SegmentError::RangeNotSupported)))
        {
            return RunOutcome::RangeFallback;
        }

        if results.iter().all(|r| r.is_ok()) {
            if let Err(e) = file.sync() {
                self.mark_failed(&format!("sync output file: {e:#}"));
                return RunOutcome::Done;
            }
            if total.is_none() {
                // The stream told us the size; record it for observers.
                self.total_size
                    .store(self.downloaded() as i64, Ordering::Relaxed);
            }
            let mut state = self.state.lock().unwrap();
            if state.status == DownloadStatus::InProgress {
                state.status = DownloadStatus::Completed;
                tracing::info!(url = %self.url, bytes = self.downloaded(), "task completed");
            }
        } else {
            if let Some(first) = results.iter().find_map(|r| match r {
                Err(e) if !matches!(e, SegmentError::Canceled) => Some(e),
                _ => None,
            }) {
                tracing::warn!(url = %self.url, error = %first, "segment failed after retries");
            }
            let mut state = self.state.lock().unwrap();
            if state.status == DownloadStatus::InProgress {
                // Cancel-driven unwinds already moved the state to Paused or
                // Canceled; anything still InProgress here is a real failure.
                state.status = DownloadStatus::Failed;
            }
        }
        RunOutcome::Done
    }
}

enum RunOutcome {
    Done,
    RangeFallback,
}
