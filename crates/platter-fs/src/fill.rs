//! Tracked background cache fills.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};

use platter_config::{log_cache_debug, log_cache_warn};
use tokio::sync::Notify;

use crate::{lock, FsError, Result};

/// Reports kept for [`FillQueue::wait`] before the oldest are dropped.
pub const DEFAULT_REPORT_LIMIT: usize = 1024;

/// Outcome of one background fill.
#[derive(Debug)]
pub struct FillReport {
    pub path: String,
    /// Bytes written to the cache.
    pub result: Result<u64>,
}

/// Runs cache fills in the background, at most one per path at a time.
///
/// Fills are detached from the request that started them and starting one
/// never waits on another. [`FillQueue::wait`] blocks until no fill is
/// running. Only the most recent reports are retained between waits.
pub struct FillQueue {
    shared: Arc<Shared>,
}

struct Shared {
    active: Mutex<HashSet<String>>,
    finished: Mutex<VecDeque<FillReport>>,
    report_limit: usize,
    done: Notify,
}

impl Shared {
    fn finish(&self, report: FillReport) {
        // The report lands before the path is released so an empty active set
        // means every report is visible
        let path = report.path.clone();
        {
            let mut finished = lock(&self.finished);
            if self.report_limit > 0 {
                while finished.len() >= self.report_limit {
                    finished.pop_front();
                }
                finished.push_back(report);
            }
        }
        lock(&self.active).remove(&path);
        self.done.notify_waiters();
    }
}

impl Default for FillQueue {
    fn default() -> Self {
        Self::with_report_limit(DEFAULT_REPORT_LIMIT)
    }
}

impl FillQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report_limit(report_limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: Mutex::new(HashSet::new()),
                finished: Mutex::new(VecDeque::new()),
                report_limit,
                done: Notify::new(),
            }),
        }
    }

    /// Start `fill` for `path` unless one is already running.
    ///
    /// Returns whether a new fill was started. Must be called from within a
    /// tokio runtime.
    pub fn spawn<F>(&self, path: &str, fill: F) -> bool
    where
        F: Future<Output = Result<u64>> + Send + 'static,
    {
        if !lock(&self.shared.active).insert(path.to_string()) {
            log_cache_debug!("Fill already running", path = path);
            return false;
        }

        let shared = Arc::clone(&self.shared);
        let path = path.to_string();
        tokio::spawn(async move {
            // Run the fill in its own task so a panic still releases the path
            let result = match tokio::spawn(fill).await {
                Ok(result) => result,
                Err(e) => Err(FsError::from(e)),
            };
            match &result {
                Ok(bytes) => {
                    log_cache_debug!("Cache fill complete", path = path.as_str(), bytes = *bytes)
                }
                Err(e) => {
                    let error = e.to_string();
                    log_cache_warn!("Cache fill failed", path = path.as_str(), error = error.as_str());
                }
            }
            shared.finish(FillReport { path, result });
        });
        true
    }

    /// Number of fills currently running.
    pub fn active_count(&self) -> usize {
        lock(&self.shared.active).len()
    }

    /// Number of reports retained for the next [`FillQueue::wait`].
    pub fn report_count(&self) -> usize {
        lock(&self.shared.finished).len()
    }

    /// Wait until no fill is running, returning reports not yet collected.
    pub async fn wait(&self) -> Vec<FillReport> {
        loop {
            let notified = self.shared.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if lock(&self.shared.active).is_empty() {
                break;
            }
            notified.await;
        }
        lock(&self.shared.finished).drain(..).collect()
    }
}
