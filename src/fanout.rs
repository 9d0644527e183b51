//! Bounded fan-out with a join barrier.
//!
//! Every key gets its own task; a `Semaphore` caps how many run at once. A
//! failing task never cancels its siblings. After the join, every key has an
//! entry in the result map, including keys whose task panicked.
//!
//! Tasks are registered with a [`TaskTracker`]: dropping the fan-out only
//! aborts them, and `tracker.wait()` is what tells a caller they are gone.

use crate::error::{BuildError, BuildStage, ReleaseError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;

/// Default parallelism: half the host CPUs, at least one.
pub fn default_parallelism() -> usize {
    (num_cpus::get() / 2).max(1)
}

/// Runs `task(key)` for every key with at most `parallelism` in flight.
///
/// Dropping the returned future aborts all in-flight tasks; each is counted by
/// `tracker` until its future has actually been dropped.
pub async fn run_bounded<K, T, F, Fut>(
    keys: Vec<K>,
    parallelism: usize,
    tracker: &TaskTracker,
    task: F,
) -> BTreeMap<K, Result<T>>
where
    K: Ord + Clone + fmt::Display + Send + 'static,
    T: Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut join_set = JoinSet::new();

    for key in keys.iter().cloned() {
        let semaphore = Arc::clone(&semaphore);
        let work = task(key.clone());
        join_set.spawn(tracker.track_future(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            log::debug!("Starting {}", key);
            let result = work.await;
            (key, result)
        }));
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((key, result)) => {
                if let Err(e) = &result {
                    log::warn!("{} failed: {}", key, e);
                }
                results.insert(key, result);
            }
            Err(e) => log::error!("Build task did not complete: {}", e),
        }
    }

    for key in keys {
        if !results.contains_key(&key) {
            let target = key.to_string();
            results.insert(
                key,
                Err(BuildError::TaskFailed {
                    target,
                    reason: "task panicked or was cancelled".to_string(),
                }
                .into()),
            );
        }
    }

    results
}

/// Bounds one backend call; an elapsed timeout fails `target` with stage `Timeout`.
pub async fn with_timeout<T>(
    target: &str,
    what: &str,
    limit: Duration,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => Err(ReleaseError::build_failed(
            target,
            BuildStage::Timeout,
            format!("{} exceeded {}s", what, limit.as_secs()),
        )),
    }
}

/// Outcome of a fan-out, for the end-of-run report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutSummary {
    /// Keys that succeeded
    pub succeeded: Vec<String>,
    /// `(key, error message)` for every failed key
    pub failed: Vec<(String, String)>,
}

impl FanOutSummary {
    /// Summarizes a result map in key order.
    pub fn from_results<K: fmt::Display, T>(results: &BTreeMap<K, Result<T>>) -> Self {
        let mut summary = Self::default();
        for (key, result) in results {
            match result {
                Ok(_) => summary.succeeded.push(key.to_string()),
                Err(e) => summary.failed.push((key.to_string(), e.to_string())),
            }
        }
        summary
    }

    /// True if no key failed
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for FanOutSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )?;
        for (i, (key, error)) in self.failed.iter().enumerate() {
            write!(f, "\n  {}. {}: {}", i + 1, key, error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let results = run_bounded(vec![1u32, 2, 3], 2, &TaskTracker::new(), |key| async move {
            if key == 2 {
                Err(ReleaseError::build_failed(key.to_string(), BuildStage::ImageBuild, "boom"))
            } else {
                Ok(key * 10)
            }
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[&1].as_ref().ok(), Some(&10));
        assert!(results[&2].is_err());
        assert_eq!(results[&3].as_ref().ok(), Some(&30));
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = run_bounded((0..8).collect::<Vec<u32>>(), 2, &TaskTracker::new(), |_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported_as_failed() {
        let results = run_bounded(vec!["a", "b"], 1, &TaskTracker::new(), |key| async move {
            if key == "b" {
                panic!("builder crashed");
            }
            Ok(())
        })
        .await;

        assert!(results["a"].is_ok());
        let err = results["b"].as_ref().unwrap_err();
        assert!(matches!(err, ReleaseError::Build(BuildError::TaskFailed { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_fan_out_drains_tracker() {
        struct Stopped(Arc<AtomicUsize>);
        impl Drop for Stopped {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let tracker = TaskTracker::new();
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));

        let fan_out = run_bounded(vec![1u32, 2, 3], 3, &tracker, |_| {
            let started = Arc::clone(&started);
            let stopped = Arc::clone(&stopped);
            async move {
                let _stopped = Stopped(stopped);
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        });
        let interrupted = tokio::time::timeout(Duration::from_millis(100), fan_out).await;
        assert!(interrupted.is_err());

        tracker.close();
        tokio::time::timeout(Duration::from_secs(5), tracker.wait())
            .await
            .expect("aborted tasks are dropped");
        assert_eq!(stopped.load(Ordering::SeqCst), started.load(Ordering::SeqCst));
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_becomes_build_failed() {
        let result: Result<()> = with_timeout("arm64", "image build", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(ReleaseError::Build(BuildError::BuildFailed { target, stage, .. })) => {
                assert_eq!(target, "arm64");
                assert_eq!(stage, BuildStage::Timeout);
            }
            other => panic!("expected timeout failure, got {:?}", other),
        }
    }

    #[test]
    fn test_summary_enumerates_failures() {
        let mut results: BTreeMap<String, Result<()>> = BTreeMap::new();
        results.insert("amd64".to_string(), Ok(()));
        results.insert(
            "arm64".to_string(),
            Err(ReleaseError::build_failed("arm64", BuildStage::NativeBuild, "exit 1")),
        );

        let summary = FanOutSummary::from_results(&results);
        assert!(!summary.is_success());
        let rendered = summary.to_string();
        assert!(rendered.starts_with("1 succeeded, 1 failed"));
        assert!(rendered.contains("1. arm64:"));
    }
}
