//! Refresh triggers, the loading indicator, and fetch sequencing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::worker::WorkerEvent;

/// What started a fetch-then-reconcile chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// View activation.
    Initial,
    /// Background polling tick.
    Interval,
    /// User pressed refresh.
    Manual,
    /// Follow-up after a successful clear.
    AfterClear,
}

impl Trigger {
    /// Background polling stays silent; everything else shows the overlay.
    pub fn shows_loading(self) -> bool {
        !matches!(self, Trigger::Interval)
    }
}

/// Visible-loading counter shared by all call chains.
#[derive(Clone, Debug, Default)]
pub struct LoadingState {
    active: Arc<AtomicUsize>,
}

impl LoadingState {
    /// Mark a chain as loading until the returned guard is dropped.
    pub fn acquire(&self) -> LoadingGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        LoadingGuard {
            active: self.active.clone(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }
}

/// Releases its hold on the loading indicator when dropped.
#[derive(Debug)]
pub struct LoadingGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Monotonic fetch numbers; the first call returns 1.
#[derive(Clone, Debug, Default)]
pub struct Sequencer {
    last: Arc<AtomicU64>,
}

impl Sequencer {
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Runs fetch-then-reconcile chains for every trigger.
///
/// Chains may overlap; each snapshot carries its sequence number so the UI
/// only applies the newest one. The loading guard travels with the event and
/// is released after the UI has applied it.
#[derive(Clone)]
pub struct RefreshScheduler {
    api: ApiClient,
    loading: LoadingState,
    seq: Sequencer,
    events: mpsc::Sender<WorkerEvent>,
}

impl RefreshScheduler {
    pub fn new(api: ApiClient, loading: LoadingState, events: mpsc::Sender<WorkerEvent>) -> Self {
        Self {
            api,
            loading,
            seq: Sequencer::default(),
            events,
        }
    }

    /// Start a chain without waiting for it.
    pub fn spawn(&self, trigger: Trigger) {
        let this = self.clone();
        tokio::spawn(async move { this.run(trigger).await });
    }

    /// One fetch followed by a snapshot (or failure) event.
    pub async fn run(&self, trigger: Trigger) {
        let loading = trigger.shows_loading().then(|| self.loading.acquire());
        let seq = self.seq.next();
        tracing::debug!("refresh #{seq} ({trigger:?})");

        let ev = match self.api.fetch_all().await {
            Ok(jobs) => WorkerEvent::JobsFetched {
                seq,
                trigger,
                jobs,
                loading,
            },
            Err(e) => {
                tracing::warn!("refresh #{seq} ({trigger:?}) failed: {e}");
                WorkerEvent::RefreshFailed {
                    trigger,
                    reason: e.to_string(),
                    loading,
                }
            }
        };
        // If the UI is gone the event (and its guard) is simply dropped.
        let _ = self.events.send(ev).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeTransport;

    fn scheduler(fake: Arc<FakeTransport>) -> (RefreshScheduler, LoadingState, mpsc::Receiver<WorkerEvent>) {
        let loading = LoadingState::default();
        let (tx, rx) = mpsc::channel(8);
        (
            RefreshScheduler::new(ApiClient::new(fake), loading.clone(), tx),
            loading,
            rx,
        )
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let loading = LoadingState::default();
        assert!(!loading.is_visible());
        let a = loading.acquire();
        let b = loading.acquire();
        drop(a);
        assert!(loading.is_visible());
        drop(b);
        assert!(!loading.is_visible());
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let seq = Sequencer::default();
        let clone = seq.clone();
        assert_eq!(seq.next(), 1);
        assert_eq!(clone.next(), 2);
        assert_eq!(seq.next(), 3);
    }

    #[tokio::test]
    async fn test_manual_refresh_holds_loading_until_applied() {
        let fake = Arc::new(FakeTransport::new());
        fake.push_json(200, r#"[{"id":"a","kind":"image-grayscale"}]"#);
        let (s, loading, mut rx) = scheduler(fake);

        s.run(Trigger::Manual).await;
        assert!(loading.is_visible());
        match rx.recv().await.unwrap() {
            WorkerEvent::JobsFetched { seq, jobs, loading: guard, .. } => {
                assert_eq!(seq, 1);
                assert_eq!(jobs.len(), 1);
                drop(guard);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!loading.is_visible());
    }

    #[tokio::test]
    async fn test_failure_releases_loading() {
        let fake = Arc::new(FakeTransport::new());
        fake.push_json(502, "bad gateway");
        let (s, loading, mut rx) = scheduler(fake);

        s.run(Trigger::Initial).await;
        let ev = rx.recv().await.unwrap();
        assert!(matches!(
            &ev,
            WorkerEvent::RefreshFailed { reason, .. } if reason == "Failed to load history"
        ));
        drop(ev);
        assert!(!loading.is_visible());
    }

    #[tokio::test]
    async fn test_interval_is_silent() {
        let fake = Arc::new(FakeTransport::new());
        fake.push_json(200, "[]");
        let (s, loading, mut rx) = scheduler(fake);

        s.run(Trigger::Interval).await;
        assert!(!loading.is_visible());
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkerEvent::JobsFetched { loading: None, trigger: Trigger::Interval, .. }
        ));
    }

    #[tokio::test]
    async fn test_closed_ui_drops_guard() {
        let fake = Arc::new(FakeTransport::new());
        fake.push_json(200, "[]");
        let (s, loading, rx) = scheduler(fake);
        drop(rx);

        s.run(Trigger::Manual).await;
        assert!(!loading.is_visible());
    }
}
