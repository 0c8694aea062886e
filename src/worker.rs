//! Background worker running API call chains for the UI.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::{
    api::{ApiClient, SubmitOutcome, form::SubmitRequest},
    artifacts::{self, Artifact},
    config::Config,
    jobs::Job,
    scheduler::{LoadingGuard, LoadingState, RefreshScheduler, Trigger},
};

/// Commands sent from the UI to the worker.
#[derive(Debug)]
pub enum WorkerCmd {
    /// Fetch the job list and hand it to the UI.
    Refresh(Trigger),
    /// Upload a file for processing.
    Submit(SubmitRequest),
    /// Delete every job record (already confirmed by the user).
    ClearAll,
    /// Write an image or video to the output directory, optionally opening it.
    SaveArtifact { artifact: Artifact, open: bool },
    /// Open a video url in the system browser.
    OpenUrl(String),
    /// Start or stop interval refreshes as the jobs screen is shown or left.
    SetPolling(bool),
}

/// Events emitted by the worker for UI updates.
///
/// Events that end a loading-visible chain carry its guard; the UI drops it
/// once the event has been applied.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Snapshot of all jobs, numbered in request order.
    JobsFetched {
        seq: u64,
        trigger: Trigger,
        jobs: Vec<Job>,
        loading: Option<LoadingGuard>,
    },
    /// The job list could not be fetched.
    RefreshFailed {
        trigger: Trigger,
        reason: String,
        loading: Option<LoadingGuard>,
    },
    /// A submission finished.
    Submitted {
        outcome: SubmitOutcome,
        loading: Option<LoadingGuard>,
    },
    /// Clearing failed; the table must stay as it is.
    ClearFailed {
        reason: String,
        loading: Option<LoadingGuard>,
    },
    /// A file was written to the output directory.
    ArtifactSaved(PathBuf),
    /// Informational log message.
    Log(String),
    /// User-visible error message.
    Error(String),
}

/// Main worker loop: dispatch commands and drive the polling interval.
///
/// Returns when the UI drops its command sender. Chains already in flight
/// finish on their own and their events are discarded.
pub async fn run(
    mut rx: mpsc::Receiver<WorkerCmd>,
    tx: mpsc::Sender<WorkerEvent>,
    cfg: Config,
    api: ApiClient,
    loading: LoadingState,
) {
    tracing::info!("worker started");

    // The probe only logs; commands are served while it is in flight.
    let probe = api.clone();
    tokio::spawn(async move {
        match probe.ping().await {
            Ok(msg) => tracing::info!("server reachable: {msg}"),
            Err(e) => tracing::warn!("server probe failed: {e}"),
        }
    });

    let scheduler = RefreshScheduler::new(api.clone(), loading.clone(), tx.clone());
    let mut ticker = tokio::time::interval(cfg.polling.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial load is the UI's job.
    ticker.tick().await;
    let mut polling = true;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                None => break,
                Some(WorkerCmd::SetPolling(on)) => {
                    if on && !polling {
                        // Next tick one full period after the view comes back.
                        ticker.reset();
                    }
                    tracing::info!("interval refresh {}", if on { "on" } else { "off" });
                    polling = on;
                }
                Some(cmd) => handle_cmd(cmd, &cfg, &api, &scheduler, &loading, &tx),
            },
            _ = ticker.tick(), if polling => scheduler.spawn(Trigger::Interval),
        }
    }
    tracing::info!("worker stopped");
}

/// Start the chain for one command without blocking the loop.
fn handle_cmd(
    cmd: WorkerCmd,
    cfg: &Config,
    api: &ApiClient,
    scheduler: &RefreshScheduler,
    loading: &LoadingState,
    tx: &mpsc::Sender<WorkerEvent>,
) {
    match cmd {
        WorkerCmd::Refresh(trigger) => {
            tracing::info!("refresh requested ({trigger:?})");
            if trigger == Trigger::Initial {
                // Each activation of the jobs view re-reads the form token.
                reload_page(api, &cfg.server.page_path);
            }
            scheduler.spawn(trigger);
        }
        WorkerCmd::Submit(req) => {
            let (api, tx, guard) = (api.clone(), tx.clone(), loading.acquire());
            tokio::spawn(async move {
                let outcome = api.submit(&req).await;
                log_outcome(&outcome);
                let _ = tx
                    .send(WorkerEvent::Submitted {
                        outcome,
                        loading: Some(guard),
                    })
                    .await;
            });
        }
        WorkerCmd::ClearAll => {
            let (api, scheduler, tx, loading) =
                (api.clone(), scheduler.clone(), tx.clone(), loading.clone());
            tokio::spawn(async move { clear_chain(&api, &scheduler, &tx, &loading).await });
        }
        WorkerCmd::SaveArtifact { artifact, open } => {
            let (api, tx, dir) = (api.clone(), tx.clone(), PathBuf::from(&cfg.output.dir));
            tokio::spawn(async move {
                let ev = match save_artifact(&api, &dir, artifact).await {
                    Ok(path) => {
                        if open {
                            open_in_browser(&path.to_string_lossy());
                        }
                        WorkerEvent::ArtifactSaved(path)
                    }
                    Err(e) => {
                        tracing::error!("save failed: {e:#}");
                        WorkerEvent::Error(format!("save failed: {e}"))
                    }
                };
                let _ = tx.send(ev).await;
            });
        }
        WorkerCmd::OpenUrl(url) => match api.transport().resolve_url(&url) {
            Ok(full) => open_in_browser(full.as_str()),
            Err(e) => {
                let _ = tx.try_send(WorkerEvent::Error(format!("bad url {url}: {e}")));
            }
        },
        WorkerCmd::SetPolling(_) => {}
    }
}

/// Replace the markup the token provider reads, in the background.
fn reload_page(api: &ApiClient, page_path: &str) {
    let (api, path) = (api.clone(), page_path.to_string());
    tokio::spawn(async move {
        match api.transport().load_page(&path).await {
            Ok(()) => tracing::debug!("page context loaded from {path}"),
            Err(e) => tracing::warn!("page context unavailable ({path}): {e:#}"),
        }
    });
}

/// Delete all jobs, then refresh with the overlay shown.
///
/// On failure the UI gets the reason and keeps its current table.
pub(crate) async fn clear_chain(
    api: &ApiClient,
    scheduler: &RefreshScheduler,
    tx: &mpsc::Sender<WorkerEvent>,
    loading: &LoadingState,
) {
    let guard = loading.acquire();
    match api.clear_all().await {
        Ok(()) => {
            tracing::info!("history cleared");
            let _ = tx.send(WorkerEvent::Log("history cleared".into())).await;
            // Keep the overlay up until the follow-up refresh owns it.
            scheduler.run(Trigger::AfterClear).await;
            drop(guard);
        }
        Err(e) => {
            tracing::error!("clear failed: {e}");
            let _ = tx
                .send(WorkerEvent::ClearFailed {
                    reason: e.to_string(),
                    loading: Some(guard),
                })
                .await;
        }
    }
}

fn log_outcome(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::InlineResult(r) => tracing::info!(
            "inline result for {} (software: {})",
            r.original_preview.display(),
            r.software.is_some()
        ),
        SubmitOutcome::Accepted { message } => tracing::info!("job accepted: {message}"),
        SubmitOutcome::Failed(e) if e.is_validation() => tracing::info!("submission not sent: {e}"),
        SubmitOutcome::Failed(e) => tracing::error!("submission failed: {e}"),
    }
}

async fn save_artifact(api: &ApiClient, dir: &std::path::Path, artifact: Artifact) -> anyhow::Result<PathBuf> {
    match artifact {
        Artifact::Image { label, bytes } => {
            let name = artifacts::file_name(&label, &bytes, "jpg");
            artifacts::save(dir, &name, &bytes).await
        }
        Artifact::EncodedImage { label, data } => {
            let bytes = STANDARD.decode(data.trim())?;
            let name = artifacts::file_name(&label, &bytes, "jpg");
            artifacts::save(dir, &name, &bytes).await
        }
        Artifact::Video { url } => {
            let bytes = api.download(&url).await?;
            let name = artifacts::video_file_name(&url, &bytes);
            artifacts::save(dir, &name, &bytes).await
        }
    }
}

fn open_in_browser(target: &str) {
    match webbrowser::open(target) {
        Ok(()) => tracing::info!("opened {target}"),
        Err(e) => tracing::warn!("could not open {target}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeTransport;
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        api: ApiClient,
        fake: Arc<FakeTransport>,
        scheduler: RefreshScheduler,
        loading: LoadingState,
        tx: mpsc::Sender<WorkerEvent>,
        rx: mpsc::Receiver<WorkerEvent>,
    }

    fn harness() -> Harness {
        let fake = Arc::new(FakeTransport::new().with_cookies("csrftoken=tok"));
        let api = ApiClient::new(fake.clone());
        let loading = LoadingState::default();
        let (tx, rx) = mpsc::channel(16);
        let scheduler = RefreshScheduler::new(api.clone(), loading.clone(), tx.clone());
        Harness {
            api,
            fake,
            scheduler,
            loading,
            tx,
            rx,
        }
    }

    #[tokio::test]
    async fn test_clear_success_triggers_loading_refresh() {
        let mut h = harness();
        h.fake.push_json(204, "");
        h.fake.push_json(200, "[]");

        clear_chain(&h.api, &h.scheduler, &h.tx, &h.loading).await;

        assert!(matches!(h.rx.recv().await.unwrap(), WorkerEvent::Log(_)));
        match h.rx.recv().await.unwrap() {
            WorkerEvent::JobsFetched {
                trigger, jobs, loading, ..
            } => {
                assert_eq!(trigger, Trigger::AfterClear);
                assert!(jobs.is_empty());
                assert!(loading.is_some());
                assert!(h.loading.is_visible());
                drop(loading);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!h.loading.is_visible());
        let sent = h.fake.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].csrf_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_clear_failure_skips_refresh() {
        let mut h = harness();
        h.fake.push_json(500, r#"{"error":"locked"}"#);

        clear_chain(&h.api, &h.scheduler, &h.tx, &h.loading).await;

        match h.rx.recv().await.unwrap() {
            WorkerEvent::ClearFailed { reason, loading } => {
                assert_eq!(reason, "locked");
                drop(loading);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!h.loading.is_visible());
        assert_eq!(h.fake.requests().len(), 1);
    }

    async fn next_event(rx: &mut mpsc::Receiver<WorkerEvent>) -> WorkerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("worker did not answer")
            .expect("worker channel closed")
    }

    #[tokio::test]
    async fn test_commands_are_served_while_startup_requests_hang() {
        let cfg = Config::default();
        let fake = Arc::new(FakeTransport::new());
        fake.stall_path(&cfg.server.page_path).stall_path("/api/test/");
        fake.push_json(200, r#"[{"id":"a","kind":"video-filter","status":"queued"}]"#);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);
        let loading = LoadingState::default();
        tokio::spawn(run(
            cmd_rx,
            ev_tx,
            cfg,
            ApiClient::new(fake.clone()),
            loading.clone(),
        ));

        cmd_tx.send(WorkerCmd::Refresh(Trigger::Initial)).await.unwrap();
        match next_event(&mut ev_rx).await {
            WorkerEvent::JobsFetched {
                trigger, jobs, loading: guard, ..
            } => {
                assert_eq!(trigger, Trigger::Initial);
                assert_eq!(jobs.len(), 1);
                drop(guard);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!loading.is_visible());
    }

    #[tokio::test]
    async fn test_initial_refresh_reloads_page_markup() {
        let cfg = Config::default();
        let page = cfg.server.page_path.clone();
        let fake = Arc::new(FakeTransport::new());
        fake.stall_path("/api/test/");
        fake.push_json(200, "[]");
        fake.push_json(200, "[]");
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(8);
        tokio::spawn(run(
            cmd_rx,
            ev_tx,
            cfg,
            ApiClient::new(fake.clone()),
            LoadingState::default(),
        ));

        for _ in 0..2 {
            cmd_tx.send(WorkerCmd::Refresh(Trigger::Initial)).await.unwrap();
            assert!(matches!(
                next_event(&mut ev_rx).await,
                WorkerEvent::JobsFetched { .. }
            ));
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while fake.page_loads().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("page markup was not reloaded");
        assert_eq!(fake.page_loads(), vec![page.clone(), page]);
    }

    #[tokio::test]
    async fn test_save_encoded_image() {
        let h = harness();
        let dir = std::env::temp_dir().join(format!("media_jobs_tui_worker_{}", std::process::id()));
        let path = save_artifact(
            &h.api,
            &dir,
            Artifact::EncodedImage {
                label: "preview".into(),
                data: "QUJD".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ABC");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
