//! TUIのイベントループ、入力処理、状態管理。

mod handlers;
mod render;

use anyhow::Result;
use crossterm::event::{self, Event};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::mpsc;

use crate::{
    api::{ApiClient, InlineResult, form::SubmitRequest, transport::HttpTransport},
    config::Config,
    events::{Notice, UiState, present_outcome},
    input::InputBoxState,
    jobs::JobKind,
    reconcile::JobStore,
    scheduler::{LoadingState, Trigger},
    shortcuts::Shortcuts,
    ui::Tui,
    worker::{self, WorkerCmd, WorkerEvent},
};

use handlers::{handle_key, is_ctrl_c};
use render::draw;

/// 入力処理と描画で共有するアプリ状態。
pub struct App {
    /// メモリ上の現在設定。
    pub cfg: Config,
    /// 選択位置やステータスなどUI固有の状態。
    pub ui: UiState,
    /// 最後に適用したジョブ一覧と描画用テーブル。
    pub store: JobStore,
    /// ローディング表示の参照カウンタ（Workerと共有）。
    pub loading: LoadingState,
    /// Workerへのコマンド送信チャネル。
    pub worker_tx: mpsc::Sender<WorkerCmd>,
    /// Workerからのイベント受信チャネル。
    pub worker_rx: mpsc::Receiver<WorkerEvent>,
    /// 送信画面のフォーム内容。
    pub form: SubmitRequest,
    /// 次に適用するプリセット番号。
    pub preset_idx: usize,
    /// 直近の同期処理結果（結果カード）。
    pub results: Option<InlineResult>,
    /// 定期更新の失敗を通知済みか（復旧するまで再通知しない）。
    pub poll_failed: bool,
    /// 入力ボックスの状態（入力中はSome）。
    pub input_box: Option<InputBoxState>,
    /// ショートカットキー設定。
    pub shortcuts: Shortcuts,
}

impl App {
    pub fn new(
        cfg: Config,
        shortcuts: Shortcuts,
        worker_tx: mpsc::Sender<WorkerCmd>,
        worker_rx: mpsc::Receiver<WorkerEvent>,
        loading: LoadingState,
    ) -> Self {
        Self {
            cfg,
            ui: UiState::new(),
            store: JobStore::new(),
            loading,
            worker_tx,
            worker_rx,
            form: SubmitRequest::new(JobKind::ImageGrayscale),
            preset_idx: 0,
            results: None,
            poll_failed: false,
            input_box: None,
            shortcuts,
        }
    }
}

/// ユーザーが終了するまでメインTUIループを回す。
pub async fn run_app(terminal: &mut Tui) -> Result<()> {
    // 設定ファイルを読み込む（初回はデフォルトを生成）。
    let cfg = Config::load_or_default(&PathBuf::from("config.toml"))?;
    let shortcuts = Shortcuts::load_or_default("shortcut.toml")?;

    // HTTPクライアントはWorker側で使う。
    let transport = HttpTransport::new(&cfg.server)?;
    let api = ApiClient::new(Arc::new(transport));
    let loading = LoadingState::default();

    // Worker通信用のコマンド/イベントチャネルを作る。
    let (tx_cmd, rx_cmd) = mpsc::channel::<WorkerCmd>(64);
    let (tx_ev, rx_ev) = mpsc::channel::<WorkerEvent>(256);
    tokio::spawn(worker::run(rx_cmd, tx_ev, cfg.clone(), api, loading.clone()));

    let mut app = App::new(cfg, shortcuts, tx_cmd, rx_ev, loading);

    // 画面表示時の初回取得。
    app.worker_tx.send(WorkerCmd::Refresh(Trigger::Initial)).await?;
    app.ui.status = "Loading jobs...".into();

    loop {
        terminal.draw(|f| draw(f, &app))?;

        // 入力処理の前にWorkerイベントを消化する。
        while let Ok(ev) = app.worker_rx.try_recv() {
            handle_worker_event(&mut app, ev);
        }

        // UIの応答性確保のため短いタイムアウトで入力をポーリングする。
        if event::poll(Duration::from_millis(50))?
            && let Event::Key(k) = event::read()?
        {
            if is_ctrl_c(&k) {
                break;
            }
            if handle_key(&mut app, k).await? {
                break;
            }
        }
    }
    // コマンド送信側を閉じるとWorkerのループが終わる。
    tracing::info!("ui loop finished");
    Ok(())
}

/// WorkerイベントをUI状態へ反映する。
///
/// ローディングのガードは反映が終わった後に破棄する。
fn handle_worker_event(app: &mut App, ev: WorkerEvent) {
    match ev {
        WorkerEvent::JobsFetched {
            seq,
            trigger,
            jobs,
            loading,
        } => {
            if app.store.apply(seq, jobs) {
                let n = app.store.jobs().len();
                // 行数が減った場合も選択を範囲内に収める。
                app.ui.selected = app.ui.selected.min(n.saturating_sub(1));
                app.ui.status = format!("{n} jobs");
                app.poll_failed = false;
                if trigger != Trigger::Interval {
                    tracing::info!("jobs refreshed ({trigger:?}): {n}");
                }
            }
            drop(loading);
        }
        WorkerEvent::RefreshFailed {
            trigger,
            reason,
            loading,
        } => {
            app.ui.status = format!("Error: {reason}");
            // 操作による失敗は表示中の通知を置き換える。
            // 定期更新の失敗は復旧するまで1回だけ、他の通知が無いときに出す。
            let raise = match trigger {
                Trigger::Interval => !app.poll_failed && app.ui.notice.is_none(),
                _ => true,
            };
            if raise {
                app.ui.notice = Some(Notice::error(reason));
            }
            if trigger == Trigger::Interval {
                app.poll_failed = true;
            }
            drop(loading);
        }
        WorkerEvent::Submitted { outcome, loading } => {
            let view = present_outcome(outcome, &app.cfg.server.history_link());
            app.results = view.result;
            if let Some(n) = view.notice {
                app.ui.status = n.message.clone();
                app.ui.notice = Some(n);
            } else {
                app.ui.status = "Processed".into();
            }
            drop(loading);
        }
        WorkerEvent::ClearFailed { reason, loading } => {
            // 表示中のテーブルはそのまま残す。
            app.ui.status = format!("Error: {reason}");
            app.ui.notice = Some(Notice::error(reason));
            drop(loading);
        }
        WorkerEvent::ArtifactSaved(path) => {
            app.ui.status = format!("Saved {}", path.display());
            app.ui.log.push(format!("saved {}", path.display()));
        }
        WorkerEvent::Log(s) => app.ui.log.push(s),
        WorkerEvent::Error(s) => {
            app.ui.status = format!("Error: {s}");
            app.ui.log.push(s);
        }
    }
}
