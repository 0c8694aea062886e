//! キー入力ハンドラー関数。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::path::PathBuf;

use crate::{
    api::{InlineResult, ResultPayload, form::PRESETS},
    artifacts::Artifact,
    events::{Confirm, Screen},
    input::{InputBoxState, InputCallbackId},
    reconcile::{ActionsCell, JobRow, PreviewCell},
    scheduler::Trigger,
    shortcuts::matches_shortcut,
    worker::WorkerCmd,
};

use super::App;

/// キー入力を1件処理し、終了すべきならtrueを返す。
pub async fn handle_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 重なっているポップアップから順に処理する。
    if app.input_box.is_some() {
        handle_input_box_key(app, k);
        return Ok(false);
    }
    if app.ui.confirm.is_some() {
        handle_confirm_key(app, k).await?;
        return Ok(false);
    }
    if app.ui.notice.is_some() {
        handle_notice_key(app, k).await?;
        return Ok(false);
    }

    match app.ui.screen {
        Screen::Jobs => handle_jobs_key(app, k).await,
        Screen::Submit => handle_submit_key(app, k).await,
    }
}

/// Ctrl+Cかどうかを判定する。
pub fn is_ctrl_c(k: &KeyEvent) -> bool {
    k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c')
}

/// ジョブ一覧画面のキー処理。
async fn handle_jobs_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.jobs;

    if matches_shortcut(&k, &sc.quit) {
        return Ok(true);
    } else if matches_shortcut(&k, &sc.refresh) {
        app.worker_tx.send(WorkerCmd::Refresh(Trigger::Manual)).await?;
        app.ui.status = "Refreshing jobs...".into();
    } else if matches_shortcut(&k, &sc.clear) {
        // 削除は確認ダイアログで承認されてから送る。
        app.ui.confirm = Some(Confirm::ClearAll);
    } else if matches_shortcut(&k, &sc.submit_screen) {
        app.ui.screen = Screen::Submit;
        // 一覧を離れている間は定期更新を止める。
        app.worker_tx.send(WorkerCmd::SetPolling(false)).await?;
    } else if matches_shortcut(&k, &sc.down) {
        if app.ui.selected + 1 < app.store.table().rows.len() {
            app.ui.selected += 1;
        }
    } else if matches_shortcut(&k, &sc.up) {
        app.ui.selected = app.ui.selected.saturating_sub(1);
    } else if matches_shortcut(&k, &sc.play) {
        if let Some(url) = selected_row(app).and_then(video_url) {
            app.worker_tx.send(WorkerCmd::OpenUrl(url)).await?;
        } else {
            app.ui.status = "No finished video on this row".into();
        }
    } else if matches_shortcut(&k, &sc.download) {
        if let Some(url) = selected_row(app).and_then(video_url) {
            app.worker_tx
                .send(WorkerCmd::SaveArtifact {
                    artifact: Artifact::Video { url },
                    open: false,
                })
                .await?;
            app.ui.status = "Downloading...".into();
        } else {
            app.ui.status = "No finished video on this row".into();
        }
    } else if matches_shortcut(&k, &sc.preview) {
        if let Some(artifact) = selected_row(app).and_then(preview_artifact) {
            app.worker_tx
                .send(WorkerCmd::SaveArtifact {
                    artifact,
                    open: true,
                })
                .await?;
        } else {
            app.ui.status = "No preview on this row".into();
        }
    }

    Ok(false)
}

/// 送信画面のキー処理。
async fn handle_submit_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.submit;

    if matches_shortcut(&k, &sc.back) {
        show_jobs(app).await?;
    } else if matches_shortcut(&k, &sc.send) {
        // 前回の結果カードは送信時点で消す。
        app.results = None;
        app.worker_tx.send(WorkerCmd::Submit(app.form.clone())).await?;
        app.ui.status = format!("Uploading {}...", app.form.file.display());
    } else if matches_shortcut(&k, &sc.kind) {
        app.form.kind = app.form.kind.next();
    } else if matches_shortcut(&k, &sc.scipy) {
        app.form.use_scipy = !app.form.use_scipy;
    } else if matches_shortcut(&k, &sc.file) {
        app.input_box = Some(InputBoxState::new(
            "File to upload:",
            app.form.file.to_string_lossy(),
            InputCallbackId::SubmitFile,
        ));
    } else if matches_shortcut(&k, &sc.kernel) {
        if app.form.kind.is_filter() {
            app.input_box = Some(InputBoxState::new(
                "Kernel (9 numbers):",
                app.form.kernel.clone(),
                InputCallbackId::SubmitKernel,
            ));
        }
    } else if matches_shortcut(&k, &sc.factor) {
        if app.form.kind.is_filter() {
            app.input_box = Some(InputBoxState::new(
                "Factor:",
                app.form.factor.clone(),
                InputCallbackId::SubmitFactor,
            ));
        }
    } else if matches_shortcut(&k, &sc.preset) {
        if app.form.kind.is_filter() {
            let idx = app.preset_idx % PRESETS.len();
            app.form.apply_preset(idx);
            app.preset_idx = idx + 1;
            app.ui.status = format!("Preset: {}", PRESETS[idx].0);
        }
    } else if matches_shortcut(&k, &sc.save) {
        let artifacts = app.results.as_ref().map(result_artifacts).unwrap_or_default();
        if artifacts.is_empty() {
            app.ui.status = "Nothing to save".into();
        }
        for artifact in artifacts {
            app.worker_tx
                .send(WorkerCmd::SaveArtifact {
                    artifact,
                    open: false,
                })
                .await?;
        }
    }

    Ok(false)
}

/// 確認ダイアログのキー処理。
async fn handle_confirm_key(app: &mut App, k: KeyEvent) -> Result<()> {
    let sc = &app.shortcuts.dialog;

    if matches_shortcut(&k, &sc.yes) {
        match app.ui.confirm.take() {
            Some(Confirm::ClearAll) => {
                app.worker_tx.send(WorkerCmd::ClearAll).await?;
                app.ui.status = "Clearing history...".into();
            }
            None => {}
        }
    } else if matches_shortcut(&k, &sc.no) {
        app.ui.confirm = None;
    }
    Ok(())
}

/// 通知ポップアップのキー処理。
async fn handle_notice_key(app: &mut App, k: KeyEvent) -> Result<()> {
    let sc = &app.shortcuts.dialog;
    let link = app.ui.notice.as_ref().and_then(|n| n.link.clone());

    if matches_shortcut(&k, &sc.dismiss) {
        app.ui.notice = None;
        // キュー投入の案内を閉じたら一覧画面で進捗を追う。
        if link.is_some() {
            show_jobs(app).await?;
        }
    } else if matches_shortcut(&k, &sc.history)
        && let Some(link) = link
    {
        app.worker_tx.send(WorkerCmd::OpenUrl(link)).await?;
    }
    Ok(())
}

/// 一覧画面へ戻り、定期更新を再開して最新状態を取り直す。
async fn show_jobs(app: &mut App) -> Result<()> {
    app.ui.screen = Screen::Jobs;
    app.worker_tx.send(WorkerCmd::SetPolling(true)).await?;
    app.worker_tx.send(WorkerCmd::Refresh(Trigger::Initial)).await?;
    Ok(())
}

/// 入力ボックスのキー処理。
fn handle_input_box_key(app: &mut App, k: KeyEvent) {
    let sc = &app.shortcuts.input_box;
    let Some(state) = app.input_box.as_mut() else {
        return;
    };

    if matches_shortcut(&k, &sc.confirm) {
        if let Some(state) = app.input_box.take() {
            apply_input(app, state);
        }
    } else if matches_shortcut(&k, &sc.cancel) {
        app.input_box = None;
    } else if matches_shortcut(&k, &sc.backspace) {
        state.backspace();
    } else if matches_shortcut(&k, &sc.delete) {
        state.delete();
    } else if matches_shortcut(&k, &sc.left) {
        state.move_left();
    } else if matches_shortcut(&k, &sc.right) {
        state.move_right();
    } else if matches_shortcut(&k, &sc.home) {
        state.move_home();
    } else if matches_shortcut(&k, &sc.end) {
        state.move_end();
    } else if matches_shortcut(&k, &sc.clear_line) {
        state.clear_line();
    } else if let KeyCode::Char(c) = k.code
        && !k.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
    {
        state.insert_char(c);
    }
}

/// 確定した入力値をフォームへ反映する。
fn apply_input(app: &mut App, state: InputBoxState) {
    let value = state.value.trim().to_string();
    match state.callback_id {
        InputCallbackId::SubmitFile => app.form.file = PathBuf::from(value),
        InputCallbackId::SubmitKernel => app.form.kernel = value,
        InputCallbackId::SubmitFactor => app.form.factor = value,
    }
}

fn selected_row(app: &App) -> Option<&JobRow> {
    app.store.table().rows.get(app.ui.selected)
}

fn video_url(row: &JobRow) -> Option<String> {
    match &row.actions {
        ActionsCell::PlayDownload { url } => Some(url.clone()),
        ActionsCell::Placeholder => None,
    }
}

fn preview_artifact(row: &JobRow) -> Option<Artifact> {
    match &row.preview {
        PreviewCell::Thumbnail { image, .. } => Some(Artifact::EncodedImage {
            label: format!("{}_{}", row.kind, row.timestamp),
            data: image.clone(),
        }),
        PreviewCell::Placeholder => None,
    }
}

/// 結果カードのうち保存できるもの（処理結果のみ）を列挙する。
pub(super) fn result_artifacts(result: &InlineResult) -> Vec<Artifact> {
    let mut outputs = vec![("hardware", &result.hardware)];
    if let Some(sw) = &result.software {
        outputs.push(("scipy", sw));
    }
    outputs
        .into_iter()
        .map(|(label, out)| match &out.payload {
            ResultPayload::Image(bytes) => Artifact::Image {
                label: label.into(),
                bytes: bytes.clone(),
            },
            ResultPayload::Video(url) => Artifact::Video { url: url.clone() },
        })
        .collect()
}
