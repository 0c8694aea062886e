//! 画面遷移用のUI状態と通知。

use crate::api::{InlineResult, SubmitOutcome};

/// TUIで現在表示中の画面。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    /// ジョブ一覧（定期更新される履歴）画面。
    Jobs,
    /// 処理リクエストの送信画面。
    Submit,
}

/// 通知の重要度。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    /// 情報（キュー投入の案内など）。
    Info,
    /// 失敗。
    Error,
}

/// 閉じるまで操作を遮るポップアップ通知。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    /// 履歴画面へのリンク（キュー投入時のみ）。
    pub link: Option<String>,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            link: None,
        }
    }
}

/// 確認ダイアログの種類。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confirm {
    /// 全ジョブ削除。
    ClearAll,
}

/// 描画側と共有するUI状態。
#[derive(Clone, Debug)]
pub struct UiState {
    /// 現在の画面。
    pub screen: Screen,
    /// ジョブ一覧の選択行。
    pub selected: usize,
    /// 右側パネルに表示するログ。
    pub log: Vec<String>,
    /// 画面下部のステータス文言。
    pub status: String,
    /// 表示中の通知。
    pub notice: Option<Notice>,
    /// 表示中の確認ダイアログ。
    pub confirm: Option<Confirm>,
}

impl UiState {
    pub fn new() -> Self {
        Self {
            screen: Screen::Jobs,
            selected: 0,
            log: vec![],
            status: "Ready".into(),
            notice: None,
            confirm: None,
        }
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}

/// 送信結果を画面に反映する内容。
#[derive(Debug, Default)]
pub struct SubmitView {
    /// 結果カードの元になるインライン結果。
    pub result: Option<InlineResult>,
    /// 表示する通知（最大1件）。
    pub notice: Option<Notice>,
}

/// 送信結果を結果カードと通知へ振り分ける。
pub fn present_outcome(outcome: SubmitOutcome, history_link: &str) -> SubmitView {
    match outcome {
        // 同期完了：カードを表示し通知は出さない。
        SubmitOutcome::InlineResult(r) => SubmitView {
            result: Some(r),
            notice: None,
        },
        // キュー投入：カードは出さず、履歴へのリンク付き案内を1件だけ出す。
        SubmitOutcome::Accepted { message } => SubmitView {
            result: None,
            notice: Some(Notice {
                level: NoticeLevel::Info,
                message,
                link: Some(history_link.to_string()),
            }),
        },
        // 失敗：理由を通知する。
        SubmitOutcome::Failed(e) => SubmitView {
            result: None,
            notice: Some(Notice::error(e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::api::client::{ProcessedOutput, ResultPayload};

    const LINK: &str = "http://127.0.0.1:8000/history/";

    #[test]
    fn test_accepted_shows_single_info_notice() {
        let view = present_outcome(
            SubmitOutcome::Accepted {
                message: "Job queued".into(),
            },
            LINK,
        );
        assert!(view.result.is_none());
        let notice = view.notice.unwrap();
        assert_eq!(notice.level, NoticeLevel::Info);
        assert!(notice.message.contains("Job queued"));
        assert_eq!(notice.link.as_deref(), Some(LINK));
    }

    #[test]
    fn test_inline_has_no_notice() {
        let view = present_outcome(
            SubmitOutcome::InlineResult(InlineResult {
                original_preview: "a.jpg".into(),
                hardware: ProcessedOutput {
                    time: Some("12ms".into()),
                    payload: ResultPayload::Image(vec![1]),
                },
                software: None,
            }),
            LINK,
        );
        assert!(view.notice.is_none());
        assert_eq!(view.result.unwrap().cards().len(), 2);
    }

    #[test]
    fn test_failure_names_reason() {
        let view = present_outcome(
            SubmitOutcome::Failed(ApiError::Validation("Kernel must have exactly 9 numbers.".into())),
            LINK,
        );
        assert!(view.result.is_none());
        assert_eq!(
            view.notice,
            Some(Notice::error("Kernel must have exactly 9 numbers."))
        );
    }
}
