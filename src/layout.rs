//! レイアウト計算のヘルパー関数

use ratatui::prelude::*;

/// メインレイアウトの3つの領域
pub struct MainLayout {
    /// 画面本体
    pub body: Rect,
    /// HELPバーの領域
    pub help_bar: Rect,
    /// STATUSバーの領域
    pub status_bar: Rect,
}

/// 左右2分割した本体領域
pub struct SplitLayout {
    /// 左側（ジョブ一覧 / 送信フォーム）
    pub main: Rect,
    /// 右側（詳細 / 結果カード）
    pub side: Rect,
}

/// メイン画面を分割（Body + HELP + STATUS）
pub fn create_main_layout(area: Rect) -> MainLayout {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(area);

    MainLayout {
        body: chunks[0],
        help_bar: chunks[1],
        status_bar: chunks[2],
    }
}

/// Body領域を左右に分割（左の割合を指定）
pub fn create_split_layout(area: Rect, main_percent: u16) -> SplitLayout {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(main_percent),
            Constraint::Percentage(100 - main_percent.min(100)),
        ])
        .split(area);

    SplitLayout {
        main: chunks[0],
        side: chunks[1],
    }
}

/// 中央配置のポップアップ領域を計算
pub fn centered_popup(area: Rect, width_percent: u16, height: u16) -> Rect {
    let width_percent = width_percent.min(100);
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(area.height.saturating_sub(height) / 2),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100 - width_percent) / 2),
        ])
        .split(rows[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_layout_reserves_bars() {
        let l = create_main_layout(Rect::new(0, 0, 80, 24));
        assert_eq!(l.help_bar.height, 3);
        assert_eq!(l.status_bar.height, 3);
        assert_eq!(l.body.height, 18);
    }

    #[test]
    fn test_popup_is_centered_and_fits() {
        let area = Rect::new(0, 0, 100, 30);
        let p = centered_popup(area, 60, 8);
        assert_eq!(p.height, 8);
        assert_eq!(p.y, 11);
        assert!(p.x >= 19 && p.right() <= 81);
    }
}
