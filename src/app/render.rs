//! TUI描画関連の関数。

use ratatui::{
    Frame,
    prelude::*,
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap},
};

use crate::{
    api::{ResultCard, ResultPayload, client::CardSource, form::PRESETS},
    events::{Confirm, NoticeLevel, Screen},
    input,
    jobs::JobStatus,
    layout,
    reconcile::{ActionsCell, JobRow, PreviewCell, ProgressCell, ProgressTone},
    shortcuts::{Shortcuts, format_keys},
};

use super::App;

/// 進捗バーの桁数。
const BAR_WIDTH: usize = 10;

/// 画面全体のレイアウトを描画する。
pub fn draw(f: &mut Frame, app: &App) {
    let main_layout = layout::create_main_layout(f.area());

    match app.ui.screen {
        Screen::Jobs => draw_jobs(f, app, main_layout.body),
        Screen::Submit => draw_submit(f, app, main_layout.body),
    }

    let help = Paragraph::new(help_text(app.ui.screen, &app.shortcuts))
        .block(Block::default().borders(Borders::ALL).title("HELP"))
        .wrap(Wrap { trim: true });
    f.render_widget(help, main_layout.help_bar);

    f.render_widget(build_status_bar(app), main_layout.status_bar);

    // オーバーレイは下から順に重ねる。
    if app.loading.is_visible() {
        draw_loading(f);
    }
    if let Some(confirm) = app.ui.confirm {
        draw_confirm(f, confirm, &app.shortcuts);
    }
    if app.ui.notice.is_some() {
        draw_notice(f, app);
    }
    if let Some(state) = &app.input_box {
        input::render_input_box(f, state);
    }
}

/// ジョブ一覧（左）と選択行の詳細（右）を描画する。
fn draw_jobs(f: &mut Frame, app: &App, area: Rect) {
    let split = layout::create_split_layout(area, 70);
    let rows = &app.store.table().rows;

    let table_rows = rows.iter().map(|r| {
        let progress = match &r.progress {
            Some(p) => Cell::from(progress_bar(p)).style(progress_style(p)),
            None => Cell::from(""),
        };
        Row::new(vec![
            Cell::from(r.timestamp.clone()),
            Cell::from(r.kind),
            Cell::from(r.status.label()).style(status_style(r.status)),
            progress,
            Cell::from(r.time.clone()),
            Cell::from(actions_text(&r.actions)),
            Cell::from(preview_text(&r.preview)),
        ])
    });

    let table = Table::new(
        table_rows,
        [
            Constraint::Length(19),
            Constraint::Length(15),
            Constraint::Length(9),
            Constraint::Length(BAR_WIDTH as u16 + 7),
            Constraint::Length(9),
            Constraint::Length(15),
            Constraint::Min(7),
        ],
    )
    .block(Block::default().borders(Borders::ALL).title("JOBS"))
    .header(
        Row::new(vec![
            "timestamp", "kind", "status", "progress", "time", "actions", "preview",
        ])
        .bold(),
    )
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(255, 140, 0))
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    );

    let mut state = TableState::default();
    if !rows.is_empty() {
        state.select(Some(app.ui.selected));
    }
    f.render_stateful_widget(table, split.main, &mut state);

    let detail = match rows.get(app.ui.selected) {
        Some(r) => row_detail(r),
        None => "No jobs".into(),
    };
    let text = format!("{detail}\n\nLog:\n{}", recent_log(&app.ui.log, 8));
    let info = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("INFO"))
        .wrap(Wrap { trim: true });
    f.render_widget(info, split.side);
}

/// 送信フォーム（左）と結果カード（右）を描画する。
fn draw_submit(f: &mut Frame, app: &App, area: Rect) {
    let split = layout::create_split_layout(area, 50);
    let sc = &app.shortcuts.submit;
    let form = &app.form;

    let file = if form.file.as_os_str().is_empty() {
        "(none)".to_string()
    } else {
        form.file.display().to_string()
    };
    let mut lines = vec![
        format!("[{}] Kind:   {}", format_keys(&sc.kind), form.kind.label()),
        format!("[{}] File:   {file}", format_keys(&sc.file)),
        format!(
            "[{}] SciPy:  {}",
            format_keys(&sc.scipy),
            if form.use_scipy { "on" } else { "off" }
        ),
    ];
    if form.kind.is_filter() {
        lines.push(format!("[{}] Kernel: {}", format_keys(&sc.kernel), form.kernel));
        lines.push(format!("[{}] Factor: {}", format_keys(&sc.factor), form.factor));
        lines.push(String::new());
        lines.push(format!(
            "[{}] Presets: {}",
            format_keys(&sc.preset),
            PRESETS.map(|(name, _, _)| name).join(", ")
        ));
    }
    let form_panel = Paragraph::new(lines.join("\n"))
        .block(Block::default().borders(Borders::ALL).title("SUBMIT"))
        .wrap(Wrap { trim: false });
    f.render_widget(form_panel, split.main);

    let results = match &app.results {
        Some(r) => r
            .cards()
            .iter()
            .map(card_text)
            .collect::<Vec<_>>()
            .join("\n\n"),
        None => "No inline result".into(),
    };
    let result_panel = Paragraph::new(results)
        .block(Block::default().borders(Borders::ALL).title("RESULTS"))
        .wrap(Wrap { trim: true });
    f.render_widget(result_panel, split.side);
}

/// 画面を覆うローディング表示。
fn draw_loading(f: &mut Frame) {
    let area = layout::centered_popup(f.area(), 30, 3);
    f.render_widget(Clear, area);
    let p = Paragraph::new("Loading...")
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(Color::Yellow));
    f.render_widget(p, area);
}

fn draw_confirm(f: &mut Frame, confirm: Confirm, sc: &Shortcuts) {
    let question = match confirm {
        Confirm::ClearAll => "Delete ALL job history?",
    };
    let text = format!(
        "{question}\n\n{}: yes | {}: no",
        format_keys(&sc.dialog.yes),
        format_keys(&sc.dialog.no)
    );
    let area = layout::centered_popup(f.area(), 50, 6);
    f.render_widget(Clear, area);
    let p = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Confirm"))
        .style(Style::default().fg(Color::Red));
    f.render_widget(p, area);
}

fn draw_notice(f: &mut Frame, app: &App) {
    let Some(notice) = &app.ui.notice else {
        return;
    };
    let sc = &app.shortcuts.dialog;
    let (title, color) = match notice.level {
        NoticeLevel::Info => ("Info", Color::Cyan),
        NoticeLevel::Error => ("Error", Color::Red),
    };
    let mut text = notice.message.clone();
    if let Some(link) = &notice.link {
        text.push_str(&format!(
            "\n\nHistory: {link}\n{}: open in browser",
            format_keys(&sc.history)
        ));
    }
    text.push_str(&format!("\n\n{}: close", format_keys(&sc.dismiss)));

    let area = layout::centered_popup(f.area(), 60, 9);
    f.render_widget(Clear, area);
    let p = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title(title))
        .style(Style::default().fg(color))
        .wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

/// ステータスバーを構築する。
fn build_status_bar(app: &App) -> Paragraph<'static> {
    let screen_name = match app.ui.screen {
        Screen::Jobs => "Jobs",
        Screen::Submit => "Submit",
    };
    let rows = &app.store.table().rows;
    let active = rows
        .iter()
        .filter(|r| !r.status.is_terminal())
        .count();
    let text = format!(
        "[{screen_name}] Jobs: {} total, {active} active | {}",
        rows.len(),
        app.ui.status
    );

    let mut bar = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("STATUS"))
        .wrap(Wrap { trim: true });
    if app.ui.status.starts_with("Error") {
        bar = bar.style(Style::default().fg(Color::Red));
    }
    bar
}

/// 現在画面に応じたヘルプ文字列を返す。
fn help_text(screen: Screen, sc: &Shortcuts) -> String {
    match screen {
        Screen::Jobs => format!(
            "{}: quit | {}: refresh | {}: clear all | {}: submit | {}/{}: navigate | {}: play | {}: download | {}: preview",
            format_keys(&sc.jobs.quit),
            format_keys(&sc.jobs.refresh),
            format_keys(&sc.jobs.clear),
            format_keys(&sc.jobs.submit_screen),
            format_keys(&sc.jobs.up),
            format_keys(&sc.jobs.down),
            format_keys(&sc.jobs.play),
            format_keys(&sc.jobs.download),
            format_keys(&sc.jobs.preview),
        ),
        Screen::Submit => format!(
            "{}: send | {}: save results | {}: back",
            format_keys(&sc.submit.send),
            format_keys(&sc.submit.save),
            format_keys(&sc.submit.back),
        ),
    }
}

/// `[████░░░░░░]  40%` 形式の進捗表示。
fn progress_bar(p: &ProgressCell) -> String {
    let filled = (p.percent as usize * BAR_WIDTH).div_ceil(100);
    format!(
        "[{}{}] {:>3}%",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled),
        p.percent
    )
}

fn progress_style(p: &ProgressCell) -> Style {
    match p.tone {
        ProgressTone::Normal => Style::default().fg(Color::Green),
        ProgressTone::Error => Style::default().fg(Color::Red),
    }
}

fn status_style(s: JobStatus) -> Style {
    match s {
        JobStatus::Queued => Style::default().fg(Color::Gray),
        JobStatus::Running => Style::default().fg(Color::Yellow),
        JobStatus::Finished => Style::default().fg(Color::Green),
        JobStatus::Error => Style::default().fg(Color::Red),
    }
}

fn actions_text(a: &ActionsCell) -> &'static str {
    match a {
        ActionsCell::PlayDownload { .. } => "▶ play | ⬇ save",
        ActionsCell::Placeholder => "-",
    }
}

fn preview_text(p: &PreviewCell) -> String {
    match p {
        PreviewCell::Thumbnail { approx_bytes, .. } => format!("img {}", human_size(*approx_bytes)),
        PreviewCell::Placeholder => "-".into(),
    }
}

/// 選択行の詳細テキスト。
fn row_detail(r: &JobRow) -> String {
    let mut lines = vec![
        format!("ID: {}", r.id.as_deref().unwrap_or("-")),
        format!("Kind: {}", r.kind),
        format!("Status: {}", r.status.label()),
        format!("Created: {}", r.timestamp),
        format!("Kernel: {}", r.kernel),
        format!("Factor: {}", r.factor),
        format!("Time: {}", r.time),
    ];
    if let Some(p) = &r.progress {
        lines.push(format!("Progress: {}%", p.percent));
    }
    if let ActionsCell::PlayDownload { url } = &r.actions {
        lines.push(format!("Video: {url}"));
    }
    lines.join("\n")
}

fn card_text(card: &ResultCard) -> String {
    let body = match &card.source {
        CardSource::Local(path) => path.display().to_string(),
        CardSource::Payload(ResultPayload::Image(bytes)) => {
            format!("image ({})", human_size(bytes.len()))
        }
        CardSource::Payload(ResultPayload::Video(url)) => format!("video {url}"),
    };
    format!("■ {}\n  {body}", card.title)
}

fn human_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// ログの末尾n行。
fn recent_log(log: &[String], n: usize) -> String {
    log[log.len().saturating_sub(n)..].join("\n")
}
