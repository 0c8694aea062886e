//! ショートカット設定の管理。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ショートカット設定の全体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shortcuts {
    pub jobs: JobsShortcuts,
    pub submit: SubmitShortcuts,
    pub dialog: DialogShortcuts,
    pub input_box: InputBoxShortcuts,
}

/// ジョブ一覧画面のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsShortcuts {
    pub quit: Vec<String>,
    pub refresh: Vec<String>,
    pub clear: Vec<String>,
    pub submit_screen: Vec<String>,
    pub down: Vec<String>,
    pub up: Vec<String>,
    pub play: Vec<String>,
    pub download: Vec<String>,
    pub preview: Vec<String>,
}

/// 送信画面のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitShortcuts {
    pub back: Vec<String>,
    pub send: Vec<String>,
    pub kind: Vec<String>,
    pub file: Vec<String>,
    pub scipy: Vec<String>,
    pub kernel: Vec<String>,
    pub factor: Vec<String>,
    pub preset: Vec<String>,
    pub save: Vec<String>,
}

/// 確認ダイアログと通知のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogShortcuts {
    pub yes: Vec<String>,
    pub no: Vec<String>,
    pub dismiss: Vec<String>,
    pub history: Vec<String>,
}

/// InputBoxのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBoxShortcuts {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub backspace: Vec<String>,
    pub delete: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub home: Vec<String>,
    pub end: Vec<String>,
    pub clear_line: Vec<String>,
}

impl Shortcuts {
    /// TOMLから読み込み、無ければデフォルトを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// 文字列リストを作る小さなヘルパー。
fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Shortcuts {
    fn default() -> Self {
        Self {
            jobs: JobsShortcuts {
                quit: keys(&["q"]),
                refresh: keys(&["r", "F5"]),
                clear: keys(&["c"]),
                submit_screen: keys(&["s"]),
                down: keys(&["Down", "j"]),
                up: keys(&["Up", "k"]),
                play: keys(&["o"]),
                download: keys(&["d"]),
                preview: keys(&["v"]),
            },
            submit: SubmitShortcuts {
                back: keys(&["Esc"]),
                send: keys(&["Enter"]),
                kind: keys(&["Tab"]),
                file: keys(&["f"]),
                scipy: keys(&["u"]),
                kernel: keys(&["e"]),
                factor: keys(&["x"]),
                preset: keys(&["p"]),
                save: keys(&["w"]),
            },
            dialog: DialogShortcuts {
                yes: keys(&["y"]),
                no: keys(&["n", "Esc"]),
                dismiss: keys(&["Enter", "Esc"]),
                history: keys(&["h"]),
            },
            input_box: InputBoxShortcuts {
                confirm: keys(&["Enter"]),
                cancel: keys(&["Esc"]),
                backspace: keys(&["Backspace"]),
                delete: keys(&["Delete"]),
                left: keys(&["Left"]),
                right: keys(&["Right"]),
                home: keys(&["Home", "Ctrl+a"]),
                end: keys(&["End", "Ctrl+e"]),
                clear_line: keys(&["Ctrl+u"]),
            },
        }
    }
}

/// KeyEventがいずれかのショートカット文字列と一致するか判定する。
pub fn matches_shortcut(key: &KeyEvent, shortcuts: &[String]) -> bool {
    shortcuts
        .iter()
        .filter_map(|s| parse_shortcut(s))
        .any(|(mods, code)| key.modifiers == mods && key.code == code)
}

/// "Ctrl+u" のような表記を修飾キーとキーコードへ分解する。
fn parse_shortcut(shortcut: &str) -> Option<(KeyModifiers, KeyCode)> {
    // 最後の要素がキー、それ以前が修飾キー。
    let mut parts: Vec<&str> = shortcut.split('+').collect();
    let key = parts.pop()?;

    let mut mods = KeyModifiers::empty();
    for m in parts {
        mods |= match m.to_ascii_lowercase().as_str() {
            "ctrl" => KeyModifiers::CONTROL,
            "alt" => KeyModifiers::ALT,
            "shift" => KeyModifiers::SHIFT,
            _ => return None,
        };
    }

    let code = match key.to_ascii_lowercase().as_str() {
        "enter" => KeyCode::Enter,
        "esc" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "delete" => KeyCode::Delete,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        // F1〜F12。
        f if f.len() > 1 && f.starts_with('f') => KeyCode::F(f[1..].parse().ok()?),
        // 単一文字は大文字小文字を保ったまま比較する。
        _ => {
            let mut chars = key.chars();
            let c = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            KeyCode::Char(c)
        }
    };
    Some((mods, code))
}

/// 表示用にキー一覧を連結する。
pub fn format_keys(keys: &[String]) -> String {
    keys.join("/")
}
