//! 処理ジョブのレコードとフィルタカーネルのモデル。

use serde::{Deserialize, Deserializer};
use std::fmt;

/// サーバーが受け付ける処理の種類。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum JobKind {
    /// 画像のグレースケール化。
    #[serde(rename = "image-grayscale", alias = "grayscale")]
    ImageGrayscale,
    /// 画像への3x3フィルタ適用。
    #[serde(rename = "image-filter", alias = "filter")]
    ImageFilter,
    /// 動画のグレースケール化。
    #[serde(rename = "video-grayscale", alias = "video_grayscale")]
    VideoGrayscale,
    /// 動画への3x3フィルタ適用。
    #[serde(rename = "video-filter", alias = "video_filter")]
    VideoFilter,
}

impl JobKind {
    /// 全種類（送信画面での切り替え順）。
    pub const ALL: [JobKind; 4] = [
        JobKind::ImageGrayscale,
        JobKind::ImageFilter,
        JobKind::VideoGrayscale,
        JobKind::VideoFilter,
    ];

    /// 動画系のジョブか。
    pub fn is_video(self) -> bool {
        matches!(self, JobKind::VideoGrayscale | JobKind::VideoFilter)
    }

    /// カーネルと係数を必要とするジョブか。
    pub fn is_filter(self) -> bool {
        matches!(self, JobKind::ImageFilter | JobKind::VideoFilter)
    }

    /// 一覧表示用のラベル。
    pub fn label(self) -> &'static str {
        match self {
            JobKind::ImageGrayscale => "image-grayscale",
            JobKind::ImageFilter => "image-filter",
            JobKind::VideoGrayscale => "video-grayscale",
            JobKind::VideoFilter => "video-filter",
        }
    }

    /// 送信画面で次の種類へ切り替える。
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|k| *k == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

/// サーバーが報告するジョブ状態。前方向にのみ遷移する。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 処理待ち。
    Queued,
    /// 処理中。
    Running,
    /// 正常完了（状態を持たない旧形式のレコードもここに入る）。
    #[default]
    Finished,
    /// 失敗。
    Error,
}

impl JobStatus {
    /// 完了または失敗（以後レコードは変化しない）。
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error)
    }

    /// 遷移順序の比較用。
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Finished | JobStatus::Error => 2,
        }
    }

    /// 一覧表示用のラベル。
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Error => "error",
        }
    }
}

/// 3x3の畳み込みカーネル（行優先の9係数）。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Kernel(pub [f64; 9]);

impl Kernel {
    /// 空白区切りの文字列を9個の整数係数として解釈する。
    pub fn parse(text: &str) -> Result<Self, String> {
        // 空白で分割し、個数を先に検証する。
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() != 9 {
            return Err("Kernel must have exactly 9 numbers.".into());
        }
        // サーバーは各係数を整数として読むため、小数は受け付けない。
        let mut values = Vec::with_capacity(9);
        for t in tokens {
            let v: i32 = t
                .parse()
                .map_err(|_| format!("Kernel coefficient '{t}' must be a whole number."))?;
            values.push(f64::from(v));
        }
        Self::from_slice(&values)
    }

    /// スライスから構築する（要素数は9であること）。
    pub fn from_slice(values: &[f64]) -> Result<Self, String> {
        let arr: [f64; 9] = values
            .try_into()
            .map_err(|_| "Kernel must have exactly 9 numbers.".to_string())?;
        if arr.iter().any(|v| !v.is_finite()) {
            return Err("Kernel coefficients must be finite numbers.".into());
        }
        Ok(Self(arr))
    }
}

impl fmt::Display for Kernel {
    /// サーバーが整数として読めるよう、整数値は小数点なしで出力する。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| format_number(*v)).collect();
        f.write_str(&parts.join(" "))
    }
}

impl<'de> Deserialize<'de> for Kernel {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        // 文字列・フラット配列・3x3配列のいずれも受け付ける。
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Flat(Vec<f64>),
            Rows(Vec<Vec<f64>>),
        }
        let parsed = match Repr::deserialize(d)? {
            Repr::Text(s) => Kernel::parse(&s),
            Repr::Flat(v) => Kernel::from_slice(&v),
            Repr::Rows(rows) => Kernel::from_slice(&rows.concat()),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

/// 数値または文字列で届くスカラー値（係数や処理時間）。
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// 数値。
    Number(f64),
    /// 文字列（"12.3 ms" など）。
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => f.write_str(&format_number(*n)),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// 整数値なら小数点なしで整形する。
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

/// 完了ジョブの成果物。種類により画像か動画URLのどちらか一方。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobResult<'a> {
    /// base64で埋め込まれた静止画。
    Image(&'a str),
    /// 動画成果物への参照URL。
    Video(&'a str),
}

/// `/api/history/` が返すジョブ1件分のレコード。
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Job {
    /// サーバーが採番する安定ID（旧形式のレコードには無い）。
    #[serde(default, alias = "job_id")]
    pub id: Option<String>,
    /// 処理の種類。
    pub kind: JobKind,
    /// 現在の状態。
    #[serde(default)]
    pub status: JobStatus,
    /// 進捗（0..100、報告しないバックエンドもある）。
    #[serde(default)]
    pub progress: Option<i64>,
    /// フィルタジョブのカーネル（読めない値は無しとして扱う）。
    #[serde(default, deserialize_with = "lenient_kernel")]
    pub kernel: Option<Kernel>,
    /// フィルタジョブの除数。
    #[serde(default)]
    pub factor: Option<Scalar>,
    /// 作成時刻（表示専用、nullは空文字）。
    #[serde(default, deserialize_with = "null_as_empty")]
    pub timestamp: String,
    /// ハードウェア処理時間。
    #[serde(default)]
    pub time: Option<Scalar>,
    /// 画像ジョブの結果（base64 JPEG）。
    #[serde(default)]
    pub image: Option<String>,
    /// 動画ジョブかどうかの明示フラグ。
    #[serde(default)]
    pub is_video: Option<bool>,
    /// 動画成果物のURL。
    #[serde(default)]
    pub video_url: Option<String>,
}

impl Job {
    /// 明示フラグを優先し、無ければ種類から判定する。
    pub fn is_video(&self) -> bool {
        self.is_video.unwrap_or_else(|| self.kind.is_video())
    }

    /// 0..100へ丸めた進捗。
    pub fn progress_percent(&self) -> Option<u8> {
        self.progress.map(|p| p.clamp(0, 100) as u8)
    }

    /// 完了済みなら種類に応じた成果物を1つだけ返す。
    pub fn result(&self) -> Option<JobResult<'_>> {
        if self.status != JobStatus::Finished {
            return None;
        }
        if self.is_video() {
            self.video_url.as_deref().map(JobResult::Video)
        } else {
            self.image.as_deref().map(JobResult::Image)
        }
    }

    /// 埋め込み画像（プレビュー用）。動画ジョブでは常にNone。
    pub fn inline_image(&self) -> Option<&str> {
        if self.is_video() {
            return None;
        }
        self.image.as_deref().filter(|s| !s.is_empty())
    }
}

/// 壊れたカーネルはレコード全体を失敗させず、警告を出して捨てる。
fn lenient_kernel<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Kernel>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(d)?;
    Ok(raw.and_then(|v| match Kernel::deserialize(&v) {
        Ok(k) => Some(k),
        Err(e) => {
            // 空文字は旧形式のグレースケール行なので黙って無しにする。
            if v.as_str().is_none_or(|s| !s.trim().is_empty()) {
                tracing::warn!("unreadable kernel {v}: {e}");
            }
            None
        }
    }))
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

/// `/api/history/` の応答を読む。
///
/// 配列として読めない応答はエラーになるが、読めない行は警告を出して
/// 読み飛ばし、残りの行は表示できるようにする。
pub fn parse_history(body: &[u8]) -> serde_json::Result<Vec<Job>> {
    let rows: Vec<serde_json::Value> = serde_json::from_slice(body)?;
    Ok(rows
        .into_iter()
        .enumerate()
        .filter_map(|(i, row)| match Job::deserialize(&row) {
            Ok(job) => Some(job),
            Err(e) => {
                tracing::warn!("skipping history row {i}: {e}");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_requires_nine_numbers() {
        // 9個ちょうどの数値だけを受け付ける。
        assert!(Kernel::parse("1 2 1 2 4 2 1 2 1").is_ok());
        assert!(Kernel::parse("1 2 1 2 4 2 1 2").is_err());
        assert!(Kernel::parse("1 2 1 2 4 2 1 2 1 0").is_err());
        assert!(Kernel::parse("1 2 1 2 x 2 1 2 1").is_err());
        assert!(Kernel::parse("").is_err());
        assert!(Kernel::parse("1 2 1 2 4.5 2 1 2 1").is_err());
    }

    #[test]
    fn test_malformed_fields_do_not_fail_the_row() {
        // 空や壊れたカーネル、nullの時刻でも行は読める。
        let body = r#"[
            {"kind":"grayscale","kernel":"","factor":"","timestamp":null},
            {"kind":"image-filter","status":"finished","kernel":"1 2 3","factor":1},
            {"kind":"image-filter","status":"finished","kernel":[1,2,1,2,4,2,1,2,1],"factor":16}
        ]"#;
        let jobs = parse_history(body.as_bytes()).unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].kernel, None);
        assert_eq!(jobs[0].timestamp, "");
        assert_eq!(jobs[1].kernel, None);
        assert_eq!(jobs[2].kernel.unwrap().to_string(), "1 2 1 2 4 2 1 2 1");
    }

    #[test]
    fn test_unreadable_rows_are_skipped() {
        let body = r#"[
            {"id":"a","kind":"hologram","status":"running"},
            "not a record",
            {"id":"b","kind":"video-filter","status":"running","progress":10}
        ]"#;
        let jobs = parse_history(body.as_bytes()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id.as_deref(), Some("b"));
        assert!(parse_history(br#"{"error":"nope"}"#).is_err());
    }

    #[test]
    fn test_kernel_display_keeps_integers_plain() {
        let k = Kernel::parse("  -1 -1 -1\n-1 8 -1  -1 -1 0 ").unwrap();
        assert_eq!(k.to_string(), "-1 -1 -1 -1 8 -1 -1 -1 0");
        let k = Kernel::from_slice(&[0.5, 1.0, 0.5, 1.0, 2.0, 1.0, 0.5, 1.0, 0.5]).unwrap();
        assert_eq!(k.to_string(), "0.5 1 0.5 1 2 1 0.5 1 0.5");
    }

    #[test]
    fn test_deserialize_history_rows() {
        // 新形式と旧形式が混在した一覧を読み込めることを確認する。
        let body = r#"[
            {"id":"job_a","timestamp":"2025-01-01 10:00","kind":"video-filter","status":"running",
             "progress":40,"kernel":[1,2,1,2,4,2,1,2,1],"factor":16,"time":"-"},
            {"timestamp":"2025-01-01 09:00","kind":"grayscale","time":"12ms","image":"QUJD"},
            {"job_id":"job_c","timestamp":"t","kind":"video_grayscale","status":"finished",
             "is_video":true,"video_url":"/media/out.mp4","time":"3.2 s"}
        ]"#;
        let jobs: Vec<Job> = serde_json::from_str(body).unwrap();
        assert_eq!(jobs.len(), 3);

        assert_eq!(jobs[0].status, JobStatus::Running);
        assert_eq!(jobs[0].progress_percent(), Some(40));
        assert_eq!(jobs[0].kernel.unwrap().to_string(), "1 2 1 2 4 2 1 2 1");
        assert_eq!(jobs[0].factor.as_ref().unwrap().to_string(), "16");
        assert_eq!(jobs[0].result(), None);

        // 状態を持たない旧レコードは完了扱いになる。
        assert_eq!(jobs[1].kind, JobKind::ImageGrayscale);
        assert_eq!(jobs[1].status, JobStatus::Finished);
        assert_eq!(jobs[1].result(), Some(JobResult::Image("QUJD")));

        assert_eq!(jobs[2].id.as_deref(), Some("job_c"));
        assert_eq!(jobs[2].result(), Some(JobResult::Video("/media/out.mp4")));
        assert_eq!(jobs[2].inline_image(), None);
    }

    #[test]
    fn test_result_follows_video_flag() {
        // 動画フラグにより成果物の種類が1つに決まる。
        let body = r#"{"kind":"image-filter","status":"finished","is_video":true,
                        "image":"QUJD","video_url":"/v.mp4"}"#;
        let job: Job = serde_json::from_str(body).unwrap();
        assert_eq!(job.result(), Some(JobResult::Video("/v.mp4")));
    }

    #[test]
    fn test_progress_is_clamped() {
        let job: Job =
            serde_json::from_str(r#"{"kind":"video-filter","status":"running","progress":140}"#)
                .unwrap();
        assert_eq!(job.progress_percent(), Some(100));
    }

    #[test]
    fn test_kind_cycles() {
        let mut k = JobKind::ImageGrayscale;
        for _ in 0..JobKind::ALL.len() {
            k = k.next();
        }
        assert_eq!(k, JobKind::ImageGrayscale);
    }
}
