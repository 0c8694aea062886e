//! Processing request forms.

use std::path::{Path, PathBuf};

use super::error::ApiError;
use super::transport::FormField;
use crate::jobs::{JobKind, Kernel};

/// Named kernels offered by the filter forms: (name, coefficients, factor).
pub const PRESETS: [(&str, &str, u32); 7] = [
    ("edge", "-1 -1 -1 -1 8 -1 -1 -1 -1", 1),
    ("sharpen", "0 -1 0 -1 5 -1 0 -1 0", 1),
    ("box", "1 1 1 1 1 1 1 1 1", 9),
    ("gauss", "1 2 1 2 4 2 1 2 1", 16),
    ("boxstrong", "2 2 2 2 4 2 2 2 2", 20),
    ("emboss", "-2 -1 0 -1 1 1 0 1 2", 1),
    ("identity", "0 0 0 0 1 0 0 0 0", 1),
];

/// Submission endpoint for a job kind.
pub fn endpoint(kind: JobKind) -> &'static str {
    match kind {
        JobKind::ImageGrayscale => "/api/grayscale/",
        JobKind::ImageFilter => "/api/filter/",
        JobKind::VideoGrayscale => "/api/video/grayscale/",
        JobKind::VideoFilter => "/api/video/filter/",
    }
}

/// What the user filled in on the submit screen.
#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub kind: JobKind,
    pub file: PathBuf,
    pub use_scipy: bool,
    /// Whitespace-separated kernel coefficients (filter kinds only).
    pub kernel: String,
    /// Divisor applied after convolution (filter kinds only).
    pub factor: String,
}

/// Filter parameters after validation.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterParams {
    pub kernel: Kernel,
    /// Positive integer divisor.
    pub factor: u32,
}

impl SubmitRequest {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            file: PathBuf::new(),
            use_scipy: false,
            kernel: String::new(),
            factor: "1".into(),
        }
    }

    /// Fill kernel and factor from a named preset.
    pub fn apply_preset(&mut self, idx: usize) {
        if let Some((_, kernel, factor)) = PRESETS.get(idx) {
            self.kernel = kernel.to_string();
            self.factor = factor.to_string();
        }
    }

    /// Local checks that must pass before any request is sent.
    pub fn validate(&self) -> Result<Option<FilterParams>, ApiError> {
        if self.file.as_os_str().is_empty() {
            return Err(ApiError::Validation("Choose a file to upload.".into()));
        }
        if !self.kind.is_filter() {
            return Ok(None);
        }
        let kernel = Kernel::parse(&self.kernel).map_err(ApiError::Validation)?;
        // The server divides by an integer factor of at least 1.
        let factor: u32 = self
            .factor
            .trim()
            .parse()
            .ok()
            .filter(|f: &u32| *f >= 1)
            .ok_or_else(|| ApiError::Validation("Factor must be a whole number of at least 1.".into()))?;
        Ok(Some(FilterParams { kernel, factor }))
    }

    /// Multipart fields for an upload whose bytes were already read.
    pub fn fields(&self, params: Option<&FilterParams>, bytes: Vec<u8>) -> Vec<FormField> {
        let file_field = if self.kind.is_video() { "video" } else { "image" };
        let file_name = self
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_field.to_string());

        let mut fields = vec![FormField::File {
            name: file_field.into(),
            mime: guess_mime(&self.file).into(),
            file_name,
            bytes,
        }];
        if self.use_scipy {
            fields.push(FormField::Text {
                name: "use_scipy".into(),
                value: "on".into(),
            });
        }
        if let Some(p) = params {
            fields.push(FormField::Text {
                name: "filter".into(),
                value: p.kernel.to_string(),
            });
            fields.push(FormField::Text {
                name: "factor".into(),
                value: p.factor.to_string(),
            });
        }
        fields
    }
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
