//! Saving processed images and videos to the output directory.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Something the user asked to keep on disk.
#[derive(Clone, Debug)]
pub enum Artifact {
    /// Decoded image bytes from an inline result.
    Image { label: String, bytes: Vec<u8> },
    /// Base64 thumbnail from a history row.
    EncodedImage { label: String, data: String },
    /// Video artifact referenced by url.
    Video { url: String },
}

/// Short content hash used to keep file names unique.
fn short_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}

/// `<timestamp>_<label>_<hash>.<ext>`, with the label reduced to safe characters.
pub fn file_name(label: &str, bytes: &[u8], ext: &str) -> String {
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let label = label.trim_matches('_');
    let label = if label.is_empty() { "result" } else { label };
    format!(
        "{}_{}_{}.{ext}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        label,
        short_hash(bytes)
    )
}

/// File name for a downloaded video, taken from the url when it has one.
pub fn video_file_name(url: &str, bytes: &[u8]) -> String {
    let last = url
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("");
    let has_ext = Path::new(last)
        .extension()
        .is_some_and(|e| !e.is_empty());
    if has_ext && !last.starts_with('.') {
        let stem = Path::new(last)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = Path::new(last)
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        file_name(&stem, bytes, &ext)
    } else {
        file_name("video", bytes, "mp4")
    }
}

/// Write bytes under `dir`, creating it when needed.
pub async fn save(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    tracing::info!("saved {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}
