//! Screenshot files in a run's artifacts directory

use protocol::ScreenshotRef;
use std::path::Path;

/// `step-003.png`, or `step-003-scroll-30.png` with a label
pub fn screenshot_filename(step_index: u32, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("step-{:03}-{}.png", step_index, label),
        None => format!("step-{:03}.png", step_index),
    }
}

/// Write a PNG into `dir` and describe it for a step message
pub async fn save_screenshot(
    dir: &Path,
    filename: String,
    caption: impl Into<String>,
    png: &[u8],
) -> std::io::Result<ScreenshotRef> {
    let path = dir.join(&filename);
    tokio::fs::write(&path, png).await?;
    let size_bytes = tokio::fs::metadata(&path).await?.len();
    tracing::debug!("[Artifacts] Saved {} ({} bytes)", path.display(), size_bytes);

    Ok(ScreenshotRef {
        filename,
        caption: caption.into(),
        size_bytes,
    })
}
