//! Status message rendering
//!
//! Messages use Telegram's HTML parse mode. Every dynamic value goes through
//! [`escape`] unless it is explicitly carried as [`InfoValue::Markup`].

use crate::types::{Button, InfoBlock, InfoValue, ProgressRecord};
use crate::utils::fmt_duration;
use std::time::Duration;

/// Escape `&`, `<`, `>` and quotes for HTML parse mode
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// One `<b>Label:</b> <code>value</code>` line
pub fn line(label: &str, value: &str) -> String {
    format!("<b>{}:</b> <code>{}</code>", escape(label), escape(value))
}

/// Render the static info block, one line per entry
pub fn info_block(info: &InfoBlock) -> String {
    info.iter()
        .map(|(label, value)| match value {
            InfoValue::Text(text) => line(label, text),
            InfoValue::Markup(markup) => format!("<b>{}:</b> {markup}", escape(label)),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Dynamic part of the progress render
///
/// With a progress record: percent/count, optional remaining time, elapsed.
/// Without one: elapsed only.
pub fn progress_stats(progress: Option<&ProgressRecord>, elapsed: Duration) -> String {
    let mut lines = Vec::with_capacity(3);
    if let Some(p) = progress {
        lines.push(line(
            "Progress",
            &format!("{} ({})", p.percent, p.completed_of_total),
        ));
        if let Some(eta) = &p.eta {
            lines.push(line("Remaining", eta));
        }
    }
    lines.push(line("Elapsed", &fmt_duration(elapsed)));
    lines.join("\n")
}

/// Sync has started
pub fn sync_start(details: &str) -> String {
    format!("<b>ℹ️ | Starting Synchronization...</b>\n{details}")
}

/// Sync has finished
pub fn sync_done(details: &str, took: Duration) -> String {
    format!(
        "<b>✅ | Synchronization Complete!</b>\n{details}\n<b>Time:</b> {}",
        fmt_duration(took)
    )
}

/// Build has started
pub fn build_start(info: &InfoBlock) -> String {
    format!("<b>ℹ️ | Starting Build...</b>\n\n{}", info_block(info))
}

/// Build is running
pub fn build_progress(info: &InfoBlock, progress: Option<&ProgressRecord>, elapsed: Duration) -> String {
    format!(
        "<b>🔄 | Building...</b>\n{}\n\n{}",
        progress_stats(progress, elapsed),
        info_block(info)
    )
}

/// Build has failed
pub fn build_failed(info: &InfoBlock, elapsed: Duration) -> String {
    format!(
        "<b>⚠️ | Build Failed</b>\n\nFailed after {}\n\n{}",
        fmt_duration(elapsed),
        info_block(info)
    )
}

/// Build has succeeded; the result is the base of every later render
pub fn build_success(info: &InfoBlock, elapsed: Duration) -> String {
    format!(
        "<b>✅ | Build Complete!</b>\n<b>Build Time:</b> <code>{}</code>\n\n{}",
        fmt_duration(elapsed),
        info_block(info)
    )
}

/// Artifacts are being uploaded
pub fn uploading(build_msg: &str) -> String {
    format!("{build_msg}\n\n<b>🔄 | Uploading Files...</b>")
}

/// Upload phase failed (or no artifact to upload)
pub fn upload_failed(build_msg: &str, reason: &str) -> String {
    format!(
        "{build_msg}\n\n<b>⚠️ | Upload Failed</b>\n\n{}",
        escape(reason)
    )
}

/// Facts about the primary artifact shown in the final render
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalReport {
    /// Time spent uploading
    pub upload_time: Duration,
    /// File name of the primary artifact
    pub file_name: String,
    /// Formatted size, e.g. `"1.50 MB"`
    pub size: String,
    /// Hex MD5 checksum
    pub md5: String,
}

/// Upload complete
pub fn final_message(build_msg: &str, report: &FinalReport) -> String {
    format!(
        "{build_msg}\n\n<b>✅ | Upload Complete</b>\n<b>Upload Time:</b> <code>{}</code>\n\n{}\n{}\n{}",
        fmt_duration(report.upload_time),
        line("File", &report.file_name),
        line("Size", &report.size),
        line("MD5", &report.md5),
    )
}

/// Bot API `reply_markup` payload for rows of link buttons
pub fn inline_keyboard(rows: &[Vec<Button>]) -> serde_json::Value {
    serde_json::json!({ "inline_keyboard": rows })
}
