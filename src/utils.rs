//! Utility functions for formatting and file inspection

use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

const MD5_CHUNK: usize = 1024 * 1024;

/// Format a duration as `HH:MM:SS`
///
/// Hours are not wrapped at 24; sub-second parts are truncated.
///
/// # Examples
///
/// ```
/// use build_bot::utils::fmt_duration;
/// use std::time::Duration;
///
/// assert_eq!(fmt_duration(Duration::from_secs(3725)), "01:02:05");
/// assert_eq!(fmt_duration(Duration::from_secs(100 * 3600)), "100:00:00");
/// ```
pub fn fmt_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// Format a byte count in mebibytes with two decimals, e.g. `"12.50 MB"`
pub fn fmt_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// File name component of `path` as a display string
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Hex MD5 of a file, computed on a blocking thread
///
/// ROM zips are several GiB, so the file is hashed in chunks.
pub async fn md5_file(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut ctx = md5::Context::new();
        let mut buf = vec![0u8; MD5_CHUNK];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            ctx.consume(&buf[..n]);
        }
        Ok(format!("{:x}", ctx.compute()))
    })
    .await
    .map_err(|e| Error::Other(format!("checksum task failed: {e}")))?
}
