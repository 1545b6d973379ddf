//! Fitting a log file under the Bot API document limit
//!
//! Logs within the limit go out unchanged. Larger ones are deflated into a
//! zip; if even that is too big, only the last `limit` bytes are sent,
//! starting on a line boundary.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Largest document the Bot API accepts
pub const MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;

/// File contents and name as they will be uploaded
#[derive(Debug)]
pub struct Attachment {
    /// Name shown in the chat
    pub file_name: String,
    /// Payload
    pub bytes: Vec<u8>,
}

/// Read `path`, shrinking it when it exceeds `limit` bytes
pub fn prepare(path: &Path, limit: u64) -> io::Result<Attachment> {
    let file_name = crate::utils::file_name(path);
    let size = std::fs::metadata(path)?.len();
    if size <= limit {
        return Ok(Attachment {
            file_name,
            bytes: std::fs::read(path)?,
        });
    }

    let zipped = compress(path, &file_name, size)?;
    if zipped.len() as u64 <= limit {
        tracing::info!(
            size,
            compressed = zipped.len(),
            "log over document limit, sending it compressed"
        );
        return Ok(Attachment {
            file_name: format!("{file_name}.zip"),
            bytes: zipped,
        });
    }

    tracing::warn!(size, limit, "compressed log still over document limit, sending its tail");
    Ok(Attachment {
        file_name: tail_name(&file_name),
        bytes: read_tail(path, limit)?,
    })
}

fn compress(path: &Path, file_name: &str, size: u64) -> io::Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
        .large_file(size > u64::from(u32::MAX));
    zip.start_file(file_name, options)?;
    io::copy(&mut File::open(path)?, &mut zip)?;
    Ok(zip.finish()?.into_inner())
}

/// Last `max` bytes of the file, from the first full line on
fn read_tail(path: &Path, max: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let start = file.metadata()?.len().saturating_sub(max);
    file.seek(SeekFrom::Start(start))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    if start > 0 {
        if let Some(newline) = bytes.iter().position(|&b| b == b'\n') {
            bytes.drain(..=newline);
        }
    }
    Ok(bytes)
}

fn tail_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-tail.{ext}"),
        _ => format!("{file_name}-tail"),
    }
}
