//! Log Recorder: persists every build line and mirrors it to stdout
//!
//! The file is truncated on open and flushed when the recorder is closed or
//! dropped, whichever comes first.

use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Scoped writer for the build log
pub struct LogRecorder {
    path: PathBuf,
    file: BufWriter<File>,
    mirror: Option<Box<dyn Write + Send>>,
    lines: u64,
}

impl LogRecorder {
    /// Open (truncate) `path` and mirror lines to the process stdout
    pub fn create(path: &Path) -> Result<Self> {
        Self::with_mirror(path, Some(Box::new(std::io::stdout())))
    }

    /// Open (truncate) `path` with a custom mirror, or none
    pub fn with_mirror(path: &Path, mirror: Option<Box<dyn Write + Send>>) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), "build log opened");
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            mirror,
            lines: 0,
        })
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines recorded so far
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Record one line verbatim (a newline is appended)
    ///
    /// A failing mirror is logged and detached; a failing file write is an error.
    pub fn record(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{line}")?;
        if let Some(mirror) = self.mirror.as_mut()
            && let Err(e) = writeln!(mirror, "{line}")
        {
            tracing::warn!(error = %e, "stdout mirror failed, continuing without it");
            self.mirror = None;
        }
        self.lines += 1;
        Ok(())
    }

    /// Flush and close the log
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()?;
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.flush()?;
        }
        Ok(())
    }
}

impl Drop for LogRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to flush build log");
        }
        tracing::debug!(path = %self.path.display(), lines = self.lines, "build log closed");
    }
}

impl std::fmt::Debug for LogRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRecorder")
            .field("path", &self.path)
            .field("mirrored", &self.mirror.is_some())
            .field("lines", &self.lines)
            .finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn records_to_file_and_mirror_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.log");
        let mirror = SharedBuf::default();

        let mut log = LogRecorder::with_mirror(&path, Some(Box::new(mirror.clone()))).unwrap();
        for line in ["first", "[ 10% 1/10]", "", "last"] {
            log.record(line).unwrap();
        }
        assert_eq!(log.lines(), 4);
        log.close().unwrap();

        let expected = "first\n[ 10% 1/10]\n\nlast\n";
        assert_eq!(std::fs::read_to_string(&path).unwrap(), expected);
        assert_eq!(String::from_utf8(mirror.0.lock().unwrap().clone()).unwrap(), expected);
    }

    #[test]
    fn drop_flushes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("build.log");
        {
            let mut log = LogRecorder::with_mirror(&path, None).unwrap();
            log.record("kept").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "kept\n");
    }

    #[test]
    fn reopening_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.log");
        std::fs::write(&path, "stale\n").unwrap();

        let log = LogRecorder::with_mirror(&path, None).unwrap();
        drop(log);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
