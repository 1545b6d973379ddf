//! Configuration and workspace fixtures

use build_bot::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub const CHAT: &str = "-100200";
pub const ERROR_CHAT: &str = "-100999";

/// Temporary workspace with a config pointing its log file inside it
pub struct Workspace {
    pub dir: TempDir,
    pub config: Config,
}

#[allow(clippy::unwrap_used)]
impl Workspace {
    pub fn new(update_interval: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.telegram.bot_token = "123:test".into();
        config.telegram.chat_id = CHAT.into();
        config.telegram.error_chat_id = Some(ERROR_CHAT.into());
        config.build.update_interval = update_interval;
        config.build.kill_grace = Duration::from_millis(300);
        config.build.log_file = dir.path().join("build.log");
        config.build.out_dir = dir.path().join("out");
        Self { dir, config }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_file(&self) -> PathBuf {
        self.config.build.log_file.clone()
    }

    /// Write `contents` to a file in the workspace and return its path
    pub fn file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

/// Ninja-style progress lines from `start`% to `end`%, one per `step_ms`
pub fn ninja_script(start: u32, end: u32, step_ms: u64) -> String {
    let mut script = String::from("echo 'Starting ninja...'; ");
    for pct in start..=end {
        script.push_str(&format!(
            "echo '[ {pct}% {pct}/100 remaining: {} mins]'; sleep {}; ",
            100 - pct,
            step_ms as f64 / 1000.0
        ));
    }
    script.push_str("exit 0");
    script
}
