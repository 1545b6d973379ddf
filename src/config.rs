//! Configuration types for build-bot
//!
//! The configuration is read once at startup (from the process environment,
//! optionally seeded from a `config.env` file) into an immutable [`Config`]
//! that is passed by reference into every component.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Telegram bot settings
#[derive(Clone, Debug)]
pub struct TelegramConfig {
    /// Bot token (`CONFIG_BOT_TOKEN`)
    pub bot_token: String,

    /// Primary status destination (`CONFIG_CHATID`)
    pub chat_id: String,

    /// Destination for failure logs (`CONFIG_ERROR_CHATID`, defaults to `chat_id`)
    pub error_chat_id: Option<String>,

    /// Bot API base URL (default: "https://api.telegram.org")
    pub api_base: String,

    /// Timeout per API request (default: 30 seconds)
    pub request_timeout: Duration,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            error_chat_id: None,
            api_base: default_telegram_api(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl TelegramConfig {
    /// Chat that receives failure logs
    pub fn error_chat(&self) -> &str {
        self.error_chat_id.as_deref().unwrap_or(&self.chat_id)
    }
}

/// File-hosting settings
#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// PixelDrain API key (`CONFIG_PDUP_API`); PixelDrain is unavailable without it
    pub pixeldrain_api_key: Option<String>,

    /// PixelDrain base URL (default: "https://pixeldrain.com")
    pub pixeldrain_base: String,

    /// Also upload to GoFile (`CONFIG_GOFILE=true`)
    pub gofile_enabled: bool,

    /// GoFile API base URL used for server discovery (default: "https://api.gofile.io")
    pub gofile_api_base: String,

    /// GoFile upload URL template; `{server}` is replaced by the discovered server name
    pub gofile_upload_url: String,

    /// Timeout per transfer (default: 300 seconds)
    pub timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            pixeldrain_api_key: None,
            pixeldrain_base: default_pixeldrain_base(),
            gofile_enabled: false,
            gofile_api_base: default_gofile_api(),
            gofile_upload_url: default_gofile_upload_url(),
            timeout: default_upload_timeout(),
        }
    }
}

/// Build loop settings shared by the ROM and kernel pipelines
#[derive(Clone, Debug)]
pub struct BuildConfig {
    /// Parallel jobs (`CONFIG_JOBS`); None = available parallelism
    pub jobs: Option<usize>,

    /// Minimum interval between non-boundary status renders (default: 15 seconds)
    pub update_interval: Duration,

    /// Grace period between SIGTERM and SIGKILL on interrupt (default: 1 second)
    pub kill_grace: Duration,

    /// Build log path (default: "build.log")
    pub log_file: PathBuf,

    /// Build output directory (default: "out")
    pub out_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            update_interval: default_update_interval(),
            kill_grace: default_kill_grace(),
            log_file: default_log_file(),
            out_dir: default_out_dir(),
        }
    }
}

impl BuildConfig {
    /// Effective job count: configured value, else available parallelism, else 4
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}

/// ROM build settings
#[derive(Clone, Debug, Default)]
pub struct RomConfig {
    /// Device codename (`CONFIG_DEVICE`)
    pub device: Option<String>,

    /// Make target (`CONFIG_BUILD_TARGET`)
    pub target: Option<String>,

    /// Build variant, e.g. userdebug (`CONFIG_BUILD_TYPE`)
    pub build_variant: Option<String>,

    /// Display name (`CONFIG_ROM_NAME`); defaults to the source tree folder name
    pub rom_name: Option<String>,

    /// Shell commands run after lunch/breakfast (`CONFIG_ROM_CUSTOM_COMMANDS`)
    pub custom_commands: Option<String>,

    /// Images packed into the recovery zip (`CONFIG_RECOVERY_IMAGES`)
    pub recovery_images: Vec<String>,
}

impl RomConfig {
    /// Display name for the ROM, falling back to the folder name of `tree`
    pub fn display_name(&self, tree: &Path) -> String {
        self.rom_name
            .clone()
            .or_else(|| {
                tree.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .filter(|n| !n.is_empty())
            })
            .unwrap_or_else(|| "Unknown ROM".to_string())
    }
}

/// One source -> destination copy rule for AnyKernel3 packaging
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMapping {
    /// File name under the kernel boot output directory
    pub src: String,
    /// File name inside the AnyKernel3 tree
    pub dst: String,
}

impl FileMapping {
    fn new(src: &str, dst: &str) -> Self {
        Self {
            src: src.to_string(),
            dst: dst.to_string(),
        }
    }
}

/// Kernel build settings
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Defconfig target(s) (`CONFIG_DEFCONFIG`, whitespace separated)
    pub defconfig: Option<String>,

    /// AnyKernel3 repository URL (`CONFIG_AK3_REPO`)
    pub anykernel_repo: Option<String>,

    /// AnyKernel3 checkout directory (default: "AnyKernel3")
    pub anykernel_dir: PathBuf,

    /// KernelSU setup script URL (`CONFIG_KSU_URL`)
    pub ksu_url: String,

    /// Shell commands run after configuring (`CONFIG_KERNEL_CUSTOM_COMMANDS`)
    pub custom_commands: Option<String>,

    /// Copy rules for packaging (`CONFIG_FILES_MAP`, `src:dst;src:dst`)
    pub files_map: Vec<FileMapping>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            defconfig: None,
            anykernel_repo: None,
            anykernel_dir: default_anykernel_dir(),
            ksu_url: default_ksu_url(),
            custom_commands: None,
            files_map: default_files_map(),
        }
    }
}

/// Retry configuration for notification API calls
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first call (default: 2)
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 2 seconds)
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for build-bot
///
/// Fields are organized into sub-configs:
/// - [`telegram`](TelegramConfig): bot token and destinations
/// - [`upload`](UploadConfig): file-hosting providers
/// - [`build`](BuildConfig): jobs, cadence, log file
/// - [`rom`](RomConfig) / [`kernel`](KernelConfig): pipeline specific settings
/// - [`retry`](RetryConfig): notification retry policy
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Telegram settings
    pub telegram: TelegramConfig,

    /// Upload settings
    pub upload: UploadConfig,

    /// Build loop settings
    pub build: BuildConfig,

    /// ROM pipeline settings
    pub rom: RomConfig,

    /// Kernel pipeline settings
    pub kernel: KernelConfig,

    /// Notification retry policy
    pub retry: RetryConfig,
}

impl Config {
    /// Seed the process environment from an env file
    ///
    /// Existing variables are not overridden. A missing file is not an error.
    pub fn load_env_file(path: &Path) -> Result<()> {
        match dotenvy::from_path(path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "loaded env file");
                Ok(())
            }
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no env file, using process environment");
                Ok(())
            }
            Err(e) => Err(Error::Config {
                message: format!("failed to read {}: {e}", path.display()),
                key: None,
            }),
        }
    }

    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from a key lookup function
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Config::default();

        config.telegram.bot_token = get("CONFIG_BOT_TOKEN").unwrap_or_default();
        config.telegram.chat_id = get("CONFIG_CHATID").unwrap_or_default();
        config.telegram.error_chat_id = get("CONFIG_ERROR_CHATID");

        config.upload.pixeldrain_api_key = get("CONFIG_PDUP_API");
        config.upload.gofile_enabled = get("CONFIG_GOFILE").as_deref() == Some("true");

        config.build.jobs = parse_number(&get, "CONFIG_JOBS")?;
        if let Some(interval) = parse_secs(&get, "CONFIG_UPDATE_INTERVAL")? {
            config.build.update_interval = interval;
        }
        if let Some(grace) = parse_secs(&get, "CONFIG_KILL_GRACE")? {
            config.build.kill_grace = grace;
        }

        config.rom.device = get("CONFIG_DEVICE");
        config.rom.target = get("CONFIG_BUILD_TARGET");
        config.rom.build_variant = get("CONFIG_BUILD_TYPE");
        config.rom.rom_name = get("CONFIG_ROM_NAME");
        config.rom.custom_commands = get("CONFIG_ROM_CUSTOM_COMMANDS");
        config.rom.recovery_images = get("CONFIG_RECOVERY_IMAGES")
            .map(|v| parse_image_list(&v))
            .unwrap_or_default();

        config.kernel.defconfig = get("CONFIG_DEFCONFIG");
        config.kernel.anykernel_repo = get("CONFIG_AK3_REPO");
        if let Some(url) = get("CONFIG_KSU_URL") {
            config.kernel.ksu_url = url;
        }
        config.kernel.custom_commands = get("CONFIG_KERNEL_CUSTOM_COMMANDS");
        if let Some(raw) = get("CONFIG_FILES_MAP") {
            match parse_files_map(&raw) {
                Some(map) => {
                    tracing::info!(entries = map.len(), "custom files map loaded");
                    config.kernel.files_map = map;
                }
                None => {
                    tracing::warn!("CONFIG_FILES_MAP is empty or invalid, using default map");
                }
            }
        }

        Ok(config)
    }

    fn validate_common(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(Error::missing_config("CONFIG_BOT_TOKEN"));
        }
        if self.telegram.chat_id.is_empty() {
            return Err(Error::missing_config("CONFIG_CHATID"));
        }
        for (key, value) in [
            ("CONFIG_UPDATE_INTERVAL", self.build.update_interval),
            ("CONFIG_KILL_GRACE", self.build.kill_grace),
        ] {
            if value.is_zero() {
                return Err(Error::Config {
                    message: format!("{key} must not be zero"),
                    key: Some(key.to_string()),
                });
            }
        }
        for (key, value) in [
            ("telegram.api_base", &self.telegram.api_base),
            ("upload.pixeldrain_base", &self.upload.pixeldrain_base),
            ("upload.gofile_api_base", &self.upload.gofile_api_base),
        ] {
            url::Url::parse(value).map_err(|e| Error::Config {
                message: format!("invalid URL {value:?}: {e}"),
                key: Some(key.to_string()),
            })?;
        }
        Ok(())
    }

    /// Check everything the ROM pipeline needs is present
    pub fn validate_rom(&self) -> Result<()> {
        self.validate_common()?;
        if self.rom.device.is_none() {
            return Err(Error::missing_config("CONFIG_DEVICE"));
        }
        if self.rom.target.is_none() {
            return Err(Error::missing_config("CONFIG_BUILD_TARGET"));
        }
        if self.rom.build_variant.is_none() {
            return Err(Error::missing_config("CONFIG_BUILD_TYPE"));
        }
        Ok(())
    }

    /// Check everything the kernel pipeline needs is present
    pub fn validate_kernel(&self) -> Result<()> {
        self.validate_common()?;
        if self.kernel.defconfig.is_none() {
            return Err(Error::missing_config("CONFIG_DEFCONFIG"));
        }
        Ok(())
    }
}

fn parse_number<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| Error::Config {
                message: format!("{key}={raw:?} is not a valid number: {e}"),
                key: Some(key.to_string()),
            })
        })
        .transpose()
}

/// Whole seconds, at least one
fn parse_secs<G>(get: &G, key: &str) -> Result<Option<Duration>>
where
    G: Fn(&str) -> Option<String>,
{
    match parse_number::<u64, _>(get, key)? {
        Some(0) => Err(Error::Config {
            message: format!("{key} must be at least one second"),
            key: Some(key.to_string()),
        }),
        secs => Ok(secs.map(Duration::from_secs)),
    }
}

/// Split a recovery image list on `;` and whitespace
pub fn parse_image_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `src:dst;src:dst`; returns None when no valid pair is found
pub fn parse_files_map(raw: &str) -> Option<Vec<FileMapping>> {
    let map: Vec<FileMapping> = raw
        .split(';')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(src, dst)| FileMapping::new(src.trim(), dst.trim()))
        .filter(|m| !m.src.is_empty() && !m.dst.is_empty())
        .collect();
    (!map.is_empty()).then_some(map)
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_pixeldrain_base() -> String {
    "https://pixeldrain.com".to_string()
}

fn default_gofile_api() -> String {
    "https://api.gofile.io".to_string()
}

fn default_gofile_upload_url() -> String {
    "https://{server}.gofile.io/uploadFile".to_string()
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_update_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_kill_grace() -> Duration {
    Duration::from_secs(1)
}

fn default_log_file() -> PathBuf {
    PathBuf::from("build.log")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

fn default_anykernel_dir() -> PathBuf {
    PathBuf::from("AnyKernel3")
}

fn default_ksu_url() -> String {
    "https://raw.githubusercontent.com/tiann/KernelSU/main/kernel/setup.sh".to_string()
}

fn default_files_map() -> Vec<FileMapping> {
    vec![
        FileMapping::new("Image.gz", "Image.gz"),
        FileMapping::new("dtbo.img", "dtbo.img"),
        FileMapping::new("dtb.img", "dtb"),
    ]
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
