//! Loading configuration from a `config.env` file through the process environment

use build_bot::{Config, Error};
use serial_test::serial;

const KEYS: &[&str] = &[
    "CONFIG_BOT_TOKEN",
    "CONFIG_CHATID",
    "CONFIG_DEFCONFIG",
    "CONFIG_JOBS",
    "CONFIG_FILES_MAP",
    "CONFIG_UPDATE_INTERVAL",
];

fn clear_env() {
    for key in KEYS {
        // SAFETY: tests touching the environment are serialized
        unsafe { std::env::remove_var(key) };
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod env_file {
    use super::*;

    #[test]
    #[serial]
    fn env_file_seeds_kernel_config() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.env");
        std::fs::write(
            &path,
            "CONFIG_BOT_TOKEN=123:abc\n\
             CONFIG_CHATID=-100200\n\
             CONFIG_DEFCONFIG=\"vendor/lavender-perf_defconfig\"\n\
             CONFIG_JOBS=12\n\
             CONFIG_FILES_MAP=Image.gz-dtb:Image.gz-dtb;dtbo.img:dtbo.img\n",
        )
        .unwrap();

        Config::load_env_file(&path).unwrap();
        let config = Config::from_env().unwrap();
        clear_env();

        config.validate_kernel().unwrap();
        assert_eq!(
            config.kernel.defconfig.as_deref(),
            Some("vendor/lavender-perf_defconfig")
        );
        assert_eq!(config.build.jobs(), 12);
        assert_eq!(config.kernel.files_map.len(), 2);
        assert_eq!(config.kernel.files_map[0].src, "Image.gz-dtb");
    }

    #[test]
    #[serial]
    fn process_environment_wins_over_env_file() {
        clear_env();
        // SAFETY: tests touching the environment are serialized
        unsafe { std::env::set_var("CONFIG_CHATID", "-1") };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.env");
        std::fs::write(&path, "CONFIG_BOT_TOKEN=t\nCONFIG_CHATID=-2\n").unwrap();

        Config::load_env_file(&path).unwrap();
        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.telegram.chat_id, "-1");
        assert_eq!(config.telegram.bot_token, "t");
    }

    #[test]
    #[serial]
    fn zero_update_interval_is_a_config_error() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.env");
        std::fs::write(
            &path,
            "CONFIG_BOT_TOKEN=t\nCONFIG_CHATID=1\nCONFIG_UPDATE_INTERVAL=0\n",
        )
        .unwrap();

        Config::load_env_file(&path).unwrap();
        let result = Config::from_env();
        clear_env();

        let err = result.unwrap_err();
        assert!(
            matches!(err, Error::Config { key: Some(ref k), .. } if k == "CONFIG_UPDATE_INTERVAL")
        );
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    #[serial]
    fn missing_defconfig_is_reported_by_key() {
        clear_env();
        // SAFETY: tests touching the environment are serialized
        unsafe {
            std::env::set_var("CONFIG_BOT_TOKEN", "t");
            std::env::set_var("CONFIG_CHATID", "1");
        }

        let config = Config::from_env().unwrap();
        clear_env();

        let err = config.validate_kernel().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "CONFIG_DEFCONFIG"));
        assert_eq!(err.exit_code(), 1);
    }
}
