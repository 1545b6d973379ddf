//! Kernel pipeline
//!
//! KernelSU setup (optional) -> clean (optional) -> `make {defconfig}` ->
//! `make Image.gz dtbo.img dtb.img` -> AnyKernel3 zip -> upload.

use super::PipelineContext;
use crate::config::{FileMapping, KernelConfig};
use crate::error::{Error, Result};
use crate::notify::render::escape;
use crate::process::CommandSpec;
use crate::runner::BuildSpec;
use crate::types::{Artifact, InfoBlock};
use crate::upload::UploadReport;
use chrono::NaiveDateTime;
use regex::Regex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const ZIP_FAILED_REASON: &str = "Could not create ZIP.";
const DEFAULT_COMPILER: &str = "Clang/LLVM";
const NOT_AVAILABLE: &str = "N/A";

#[allow(clippy::expect_used)]
static CLANG_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"clang version \d+\.\d+\.\d+").expect("valid regex"));

#[allow(clippy::expect_used)]
static LINUX_BANNER: LazyLock<regex::bytes::Regex> = LazyLock::new(|| {
    regex::bytes::Regex::new(r"Linux version ([0-9][\x20-\x7e]*)").expect("valid regex")
});

// version, weekday, month, day, time
#[allow(clippy::expect_used)]
static VERSION_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+).*?\b(\w{3})\s+(\w{3})\s+(\d{1,2})\s+(\d{2}:\d{2}:\d{2})")
        .expect("valid regex")
});

/// Command-line switches of the kernel pipeline
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelOptions {
    /// Remove `out/` before building
    pub clean: bool,
    /// Run the KernelSU setup script and prefix the zip with `KSU-`
    pub ksu: bool,
}

/// `curl -LSs "{url}" | bash`
pub fn ksu_setup_command(url: &str) -> CommandSpec {
    CommandSpec::shell(format!("curl -LSs \"{url}\" | bash"))
}

async fn setup_kernelsu(url: &str) -> Result<()> {
    tracing::info!(url, "setting up KernelSU");
    let status = ksu_setup_command(url).status().await?;
    if !status.success() {
        return Err(Error::ExternalTool(format!(
            "KernelSU setup exited with {:?}",
            status.code()
        )));
    }
    tracing::info!("KernelSU setup finished");
    Ok(())
}

/// `<code><a href='{origin}/commit/{full}'>{short}</a></code>`, `.git` stripped from origin
pub fn commit_link(origin: &str, full: &str, short: &str) -> String {
    let origin = origin.trim();
    let origin = origin.strip_suffix(".git").unwrap_or(origin);
    format!(
        "<code><a href='{}/commit/{}'>{}</a></code>",
        escape(origin),
        escape(full.trim()),
        escape(short.trim())
    )
}

fn git(args: &[&str]) -> CommandSpec {
    CommandSpec::argv("git", args.iter().copied())
}

async fn git_head() -> Option<String> {
    let short = git(&["rev-parse", "--short", "HEAD"]);
    let full = git(&["rev-parse", "HEAD"]);
    let origin = git(&["remote", "get-url", "origin"]);
    match tokio::try_join!(short.output(), full.output(), origin.output()) {
        Ok((short, full, origin)) => Some(commit_link(&origin, &full, &short)),
        Err(e) => {
            tracing::warn!(error = %e, "could not read git head");
            None
        }
    }
}

/// Value of `CONFIG_LOCALVERSION=` in a kernel `.config`, quotes removed
pub fn parse_local_version(config: &str) -> Option<String> {
    config
        .lines()
        .find_map(|l| l.trim().strip_prefix("CONFIG_LOCALVERSION="))
        .map(|v| v.trim().trim_matches('"').to_string())
}

async fn local_version(dot_config: &Path) -> String {
    match tokio::fs::read_to_string(dot_config).await {
        Ok(text) => parse_local_version(&text).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        Err(_) => NOT_AVAILABLE.to_string(),
    }
}

/// `clang version X.Y.Z` from the first line of `clang --version`
pub fn parse_clang_version(output: &str) -> Option<String> {
    let first = output.lines().next()?;
    CLANG_VERSION.find(first).map(|m| m.as_str().to_string())
}

async fn compiler_version() -> String {
    let clang = match which::which("clang") {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(error = %e, "clang not found in PATH");
            return DEFAULT_COMPILER.to_string();
        }
    };
    match CommandSpec::argv(clang.to_string_lossy(), ["--version"]).output().await {
        Ok(out) => parse_clang_version(&out).unwrap_or_else(|| DEFAULT_COMPILER.to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "compiler check failed");
            DEFAULT_COMPILER.to_string()
        }
    }
}

fn make_args(out_dir: &Path) -> Vec<String> {
    vec![
        format!("O={}", out_dir.display()),
        "ARCH=arm64".to_string(),
        "LLVM=1".to_string(),
    ]
}

/// `make O=out ARCH=arm64 LLVM=1 {defconfig...}`
pub fn configure_command(defconfig: &str, out_dir: &Path) -> CommandSpec {
    let mut args = make_args(out_dir);
    args.extend(defconfig.split_whitespace().map(str::to_string));
    CommandSpec::argv("make", args)
}

/// `make -j{jobs} O=out ARCH=arm64 LLVM=1 Image.gz dtbo.img dtb.img`
pub fn build_command(jobs: usize, out_dir: &Path) -> CommandSpec {
    let mut args = vec![format!("-j{jobs}")];
    args.extend(make_args(out_dir));
    args.extend(["Image.gz", "dtbo.img", "dtb.img"].map(str::to_string));
    CommandSpec::argv("make", args)
}

/// Static info block for kernel renders
pub fn kernel_info(
    head: Option<String>,
    local_version: &str,
    defconfig: &str,
    jobs: usize,
    compiler: &str,
) -> InfoBlock {
    let mut info = InfoBlock::new();
    match head {
        Some(link) => info.set_markup("Head", link),
        None => info.set("Head", "Unknown"),
    };
    info.with("Local Version", local_version)
        .with("Defconfig", defconfig)
        .with("Jobs", jobs.to_string())
        .with("Compiler", compiler)
}

/// First `Linux version ...` banner in a kernel image, without the prefix
pub fn find_linux_version(image: &[u8]) -> Option<String> {
    LINUX_BANNER
        .captures(image)
        .and_then(|c| c.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).trim().to_string())
}

/// Zip name derived from the kernel banner
///
/// `4.14.190-perf ... Mon Oct 19 12:34:56 UTC 2026` becomes
/// `4.14.190-perf-MonOct19-123456.zip`.
pub fn zip_name(version: Option<&str>, now: NaiveDateTime, ksu: bool) -> String {
    let stamped = version.and_then(|v| VERSION_STAMP.captures(v)).map(|c| {
        format!(
            "{}-{}{}{}-{}.zip",
            c[1].replace("-dirty", ""),
            &c[2],
            &c[3],
            &c[4],
            c[5].replace(':', "")
        )
    });
    let name = stamped.unwrap_or_else(|| {
        let tag = version
            .and_then(|v| v.split_whitespace().next())
            .unwrap_or("Unknown-Kernel");
        format!("{tag}-{}.zip", now.format("%Y%a%b%d-%H%M%S"))
    });
    if ksu { format!("KSU-{name}") } else { name }
}

/// Clone the AnyKernel3 tree, or update it and drop stale zips
async fn prepare_anykernel(kernel: &KernelConfig) -> Result<()> {
    let dir = &kernel.anykernel_dir;
    let dir_arg = dir.to_string_lossy().into_owned();

    if tokio::fs::try_exists(dir).await? {
        tracing::info!(path = %dir.display(), "updating AnyKernel3");
        let pull = CommandSpec::argv("git", ["-C", dir_arg.as_str(), "pull", "-q"]);
        if !pull.status().await?.success() {
            tracing::warn!("AnyKernel3 pull failed, using the existing tree");
        }
        for stale in stale_zips(dir) {
            tracing::debug!(path = %stale.display(), "removing stale zip");
            tokio::fs::remove_file(&stale).await?;
        }
        return Ok(());
    }

    let repo = kernel
        .anykernel_repo
        .as_deref()
        .ok_or_else(|| Error::missing_config("CONFIG_AK3_REPO"))?;
    tracing::info!(repo, path = %dir.display(), "cloning AnyKernel3");
    let clone = CommandSpec::argv("git", ["clone", "-q", repo, dir_arg.as_str()]);
    if !clone.status().await?.success() {
        return Err(Error::ExternalTool(format!("git clone {repo} failed")));
    }
    Ok(())
}

fn stale_zips(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!("{}/*.zip", glob::Pattern::escape(&dir.to_string_lossy()));
    glob::glob(&pattern)
        .map(|paths| paths.filter_map(|p| p.ok()).collect())
        .unwrap_or_default()
}

/// Copy build outputs into the AnyKernel3 tree; returns how many were copied
pub fn copy_files(boot_dir: &Path, anykernel_dir: &Path, map: &[FileMapping]) -> Result<usize> {
    let mut copied = 0;
    for FileMapping { src, dst } in map {
        let from = boot_dir.join(src);
        if !from.is_file() {
            tracing::warn!(path = %from.display(), "source file not found, skipped");
            continue;
        }
        std::fs::copy(&from, anykernel_dir.join(dst))?;
        tracing::info!(src, dst, "copied");
        copied += 1;
    }
    Ok(copied)
}

/// Entries `zip -x ".git*" README.md "*placeholder"` would leave out
fn is_excluded(relative: &str) -> bool {
    relative.starts_with(".git") || relative == "README.md" || relative.ends_with("placeholder")
}

#[cfg(unix)]
fn unix_mode(meta: &std::fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode())
}

#[cfg(not(unix))]
fn unix_mode(_meta: &std::fs::Metadata) -> Option<u32> {
    None
}

/// Zip the AnyKernel3 tree into `dest` (deflate, level 9)
pub fn package_zip(anykernel_dir: &Path, dest: &Path) -> Result<PathBuf> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let base = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut files = 0usize;
    let walker = WalkDir::new(anykernel_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.path()
                .strip_prefix(anykernel_dir)
                .map(|rel| !is_excluded(&zip_path(rel)))
                .unwrap_or(false)
        });
    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let Ok(rel) = entry.path().strip_prefix(anykernel_dir) else {
            continue;
        };
        let name = zip_path(rel);
        let meta = entry.metadata().map_err(|e| Error::Io(e.into()))?;
        let options = match unix_mode(&meta) {
            Some(mode) => base.unix_permissions(mode),
            None => base,
        };

        if meta.is_dir() {
            zip.add_directory(name, options)?;
        } else if meta.is_file() {
            zip.start_file(name, options)?;
            std::io::copy(&mut File::open(entry.path())?, &mut zip)?;
            files += 1;
        }
    }
    zip.finish()?;

    tracing::info!(path = %dest.display(), files, "AnyKernel3 zip created");
    Ok(dest.to_path_buf())
}

fn zip_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

async fn package_anykernel(
    kernel: &KernelConfig,
    boot_dir: &Path,
    ksu: bool,
) -> Result<PathBuf> {
    prepare_anykernel(kernel).await?;

    let image = boot_dir.join("Image");
    let version = match tokio::fs::read(&image).await {
        Ok(bytes) => find_linux_version(&bytes),
        Err(e) => {
            tracing::warn!(error = %e, path = %image.display(), "could not read kernel image");
            None
        }
    };
    let name = zip_name(
        version.as_deref(),
        chrono::Local::now().naive_local(),
        ksu,
    );
    tracing::info!(version = ?version, zip = %name, "packaging AnyKernel3");

    let ak_dir = kernel.anykernel_dir.clone();
    let dest = ak_dir.parent().unwrap_or(Path::new("")).join(&name);
    let boot_dir = boot_dir.to_path_buf();
    let map = kernel.files_map.clone();
    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        copy_files(&boot_dir, &ak_dir, &map)?;
        package_zip(&ak_dir, &dest)
    })
    .await
    .map_err(|e| Error::Other(format!("packaging task failed: {e}")))?
}

/// Run the kernel pipeline in the current directory
pub async fn run(ctx: &PipelineContext, opts: KernelOptions) -> Result<UploadReport> {
    let config = ctx.config.clone();
    let kernel = &config.kernel;
    let defconfig = kernel
        .defconfig
        .as_deref()
        .ok_or_else(|| Error::missing_config("CONFIG_DEFCONFIG"))?;
    let out_dir = &config.build.out_dir;
    let jobs = config.build.jobs();

    if opts.ksu {
        ctx.interruptible(setup_kernelsu(&kernel.ksu_url)).await??;
    }
    if opts.clean {
        ctx.clean_out_dir().await?;
    }

    let (head, compiler) = ctx
        .interruptible(async { tokio::join!(git_head(), compiler_version()) })
        .await?;

    let configure = configure_command(defconfig, out_dir);
    tracing::info!(command = %configure, "configuring");
    if !ctx.interruptible(configure.status()).await??.success() {
        tracing::warn!(defconfig, "configure step failed");
    }
    if let Some(custom) = kernel.custom_commands.as_deref() {
        let custom = CommandSpec::shell(custom);
        let status = ctx.interruptible(custom.status()).await??;
        if !status.success() {
            tracing::warn!(code = ?status.code(), "custom commands failed");
        }
    }

    let local = local_version(&out_dir.join(".config")).await;
    let info = kernel_info(head, &local, defconfig, jobs, &compiler);
    let command = build_command(jobs, out_dir);
    tracing::info!(command = %command, "starting kernel build");
    let build = ctx.runner().run(BuildSpec::new(command, info)).await?;

    let boot_dir = out_dir.join("arch").join("arm64").join("boot");
    let zip = match ctx
        .interruptible(package_anykernel(kernel, &boot_dir, opts.ksu))
        .await?
    {
        Ok(zip) if zip.is_file() => zip,
        Ok(zip) => {
            tracing::error!(path = %zip.display(), "zip was not written");
            return Err(ctx.artifact_missing(&build, ZIP_FAILED_REASON).await);
        }
        Err(e) => {
            tracing::error!(error = %e, "AnyKernel3 packaging failed");
            return Err(ctx.artifact_missing(&build, ZIP_FAILED_REASON).await);
        }
    };

    let artifacts = [Artifact::new("Download", &zip)];
    ctx.deliver(&build, &artifacts, &zip).await
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InfoValue;
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(12, 5, 9)
            .unwrap()
    }

    #[test]
    fn commit_link_strips_git_suffix() {
        assert_eq!(
            commit_link("https://github.com/me/kernel.git\n", "abcdef123456\n", "abcdef1\n"),
            "<code><a href='https://github.com/me/kernel/commit/abcdef123456'>abcdef1</a></code>"
        );
    }

    #[test]
    fn head_falls_back_to_unknown_text() {
        let info = kernel_info(None, "-perf", "vendor/lavender_defconfig", 8, "Clang/LLVM");
        assert_eq!(info.get("Head"), Some(&InfoValue::Text("Unknown".into())));
        let labels: Vec<_> = info.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, ["Head", "Local Version", "Defconfig", "Jobs", "Compiler"]);

        let linked = kernel_info(Some("<a href='x'>y</a>".into()), "", "d", 1, "c");
        assert!(matches!(linked.get("Head"), Some(InfoValue::Markup(_))));
    }

    #[test]
    fn local_version_from_dot_config() {
        let config = "# comment\nCONFIG_LOCALVERSION=\"-perf\"\nCONFIG_LOCALVERSION_AUTO=y\n";
        assert_eq!(parse_local_version(config).as_deref(), Some("-perf"));
        assert_eq!(parse_local_version("CONFIG_FOO=y\n"), None);
    }

    #[test]
    fn clang_version_from_first_line() {
        let out = "Android (11368308) clang version 18.0.1 (https://android.googlesource.com)\nTarget: x86_64\n";
        assert_eq!(parse_clang_version(out).as_deref(), Some("clang version 18.0.1"));
        assert_eq!(parse_clang_version("gcc (GCC) 13.2.0\nclang version 1.2.3"), None);
    }

    #[test]
    fn make_commands() {
        let out = Path::new("out");
        assert_eq!(
            configure_command("vendor/a_defconfig vendor/b.config", out).to_string(),
            "make O=out ARCH=arm64 LLVM=1 vendor/a_defconfig vendor/b.config"
        );
        assert_eq!(
            build_command(16, out).to_string(),
            "make -j16 O=out ARCH=arm64 LLVM=1 Image.gz dtbo.img dtb.img"
        );
    }

    #[test]
    fn finds_banner_in_binary_image() {
        let mut image = vec![0u8, 0x7f, b'E', b'L', b'F', 0, 0];
        image.extend_from_slice(b"Linux version %s\0");
        image.extend_from_slice(
            b"Linux version 4.14.190-perf-dirty (me@host) (clang version 18.0.1) #1 SMP PREEMPT Mon Oct 19 12:34:56 UTC 2026\n\0tail",
        );
        assert_eq!(
            find_linux_version(&image).as_deref(),
            Some(
                "4.14.190-perf-dirty (me@host) (clang version 18.0.1) #1 SMP PREEMPT Mon Oct 19 12:34:56 UTC 2026"
            )
        );
        assert_eq!(find_linux_version(b"no banner here"), None);
    }

    #[test]
    fn zip_name_from_banner() {
        let banner = "4.14.190-perf-dirty (me@host) (clang version 18.0.1) #1 SMP PREEMPT Mon Oct 19 12:34:56 UTC 2026";
        assert_eq!(
            zip_name(Some(banner), noon(), false),
            "4.14.190-perf-MonOct19-123456.zip"
        );
        assert_eq!(
            zip_name(Some(banner), noon(), true),
            "KSU-4.14.190-perf-MonOct19-123456.zip"
        );
    }

    #[test]
    fn zip_name_fallbacks() {
        assert_eq!(
            zip_name(None, noon(), false),
            "Unknown-Kernel-2026MonOct19-120509.zip"
        );
        assert_eq!(
            zip_name(Some("5.10.0-custom"), noon(), false),
            "5.10.0-custom-2026MonOct19-120509.zip"
        );
    }

    #[test]
    fn copies_mapped_files_and_skips_missing() {
        let boot = tempfile::tempdir().unwrap();
        let ak = tempfile::tempdir().unwrap();
        std::fs::write(boot.path().join("Image.gz"), "kernel").unwrap();
        std::fs::write(boot.path().join("dtb.img"), "dtb").unwrap();

        let copied = copy_files(boot.path(), ak.path(), &KernelConfig::default().files_map).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(std::fs::read_to_string(ak.path().join("dtb")).unwrap(), "dtb");
        assert!(!ak.path().join("dtbo.img").exists());
    }

    #[test]
    fn package_zip_skips_excluded_entries() {
        let root = tempfile::tempdir().unwrap();
        let ak = root.path().join("AnyKernel3");
        std::fs::create_dir_all(ak.join(".git/objects")).unwrap();
        std::fs::create_dir_all(ak.join("tools")).unwrap();
        std::fs::create_dir_all(ak.join("modules/system/lib/modules")).unwrap();
        std::fs::write(ak.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(ak.join(".gitignore"), "*.zip").unwrap();
        std::fs::write(ak.join("README.md"), "readme").unwrap();
        std::fs::write(ak.join("anykernel.sh"), "#!/bin/sh").unwrap();
        std::fs::write(ak.join("Image.gz"), "kernel").unwrap();
        std::fs::write(ak.join("tools/ak3-core.sh"), "core").unwrap();
        std::fs::write(ak.join("modules/system/lib/modules/placeholder"), "").unwrap();

        let dest = root.path().join("kernel.zip");
        package_zip(&ak, &dest).unwrap();

        let archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let names: Vec<_> = archive.file_names().collect();
        assert!(names.contains(&"anykernel.sh"));
        assert!(names.contains(&"Image.gz"));
        assert!(names.contains(&"tools/ak3-core.sh"));
        assert!(!names.iter().any(|n| n.starts_with(".git")));
        assert!(!names.contains(&"README.md"));
        assert!(!names.iter().any(|n| n.ends_with("placeholder")));
    }

    #[test]
    fn stale_zips_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.zip"), "").unwrap();
        std::fs::write(dir.path().join("anykernel.sh"), "").unwrap();
        assert_eq!(stale_zips(dir.path()), [dir.path().join("old.zip")]);
    }
}
