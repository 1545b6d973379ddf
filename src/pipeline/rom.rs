//! Android ROM pipeline
//!
//! sync (optional) -> clean (optional) -> probe build vars -> `m {target}`
//! -> newest `*{device}*.zip` (+ recovery zip, + OTA json) -> upload.

use super::{PipelineContext, sync_sources};
use crate::config::RomConfig;
use crate::error::{Error, Result};
use crate::process::CommandSpec;
use crate::progress::{NINJA_STARTED_MARKER, ProgressGate};
use crate::runner::BuildSpec;
use crate::types::{Artifact, InfoBlock};
use crate::upload::UploadReport;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const NOT_AVAILABLE: &str = "N/A";
const NO_ZIP_REASON: &str = "No ZIP found.";

/// Command-line switches of the ROM pipeline
#[derive(Clone, Copy, Debug, Default)]
pub struct RomOptions {
    /// Run `repo sync` first
    pub sync: bool,
    /// Remove `out/` before building
    pub clean: bool,
}

/// Values reported by the build system for the selected lunch target
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildVars {
    /// `PLATFORM_VERSION`
    pub android_version: String,
    /// `BUILD_ID`
    pub build_id: String,
    /// `TARGET_BUILD_VARIANT`
    pub variant: String,
}

impl BuildVars {
    fn unknown(variant: &str) -> Self {
        Self {
            android_version: NOT_AVAILABLE.to_string(),
            build_id: NOT_AVAILABLE.to_string(),
            variant: variant.to_string(),
        }
    }
}

/// Resolved required ROM settings
#[derive(Clone, Debug)]
struct RomTarget<'a> {
    device: &'a str,
    target: &'a str,
    variant: &'a str,
}

impl<'a> RomTarget<'a> {
    fn from_config(rom: &'a RomConfig) -> Result<Self> {
        Ok(Self {
            device: rom
                .device
                .as_deref()
                .ok_or_else(|| Error::missing_config("CONFIG_DEVICE"))?,
            target: rom
                .target
                .as_deref()
                .ok_or_else(|| Error::missing_config("CONFIG_BUILD_TARGET"))?,
            variant: rom
                .build_variant
                .as_deref()
                .ok_or_else(|| Error::missing_config("CONFIG_BUILD_TYPE"))?,
        })
    }
}

/// Script that prints the build vars as `KEY=VALUE` lines
pub fn build_vars_command(device: &str, variant: &str) -> CommandSpec {
    CommandSpec::shell(format!(
        "source build/envsetup.sh && \
         breakfast {device} {variant} >/dev/null 2>&1 && \
         echo \"VER=$(get_build_var PLATFORM_VERSION)\" && \
         echo \"BID=$(get_build_var BUILD_ID)\" && \
         echo \"TYPE=$(get_build_var TARGET_BUILD_VARIANT)\""
    ))
}

/// Parse `KEY=VALUE` probe output; absent keys fall back to `N/A` / `variant`
pub fn parse_build_vars(output: &str, variant: &str) -> BuildVars {
    let vars: HashMap<&str, &str> = output
        .lines()
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();
    let get = |key: &str, fallback: &str| {
        vars.get(key)
            .filter(|v| !v.is_empty())
            .map_or_else(|| fallback.to_string(), |v| v.to_string())
    };
    BuildVars {
        android_version: get("VER", NOT_AVAILABLE),
        build_id: get("BID", NOT_AVAILABLE),
        variant: get("TYPE", variant),
    }
}

async fn probe_build_vars(device: &str, variant: &str) -> BuildVars {
    tracing::info!(device, variant, "fetching build system variables");
    match build_vars_command(device, variant).output().await {
        Ok(output) => parse_build_vars(&output, variant),
        Err(e) => {
            tracing::warn!(error = %e, "could not fetch build variables");
            BuildVars::unknown(variant)
        }
    }
}

/// The build script: envsetup, breakfast, custom commands, `m`
pub fn build_command(rom: &RomConfig, device: &str, variant: &str, target: &str, jobs: usize) -> CommandSpec {
    let mut script = format!("source build/envsetup.sh && breakfast {device} {variant}");
    if let Some(custom) = rom.custom_commands.as_deref() {
        script.push_str(" && ");
        script.push_str(custom);
    }
    script.push_str(&format!(" && m {target} -j{jobs}"));
    CommandSpec::shell(script)
}

/// Static info block for ROM renders
pub fn rom_info(rom_name: &str, device: &str, vars: &BuildVars) -> InfoBlock {
    InfoBlock::new()
        .with("Rom", rom_name)
        .with("Device", device)
        .with("Android", &vars.android_version)
        .with("Build ID", &vars.build_id)
        .with("Type", &vars.variant)
}

fn matching_files(dir: &Path, device: &str, extension: &str) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/*{}*.{extension}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        glob::Pattern::escape(device)
    );
    match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
        Err(e) => {
            tracing::warn!(error = %e, pattern, "invalid artifact pattern");
            Vec::new()
        }
    }
}

/// Newest `*{device}*.zip` in `product_dir`, by modification time
pub fn find_rom_zip(product_dir: &Path, device: &str) -> Option<PathBuf> {
    matching_files(product_dir, device, "zip")
        .into_iter()
        .max_by_key(|p| {
            p.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
}

/// First `*{device}*.json` (OTA metadata) in `product_dir`
pub fn find_ota_json(product_dir: &Path, device: &str) -> Option<PathBuf> {
    let mut found = matching_files(product_dir, device, "json");
    found.sort();
    found.into_iter().next()
}

/// Pack the existing `images` from `product_dir` flat into `RECOVERY-{rom zip name}`
///
/// Returns `None` when none of the images exist.
pub fn package_recovery(
    product_dir: &Path,
    images: &[String],
    rom_zip: &Path,
    dest_dir: &Path,
) -> Result<Option<PathBuf>> {
    let present: Vec<PathBuf> = images
        .iter()
        .map(|img| product_dir.join(img))
        .filter(|p| {
            let exists = p.is_file();
            if !exists {
                tracing::warn!(image = %p.display(), "recovery image not found, skipped");
            }
            exists
        })
        .collect();
    if present.is_empty() {
        return Ok(None);
    }

    let name = format!("RECOVERY-{}", crate::utils::file_name(rom_zip));
    let dest = dest_dir.join(name);
    let mut zip = ZipWriter::new(BufWriter::new(File::create(&dest)?));
    for image in &present {
        let mut src = File::open(image)?;
        let large = src.metadata()?.len() > u64::from(u32::MAX);
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(large);
        zip.start_file(crate::utils::file_name(image), options)?;
        std::io::copy(&mut src, &mut zip)?;
    }
    zip.finish()?;

    tracing::info!(path = %dest.display(), images = present.len(), "recovery zip created");
    Ok(Some(dest))
}

/// Upload list: ROM zip (primary), optional recovery zip, optional json
pub fn collect_artifacts(rom_zip: &Path, recovery: Option<&Path>, json: Option<&Path>) -> Vec<Artifact> {
    let mut artifacts = vec![Artifact::new("Download", rom_zip)];
    if let Some(rec) = recovery {
        artifacts.push(Artifact::new("Recovery", rec));
    }
    if let Some(json) = json {
        artifacts.push(Artifact::new("JSON", json));
    }
    artifacts
}

/// Run the ROM pipeline in the current directory
pub async fn run(ctx: &PipelineContext, opts: RomOptions) -> Result<UploadReport> {
    let config = ctx.config.clone();
    let rom = &config.rom;
    let RomTarget {
        device,
        target,
        variant,
    } = RomTarget::from_config(rom)?;
    let jobs = config.build.jobs();
    let tree = std::env::current_dir()?;
    let rom_name = rom.display_name(&tree);

    if opts.sync {
        sync_sources(ctx, &rom_name).await?;
    }
    if opts.clean {
        ctx.clean_out_dir().await?;
    }

    let vars = ctx.interruptible(probe_build_vars(device, variant)).await?;
    let command = build_command(rom, device, variant, target, jobs);
    tracing::info!(command = %command, "starting ROM build");

    let spec = BuildSpec::new(command, rom_info(&rom_name, device, &vars))
        .with_gate(ProgressGate::after_marker(NINJA_STARTED_MARKER))
        .with_error_log(config.build.out_dir.join("error.log"));
    let build = ctx.runner().run(spec).await?;

    let product_dir = config
        .build
        .out_dir
        .join("target")
        .join("product")
        .join(device);
    let Some(rom_zip) = find_rom_zip(&product_dir, device) else {
        return Err(ctx.artifact_missing(&build, NO_ZIP_REASON).await);
    };
    tracing::info!(path = %rom_zip.display(), "ROM zip located");

    let recovery = if rom.recovery_images.is_empty() {
        None
    } else {
        let (product, images, zip_path) = (product_dir.clone(), rom.recovery_images.clone(), rom_zip.clone());
        let dest = tree.clone();
        match tokio::task::spawn_blocking(move || package_recovery(&product, &images, &zip_path, &dest)).await {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "recovery packaging failed");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "recovery packaging task failed");
                None
            }
        }
    };

    let json = find_ota_json(&product_dir, device);
    let artifacts = collect_artifacts(&rom_zip, recovery.as_deref(), json.as_deref());
    ctx.deliver(&build, &artifacts, &rom_zip).await
}
