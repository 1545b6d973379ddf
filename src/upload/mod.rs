//! Artifact Uploader
//!
//! Each existing artifact is sent to every enabled provider concurrently.
//! A provider failure only costs that provider's link; the upload phase as a
//! whole fails only when the primary artifact ends up with no link at all.

mod gofile;
mod pixeldrain;

pub use gofile::GoFileUploader;
pub use pixeldrain::PixelDrainUploader;

use crate::config::UploadConfig;
use crate::error::{Error, Result, UploadError};
use crate::notify::StatusNotifier;
use crate::notify::render::{self, FinalReport};
use crate::types::{Artifact, Button, UploadProvider, UploadResult};
use crate::utils::{file_name, fmt_size, md5_file};
use async_trait::async_trait;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::io::ReaderStream;

/// Reason shown when the primary artifact produced no link
pub const UPLOAD_FAILED_REASON: &str = "Could not upload files.";

/// One file-hosting provider
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Which provider this is
    fn provider(&self) -> UploadProvider;

    /// Upload `path`, returning the public download link
    async fn upload(&self, path: &Path) -> std::result::Result<String, UploadError>;
}

/// Open `path` as a streaming request body, with its length and file name
pub(crate) async fn file_body(
    path: &Path,
) -> std::result::Result<(reqwest::Body, u64, String), UploadError> {
    let not_found = |_| UploadError::FileNotFound(path.to_path_buf());
    let file = tokio::fs::File::open(path).await.map_err(not_found)?;
    let len = file.metadata().await.map_err(not_found)?.len();
    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    Ok((body, len, file_name(path)))
}

/// Links collected for one artifact
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactUpload {
    /// The artifact
    pub artifact: Artifact,
    /// One result per enabled provider, in provider order
    pub results: Vec<UploadResult>,
}

impl ArtifactUpload {
    /// Whether any provider produced a link
    pub fn has_link(&self) -> bool {
        self.results.iter().any(|r| r.link.is_some())
    }

    /// Button row `"{label} (PD)"`, `"{label} (GF)"` for the links that exist
    pub fn buttons(&self) -> Vec<Button> {
        self.results
            .iter()
            .filter_map(|r| {
                r.link.as_ref().map(|link| {
                    Button::new(
                        format!("{} ({})", self.artifact.label, r.provider.tag()),
                        link.clone(),
                    )
                })
            })
            .collect()
    }
}

/// Outcome of a successful upload phase
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReport {
    /// Per-artifact results, in input order (missing files skipped)
    pub uploads: Vec<ArtifactUpload>,
    /// Primary artifact path
    pub primary: PathBuf,
    /// Primary artifact size in bytes
    pub size: u64,
    /// Primary artifact MD5, `"N/A"` when it could not be computed
    pub md5: String,
    /// Wall time of the upload phase
    pub elapsed: Duration,
}

impl UploadReport {
    /// One button row per artifact that got at least one link
    pub fn buttons(&self) -> Vec<Vec<Button>> {
        self.uploads
            .iter()
            .map(ArtifactUpload::buttons)
            .filter(|row| !row.is_empty())
            .collect()
    }

    /// Facts for the final status render
    pub fn final_report(&self) -> FinalReport {
        FinalReport {
            upload_time: self.elapsed,
            file_name: file_name(&self.primary),
            size: fmt_size(self.size),
            md5: self.md5.clone(),
        }
    }
}

/// Runs enabled providers over a list of artifacts
pub struct ArtifactUploader {
    providers: Vec<Arc<dyn Uploader>>,
    timeout: Duration,
}

impl ArtifactUploader {
    /// Uploader over an explicit provider list
    pub fn new(providers: Vec<Arc<dyn Uploader>>, timeout: Duration) -> Self {
        Self { providers, timeout }
    }

    /// PixelDrain always, GoFile when enabled
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        let mut providers: Vec<Arc<dyn Uploader>> = vec![Arc::new(PixelDrainUploader::new(
            client.clone(),
            &config.pixeldrain_base,
            config.pixeldrain_api_key.clone(),
        ))];
        if config.gofile_enabled {
            providers.push(Arc::new(GoFileUploader::new(
                client,
                &config.gofile_api_base,
                &config.gofile_upload_url,
            )));
        }
        Ok(Self::new(providers, config.timeout))
    }

    /// Providers in use
    pub fn providers(&self) -> impl Iterator<Item = UploadProvider> + '_ {
        self.providers.iter().map(|p| p.provider())
    }

    async fn upload_one(&self, uploader: &dyn Uploader, path: &Path) -> UploadResult {
        let provider = uploader.provider();
        let outcome = match tokio::time::timeout(self.timeout, uploader.upload(path)).await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Timeout { provider }),
        };
        let link = match outcome {
            Ok(link) => {
                tracing::info!(provider = %provider, file = %path.display(), link = %link, "upload finished");
                Some(link)
            }
            Err(e) => {
                tracing::warn!(provider = %provider, file = %path.display(), error = %e, "upload failed");
                None
            }
        };
        UploadResult { provider, link }
    }

    /// Upload one file to all providers at once and wait for all of them
    pub async fn upload_file(&self, path: &Path) -> Vec<UploadResult> {
        join_all(
            self.providers
                .iter()
                .map(|p| self.upload_one(p.as_ref(), path)),
        )
        .await
    }

    /// Upload every existing artifact; fail if `primary` got no link
    ///
    /// Artifacts are processed one after another, providers for one artifact
    /// in parallel.
    pub async fn upload_all(&self, artifacts: &[Artifact], primary: &Path) -> Result<UploadReport> {
        let started = Instant::now();
        let mut uploads = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            if !artifact.path.is_file() {
                tracing::warn!(label = %artifact.label, path = %artifact.path.display(), "artifact missing, skipped");
                continue;
            }
            tracing::info!(label = %artifact.label, file = %artifact.path.display(), "uploading artifact");
            let results = self.upload_file(&artifact.path).await;
            uploads.push(ArtifactUpload {
                artifact: artifact.clone(),
                results,
            });
        }
        let elapsed = started.elapsed();

        let primary_ok = uploads
            .iter()
            .any(|u| u.artifact.path == primary && u.has_link());
        if !primary_ok {
            tracing::error!(file = %primary.display(), "primary artifact has no download link");
            return Err(Error::UploadFailed(UPLOAD_FAILED_REASON.to_string()));
        }

        let size = tokio::fs::metadata(primary).await?.len();
        let md5 = match md5_file(primary).await {
            Ok(sum) => sum,
            Err(e) => {
                tracing::warn!(error = %e, file = %primary.display(), "checksum failed");
                "N/A".to_string()
            }
        };

        Ok(UploadReport {
            uploads,
            primary: primary.to_path_buf(),
            size,
            md5,
            elapsed,
        })
    }

    /// Upload phase including the status renders
    ///
    /// `build_msg` is the rendered success text the final message builds on.
    /// Renders the upload-failed variant and returns the error when the
    /// primary artifact could not be delivered.
    pub async fn deliver(
        &self,
        status: &StatusNotifier,
        build_msg: &str,
        artifacts: &[Artifact],
        primary: &Path,
    ) -> Result<UploadReport> {
        match self.upload_all(artifacts, primary).await {
            Ok(report) => {
                let text = render::final_message(build_msg, &report.final_report());
                status.update(&text, &report.buttons()).await;
                tracing::info!(
                    file = %report.primary.display(),
                    md5 = %report.md5,
                    elapsed_ms = report.elapsed.as_millis(),
                    "upload complete"
                );
                Ok(report)
            }
            Err(Error::UploadFailed(reason)) => {
                status
                    .update(&render::upload_failed(build_msg, &reason), &[])
                    .await;
                Err(Error::UploadFailed(reason))
            }
            Err(e) => {
                status
                    .update(&render::upload_failed(build_msg, &e.to_string()), &[])
                    .await;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ArtifactUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactUploader")
            .field("providers", &self.providers().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}
