//! Build followed by the upload phase, with scripted providers

mod common;

use build_bot::process::CommandSpec;
use build_bot::upload::UPLOAD_FAILED_REASON;
use build_bot::{
    Artifact, ArtifactUploader, BuildRunner, BuildSpec, BuildSuccess, Button, Error, InfoBlock,
    UploadProvider,
};
use common::{RecordingNotifier, ScriptedUploader, Workspace};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PD: &str = "https://pixeldrain.test/u";
const GF: &str = "https://gofile.test/d";

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
async fn successful_build(ws: &Workspace, notifier: &Arc<RecordingNotifier>) -> BuildSuccess {
    let info = InfoBlock::new().with("Device", "lavender");
    BuildRunner::new(&ws.config, notifier.clone(), CancellationToken::new())
        .mirror_stdout(false)
        .run(BuildSpec::new(CommandSpec::shell("echo built"), info))
        .await
        .unwrap()
}

fn uploader(providers: Vec<Arc<dyn build_bot::Uploader>>) -> ArtifactUploader {
    ArtifactUploader::new(providers, Duration::from_secs(5))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod scenarios {
    use super::*;

    #[tokio::test]
    async fn both_providers_succeed() {
        let ws = Workspace::new(Duration::from_secs(15));
        let notifier = RecordingNotifier::new();
        let rom = ws.file("lineage-21-lavender.zip", b"rom-image");

        let build = successful_build(&ws, &notifier).await;
        let report = uploader(vec![
            ScriptedUploader::ok(UploadProvider::PixelDrain, PD),
            ScriptedUploader::ok(UploadProvider::GoFile, GF),
        ])
        .deliver(
            &build.notifier,
            &build.message,
            &[Artifact::new("Download", &rom)],
            &rom,
        )
        .await
        .unwrap();

        let md5 = format!("{:x}", md5::compute(b"rom-image"));
        assert_eq!(report.md5, md5);
        assert_eq!(report.size, 9);

        let last = notifier.edits().pop().unwrap();
        assert!(last.starts_with(&build.message));
        assert!(last.contains("Upload Complete"));
        assert!(last.contains(&md5));
        assert!(last.contains("lineage-21-lavender.zip"));
        assert_eq!(
            notifier.last_buttons(),
            [vec![
                Button::new("Download (PD)", format!("{PD}/lineage-21-lavender.zip")),
                Button::new("Download (GF)", format!("{GF}/lineage-21-lavender.zip")),
            ]]
        );
    }

    #[tokio::test]
    async fn both_providers_fail() {
        let ws = Workspace::new(Duration::from_secs(15));
        let notifier = RecordingNotifier::new();
        let rom = ws.file("rom.zip", b"rom");

        let build = successful_build(&ws, &notifier).await;
        let err = uploader(vec![
            ScriptedUploader::failing(UploadProvider::PixelDrain),
            ScriptedUploader::failing(UploadProvider::GoFile),
        ])
        .deliver(
            &build.notifier,
            &build.message,
            &[Artifact::new("Download", &rom)],
            &rom,
        )
        .await
        .unwrap_err();

        assert!(matches!(&err, Error::UploadFailed(r) if r == UPLOAD_FAILED_REASON));
        assert_eq!(err.exit_code(), 1);

        let last = notifier.edits().pop().unwrap();
        assert!(last.contains("Upload Failed"));
        assert!(last.contains(UPLOAD_FAILED_REASON));
        assert!(notifier.last_buttons().is_empty());
    }

    #[tokio::test]
    async fn one_provider_failing_still_succeeds_with_one_link() {
        let ws = Workspace::new(Duration::from_secs(15));
        let notifier = RecordingNotifier::new();
        let rom = ws.file("rom.zip", b"rom");

        let build = successful_build(&ws, &notifier).await;
        let report = uploader(vec![
            ScriptedUploader::failing(UploadProvider::PixelDrain),
            ScriptedUploader::ok(UploadProvider::GoFile, GF),
        ])
        .deliver(
            &build.notifier,
            &build.message,
            &[Artifact::new("Download", &rom)],
            &rom,
        )
        .await
        .unwrap();

        let links: Vec<_> = report.uploads[0]
            .results
            .iter()
            .filter_map(|r| r.link.as_deref())
            .collect();
        assert_eq!(links, [format!("{GF}/rom.zip")]);
        assert_eq!(
            notifier.last_buttons(),
            [vec![Button::new("Download (GF)", format!("{GF}/rom.zip"))]]
        );
    }

    #[tokio::test]
    async fn secondary_artifact_failure_does_not_fail_the_phase() {
        let ws = Workspace::new(Duration::from_secs(15));
        let notifier = RecordingNotifier::new();
        let rom = ws.file("rom.zip", b"rom");
        let recovery = ws.file("RECOVERY-rom.zip", b"boot");
        let missing_json = ws.path().join("lavender.json");

        let build = successful_build(&ws, &notifier).await;
        let report = uploader(vec![
            ScriptedUploader::ok_except(UploadProvider::PixelDrain, PD, "RECOVERY-rom.zip"),
            ScriptedUploader::ok_except(UploadProvider::GoFile, GF, "RECOVERY-rom.zip"),
        ])
        .deliver(
            &build.notifier,
            &build.message,
            &[
                Artifact::new("Download", &rom),
                Artifact::new("Recovery", &recovery),
                Artifact::new("JSON", &missing_json),
            ],
            &rom,
        )
        .await
        .unwrap();

        // missing json skipped, recovery attempted but linkless
        assert_eq!(report.uploads.len(), 2);
        assert!(!report.uploads[1].has_link());

        let buttons = notifier.last_buttons();
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].len(), 2);
        assert!(notifier.edits().pop().unwrap().contains("Upload Complete"));
    }

    #[tokio::test]
    async fn absent_primary_is_an_upload_failure() {
        let ws = Workspace::new(Duration::from_secs(15));
        let notifier = RecordingNotifier::new();
        let rom = ws.path().join("never-built.zip");

        let build = successful_build(&ws, &notifier).await;
        let err = uploader(vec![ScriptedUploader::ok(UploadProvider::PixelDrain, PD)])
            .deliver(
                &build.notifier,
                &build.message,
                &[Artifact::new("Download", &rom)],
                &rom,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UploadFailed(_)));
    }
}
