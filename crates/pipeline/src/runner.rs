//! The "run build" entry point invoked for each dispatched build id.
//!
//! ```text
//! full build:  init ─▶ gource ─▶ [audio] ─▶ thumbnail ─▶ success
//! remix:                          audio  ─▶ thumbnail ─▶ success
//! ```
//!
//! Only a `queued` build is executed, so duplicate deliveries are no-ops.
//! Any failure marks the build `errored`, except an abort, which the
//! requesting actor has already recorded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use commitreel_core::avatars::{link_avatar_dir, resolve_avatars, AvatarRecord};
use commitreel_core::build_status::{BuildStage, BuildStatus, Transition, TransitionError};
use commitreel_core::error::CoreError;
use commitreel_core::ffmpeg::{rescale_image, FrameAt};
use commitreel_core::gource_log::{self, LogAnalysis};
use commitreel_core::render::{RenderOutput, RenderRequest};
use commitreel_core::types::DbId;
use commitreel_db::models::build::{Build, BuildArtifacts};
use commitreel_db::models::owner::Owner;

use crate::blob::keys;
use crate::error::PipelineError;
use crate::store::{BuildStore, StoreError};
use crate::Pipeline;

/// Width of the full-size screenshot taken from the last second.
const SCREENSHOT_WIDTH: u32 = 1280;

/// Width of the small thumbnail derived from the screenshot.
const THUMBNAIL_WIDTH: u32 = 256;

/// What happened to a build handed to [`Pipeline::run_build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The build was not `queued`; nothing was done.
    Skipped(BuildStatus),
    Completed,
    /// Stopped on request.
    Aborted,
    /// Failed; the description was recorded on the build.
    Errored(String),
}

impl Pipeline {
    /// Execute a queued build to completion.
    ///
    /// Returns `Err` only when the build cannot be loaded or started;
    /// failures during execution are recorded on the build and reported
    /// as [`RunOutcome::Errored`].
    pub async fn run_build(&self, build_id: DbId) -> Result<RunOutcome, PipelineError> {
        let build = self.store.build(build_id).await?;
        let status = build.status();
        if status != BuildStatus::Queued {
            tracing::info!(build_id, %status, "Build is not queued; skipping");
            return Ok(RunOutcome::Skipped(status));
        }
        if !self.store.transition(build_id, Transition::Run).await? {
            let status = self.store.build_status(build_id).await?;
            tracing::info!(build_id, %status, "Build was picked up elsewhere; skipping");
            return Ok(RunOutcome::Skipped(status));
        }
        tracing::info!(
            build_id,
            project_id = build.project_id,
            full_build = build.is_full_build,
            "Build started",
        );

        let abort = CancellationToken::new();
        let watcher = self.spawn_abort_watcher(build_id, abort.clone());
        let result = self.execute(&build, &abort).await;
        watcher.abort();

        match result {
            Ok(()) => {
                tracing::info!(build_id, "Build completed");
                Ok(RunOutcome::Completed)
            }
            Err(e) if e.is_aborted() => {
                tracing::info!(build_id, "Build aborted");
                Ok(RunOutcome::Aborted)
            }
            Err(e) => {
                let description = e.to_string();
                tracing::error!(build_id, error = %description, "Build failed");
                if let Err(store_err) = self.store.mark_errored(build_id, Some(&description)).await {
                    tracing::error!(build_id, error = %store_err, "Failed to mark build errored");
                }
                Ok(RunOutcome::Errored(description))
            }
        }
    }

    /// Poll the build's status and cancel `abort` once it is no longer
    /// `running` (aborted, errored elsewhere, or deleted).
    fn spawn_abort_watcher(&self, build_id: DbId, abort: CancellationToken) -> JoinHandle<()> {
        let store: Arc<dyn BuildStore> = Arc::clone(&self.store);
        let interval = self.config.render_poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match store.build_status(build_id).await {
                    Ok(BuildStatus::Running) => {}
                    Ok(status) => {
                        tracing::info!(build_id, %status, "Build left running state; cancelling");
                        abort.cancel();
                        break;
                    }
                    Err(StoreError::NotFound { .. }) => {
                        abort.cancel();
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(build_id, error = %e, "Failed to poll build status");
                    }
                }
            }
        })
    }

    async fn execute(&self, build: &Build, abort: &CancellationToken) -> Result<(), PipelineError> {
        let workdir = tempfile::Builder::new()
            .prefix("commitreel_build_")
            .tempdir()?;
        if !build.is_full_build && build.content.is_some() {
            return self.execute_remix(build, abort, workdir.path()).await;
        }

        self.store
            .set_stage(build.id, BuildStage::Init, Some("Preparing build"))
            .await?;
        let log_text = self.build_log(build).await?;
        let analysis = gource_log::analyze(&log_text)?;

        let avatars_dir = match self
            .prepare_avatars(build, &analysis, &workdir.path().join("avatars"))
            .await
        {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(build_id = build.id, error = %e, "Failed to build avatar directory");
                None
            }
        };
        let options = self.option_set(Owner::Build(build.id)).await?;
        let captions_path = self.blob_path(build.project_captions.as_deref())?;
        let logo_path = self.blob_path(build.build_logo.as_deref())?;
        let background_path = self.blob_path(build.build_background.as_deref())?;
        check_abort(abort)?;

        self.store
            .set_stage(build.id, BuildStage::Gource, Some("Rendering video"))
            .await?;
        let request = RenderRequest {
            log_text: &log_text,
            video_size: &build.video_size,
            avatars_dir: avatars_dir.as_deref(),
            captions_path: captions_path.as_deref(),
            logo_path: logo_path.as_deref(),
            background_path: background_path.as_deref(),
            options: &options,
        };
        let rendered = self
            .renderer()
            .render(&request, &workdir.path().join("video.mp4"), abort)
            .await?;
        self.save_process_logs(build.id, &rendered).await;

        let media = self.media();
        let duration = media.get_duration(&rendered.video_path).await?;
        let mut video = rendered.video_path.clone();

        if let Some(audio_key) = &build.build_audio {
            check_abort(abort)?;
            self.store
                .set_stage(build.id, BuildStage::Audio, Some("Mixing audio"))
                .await?;
            let audio = self.blobs.path_of(audio_key)?;
            video = media
                .mix_audio(&video, &audio, true, &workdir.path().join("video_audio.mp4"))
                .await?;
        }

        self.store_video(build.id, &video, Some(duration)).await?;
        check_abort(abort)?;
        self.finish(build).await
    }

    /// Audio-only rebuild over a copied video.
    async fn execute_remix(
        &self,
        build: &Build,
        abort: &CancellationToken,
        workdir: &Path,
    ) -> Result<(), PipelineError> {
        let content = build.content.as_deref().ok_or_else(|| {
            CoreError::Internal(format!("build {} has no video to remix", build.id))
        })?;
        let video = self.blobs.path_of(content)?;
        let output = workdir.join("remix.mp4");
        let media = self.media();

        let mixed = match &build.build_audio {
            Some(audio_key) => {
                self.store
                    .set_stage(build.id, BuildStage::Audio, Some("Mixing audio"))
                    .await?;
                let audio = self.blobs.path_of(audio_key)?;
                media.mix_audio(&video, &audio, true, &output).await?
            }
            None => {
                self.store
                    .set_stage(build.id, BuildStage::Audio, Some("Removing audio"))
                    .await?;
                media.strip_audio(&video, &output).await?
            }
        };

        let duration = match build.duration {
            Some(_) => None,
            None => Some(media.get_duration(&mixed).await?),
        };
        self.store_video(build.id, &mixed, duration).await?;
        check_abort(abort)?;
        self.finish(build).await
    }

    /// Thumbnails, then `running → completed`.
    async fn finish(&self, build: &Build) -> Result<(), PipelineError> {
        self.store
            .set_stage(build.id, BuildStage::Thumbnail, Some("Generating thumbnails"))
            .await?;
        if let Err(e) = self.generate_thumbnails(build.id).await {
            tracing::warn!(build_id = build.id, error = %e, "Failed to generate thumbnails");
        }

        if !self.store.transition(build.id, Transition::Complete).await? {
            let from = self.store.build_status(build.id).await?;
            if from == BuildStatus::Aborted {
                return Err(PipelineError::Aborted);
            }
            return Err(TransitionError {
                transition: Transition::Complete,
                from,
            }
            .into());
        }
        if let Err(e) = self.store.set_stage(build.id, BuildStage::Success, None).await {
            tracing::error!(build_id = build.id, error = %e, "Failed to record final stage");
        }
        Ok(())
    }

    /// The build's log snapshot, or a fresh extraction when the build was
    /// created without one.
    async fn build_log(&self, build: &Build) -> Result<String, PipelineError> {
        if let Some(key) = &build.project_log {
            return Ok(self.blobs.read_to_string(key).await?);
        }

        let project = self.store.project(build.project_id).await?;
        let url = self.remote_url(&project)?;
        let extracted = self.vcs().extract_log(&url, &build.project_branch).await?;
        let key = self
            .blobs
            .save(&keys::build_log(build.id), extracted.log_text.as_bytes())
            .await?;
        self.store
            .save_artifacts(
                build.id,
                &BuildArtifacts {
                    project_log: Some(key),
                    ..Default::default()
                },
            )
            .await?;
        Ok(extracted.log_text)
    }

    /// Link resolved contributor avatars into `dir`. `None` when nobody in
    /// the log has an avatar.
    async fn prepare_avatars(
        &self,
        build: &Build,
        analysis: &LogAnalysis,
        dir: &Path,
    ) -> Result<Option<PathBuf>, PipelineError> {
        let path_of = |key: &str| self.blobs.path_of(key).ok();
        let project: Vec<AvatarRecord> = self
            .store
            .project_avatars(build.project_id)
            .await?
            .iter()
            .map(|a| a.to_record(path_of))
            .collect();
        let global: Vec<AvatarRecord> = self
            .store
            .global_avatars()
            .await?
            .iter()
            .map(|a| a.to_record(path_of))
            .collect();

        let resolved = resolve_avatars(&project, &global, analysis.users.iter().map(String::as_str));
        if resolved.is_empty() {
            return Ok(None);
        }
        let linked = link_avatar_dir(dir, &resolved).await?;
        tracing::debug!(build_id = build.id, linked, "Avatar directory prepared");
        Ok(Some(dir.to_path_buf()))
    }

    fn blob_path(&self, key: Option<&str>) -> Result<Option<PathBuf>, PipelineError> {
        Ok(key.map(|k| self.blobs.path_of(k)).transpose()?)
    }

    async fn save_process_logs(&self, build_id: DbId, rendered: &RenderOutput) {
        let result: Result<(), PipelineError> = async {
            let stdout = self
                .blobs
                .save(&keys::build_stdout(build_id), rendered.stdout.as_bytes())
                .await?;
            let stderr = self
                .blobs
                .save(&keys::build_stderr(build_id), rendered.stderr.as_bytes())
                .await?;
            self.store
                .save_artifacts(
                    build_id,
                    &BuildArtifacts {
                        stdout: Some(stdout),
                        stderr: Some(stderr),
                        ..Default::default()
                    },
                )
                .await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(build_id, error = %e, "Failed to save render output logs");
        }
    }

    /// Move the final video into the blob store and record size and
    /// duration (whole seconds).
    async fn store_video(
        &self,
        build_id: DbId,
        video: &Path,
        duration: Option<f64>,
    ) -> Result<(), PipelineError> {
        let key = self.blobs.save_file(&keys::build_video(build_id), video).await?;
        let size = self.blobs.size(&key).await?;
        self.store
            .save_artifacts(
                build_id,
                &BuildArtifacts {
                    content: Some(key),
                    size: i64::try_from(size).ok(),
                    duration: duration.map(|d| d as i32),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(build_id, size, duration, "Build video stored");
        Ok(())
    }

    /// Screenshot from the last second, then a small JPEG thumbnail of it.
    async fn generate_thumbnails(&self, build_id: DbId) -> Result<(), PipelineError> {
        let video = self.blobs.path_of(&keys::build_video(build_id))?;
        let screenshot = self
            .media()
            .get_thumbnail(&video, SCREENSHOT_WIDTH, FrameAt::Seconds(-1.0))
            .await?;
        let screenshot_key = self
            .blobs
            .save(&keys::build_screenshot(build_id), &screenshot)
            .await?;

        let screenshot_path = self.blobs.path_of(&screenshot_key)?;
        let thumbnail = tokio::task::spawn_blocking(move || {
            rescale_image(&screenshot_path, THUMBNAIL_WIDTH)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("thumbnail task failed: {e}")))??;
        let thumbnail_key = self
            .blobs
            .save(&keys::build_thumbnail(build_id), &thumbnail)
            .await?;

        self.store
            .save_artifacts(
                build_id,
                &BuildArtifacts {
                    screenshot: Some(screenshot_key),
                    thumbnail: Some(thumbnail_key),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}

fn check_abort(abort: &CancellationToken) -> Result<(), PipelineError> {
    if abort.is_cancelled() {
        Err(PipelineError::Aborted)
    } else {
        Ok(())
    }
}
