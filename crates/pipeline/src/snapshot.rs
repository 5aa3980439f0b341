//! Creating, queueing, cloning, and stopping builds.
//!
//! A build is a snapshot: every input it renders from (log, captions,
//! options, artwork, audio) is copied under its own blob keys before it
//! enters `queued`, so later project edits never leak into it.

use commitreel_core::build_status::{BuildStatus, Transition};
use commitreel_core::captions;
use commitreel_core::error::CoreError;
use commitreel_core::ffmpeg::{resize_image, Resize};
use commitreel_core::render_options::VideoSize;
use commitreel_core::types::DbId;
use commitreel_db::models::build::{Build, BuildArtifacts, CreateBuild};
use commitreel_db::models::owner::Owner;
use commitreel_db::models::project::Project;

use crate::blob::keys;
use crate::dispatch::RUN_BUILD_TASK;
use crate::error::PipelineError;
use crate::Pipeline;

/// How a cloned build treats the source build's video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remix {
    /// Render everything again from the snapshot.
    FullRebuild,
    /// Reuse the rendered video with a different audio track.
    ReplaceAudio { key: String, name: Option<String> },
    /// Reuse the rendered video without audio.
    StripAudio,
}

/// Result of [`Pipeline::request_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Stopped before it ran.
    Canceled,
    /// Flagged while running; the runner notices on its next poll.
    Aborted,
    /// Nothing to stop.
    AlreadyFinished(BuildStatus),
}

impl Pipeline {
    /// Snapshot a project into a new build.
    ///
    /// The build is created `pending`, filled, then moved to `queued` and
    /// dispatched unless `defer_queue` is set.
    pub async fn create_build(
        &self,
        project_id: DbId,
        defer_queue: bool,
    ) -> Result<Build, PipelineError> {
        let project = self.store.project(project_id).await?;
        let log_key = project.project_log.clone().ok_or_else(|| {
            CoreError::Validation(format!(
                "project {project_id} has no commit log; refresh it first"
            ))
        })?;
        let video_size: VideoSize = project.video_size.parse()?;
        if self.store.has_active_build(project_id).await? {
            return Err(CoreError::Conflict(format!(
                "project {project_id} already has pending builds"
            ))
            .into());
        }

        let build = self
            .store
            .create_build(&CreateBuild {
                project_id,
                status: Some(BuildStatus::Pending),
                project_branch: project.project_branch.clone(),
                project_log_commit_hash: project.project_log_commit_hash.clone(),
                project_log_commit_time: project.project_log_commit_time,
                project_log_commit_preview: project.project_log_commit_preview.clone(),
                build_audio_name: project.build_audio_name.clone(),
                video_size: project.video_size.clone(),
                is_full_build: true,
                ..Default::default()
            })
            .await?;

        if let Err(e) = self.snapshot_project(&project, &build, &log_key, video_size).await {
            self.fail_snapshot(build.id, &e).await;
            return Err(e);
        }
        self.store.set_project_changed(project_id, false).await?;
        tracing::info!(project_id, build_id = build.id, defer_queue, "Build created");

        if !defer_queue {
            self.queue_build(build.id).await?;
        }
        Ok(self.store.build(build.id).await?)
    }

    /// Queue a deferred build. Returns `false` unless it was `pending`.
    pub async fn queue_build(&self, build_id: DbId) -> Result<bool, PipelineError> {
        if !self.store.transition(build_id, Transition::Queue).await? {
            return Ok(false);
        }
        self.dispatcher.enqueue(RUN_BUILD_TASK, build_id).await?;
        tracing::info!(build_id, "Build queued");
        Ok(true)
    }

    /// Create a new build from an existing one.
    ///
    /// Remix variants copy the source video and duration and only redo the
    /// audio step; they require the source to have finished video content.
    pub async fn clone_build(
        &self,
        build_id: DbId,
        remix: Remix,
        defer_queue: bool,
    ) -> Result<Build, PipelineError> {
        let source = self.store.build(build_id).await?;
        let log_key = source.project_log.clone().ok_or_else(|| {
            CoreError::Validation(format!("build {build_id} has no commit log"))
        })?;
        let is_full_build = remix == Remix::FullRebuild;
        if !is_full_build && source.content.is_none() {
            return Err(CoreError::Validation(format!(
                "build {build_id} has no video to remix"
            ))
            .into());
        }

        let (audio, audio_name) = match &remix {
            Remix::FullRebuild => (source.build_audio.clone(), source.build_audio_name.clone()),
            Remix::ReplaceAudio { key, name } => (
                Some(key.clone()),
                name.clone()
                    .or_else(|| key.rsplit('/').next().map(str::to_string)),
            ),
            Remix::StripAudio => (None, None),
        };

        let build = self
            .store
            .create_build(&CreateBuild {
                project_id: source.project_id,
                status: Some(BuildStatus::Pending),
                project_branch: source.project_branch.clone(),
                project_log_commit_hash: source.project_log_commit_hash.clone(),
                project_log_commit_time: source.project_log_commit_time,
                project_log_commit_preview: source.project_log_commit_preview.clone(),
                build_audio_name: audio_name,
                video_size: source.video_size.clone(),
                duration: if is_full_build { None } else { source.duration },
                is_full_build,
                ..Default::default()
            })
            .await?;

        if let Err(e) = self
            .snapshot_build(&source, &build, &log_key, audio.as_deref(), is_full_build)
            .await
        {
            self.fail_snapshot(build.id, &e).await;
            return Err(e);
        }
        tracing::info!(
            source_build_id = build_id,
            build_id = build.id,
            ?remix,
            "Build cloned",
        );

        if !defer_queue {
            self.queue_build(build.id).await?;
        }
        Ok(self.store.build(build.id).await?)
    }

    /// Stop a build: cancel it if it has not started, abort it if it is
    /// running, otherwise leave it alone.
    pub async fn request_stop(&self, build_id: DbId) -> Result<StopOutcome, PipelineError> {
        let outcome = if self.store.transition(build_id, Transition::Cancel).await? {
            StopOutcome::Canceled
        } else if self.store.transition(build_id, Transition::Abort).await? {
            StopOutcome::Aborted
        } else {
            StopOutcome::AlreadyFinished(self.store.build_status(build_id).await?)
        };
        tracing::info!(build_id, ?outcome, "Build stop requested");
        Ok(outcome)
    }

    /// Stop a build if needed, then delete it and its blobs. Blob removal
    /// is best effort.
    pub async fn delete_build(&self, build_id: DbId) -> Result<(), PipelineError> {
        self.request_stop(build_id).await?;
        let build = self.store.build(build_id).await?;

        let mut blob_keys = vec![
            keys::build_video(build_id),
            keys::build_screenshot(build_id),
            keys::build_thumbnail(build_id),
            keys::build_log(build_id),
            keys::build_captions(build_id),
            keys::build_stdout(build_id),
            keys::build_stderr(build_id),
        ];
        blob_keys.extend(
            [&build.build_audio, &build.build_logo, &build.build_background]
                .into_iter()
                .flatten()
                .cloned(),
        );
        for key in blob_keys {
            if let Err(e) = self.blobs.delete(&key).await {
                tracing::warn!(build_id, key = %key, error = %e, "Failed to delete build blob");
            }
        }

        self.store.delete_build(build_id).await?;
        tracing::info!(build_id, "Build deleted");
        Ok(())
    }

    // -- internals --------------------------------------------------------

    async fn snapshot_project(
        &self,
        project: &Project,
        build: &Build,
        log_key: &str,
        video_size: VideoSize,
    ) -> Result<(), PipelineError> {
        let id = build.id;
        let mut artifacts = BuildArtifacts {
            project_log: Some(self.blobs.copy(log_key, &keys::build_log(id)).await?),
            ..Default::default()
        };

        if let Some(audio) = &project.build_audio {
            let key = keys::build_attachment(id, "audio", audio);
            artifacts.build_audio = Some(self.blobs.copy(audio, &key).await?);
        }
        if let Some(logo) = &project.build_logo {
            let key = keys::build_attachment(id, "logo", logo);
            // Logo sits in a corner at 1/8 of the video height.
            let resize = project
                .build_logo_resize
                .then(|| Resize::Width(video_size.height().div_ceil(8)));
            artifacts.build_logo = Some(self.copy_image(logo, &key, resize).await?);
        }
        if let Some(background) = &project.build_background {
            let key = keys::build_attachment(id, "background", background);
            let (width, height) = video_size.dimensions();
            let resize = project
                .build_background_resize
                .then_some(Resize::Exact(width, height));
            artifacts.build_background = Some(self.copy_image(background, &key, resize).await?);
        }

        let options = self.store.options(Owner::Project(project.id)).await?;
        self.store.replace_options(Owner::Build(id), &options).await?;

        let captions = self.store.captions(Owner::Project(project.id)).await?;
        self.store.replace_captions(Owner::Build(id), &captions).await?;
        if let Some(body) = captions::caption_file(&captions) {
            let key = keys::build_captions(id);
            artifacts.project_captions = Some(self.blobs.save(&key, body.as_bytes()).await?);
        }

        self.store.save_artifacts(id, &artifacts).await?;
        Ok(())
    }

    async fn snapshot_build(
        &self,
        source: &Build,
        build: &Build,
        log_key: &str,
        audio: Option<&str>,
        is_full_build: bool,
    ) -> Result<(), PipelineError> {
        let id = build.id;
        let mut artifacts = BuildArtifacts {
            project_log: Some(self.blobs.copy(log_key, &keys::build_log(id)).await?),
            ..Default::default()
        };

        if let Some(audio) = audio {
            let key = keys::build_attachment(id, "audio", audio);
            artifacts.build_audio = Some(self.blobs.copy(audio, &key).await?);
        }
        if let Some(logo) = &source.build_logo {
            let key = keys::build_attachment(id, "logo", logo);
            artifacts.build_logo = Some(self.blobs.copy(logo, &key).await?);
        }
        if let Some(background) = &source.build_background {
            let key = keys::build_attachment(id, "background", background);
            artifacts.build_background = Some(self.blobs.copy(background, &key).await?);
        }
        if !is_full_build {
            if let Some(content) = &source.content {
                artifacts.content = Some(self.blobs.copy(content, &keys::build_video(id)).await?);
                artifacts.size = source.size;
            }
        }

        let options = self.store.options(Owner::Build(source.id)).await?;
        self.store.replace_options(Owner::Build(id), &options).await?;

        let captions = self.store.captions(Owner::Build(source.id)).await?;
        self.store.replace_captions(Owner::Build(id), &captions).await?;
        if let Some(body) = captions::caption_file(&captions) {
            let key = keys::build_captions(id);
            artifacts.project_captions = Some(self.blobs.save(&key, body.as_bytes()).await?);
        }

        self.store.save_artifacts(id, &artifacts).await?;
        Ok(())
    }

    /// Copy an image blob, resizing on the way when asked.
    async fn copy_image(
        &self,
        from: &str,
        to: &str,
        resize: Option<Resize>,
    ) -> Result<String, PipelineError> {
        let Some(resize) = resize else {
            return Ok(self.blobs.copy(from, to).await?);
        };
        let bytes = self.blobs.read(from).await?;
        let resized = tokio::task::spawn_blocking(move || resize_image(&bytes, resize, None))
            .await
            .map_err(|e| CoreError::Internal(format!("image resize task failed: {e}")))??;
        Ok(self.blobs.save(to, &resized).await?)
    }

    /// A half-filled snapshot must never run.
    async fn fail_snapshot(&self, build_id: DbId, error: &PipelineError) {
        tracing::error!(build_id, error = %error, "Build snapshot failed");
        if let Err(e) = self
            .store
            .mark_errored(build_id, Some(&format!("snapshot failed: {error}")))
            .await
        {
            tracing::error!(build_id, error = %e, "Failed to mark build errored");
        }
    }
}
