//! End-to-end build flow over the in-memory store, a temp blob store, and
//! shell-script stand-ins for gource/ffmpeg/ffprobe.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use commitreel_core::build_status::BuildStatus;
use commitreel_core::error::CoreError;
use commitreel_core::executables::{Tool, ToolPaths};
use commitreel_core::types::DbId;
use commitreel_db::models::owner::Owner;
use commitreel_db::models::project::{CreateProject, ProjectLogUpdate, ProjectMedia};
use commitreel_pipeline::blob::{keys, BlobStore, LocalBlobStore};
use commitreel_pipeline::config::PipelineConfig;
use commitreel_pipeline::dispatch::{ChannelDispatcher, Task, RUN_BUILD_TASK};
use commitreel_pipeline::error::PipelineError;
use commitreel_pipeline::memory::MemoryStore;
use commitreel_pipeline::runner::RunOutcome;
use commitreel_pipeline::snapshot::{Remix, StopOutcome};
use commitreel_pipeline::store::BuildStore;
use commitreel_pipeline::Pipeline;

const LOG: &str = "1296068768|cameronmcefee|A|/README\n1315975361|Johnneylee Jack Rollins|M|/README\n";

/// Writes a custom log when asked for one, otherwise writes into the
/// frame stream, then exits.
const GOURCE_OK: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --output-ppm-stream) out="$2"; shift ;;
    --output-custom-log) log="$2"; shift ;;
  esac
  shift
done
if [ -n "$log" ]; then
  printf '1296068768|cameronmcefee|A|/README\n1315975361|Johnneylee Jack Rollins|M|/README\n' > "$log"
  exit 0
fi
printf 'P6 frames' > "$out"
"#;

const GIT: &str = r#"
if [ "$1" = "-C" ]; then shift 2; fi
case "$1" in
  clone)
    for last; do :; done
    mkdir -p "$last"
    ;;
  log)
    printf 'abc999|1315975361|Update README'
    ;;
  for-each-ref)
    echo '2011-01-26T19:06:08+00:00|v1.0'
    echo '2011-09-14T04:42:41-07:00|v2.0'
    ;;
esac
"#;

/// Opens the frame stream and hangs until killed.
const GOURCE_SLOW: &str = r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --output-ppm-stream) out="$2"; shift ;;
  esac
  shift
done
exec 3>"$out"
exec sleep 30
"#;

const GOURCE_BROKEN: &str = r#"
echo "could not open display" >&2
exit 3
"#;

/// Reads the last `-i` input and writes the last argument.
const FFMPEG: &str = r#"
prev=""
for arg; do
  if [ "$prev" = "-i" ]; then in="$arg"; fi
  prev="$arg"
done
cat "$in" > /dev/null
printf 'mp4' > "$prev"
"#;

const FFPROBE: &str = r#"
echo '{"format":{"duration":"12.5"},"streams":[]}'
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

struct Harness {
    _dir: TempDir,
    store: Arc<MemoryStore>,
    blobs: Arc<LocalBlobStore>,
    pipeline: Pipeline,
    tasks: UnboundedReceiver<Task>,
    project_id: DbId,
}

impl Harness {
    async fn new(gource: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let tools = ToolPaths::new()
            .with_override(Tool::Git, write_script(&bin, "git", GIT))
            .with_override(Tool::Gource, write_script(&bin, "gource", gource))
            .with_override(Tool::Ffmpeg, write_script(&bin, "ffmpeg", FFMPEG))
            .with_override(Tool::Ffprobe, write_script(&bin, "ffprobe", FFPROBE));

        let media_root = dir.path().join("media");
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(LocalBlobStore::new(&media_root));
        let (dispatcher, tasks) = ChannelDispatcher::new();
        let config = PipelineConfig {
            media_root,
            render_poll_interval: Duration::from_millis(50),
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(
            store.clone(),
            blobs.clone(),
            Arc::new(dispatcher),
            Arc::new(tools),
            config,
        );

        let project = store.create_project(&CreateProject {
            name: "demo".into(),
            project_url: Some("https://github.com/acaudwell/Gource".into()),
            project_branch: None,
            video_size: None,
            build_title: None,
        });
        let log_key = blobs
            .save(&keys::project_log(project.id), LOG.as_bytes())
            .await
            .unwrap();
        store
            .update_project_log(
                project.id,
                &ProjectLogUpdate {
                    project_log: log_key,
                    commit_hash: Some("abc123".into()),
                    commit_time: None,
                    commit_preview: Some("Initial commit".into()),
                },
            )
            .await
            .unwrap();

        Self {
            _dir: dir,
            store,
            blobs,
            pipeline,
            tasks,
            project_id: project.id,
        }
    }

    async fn status(&self, build_id: DbId) -> BuildStatus {
        self.store.build_status(build_id).await.unwrap()
    }
}

#[tokio::test]
async fn refresh_stores_log_commit_and_tag_captions() {
    let h = Harness::new(GOURCE_OK).await;

    let refreshed = h.pipeline.refresh_project_log(h.project_id, true).await.unwrap();

    assert_eq!(refreshed.analysis.num_changes, 2);
    assert_eq!(refreshed.captions_added, 2);
    let project = &refreshed.project;
    assert_eq!(project.project_log_commit_hash.as_deref(), Some("abc999"));
    assert_eq!(project.project_log_commit_preview.as_deref(), Some("Update README"));
    assert_eq!(
        project.project_log_commit_time.map(|t| t.timestamp()),
        Some(1_315_975_361)
    );
    assert!(project.is_project_changed);

    let captions = h.store.captions(Owner::Project(h.project_id)).await.unwrap();
    assert_eq!(captions.len(), 2);

    // Tags already present are not added twice.
    assert_eq!(h.pipeline.refresh_project_tags(h.project_id).await.unwrap(), 0);
}

#[tokio::test]
async fn refresh_rejects_disallowed_host() {
    let h = Harness::new(GOURCE_OK).await;
    let other = h.store.create_project(&CreateProject {
        name: "elsewhere".into(),
        project_url: Some("https://example.com/a/b".into()),
        project_branch: None,
        video_size: None,
        build_title: None,
    });

    let err = h.pipeline.refresh_project_log(other.id, false).await.unwrap_err();
    assert!(err.is_input_error());
    assert!(h.store.project(other.id).await.unwrap().project_log.is_none());
}

#[tokio::test]
async fn create_build_snapshots_and_dispatches() {
    let mut h = Harness::new(GOURCE_OK).await;
    h.pipeline
        .set_project_options(h.project_id, [("seconds-per-day", "0.5")])
        .await
        .unwrap();

    let build = h.pipeline.create_build(h.project_id, false).await.unwrap();

    assert_eq!(build.status(), BuildStatus::Queued);
    assert!(build.queued_at.is_some());
    assert!(build.is_full_build);
    assert_eq!(build.project_log_commit_hash.as_deref(), Some("abc123"));
    assert_eq!(build.project_log.as_deref(), Some(keys::build_log(build.id).as_str()));
    assert_eq!(
        h.tasks.try_recv().unwrap(),
        Task {
            name: RUN_BUILD_TASK,
            build_id: build.id
        }
    );

    let options = h.store.options(Owner::Build(build.id)).await.unwrap();
    assert_eq!(options.len(), 1);
    assert_eq!(options[0].name, "seconds-per-day");
    assert!(!h.store.project(h.project_id).await.unwrap().is_project_changed);
}

#[tokio::test]
async fn second_build_conflicts_while_one_is_active() {
    let h = Harness::new(GOURCE_OK).await;
    h.pipeline.create_build(h.project_id, false).await.unwrap();

    let err = h.pipeline.create_build(h.project_id, false).await.unwrap_err();
    assert_matches!(err, PipelineError::Core(CoreError::Conflict(_)));
    assert!(err.is_input_error());
}

#[tokio::test]
async fn deferred_build_waits_for_queue() {
    let mut h = Harness::new(GOURCE_OK).await;
    let build = h.pipeline.create_build(h.project_id, true).await.unwrap();

    assert_eq!(build.status(), BuildStatus::Pending);
    assert!(h.tasks.try_recv().is_err());

    assert!(h.pipeline.queue_build(build.id).await.unwrap());
    assert!(!h.pipeline.queue_build(build.id).await.unwrap());
    assert_eq!(h.status(build.id).await, BuildStatus::Queued);
    assert_eq!(h.tasks.try_recv().unwrap().build_id, build.id);
}

#[tokio::test]
async fn invalid_option_batch_changes_nothing() {
    let h = Harness::new(GOURCE_OK).await;
    h.pipeline
        .set_project_options(h.project_id, [("auto-skip-seconds", "2")])
        .await
        .unwrap();

    let err = h
        .pipeline
        .set_project_options(h.project_id, [("seconds-per-day", "2"), ("no-such-option", "1")])
        .await
        .unwrap_err();
    assert!(err.is_input_error());

    let stored = h.store.options(Owner::Project(h.project_id)).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "auto-skip-seconds");
}

#[tokio::test]
async fn run_build_completes_and_records_artifacts() {
    let h = Harness::new(GOURCE_OK).await;
    let build = h.pipeline.create_build(h.project_id, false).await.unwrap();

    let outcome = h.pipeline.run_build(build.id).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let done = h.store.build(build.id).await.unwrap();
    assert_eq!(done.status(), BuildStatus::Completed);
    assert!(done.running_at.is_some());
    assert!(done.completed_at.is_some());
    assert!(done.errored_at.is_none());
    assert_eq!(done.current_build_stage.as_deref(), Some("success"));
    assert_eq!(done.content.as_deref(), Some(keys::build_video(build.id).as_str()));
    assert_eq!(done.duration, Some(12));
    assert_eq!(done.size, Some(3));
    assert!(done.stdout.is_some());
    assert_eq!(h.blobs.read(&keys::build_video(build.id)).await.unwrap(), b"mp4");

    // A duplicate delivery is a no-op.
    let again = h.pipeline.run_build(build.id).await.unwrap();
    assert_eq!(again, RunOutcome::Skipped(BuildStatus::Completed));

    let progress = h.pipeline.build_progress(build.id).await.unwrap();
    assert_eq!(progress.percent, 100);
    assert_eq!(progress.step, Some((3, 3)));
}

#[tokio::test]
async fn run_build_mixes_attached_audio() {
    let h = Harness::new(GOURCE_OK).await;
    let audio = h.blobs.save("projects/1/song.mp3", b"ID3").await.unwrap();
    h.store
        .set_project_media(
            h.project_id,
            &ProjectMedia {
                build_audio: Some(audio),
                build_audio_name: Some("song.mp3".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let build = h.pipeline.create_build(h.project_id, false).await.unwrap();
    assert!(build.build_audio.as_deref().is_some_and(|k| k.ends_with(".mp3")));

    assert_eq!(h.pipeline.run_build(build.id).await.unwrap(), RunOutcome::Completed);
    assert_eq!(h.status(build.id).await, BuildStatus::Completed);
}

#[tokio::test]
async fn strip_audio_remix_reuses_video() {
    let h = Harness::new(GOURCE_OK).await;
    let source = h.pipeline.create_build(h.project_id, false).await.unwrap();
    h.pipeline.run_build(source.id).await.unwrap();

    let remix = h
        .pipeline
        .clone_build(source.id, Remix::StripAudio, false)
        .await
        .unwrap();
    assert!(!remix.is_full_build);
    assert_eq!(remix.duration, Some(12));
    assert!(remix.content.is_some());

    assert_eq!(h.pipeline.run_build(remix.id).await.unwrap(), RunOutcome::Completed);
    let done = h.store.build(remix.id).await.unwrap();
    assert_eq!(done.status(), BuildStatus::Completed);
    assert_eq!(done.duration, Some(12));
}

#[tokio::test]
async fn remix_requires_rendered_source() {
    let h = Harness::new(GOURCE_OK).await;
    let source = h.pipeline.create_build(h.project_id, false).await.unwrap();

    let err = h
        .pipeline
        .clone_build(source.id, Remix::StripAudio, false)
        .await
        .unwrap_err();
    assert_matches!(err, PipelineError::Core(CoreError::Validation(_)));
}

#[tokio::test]
async fn canceled_build_is_skipped() {
    let h = Harness::new(GOURCE_OK).await;
    let build = h.pipeline.create_build(h.project_id, false).await.unwrap();

    assert_eq!(h.pipeline.request_stop(build.id).await.unwrap(), StopOutcome::Canceled);
    assert_eq!(
        h.pipeline.run_build(build.id).await.unwrap(),
        RunOutcome::Skipped(BuildStatus::Canceled)
    );
    assert_eq!(
        h.pipeline.request_stop(build.id).await.unwrap(),
        StopOutcome::AlreadyFinished(BuildStatus::Canceled)
    );
}

#[tokio::test]
async fn renderer_failure_marks_build_errored() {
    let h = Harness::new(GOURCE_BROKEN).await;
    let build = h.pipeline.create_build(h.project_id, false).await.unwrap();

    let outcome = h.pipeline.run_build(build.id).await.unwrap();
    assert_matches!(outcome, RunOutcome::Errored(ref msg) if msg.contains("exited at startup"));

    let failed = h.store.build(build.id).await.unwrap();
    assert_eq!(failed.status(), BuildStatus::Errored);
    assert!(failed.errored_at.is_some());
    assert!(failed.error_description.is_some());
    assert_eq!(h.pipeline.build_progress(build.id).await.unwrap().percent, 10);
}

#[tokio::test]
async fn stop_while_running_aborts_without_error() {
    let h = Harness::new(GOURCE_SLOW).await;
    let build = h.pipeline.create_build(h.project_id, false).await.unwrap();

    let runner = h.pipeline.clone();
    let handle = tokio::spawn(async move { runner.run_build(build.id).await });

    while h.status(build.id).await != BuildStatus::Running {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(h.pipeline.request_stop(build.id).await.unwrap(), StopOutcome::Aborted);

    let outcome = tokio::time::timeout(Duration::from_secs(20), handle)
        .await
        .expect("runner did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Aborted);

    let stopped = h.store.build(build.id).await.unwrap();
    assert_eq!(stopped.status(), BuildStatus::Aborted);
    assert!(stopped.aborted_at.is_some());
    assert!(stopped.errored_at.is_none());
}

#[tokio::test]
async fn delete_build_removes_record_and_video() {
    let h = Harness::new(GOURCE_OK).await;
    let build = h.pipeline.create_build(h.project_id, false).await.unwrap();
    h.pipeline.run_build(build.id).await.unwrap();

    h.pipeline.delete_build(build.id).await.unwrap();

    assert!(h.store.build(build.id).await.is_err());
    assert!(h.blobs.read(&keys::build_video(build.id)).await.is_err());
}

#[tokio::test]
async fn project_duration_estimate_uses_overrides() {
    let h = Harness::new(GOURCE_OK).await;

    let estimate = h
        .pipeline
        .estimate_project_duration(h.project_id, None, None)
        .await
        .unwrap();
    assert_eq!(estimate.seconds, 12.0);
    assert_eq!(estimate.formatted, "0:00:12");
    assert_eq!(estimate.actions.added, 1);
    assert_eq!(estimate.actions.modified, 1);

    let slower = h
        .pipeline
        .estimate_project_duration(h.project_id, Some(2.0), None)
        .await
        .unwrap();
    assert_eq!(slower.seconds, 14.0);
}

#[tokio::test]
async fn logo_is_resized_to_an_eighth_of_the_height() {
    let h = Harness::new(GOURCE_OK).await;
    let mut png = Vec::new();
    image::RgbImage::new(400, 200)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    let logo = h.blobs.save("projects/1/logo.png", &png).await.unwrap();
    h.store
        .set_project_media(
            h.project_id,
            &ProjectMedia {
                build_logo: Some(logo),
                build_logo_resize: true,
                ..Default::default()
            },
        )
        .unwrap();

    let build = h.pipeline.create_build(h.project_id, true).await.unwrap();
    let bytes = h.blobs.read(build.build_logo.as_deref().unwrap()).await.unwrap();
    let resized = image::load_from_memory(&bytes).unwrap();
    // 1280x720 default video: ceil(720 / 8) = 90.
    assert_eq!(resized.width(), 90);
    assert_eq!(resized.height(), 45);
}
