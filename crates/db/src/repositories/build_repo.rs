//! Repository for the `builds` table.
//!
//! Status changes are conditional updates: the `WHERE status_id = ANY(..)`
//! guard carries the state machine's allowed source states, so two racing
//! writers cannot both win a transition.

use sqlx::PgPool;
use commitreel_core::build_status::{BuildStage, BuildStatus, Transition};
use commitreel_core::types::DbId;

use crate::models::build::{Build, BuildArtifacts, CreateBuild};
use crate::models::status::{status_ids, ACTIVE_STATUSES};

/// Column list for `builds` queries.
const COLUMNS: &str = "\
    id, project_id, status_id, project_branch, project_log, \
    project_log_commit_hash, project_log_commit_time, project_log_commit_preview, \
    project_captions, build_logo, build_background, build_audio, build_audio_name, \
    video_size, content, screenshot, thumbnail, duration, size, stdout, stderr, \
    is_full_build, current_build_stage, current_build_message, error_description, \
    queued_at, running_at, aborted_at, completed_at, errored_at, \
    created_at, updated_at";

pub struct BuildRepo;

impl BuildRepo {
    /// Insert a snapshot. Defaults to `pending`; `queued` also stamps
    /// `queued_at`.
    pub async fn create(pool: &PgPool, input: &CreateBuild) -> Result<Build, sqlx::Error> {
        let status = input.status.unwrap_or(BuildStatus::Pending);
        let query = format!(
            "INSERT INTO builds \
                 (project_id, status_id, project_branch, project_log, \
                  project_log_commit_hash, project_log_commit_time, project_log_commit_preview, \
                  project_captions, build_logo, build_background, build_audio, build_audio_name, \
                  video_size, content, duration, size, is_full_build, queued_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
                     CASE WHEN $2 = $18 THEN NOW() END) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Build>(&query)
            .bind(input.project_id)
            .bind(status.id())
            .bind(&input.project_branch)
            .bind(&input.project_log)
            .bind(&input.project_log_commit_hash)
            .bind(input.project_log_commit_time)
            .bind(&input.project_log_commit_preview)
            .bind(&input.project_captions)
            .bind(&input.build_logo)
            .bind(&input.build_background)
            .bind(&input.build_audio)
            .bind(&input.build_audio_name)
            .bind(&input.video_size)
            .bind(&input.content)
            .bind(input.duration)
            .bind(input.size)
            .bind(input.is_full_build)
            .bind(BuildStatus::Queued.id())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Build>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM builds WHERE id = $1");
        sqlx::query_as::<_, Build>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Current status only, for the cancellation watcher's poll.
    pub async fn status_of(pool: &PgPool, id: DbId) -> Result<Option<BuildStatus>, sqlx::Error> {
        let row: Option<(i16,)> = sqlx::query_as("SELECT status_id FROM builds WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.and_then(|(id,)| BuildStatus::from_id(id)))
    }

    /// Oldest queued builds first.
    pub async fn list_queued(pool: &PgPool, limit: i64) -> Result<Vec<Build>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM builds \
             WHERE status_id = $1 \
             ORDER BY queued_at ASC NULLS LAST, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, Build>(&query)
            .bind(BuildStatus::Queued.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Whether the project has a pending, queued, or running build.
    pub async fn has_active_build(pool: &PgPool, project_id: DbId) -> Result<bool, sqlx::Error> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM builds WHERE project_id = $1 AND status_id = ANY($2))",
        )
        .bind(project_id)
        .bind(status_ids(&ACTIVE_STATUSES))
        .fetch_one(pool)
        .await?;
        Ok(row.0)
    }

    /// Latest earlier build of the same project that produced a video.
    pub async fn previous_successful(
        pool: &PgPool,
        build: &Build,
    ) -> Result<Option<Build>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM builds \
             WHERE project_id = $1 AND id < $2 AND content IS NOT NULL \
             ORDER BY id DESC LIMIT 1"
        );
        sqlx::query_as::<_, Build>(&query)
            .bind(build.project_id)
            .bind(build.id)
            .fetch_optional(pool)
            .await
    }

    /// Apply a guarded transition. Returns `false` when the build was not
    /// in one of the transition's source states; nothing is changed then.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        transition: Transition,
    ) -> Result<bool, sqlx::Error> {
        let column = transition.timestamp_field().column();
        let query = format!(
            "UPDATE builds SET status_id = $2, {column} = NOW() \
             WHERE id = $1 AND status_id = ANY($3)"
        );
        let result = sqlx::query(&query)
            .bind(id)
            .bind(transition.target().id())
            .bind(status_ids(transition.allowed_from()))
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move to `errored` from any state. An already-errored build keeps its
    /// original `errored_at`.
    pub async fn mark_errored(
        pool: &PgPool,
        id: DbId,
        description: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE builds SET \
                 errored_at = CASE WHEN status_id = $2 THEN errored_at ELSE NOW() END, \
                 status_id = $2, \
                 error_description = COALESCE($3, error_description) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(BuildStatus::Errored.id())
        .bind(description)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_stage(
        pool: &PgPool,
        id: DbId,
        stage: BuildStage,
        message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE builds SET current_build_stage = $2, current_build_message = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(stage.as_str())
        .bind(message)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record artifacts. Columns given as `None` keep their value.
    pub async fn save_artifacts(
        pool: &PgPool,
        id: DbId,
        artifacts: &BuildArtifacts,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE builds SET \
                 project_log = COALESCE($2, project_log), \
                 project_captions = COALESCE($3, project_captions), \
                 build_logo = COALESCE($4, build_logo), \
                 build_background = COALESCE($5, build_background), \
                 build_audio = COALESCE($6, build_audio), \
                 content = COALESCE($7, content), \
                 screenshot = COALESCE($8, screenshot), \
                 thumbnail = COALESCE($9, thumbnail), \
                 duration = COALESCE($10, duration), \
                 size = COALESCE($11, size), \
                 stdout = COALESCE($12, stdout), \
                 stderr = COALESCE($13, stderr) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&artifacts.project_log)
        .bind(&artifacts.project_captions)
        .bind(&artifacts.build_logo)
        .bind(&artifacts.build_background)
        .bind(&artifacts.build_audio)
        .bind(&artifacts.content)
        .bind(&artifacts.screenshot)
        .bind(&artifacts.thumbnail)
        .bind(artifacts.duration)
        .bind(artifacts.size)
        .bind(&artifacts.stdout)
        .bind(&artifacts.stderr)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM builds WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
