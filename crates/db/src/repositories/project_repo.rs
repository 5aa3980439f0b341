//! Repository for the `projects` table.

use sqlx::PgPool;
use commitreel_core::types::DbId;

use crate::models::project::{CreateProject, Project, ProjectLogUpdate, ProjectMedia};

/// Column list for `projects` queries.
const COLUMNS: &str = "\
    id, name, project_url, project_branch, project_log, project_log_updated_at, \
    project_log_commit_hash, project_log_commit_time, project_log_commit_preview, \
    video_size, build_title, build_logo, build_logo_resize, \
    build_background, build_background_resize, build_audio, build_audio_name, \
    is_project_changed, created_at, updated_at";

pub struct ProjectRepo;

impl ProjectRepo {
    pub async fn create(pool: &PgPool, input: &CreateProject) -> Result<Project, sqlx::Error> {
        let query = format!(
            "INSERT INTO projects (name, project_url, project_branch, video_size, build_title) \
             VALUES ($1, $2, COALESCE($3, 'master'), COALESCE($4, '1280x720'), $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(&input.name)
            .bind(&input.project_url)
            .bind(&input.project_branch)
            .bind(&input.video_size)
            .bind(&input.build_title)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Project>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = $1");
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Store a freshly extracted log and flag the project as changed.
    pub async fn update_log(
        pool: &PgPool,
        id: DbId,
        update: &ProjectLogUpdate,
    ) -> Result<Option<Project>, sqlx::Error> {
        let query = format!(
            "UPDATE projects SET \
                 project_log = $2, \
                 project_log_updated_at = NOW(), \
                 project_log_commit_hash = $3, \
                 project_log_commit_time = $4, \
                 project_log_commit_preview = $5, \
                 is_project_changed = TRUE \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .bind(&update.project_log)
            .bind(&update.commit_hash)
            .bind(update.commit_time)
            .bind(&update.commit_preview)
            .fetch_optional(pool)
            .await
    }

    /// Replace the artwork/audio attachments.
    pub async fn update_media(
        pool: &PgPool,
        id: DbId,
        media: &ProjectMedia,
    ) -> Result<Option<Project>, sqlx::Error> {
        let query = format!(
            "UPDATE projects SET \
                 build_logo = $2, build_logo_resize = $3, \
                 build_background = $4, build_background_resize = $5, \
                 build_audio = $6, build_audio_name = $7, \
                 is_project_changed = TRUE \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Project>(&query)
            .bind(id)
            .bind(&media.build_logo)
            .bind(media.build_logo_resize)
            .bind(&media.build_background)
            .bind(media.build_background_resize)
            .bind(&media.build_audio)
            .bind(&media.build_audio_name)
            .fetch_optional(pool)
            .await
    }

    pub async fn set_project_changed(
        pool: &PgPool,
        id: DbId,
        changed: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE projects SET is_project_changed = $2 WHERE id = $1")
            .bind(id)
            .bind(changed)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Delete a project. Builds, options, captions, and project avatars
    /// cascade.
    pub async fn delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
