//! Project entity: a remote repository plus the settings every new build
//! snapshots.

use commitreel_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `projects` table.
///
/// Blob-valued fields (`project_log`, `build_logo`, ...) hold blob store
/// keys, not content.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: DbId,
    pub name: String,
    pub project_url: Option<String>,
    pub project_branch: String,
    pub project_log: Option<String>,
    pub project_log_updated_at: Option<Timestamp>,
    pub project_log_commit_hash: Option<String>,
    pub project_log_commit_time: Option<Timestamp>,
    pub project_log_commit_preview: Option<String>,
    pub video_size: String,
    pub build_title: Option<String>,
    pub build_logo: Option<String>,
    pub build_logo_resize: bool,
    pub build_background: Option<String>,
    pub build_background_resize: bool,
    pub build_audio: Option<String>,
    pub build_audio_name: Option<String>,
    pub is_project_changed: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for inserting a project.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub name: String,
    pub project_url: Option<String>,
    pub project_branch: Option<String>,
    pub video_size: Option<String>,
    pub build_title: Option<String>,
}

/// Fields written by a successful log refresh.
#[derive(Debug, Clone)]
pub struct ProjectLogUpdate {
    pub project_log: String,
    pub commit_hash: Option<String>,
    pub commit_time: Option<Timestamp>,
    pub commit_preview: Option<String>,
}

/// Artwork and audio attached to a project, with the resize toggles.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectMedia {
    pub build_logo: Option<String>,
    pub build_logo_resize: bool,
    pub build_background: Option<String>,
    pub build_background_resize: bool,
    pub build_audio: Option<String>,
    pub build_audio_name: Option<String>,
}
