//! Build entity: an immutable project snapshot plus mutable job fields.

use commitreel_core::build_status::{BuildJob, BuildStatus, BuildTimestamps};
use commitreel_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::StatusId;

/// A row from the `builds` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Build {
    pub id: DbId,
    pub project_id: DbId,
    pub status_id: StatusId,
    pub project_branch: String,
    pub project_log: Option<String>,
    pub project_log_commit_hash: Option<String>,
    pub project_log_commit_time: Option<Timestamp>,
    pub project_log_commit_preview: Option<String>,
    pub project_captions: Option<String>,
    pub build_logo: Option<String>,
    pub build_background: Option<String>,
    pub build_audio: Option<String>,
    pub build_audio_name: Option<String>,
    pub video_size: String,
    pub content: Option<String>,
    pub screenshot: Option<String>,
    pub thumbnail: Option<String>,
    /// Whole seconds, set after render.
    pub duration: Option<i32>,
    /// Bytes of the final video.
    pub size: Option<i64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub is_full_build: bool,
    pub current_build_stage: Option<String>,
    pub current_build_message: Option<String>,
    pub error_description: Option<String>,
    pub queued_at: Option<Timestamp>,
    pub running_at: Option<Timestamp>,
    pub aborted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub errored_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Build {
    /// Decoded status. Rows only ever hold seeded ids, so an unknown id is
    /// reported as errored.
    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_id(self.status_id).unwrap_or(BuildStatus::Errored)
    }

    pub fn timestamps(&self) -> BuildTimestamps {
        BuildTimestamps {
            queued_at: self.queued_at,
            running_at: self.running_at,
            aborted_at: self.aborted_at,
            completed_at: self.completed_at,
            errored_at: self.errored_at,
        }
    }

    /// Job-side view used by the state machine.
    pub fn job(&self) -> BuildJob {
        BuildJob {
            status: self.status(),
            timestamps: self.timestamps(),
            stage: self.current_build_stage.clone(),
            stage_message: self.current_build_message.clone(),
            error_description: self.error_description.clone(),
        }
    }
}

/// DTO for inserting a build snapshot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateBuild {
    pub project_id: DbId,
    /// `queued` stamps `queued_at`; anything else is inserted as given.
    pub status: Option<BuildStatus>,
    pub project_branch: String,
    pub project_log: Option<String>,
    pub project_log_commit_hash: Option<String>,
    pub project_log_commit_time: Option<Timestamp>,
    pub project_log_commit_preview: Option<String>,
    pub project_captions: Option<String>,
    pub build_logo: Option<String>,
    pub build_background: Option<String>,
    pub build_audio: Option<String>,
    pub build_audio_name: Option<String>,
    pub video_size: String,
    pub content: Option<String>,
    pub duration: Option<i32>,
    pub size: Option<i64>,
    pub is_full_build: bool,
}

/// Output artifacts recorded at the end of a build step. `None` leaves
/// the column untouched.
#[derive(Debug, Clone, Default)]
pub struct BuildArtifacts {
    pub project_log: Option<String>,
    pub project_captions: Option<String>,
    pub build_logo: Option<String>,
    pub build_background: Option<String>,
    pub build_audio: Option<String>,
    pub content: Option<String>,
    pub screenshot: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<i32>,
    pub size: Option<i64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}
