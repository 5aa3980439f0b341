//! Read-side views for progress display and duration estimates.

use chrono::Utc;
use serde::Serialize;

use commitreel_core::build_status::{
    estimate_percent, stage_information, BuildStatus, ProgressInput,
};
use commitreel_core::error::CoreError;
use commitreel_core::estimation::{estimate_duration, format_duration, DurationParams};
use commitreel_core::gource_log::{count_actions, ActionCounts};
use commitreel_core::types::DbId;
use commitreel_db::models::owner::Owner;

use crate::error::PipelineError;
use crate::Pipeline;

/// Snapshot of where a build is, for display.
#[derive(Debug, Clone, Serialize)]
pub struct BuildProgress {
    pub build_id: DbId,
    pub status: BuildStatus,
    pub stage: Option<String>,
    pub message: Option<String>,
    /// `(current, max)` stage position, if the stage is known.
    pub step: Option<(usize, usize)>,
    pub percent: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct DurationEstimate {
    pub seconds: f64,
    /// `H:MM:SS`.
    pub formatted: String,
    pub actions: ActionCounts,
}

impl Pipeline {
    pub async fn build_progress(&self, build_id: DbId) -> Result<BuildProgress, PipelineError> {
        let build = self.store.build(build_id).await?;
        let status = build.status();
        let has_audio = build.build_audio.is_some();

        let baseline = if status == BuildStatus::Running {
            self.store
                .previous_successful(&build)
                .await?
                .and_then(|prev| prev.timestamps().build_duration())
        } else {
            None
        };
        let elapsed = build
            .running_at
            .and_then(|started| (Utc::now() - started).to_std().ok());

        let stage = build.current_build_stage.as_deref();
        let percent = estimate_percent(ProgressInput {
            status: Some(status),
            stage,
            has_audio,
            elapsed,
            baseline,
        });

        Ok(BuildProgress {
            build_id,
            status,
            step: stage_information(stage, has_audio),
            stage: build.current_build_stage.clone(),
            message: build.current_build_message.clone(),
            percent,
        })
    }

    /// Estimated video length for a project's current log. Explicit
    /// parameters override the project's stored options.
    pub async fn estimate_project_duration(
        &self,
        project_id: DbId,
        seconds_per_day: Option<f64>,
        auto_skip_seconds: Option<f64>,
    ) -> Result<DurationEstimate, PipelineError> {
        let project = self.store.project(project_id).await?;
        let key = project.project_log.as_deref().ok_or_else(|| {
            CoreError::Validation(format!("project {project_id} has no log; refresh it first"))
        })?;
        let log_text = self.blobs.read_to_string(key).await?;

        let options = self.option_set(Owner::Project(project_id)).await?;
        let params = DurationParams::from_options(&options)
            .with_overrides(seconds_per_day, auto_skip_seconds);
        let seconds = estimate_duration(&log_text, params)?;

        Ok(DurationEstimate {
            seconds,
            formatted: format_duration(seconds),
            actions: count_actions(&log_text)?,
        })
    }
}
