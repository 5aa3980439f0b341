//! Build lifecycle state machine and progress reporting.
//!
//! ```text
//! pending ──queue──▶ queued ──run──▶ running ──complete──▶ completed
//!    │                  │               │
//!    └──cancel──┬───────┘               └──abort──▶ aborted
//!               ▼
//!            canceled              (any) ──error──▶ errored
//! ```
//!
//! Guarded transitions fail with [`TransitionError`] and leave the job
//! untouched. `mark_errored` is unconditional and infallible.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Build status. Discriminants match the `build_statuses` seed rows.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending = 1,
    Queued = 2,
    Running = 3,
    Canceled = 4,
    Aborted = 5,
    Completed = 6,
    Errored = 7,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 7] = [
        Self::Pending,
        Self::Queued,
        Self::Running,
        Self::Canceled,
        Self::Aborted,
        Self::Completed,
        Self::Errored,
    ];

    /// Database status ID.
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
            Self::Errored => "errored",
        }
    }

    /// No further work will happen for this build.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::Aborted | Self::Completed | Self::Errored
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("unknown build status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A guarded status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Queue,
    Cancel,
    Run,
    Abort,
    Complete,
}

/// Timestamp column stamped by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    QueuedAt,
    RunningAt,
    AbortedAt,
    CompletedAt,
    ErroredAt,
}

impl TimestampField {
    pub fn column(self) -> &'static str {
        match self {
            Self::QueuedAt => "queued_at",
            Self::RunningAt => "running_at",
            Self::AbortedAt => "aborted_at",
            Self::CompletedAt => "completed_at",
            Self::ErroredAt => "errored_at",
        }
    }
}

impl Transition {
    pub const ALL: [Transition; 5] = [
        Self::Queue,
        Self::Cancel,
        Self::Run,
        Self::Abort,
        Self::Complete,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Queue => "mark_queued",
            Self::Cancel => "mark_canceled",
            Self::Run => "mark_running",
            Self::Abort => "mark_aborted",
            Self::Complete => "mark_completed",
        }
    }

    /// States this transition may start from.
    pub fn allowed_from(self) -> &'static [BuildStatus] {
        match self {
            Self::Queue => &[BuildStatus::Pending],
            Self::Cancel => &[BuildStatus::Pending, BuildStatus::Queued],
            Self::Run => &[BuildStatus::Queued],
            Self::Abort | Self::Complete => &[BuildStatus::Running],
        }
    }

    pub fn target(self) -> BuildStatus {
        match self {
            Self::Queue => BuildStatus::Queued,
            Self::Cancel => BuildStatus::Canceled,
            Self::Run => BuildStatus::Running,
            Self::Abort => BuildStatus::Aborted,
            Self::Complete => BuildStatus::Completed,
        }
    }

    /// Canceling reuses `aborted_at` for "stopped before running".
    pub fn timestamp_field(self) -> TimestampField {
        match self {
            Self::Queue => TimestampField::QueuedAt,
            Self::Run => TimestampField::RunningAt,
            Self::Cancel | Self::Abort => TimestampField::AbortedAt,
            Self::Complete => TimestampField::CompletedAt,
        }
    }

    pub fn can_apply(self, from: BuildStatus) -> bool {
        self.allowed_from().contains(&from)
    }

    pub fn validate(self, from: BuildStatus) -> Result<(), TransitionError> {
        if self.can_apply(from) {
            Ok(())
        } else {
            Err(TransitionError {
                transition: self,
                from,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: cannot {} from '{from}'", transition.name())]
pub struct TransitionError {
    pub transition: Transition,
    pub from: BuildStatus,
}

/// Status-change timestamps of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTimestamps {
    pub queued_at: Option<Timestamp>,
    pub running_at: Option<Timestamp>,
    pub aborted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub errored_at: Option<Timestamp>,
}

impl BuildTimestamps {
    pub fn set(&mut self, field: TimestampField, at: Timestamp) {
        let slot = match field {
            TimestampField::QueuedAt => &mut self.queued_at,
            TimestampField::RunningAt => &mut self.running_at,
            TimestampField::AbortedAt => &mut self.aborted_at,
            TimestampField::CompletedAt => &mut self.completed_at,
            TimestampField::ErroredAt => &mut self.errored_at,
        };
        *slot = Some(at);
    }

    /// Runtime from `running_at` to `completed_at`, or to `errored_at` when
    /// the build never completed.
    pub fn build_duration(&self) -> Option<Duration> {
        let start = self.running_at?;
        let end = self.completed_at.or(self.errored_at)?;
        (end - start).to_std().ok()
    }
}

/// Job-side state of a build: status, timestamps, and progress fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJob {
    pub status: BuildStatus,
    pub timestamps: BuildTimestamps,
    pub stage: Option<String>,
    pub stage_message: Option<String>,
    pub error_description: Option<String>,
}

impl BuildJob {
    pub fn new(status: BuildStatus) -> Self {
        Self {
            status,
            timestamps: BuildTimestamps::default(),
            stage: None,
            stage_message: None,
            error_description: None,
        }
    }

    /// Apply a guarded transition, stamping its timestamp on success.
    pub fn apply(&mut self, transition: Transition, now: Timestamp) -> Result<(), TransitionError> {
        transition.validate(self.status)?;
        self.status = transition.target();
        self.timestamps.set(transition.timestamp_field(), now);
        Ok(())
    }

    pub fn mark_queued(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.apply(Transition::Queue, now)
    }

    pub fn mark_canceled(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.apply(Transition::Cancel, now)
    }

    pub fn mark_running(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.apply(Transition::Run, now)
    }

    pub fn mark_aborted(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.apply(Transition::Abort, now)
    }

    pub fn mark_completed(&mut self, now: Timestamp) -> Result<(), TransitionError> {
        self.apply(Transition::Complete, now)
    }

    /// Move to `errored` from any state. A build already errored keeps its
    /// original `errored_at`; the description is replaced when given.
    pub fn mark_errored(&mut self, now: Timestamp, description: Option<&str>) {
        if self.status != BuildStatus::Errored {
            self.status = BuildStatus::Errored;
            self.timestamps.errored_at = Some(now);
        }
        if let Some(description) = description {
            self.error_description = Some(description.to_string());
        }
    }

    pub fn set_stage(&mut self, stage: BuildStage, message: Option<&str>) {
        self.stage = Some(stage.as_str().to_string());
        self.stage_message = message.map(str::to_string);
    }
}

// ---------------------------------------------------------------------------
// Stages and progress
// ---------------------------------------------------------------------------

/// Pipeline position reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    Init,
    Gource,
    Audio,
    Thumbnail,
    Success,
}

impl BuildStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Gource => "gource",
            Self::Audio => "audio",
            Self::Thumbnail => "thumbnail",
            Self::Success => "success",
        }
    }

    /// Ordered stages of a build, with `audio` only when audio is attached.
    pub fn sequence(has_audio: bool) -> &'static [BuildStage] {
        if has_audio {
            &[Self::Init, Self::Gource, Self::Audio, Self::Thumbnail, Self::Success]
        } else {
            &[Self::Init, Self::Gource, Self::Thumbnail, Self::Success]
        }
    }
}

impl FromStr for BuildStage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Init, Self::Gource, Self::Audio, Self::Thumbnail, Self::Success]
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("unknown build stage '{s}'")))
    }
}

/// `(current, max)` step numbers for a stage name. `success` does not count
/// as a step of its own and reports `(max, max)`. Unknown names give `None`.
pub fn stage_information(stage: Option<&str>, has_audio: bool) -> Option<(usize, usize)> {
    let stage: BuildStage = stage?.parse().ok()?;
    let stages = BuildStage::sequence(has_audio);
    let max = stages.len() - 1;
    if stage == BuildStage::Success {
        return Some((max, max));
    }
    let index = stages.iter().position(|s| *s == stage)?;
    Some((index + 1, max))
}

const RUNNING_PERCENT_MIN: u8 = 5;
const RUNNING_PERCENT_MAX: u8 = 99;
const ERRORED_PERCENT: u8 = 10;

/// Inputs for [`estimate_percent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressInput<'a> {
    pub status: Option<BuildStatus>,
    pub stage: Option<&'a str>,
    pub has_audio: bool,
    /// Time since `running_at`.
    pub elapsed: Option<Duration>,
    /// Runtime of the previous successful build of the same project.
    pub baseline: Option<Duration>,
}

/// Best-guess completion percentage for display.
pub fn estimate_percent(input: ProgressInput<'_>) -> u8 {
    let Some(status) = input.status else {
        return 0;
    };
    match status {
        BuildStatus::Completed => 100,
        BuildStatus::Pending | BuildStatus::Queued | BuildStatus::Canceled | BuildStatus::Aborted => 0,
        BuildStatus::Errored => ERRORED_PERCENT,
        BuildStatus::Running => {
            let raw = match (input.elapsed, input.baseline) {
                (Some(elapsed), Some(baseline)) if !baseline.is_zero() => {
                    elapsed.as_secs_f64() / baseline.as_secs_f64() * 100.0
                }
                _ => match stage_information(input.stage, input.has_audio) {
                    Some((current, max)) => current as f64 / max as f64 * 100.0,
                    None => 0.0,
                },
            };
            (raw as u64).clamp(RUNNING_PERCENT_MIN as u64, RUNNING_PERCENT_MAX as u64) as u8
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};

    use super::*;

    fn now() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn status_ids_round_trip() {
        for status in BuildStatus::ALL {
            assert_eq!(BuildStatus::from_id(status.id()), Some(status));
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        assert_eq!(BuildStatus::from_id(0), None);
    }

    #[test]
    fn happy_path_stamps_each_timestamp() {
        let mut job = BuildJob::new(BuildStatus::Pending);
        job.mark_queued(now()).unwrap();
        job.mark_running(now()).unwrap();
        job.mark_completed(now()).unwrap();
        assert_eq!(job.status, BuildStatus::Completed);
        assert_eq!(job.timestamps.queued_at, Some(now()));
        assert_eq!(job.timestamps.running_at, Some(now()));
        assert_eq!(job.timestamps.completed_at, Some(now()));
        assert_eq!(job.timestamps.aborted_at, None);
    }

    #[test]
    fn cancel_uses_aborted_at() {
        let mut job = BuildJob::new(BuildStatus::Queued);
        job.mark_canceled(now()).unwrap();
        assert_eq!(job.status, BuildStatus::Canceled);
        assert_eq!(job.timestamps.aborted_at, Some(now()));
    }

    #[test]
    fn every_unlisted_transition_is_rejected_without_change() {
        let valid: &[(BuildStatus, Transition)] = &[
            (BuildStatus::Pending, Transition::Queue),
            (BuildStatus::Pending, Transition::Cancel),
            (BuildStatus::Queued, Transition::Cancel),
            (BuildStatus::Queued, Transition::Run),
            (BuildStatus::Running, Transition::Abort),
            (BuildStatus::Running, Transition::Complete),
        ];
        for from in BuildStatus::ALL {
            for transition in Transition::ALL {
                let mut job = BuildJob::new(from);
                let before = job.clone();
                let result = job.apply(transition, now());
                if valid.contains(&(from, transition)) {
                    assert!(result.is_ok(), "{from} {transition:?} should be allowed");
                    assert_eq!(job.status, transition.target());
                } else {
                    assert_matches!(
                        result,
                        Err(TransitionError { from: f, transition: t }) if f == from && t == transition
                    );
                    assert_eq!(job, before);
                }
            }
        }
    }

    #[test]
    fn mark_errored_from_any_state() {
        for from in BuildStatus::ALL {
            let mut job = BuildJob::new(from);
            job.mark_errored(now(), Some("boom"));
            assert_eq!(job.status, BuildStatus::Errored);
            assert_eq!(job.error_description.as_deref(), Some("boom"));
        }
    }

    #[test]
    fn mark_errored_is_idempotent() {
        let first = now();
        let later = first + chrono::Duration::seconds(30);
        let mut job = BuildJob::new(BuildStatus::Running);
        job.mark_errored(first, Some("first"));
        job.mark_errored(later, None);
        assert_eq!(job.timestamps.errored_at, Some(first));
        assert_eq!(job.error_description.as_deref(), Some("first"));
    }

    #[test]
    fn build_duration_prefers_completed() {
        let start = now();
        let ts = BuildTimestamps {
            running_at: Some(start),
            completed_at: Some(start + chrono::Duration::seconds(90)),
            errored_at: Some(start + chrono::Duration::seconds(5)),
            ..Default::default()
        };
        assert_eq!(ts.build_duration(), Some(Duration::from_secs(90)));

        let ts = BuildTimestamps {
            running_at: Some(start),
            ..Default::default()
        };
        assert_eq!(ts.build_duration(), None);
    }

    #[test]
    fn stage_information_without_audio() {
        assert_eq!(stage_information(Some("init"), false), Some((1, 3)));
        assert_eq!(stage_information(Some("gource"), false), Some((2, 3)));
        assert_eq!(stage_information(Some("thumbnail"), false), Some((3, 3)));
        assert_eq!(stage_information(Some("success"), false), Some((3, 3)));
        assert_eq!(stage_information(Some("audio"), false), None);
        assert_eq!(stage_information(Some("bogus"), false), None);
        assert_eq!(stage_information(None, false), None);
    }

    #[test]
    fn stage_information_with_audio() {
        assert_eq!(stage_information(Some("audio"), true), Some((3, 4)));
        assert_eq!(stage_information(Some("success"), true), Some((4, 4)));
    }

    #[test]
    fn percent_for_terminal_and_waiting_states() {
        let pct = |status| {
            estimate_percent(ProgressInput {
                status: Some(status),
                ..Default::default()
            })
        };
        assert_eq!(pct(BuildStatus::Completed), 100);
        assert_eq!(pct(BuildStatus::Pending), 0);
        assert_eq!(pct(BuildStatus::Queued), 0);
        assert_eq!(pct(BuildStatus::Canceled), 0);
        assert_eq!(pct(BuildStatus::Aborted), 0);
        assert_eq!(pct(BuildStatus::Errored), 10);
    }

    #[test]
    fn running_percent_uses_baseline_and_clamps() {
        let running = |elapsed: u64| {
            estimate_percent(ProgressInput {
                status: Some(BuildStatus::Running),
                elapsed: Some(Duration::from_secs(elapsed)),
                baseline: Some(Duration::from_secs(200)),
                ..Default::default()
            })
        };
        assert_eq!(running(0), 5);
        assert_eq!(running(100), 50);
        assert_eq!(running(1000), 99);
    }

    #[test]
    fn running_percent_falls_back_to_stage_fraction() {
        let pct = estimate_percent(ProgressInput {
            status: Some(BuildStatus::Running),
            stage: Some("gource"),
            has_audio: true,
            elapsed: Some(Duration::from_secs(10)),
            baseline: None,
        });
        assert_eq!(pct, 50);

        let pct = estimate_percent(ProgressInput {
            status: Some(BuildStatus::Running),
            stage: Some("success"),
            ..Default::default()
        });
        assert_eq!(pct, 99);
    }
}
