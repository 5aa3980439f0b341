//! Video length estimation from a commit-event log.
//!
//! Models the renderer's simulated time without running it: every calendar
//! day of history costs `seconds_per_day` of video, and idle gaps longer
//! than `auto_skip_seconds` are fast-forwarded.

use chrono::NaiveDate;

use crate::gource_log::{parse_log, LogError};
use crate::render_options::RenderOptionSet;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Renderer default for `--seconds-per-day`.
pub const DEFAULT_SECONDS_PER_DAY: f64 = 1.0;

/// Renderer default for `--auto-skip-seconds`.
pub const DEFAULT_AUTO_SKIP_SECONDS: f64 = 3.0;

/// Fixed tail the renderer holds after the last entry (`--stop-at-end`).
pub const TRAILING_BUFFER_SECS: f64 = 5.0;

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error(transparent)]
    Log(#[from] LogError),

    #[error("invalid estimate parameter: {0}")]
    InvalidParams(String),
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Simulation-speed parameters used by the estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationParams {
    pub seconds_per_day: f64,
    pub auto_skip_seconds: f64,
}

impl Default for DurationParams {
    fn default() -> Self {
        Self {
            seconds_per_day: DEFAULT_SECONDS_PER_DAY,
            auto_skip_seconds: DEFAULT_AUTO_SKIP_SECONDS,
        }
    }
}

impl DurationParams {
    pub fn new(seconds_per_day: f64, auto_skip_seconds: f64) -> Self {
        Self {
            seconds_per_day,
            auto_skip_seconds,
        }
    }

    /// Take the speed settings from a project's option set, falling back to
    /// renderer defaults for anything unset.
    pub fn from_options(options: &RenderOptionSet) -> Self {
        Self {
            seconds_per_day: options.seconds_per_day().unwrap_or(DEFAULT_SECONDS_PER_DAY),
            auto_skip_seconds: options
                .auto_skip_seconds()
                .unwrap_or(DEFAULT_AUTO_SKIP_SECONDS),
        }
    }

    /// Apply explicit overrides on top of these parameters.
    pub fn with_overrides(self, seconds_per_day: Option<f64>, auto_skip_seconds: Option<f64>) -> Self {
        Self {
            seconds_per_day: seconds_per_day.unwrap_or(self.seconds_per_day),
            auto_skip_seconds: auto_skip_seconds.unwrap_or(self.auto_skip_seconds),
        }
    }

    fn validate(&self) -> Result<(), EstimateError> {
        if !(self.seconds_per_day.is_finite() && self.seconds_per_day > 0.0) {
            return Err(EstimateError::InvalidParams(format!(
                "seconds_per_day must be positive, got {}",
                self.seconds_per_day
            )));
        }
        if !(self.auto_skip_seconds.is_finite() && self.auto_skip_seconds > 0.0) {
            return Err(EstimateError::InvalidParams(format!(
                "auto_skip_seconds must be positive, got {}",
                self.auto_skip_seconds
            )));
        }
        Ok(())
    }

    /// Video seconds spent on a gap of `gap_days` between two commit dates.
    ///
    /// A skipped gap costs `ceil(auto_skip / spd) * spd + auto_skip`, which
    /// steps down whenever `ceil(auto_skip / spd)` does. The estimate is
    /// therefore only non-decreasing in `seconds_per_day` between those
    /// steps: with `auto_skip = 3`, a long gap costs 8.8 s at `spd = 2.9`
    /// and 6 s at `spd = 3.0`. This follows the renderer's skip rule, not a
    /// smoothed model.
    fn gap_cost(&self, gap_days: i64) -> f64 {
        let simulated = gap_days as f64 * self.seconds_per_day;
        if simulated < self.auto_skip_seconds {
            simulated
        } else {
            let skip_day_limit = (self.auto_skip_seconds / self.seconds_per_day).ceil();
            skip_day_limit * self.seconds_per_day + self.auto_skip_seconds
        }
    }
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Estimate the rendered video length in seconds.
pub fn estimate_duration(log_text: &str, params: DurationParams) -> Result<f64, EstimateError> {
    params.validate()?;
    let events = parse_log(log_text)?;
    let dates = events.iter().map(|e| e.date());
    Ok(estimate_from_dates(dates, params))
}

/// Core of [`estimate_duration`] over a sequence of (sorted) commit dates.
fn estimate_from_dates<I>(dates: I, params: DurationParams) -> f64
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut duration = 0.0;
    let mut previous: Option<NaiveDate> = None;

    for date in dates {
        match previous {
            None => duration += params.seconds_per_day,
            Some(prev) if prev != date => {
                let gap_days = (date - prev).num_days().abs();
                duration += params.gap_cost(gap_days);
            }
            Some(_) => continue,
        }
        previous = Some(date);
    }

    duration + TRAILING_BUFFER_SECS
}

/// Format seconds as `H:MM:SS`. Fractions are truncated, negatives clamp to zero.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{hours}:{minutes:02}:{secs:02}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
