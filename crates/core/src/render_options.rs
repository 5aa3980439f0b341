//! Renderer option allow-list and supported video sizes.
//!
//! Option names become command-line flags for the renderer, so only the
//! variants of [`OptionKind`] are ever accepted. Every kind carries its own
//! parser; a batch of user-supplied options is validated all-or-nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use serde::Serialize;

use crate::error::CoreError;

/// Format used when passing datetimes to the renderer.
const RENDER_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";

/// Errors from option validation. All variants are user input errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptionError {
    #[error("unsupported render option: {name}")]
    Unsupported { name: String },

    #[error("invalid value for render option {name}: {value:?} ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Video sizes
// ---------------------------------------------------------------------------

/// Supported 16:9 output resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum VideoSize {
    #[default]
    Hd720,
    Hd1080,
    Uhd2160,
}

impl VideoSize {
    pub const ALL: [VideoSize; 3] = [Self::Hd720, Self::Hd1080, Self::Uhd2160];

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Hd720 => (1280, 720),
            Self::Hd1080 => (1920, 1080),
            Self::Uhd2160 => (3840, 2160),
        }
    }

    pub fn width(self) -> u32 {
        self.dimensions().0
    }

    pub fn height(self) -> u32 {
        self.dimensions().1
    }
}

impl fmt::Display for VideoSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{w}x{h}")
    }
}

impl FromStr for VideoSize {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|size| size.to_string() == s.trim())
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unsupported video size '{s}'. Must be one of: 1280x720, 1920x1080, 3840x2160"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Option kinds
// ---------------------------------------------------------------------------

/// Stored value type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Float,
    Str,
    Bool,
    Datetime,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bool => "bool",
            Self::Datetime => "datetime",
        }
    }
}

/// The closed allow-list of renderer options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum OptionKind {
    SecondsPerDay,
    AutoSkipSeconds,
    StartDate,
    StopDate,
}

impl OptionKind {
    pub const ALL: [OptionKind; 4] = [
        Self::SecondsPerDay,
        Self::AutoSkipSeconds,
        Self::StartDate,
        Self::StopDate,
    ];

    /// Flag name without the leading `--`.
    pub fn name(self) -> &'static str {
        match self {
            Self::SecondsPerDay => "seconds-per-day",
            Self::AutoSkipSeconds => "auto-skip-seconds",
            Self::StartDate => "start-date",
            Self::StopDate => "stop-date",
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            Self::SecondsPerDay | Self::AutoSkipSeconds => ValueType::Float,
            Self::StartDate | Self::StopDate => ValueType::Datetime,
        }
    }

    /// Look up an allow-listed option by flag name.
    pub fn from_name(name: &str) -> Result<Self, OptionError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| OptionError::Unsupported {
                name: name.to_string(),
            })
    }

    /// Parse and validate a raw value for this kind.
    pub fn parse(self, raw: &str) -> Result<RenderOption, OptionError> {
        let invalid = |reason: &str| OptionError::InvalidValue {
            name: self.name().to_string(),
            value: raw.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::SecondsPerDay => parse_positive_float(raw)
                .map(RenderOption::SecondsPerDay)
                .map_err(|r| invalid(r)),
            Self::AutoSkipSeconds => parse_positive_float(raw)
                .map(RenderOption::AutoSkipSeconds)
                .map_err(|r| invalid(r)),
            Self::StartDate => parse_datetime(raw)
                .map(RenderOption::StartDate)
                .ok_or_else(|| invalid("expected an ISO-8601 date or datetime")),
            Self::StopDate => parse_datetime(raw)
                .map(RenderOption::StopDate)
                .ok_or_else(|| invalid("expected an ISO-8601 date or datetime")),
        }
    }
}

fn parse_positive_float(raw: &str) -> Result<f64, &'static str> {
    let value: f64 = raw.trim().parse().map_err(|_| "expected a number")?;
    if !value.is_finite() || value <= 0.0 {
        return Err("must be a positive number");
    }
    Ok(value)
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[ +HH:MM]`, `YYYY-MM-DDTHH:MM:SS`
/// and bare dates. Naive values are taken as UTC.
pub fn parse_datetime(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %:z") {
        return Some(dt);
    }
    let utc = FixedOffset::east_opt(0)?;
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return utc.from_local_datetime(&naive).single();
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| utc.from_local_datetime(&naive).single())
}

// ---------------------------------------------------------------------------
// Typed options
// ---------------------------------------------------------------------------

/// A validated renderer option with its typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOption {
    SecondsPerDay(f64),
    AutoSkipSeconds(f64),
    StartDate(DateTime<FixedOffset>),
    StopDate(DateTime<FixedOffset>),
}

impl RenderOption {
    pub fn kind(&self) -> OptionKind {
        match self {
            Self::SecondsPerDay(_) => OptionKind::SecondsPerDay,
            Self::AutoSkipSeconds(_) => OptionKind::AutoSkipSeconds,
            Self::StartDate(_) => OptionKind::StartDate,
            Self::StopDate(_) => OptionKind::StopDate,
        }
    }

    /// Value as passed on the renderer command line.
    pub fn value_string(&self) -> String {
        match self {
            Self::SecondsPerDay(v) | Self::AutoSkipSeconds(v) => v.to_string(),
            Self::StartDate(dt) | Self::StopDate(dt) => dt.format(RENDER_DATETIME_FORMAT).to_string(),
        }
    }

    /// `["--name", "value"]`.
    pub fn to_args(&self) -> [String; 2] {
        [format!("--{}", self.kind().name()), self.value_string()]
    }
}

/// A stored option row: name, raw value, value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredOption {
    pub name: String,
    pub value: String,
    pub value_type: String,
}

/// A set of validated options, at most one per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOptionSet {
    options: BTreeMap<OptionKind, RenderOption>,
}

impl RenderOptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a batch of `(name, value)` pairs.
    ///
    /// The first unknown name or unparsable value rejects the entire batch;
    /// nothing is returned for partial application.
    pub fn parse_batch<'a, I>(entries: I) -> Result<Self, OptionError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = Self::new();
        for (name, value) in entries {
            let kind = OptionKind::from_name(name)?;
            set.insert(kind.parse(value)?);
        }
        Ok(set)
    }

    /// Rebuild a set from stored rows. Rows that no longer validate are
    /// skipped with a warning rather than reaching the renderer.
    pub fn from_stored(rows: &[StoredOption]) -> Self {
        let mut set = Self::new();
        for row in rows {
            match OptionKind::from_name(&row.name).and_then(|k| k.parse(&row.value)) {
                Ok(option) => set.insert(option),
                Err(e) => tracing::warn!(name = %row.name, error = %e, "Skipping stored render option"),
            }
        }
        set
    }

    pub fn insert(&mut self, option: RenderOption) {
        self.options.insert(option.kind(), option);
    }

    pub fn get(&self, kind: OptionKind) -> Option<&RenderOption> {
        self.options.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderOption> {
        self.options.values()
    }

    pub fn seconds_per_day(&self) -> Option<f64> {
        match self.get(OptionKind::SecondsPerDay) {
            Some(RenderOption::SecondsPerDay(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn auto_skip_seconds(&self) -> Option<f64> {
        match self.get(OptionKind::AutoSkipSeconds) {
            Some(RenderOption::AutoSkipSeconds(v)) => Some(*v),
            _ => None,
        }
    }

    /// Flattened renderer arguments, in allow-list order.
    pub fn to_args(&self) -> Vec<String> {
        self.options.values().flat_map(RenderOption::to_args).collect()
    }

    /// Rows suitable for persisting this set.
    pub fn to_stored(&self) -> Vec<StoredOption> {
        self.options
            .values()
            .map(|option| StoredOption {
                name: option.kind().name().to_string(),
                value: option.value_string(),
                value_type: option.kind().value_type().as_str().to_string(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn video_size_round_trip_names() {
        assert_eq!("1280x720".parse::<VideoSize>().unwrap(), VideoSize::Hd720);
        assert_eq!("1920x1080".parse::<VideoSize>().unwrap(), VideoSize::Hd1080);
        assert_eq!(VideoSize::Uhd2160.to_string(), "3840x2160");
    }

    #[test]
    fn unsupported_video_size_rejected() {
        assert!("1024x768".parse::<VideoSize>().is_err());
        assert!("".parse::<VideoSize>().is_err());
    }

    #[test]
    fn unknown_option_name_rejected() {
        assert_matches!(
            OptionKind::from_name("output-custom-log"),
            Err(OptionError::Unsupported { .. })
        );
    }

    #[test]
    fn batch_with_unknown_name_is_rejected_whole() {
        let result = RenderOptionSet::parse_batch([
            ("seconds-per-day", "0.5"),
            ("load-config", "/etc/passwd"),
        ]);
        assert_matches!(result, Err(OptionError::Unsupported { name }) if name == "load-config");
    }

    #[test]
    fn batch_with_bad_value_is_rejected_whole() {
        let result =
            RenderOptionSet::parse_batch([("auto-skip-seconds", "2"), ("seconds-per-day", "fast")]);
        assert_matches!(result, Err(OptionError::InvalidValue { name, .. }) if name == "seconds-per-day");
    }

    #[test]
    fn non_positive_floats_rejected() {
        assert!(OptionKind::SecondsPerDay.parse("0").is_err());
        assert!(OptionKind::SecondsPerDay.parse("-1.5").is_err());
        assert!(OptionKind::AutoSkipSeconds.parse("NaN").is_err());
    }

    #[test]
    fn valid_batch_produces_args() {
        let set = RenderOptionSet::parse_batch([
            ("auto-skip-seconds", "2.5"),
            ("seconds-per-day", "0.5"),
            ("start-date", "2020-01-02"),
        ])
        .expect("valid batch");
        assert_eq!(set.len(), 3);
        assert_eq!(
            set.to_args(),
            vec![
                "--seconds-per-day",
                "0.5",
                "--auto-skip-seconds",
                "2.5",
                "--start-date",
                "2020-01-02 00:00:00 +00:00",
            ]
        );
        assert_eq!(set.seconds_per_day(), Some(0.5));
        assert_eq!(set.auto_skip_seconds(), Some(2.5));
    }

    #[test]
    fn datetime_formats_accepted() {
        assert!(parse_datetime("2021-03-04T05:06:07Z").is_some());
        assert!(parse_datetime("2021-03-04T05:06:07+02:00").is_some());
        assert!(parse_datetime("2021-03-04 05:06:07").is_some());
        assert!(parse_datetime("2021-03-04").is_some());
        assert!(parse_datetime("March 4th").is_none());
    }

    #[test]
    fn later_duplicate_replaces_earlier() {
        let set = RenderOptionSet::parse_batch([("seconds-per-day", "1"), ("seconds-per-day", "4")])
            .expect("valid");
        assert_eq!(set.len(), 1);
        assert_eq!(set.seconds_per_day(), Some(4.0));
    }

    #[test]
    fn from_stored_skips_invalid_rows() {
        let rows = vec![
            StoredOption {
                name: "seconds-per-day".into(),
                value: "2".into(),
                value_type: "float".into(),
            },
            StoredOption {
                name: "hide".into(),
                value: "everything".into(),
                value_type: "str".into(),
            },
        ];
        let set = RenderOptionSet::from_stored(&rows);
        assert_eq!(set.len(), 1);
        assert_eq!(set.to_stored()[0].value_type, "float");
    }
}
