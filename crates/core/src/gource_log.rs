//! Commit-event log format and analysis.
//!
//! A log is newline-delimited, one file change per line:
//!
//! ```text
//! <unix_timestamp>|<author>|<A|M|D>|<path>[|<extra>...]
//! ```
//!
//! Trailing fields (gource colour hints, for example) are tolerated and
//! ignored. Lines are expected in non-decreasing timestamp order; the VCS
//! extractor produces them that way.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Field separator used by the log format.
pub const FIELD_SEPARATOR: char = '|';

/// Errors produced while reading a commit-event log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("commit log is empty")]
    Empty,

    #[error("malformed commit log line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Kind of change a commit made to a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

impl ChangeType {
    /// Single-letter code used in the log format.
    pub fn code(self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Self::Added),
            "M" => Some(Self::Modified),
            "D" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// One line of a commit-event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitEvent {
    /// Unix epoch seconds.
    pub timestamp: i64,
    pub author: String,
    pub change_type: ChangeType,
    pub path: String,
}

impl CommitEvent {
    /// Parse a single log line. `line_no` is 1-based and only used for errors.
    pub fn parse(line: &str, line_no: usize) -> Result<Self, LogError> {
        let malformed = |reason: &str| LogError::Malformed {
            line: line_no,
            reason: reason.to_string(),
        };

        let mut fields = line.split(FIELD_SEPARATOR);
        let timestamp = fields
            .next()
            .ok_or_else(|| malformed("missing timestamp"))?
            .trim()
            .parse::<i64>()
            .map_err(|_| malformed("timestamp is not an integer"))?;
        let author = fields.next().ok_or_else(|| malformed("missing author"))?;
        let change_type = fields
            .next()
            .ok_or_else(|| malformed("missing change type"))
            .and_then(|c| ChangeType::from_code(c).ok_or_else(|| malformed("unknown change type")))?;
        let path = fields.next().ok_or_else(|| malformed("missing path"))?;

        Ok(Self {
            timestamp,
            author: author.to_string(),
            change_type,
            path: path.to_string(),
        })
    }

    /// UTC datetime of the event. Out-of-range timestamps clamp to the epoch.
    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp, 0).unwrap_or_default()
    }

    /// UTC calendar date of the event.
    pub fn date(&self) -> NaiveDate {
        self.datetime().date_naive()
    }
}

impl fmt::Display for CommitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.timestamp,
            self.author,
            self.change_type.code(),
            self.path
        )
    }
}

/// Parse every non-blank line of `log_text`.
///
/// Returns [`LogError::Empty`] when nothing but whitespace is present.
pub fn parse_log(log_text: &str) -> Result<Vec<CommitEvent>, LogError> {
    let events = log_text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| CommitEvent::parse(line.trim_end_matches('\r'), idx + 1))
        .collect::<Result<Vec<_>, _>>()?;

    if events.is_empty() {
        return Err(LogError::Empty);
    }
    Ok(events)
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Summary statistics for a commit-event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogAnalysis {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Total number of change lines.
    pub num_changes: usize,
    /// Number of runs of consecutive lines sharing one timestamp.
    pub num_commits: usize,
    /// Number of distinct UTC calendar dates.
    pub num_commit_days: usize,
    /// Distinct authors, sorted case-insensitively.
    pub users: Vec<String>,
}

/// Analyze a commit-event log.
///
/// `num_commits` counts timestamp changes between adjacent lines, so two
/// commits sharing the same second are merged when they sit next to each
/// other and counted twice when they do not. Sorted input keeps equal
/// timestamps adjacent.
pub fn analyze(log_text: &str) -> Result<LogAnalysis, LogError> {
    let events = parse_log(log_text)?;
    Ok(analyze_events(&events))
}

/// Analyze already-parsed events. `events` must be non-empty.
pub fn analyze_events(events: &[CommitEvent]) -> LogAnalysis {
    let mut users: HashSet<&str> = HashSet::new();
    let mut days: BTreeSet<NaiveDate> = BTreeSet::new();
    let mut num_commits = 0;
    let mut previous: Option<i64> = None;

    for event in events {
        users.insert(event.author.as_str());
        days.insert(event.date());
        if previous != Some(event.timestamp) {
            num_commits += 1;
            previous = Some(event.timestamp);
        }
    }

    let mut users: Vec<String> = users.into_iter().map(str::to_string).collect();
    users.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));

    LogAnalysis {
        start_date: events.first().map(CommitEvent::datetime).unwrap_or_default(),
        end_date: events.last().map(CommitEvent::datetime).unwrap_or_default(),
        num_changes: events.len(),
        num_commits,
        num_commit_days: days.len(),
        users,
    }
}

/// Per-change-type line counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

/// Count added/modified/deleted lines in a log.
pub fn count_actions(log_text: &str) -> Result<ActionCounts, LogError> {
    let mut counts = ActionCounts::default();
    for event in parse_log(log_text)? {
        match event.change_type {
            ChangeType::Added => counts.added += 1,
            ChangeType::Modified => counts.modified += 1,
            ChangeType::Deleted => counts.deleted += 1,
        }
    }
    Ok(counts)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
