//! Timed caption overlays.
//!
//! Captions are rendered by gource from a file of `UNIX_TIMESTAMP|TEXT`
//! lines in ascending timestamp order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gource_log::FIELD_SEPARATOR;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Caption {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl Caption {
    pub fn new(timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }

    /// Single line of a caption file. Embedded newlines are flattened to
    /// spaces so one caption can never span two lines.
    pub fn to_line(&self) -> String {
        let text = self.text.replace(['\r', '\n'], " ");
        format!("{}{}{}", self.timestamp.timestamp(), FIELD_SEPARATOR, text.trim())
    }
}

/// Sort by timestamp (then text) and drop exact duplicates.
pub fn normalize(captions: impl IntoIterator<Item = Caption>) -> Vec<Caption> {
    let mut captions: Vec<Caption> = captions.into_iter().collect();
    captions.sort();
    captions.dedup();
    captions
}

/// Render a caption file body. Returns `None` when there is nothing to show.
pub fn caption_file(captions: &[Caption]) -> Option<String> {
    if captions.is_empty() {
        return None;
    }
    let mut sorted: Vec<&Caption> = captions.iter().collect();
    sorted.sort();
    let mut body = sorted
        .into_iter()
        .map(Caption::to_line)
        .collect::<Vec<_>>()
        .join("\n");
    body.push('\n');
    Some(body)
}
