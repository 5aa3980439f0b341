//! Caption rows (`project_captions`, `build_captions`).

use commitreel_core::captions::Caption;
use commitreel_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CaptionRow {
    pub id: DbId,
    pub owner_id: DbId,
    pub timestamp: Timestamp,
    pub text: String,
}

impl From<CaptionRow> for Caption {
    fn from(row: CaptionRow) -> Self {
        Caption::new(row.timestamp, row.text)
    }
}
