//! Render option rows (`project_options`, `build_options`).

use commitreel_core::render_options::StoredOption;
use commitreel_core::types::DbId;
use serde::Serialize;
use sqlx::FromRow;

/// A row from either option table. `owner_id` is the project or build id.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OptionRow {
    pub id: DbId,
    pub owner_id: DbId,
    pub name: String,
    pub value: String,
    pub value_type: String,
}

impl From<OptionRow> for StoredOption {
    fn from(row: OptionRow) -> Self {
        StoredOption {
            name: row.name,
            value: row.value,
            value_type: row.value_type,
        }
    }
}
