//! Contributor avatars and their aliases.

use std::path::PathBuf;

use commitreel_core::avatars::AvatarRecord;
use commitreel_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from `avatars` with its aliases aggregated into one column.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Avatar {
    pub id: DbId,
    /// `None` for a global avatar.
    pub project_id: Option<DbId>,
    pub name: String,
    /// Blob key of the image.
    pub image: Option<String>,
    pub aliases: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Avatar {
    /// Convert to the resolver's record, turning the image key into a
    /// local path with `path_of`. A key without a path counts as no image.
    pub fn to_record(&self, path_of: impl Fn(&str) -> Option<PathBuf>) -> AvatarRecord {
        AvatarRecord {
            id: self.id,
            name: self.name.clone(),
            image: self.image.as_deref().and_then(path_of),
            aliases: self.aliases.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAvatar {
    pub project_id: Option<DbId>,
    pub name: String,
    pub image: Option<String>,
}
