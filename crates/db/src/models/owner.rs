//! Options and captions exist once per project and once per build
//! snapshot, in parallel tables with the same shape.

use commitreel_core::types::DbId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Project(DbId),
    Build(DbId),
}

impl Owner {
    pub fn id(self) -> DbId {
        match self {
            Self::Project(id) | Self::Build(id) => id,
        }
    }

    /// Foreign-key column on the option/caption tables.
    pub fn column(self) -> &'static str {
        match self {
            Self::Project(_) => "project_id",
            Self::Build(_) => "build_id",
        }
    }

    pub fn options_table(self) -> &'static str {
        match self {
            Self::Project(_) => "project_options",
            Self::Build(_) => "build_options",
        }
    }

    pub fn captions_table(self) -> &'static str {
        match self {
            Self::Project(_) => "project_captions",
            Self::Build(_) => "build_captions",
        }
    }
}
