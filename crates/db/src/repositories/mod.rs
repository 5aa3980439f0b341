//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods
//! that accept `&PgPool` as the first argument.

pub mod avatar_repo;
pub mod build_repo;
pub mod caption_repo;
pub mod option_repo;
pub mod project_repo;

pub use avatar_repo::AvatarRepo;
pub use build_repo::BuildRepo;
pub use caption_repo::CaptionRepo;
pub use option_repo::OptionRepo;
pub use project_repo::ProjectRepo;
