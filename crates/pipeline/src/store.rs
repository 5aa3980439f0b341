//! Record store seam.
//!
//! [`BuildStore`] is everything the pipeline reads or writes about
//! projects and builds. [`PgBuildStore`] delegates to the repositories in
//! `commitreel-db`; [`MemoryStore`](crate::memory::MemoryStore) backs tests.

use async_trait::async_trait;
use sqlx::PgPool;

use commitreel_core::build_status::{BuildStage, BuildStatus, Transition};
use commitreel_core::captions::Caption;
use commitreel_core::render_options::StoredOption;
use commitreel_core::types::DbId;
use commitreel_db::models::avatar::Avatar;
use commitreel_db::models::build::{Build, BuildArtifacts, CreateBuild};
use commitreel_db::models::owner::Owner;
use commitreel_db::models::project::{Project, ProjectLogUpdate};
use commitreel_db::repositories::{AvatarRepo, BuildRepo, CaptionRepo, OptionRepo, ProjectRepo};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait BuildStore: Send + Sync {
    // -- projects --------------------------------------------------------

    async fn project(&self, id: DbId) -> Result<Project, StoreError>;

    async fn update_project_log(
        &self,
        id: DbId,
        update: &ProjectLogUpdate,
    ) -> Result<Project, StoreError>;

    async fn set_project_changed(&self, id: DbId, changed: bool) -> Result<(), StoreError>;

    async fn project_avatars(&self, project_id: DbId) -> Result<Vec<Avatar>, StoreError>;

    async fn global_avatars(&self) -> Result<Vec<Avatar>, StoreError>;

    // -- options and captions ---------------------------------------------

    async fn options(&self, owner: Owner) -> Result<Vec<StoredOption>, StoreError>;

    /// Replace all options of `owner` atomically.
    async fn replace_options(&self, owner: Owner, options: &[StoredOption])
        -> Result<(), StoreError>;

    async fn captions(&self, owner: Owner) -> Result<Vec<Caption>, StoreError>;

    async fn replace_captions(&self, owner: Owner, captions: &[Caption]) -> Result<(), StoreError>;

    /// Returns `true` when the caption was new.
    async fn add_caption(&self, owner: Owner, caption: &Caption) -> Result<bool, StoreError>;

    // -- builds -----------------------------------------------------------

    async fn build(&self, id: DbId) -> Result<Build, StoreError>;

    async fn build_status(&self, id: DbId) -> Result<BuildStatus, StoreError>;

    async fn create_build(&self, input: &CreateBuild) -> Result<Build, StoreError>;

    async fn delete_build(&self, id: DbId) -> Result<(), StoreError>;

    async fn has_active_build(&self, project_id: DbId) -> Result<bool, StoreError>;

    /// Oldest queued builds first.
    async fn queued_builds(&self, limit: i64) -> Result<Vec<Build>, StoreError>;

    async fn previous_successful(&self, build: &Build) -> Result<Option<Build>, StoreError>;

    /// Guarded transition. `false` means the build was not in a source
    /// state and nothing changed.
    async fn transition(&self, id: DbId, transition: Transition) -> Result<bool, StoreError>;

    async fn mark_errored(&self, id: DbId, description: Option<&str>) -> Result<(), StoreError>;

    async fn set_stage(
        &self,
        id: DbId,
        stage: BuildStage,
        message: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn save_artifacts(&self, id: DbId, artifacts: &BuildArtifacts) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgBuildStore {
    pool: PgPool,
}

impl PgBuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn project(&self, id: DbId) -> Result<Project, StoreError> {
        ProjectRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound { entity: "project", id })
    }

    async fn update_project_log(
        &self,
        id: DbId,
        update: &ProjectLogUpdate,
    ) -> Result<Project, StoreError> {
        ProjectRepo::update_log(&self.pool, id, update)
            .await?
            .ok_or(StoreError::NotFound { entity: "project", id })
    }

    async fn set_project_changed(&self, id: DbId, changed: bool) -> Result<(), StoreError> {
        Ok(ProjectRepo::set_project_changed(&self.pool, id, changed).await?)
    }

    async fn project_avatars(&self, project_id: DbId) -> Result<Vec<Avatar>, StoreError> {
        Ok(AvatarRepo::list_for_project(&self.pool, project_id).await?)
    }

    async fn global_avatars(&self) -> Result<Vec<Avatar>, StoreError> {
        Ok(AvatarRepo::list_global(&self.pool).await?)
    }

    async fn options(&self, owner: Owner) -> Result<Vec<StoredOption>, StoreError> {
        let rows = OptionRepo::list(&self.pool, owner).await?;
        Ok(rows.into_iter().map(StoredOption::from).collect())
    }

    async fn replace_options(
        &self,
        owner: Owner,
        options: &[StoredOption],
    ) -> Result<(), StoreError> {
        Ok(OptionRepo::replace(&self.pool, owner, options).await?)
    }

    async fn captions(&self, owner: Owner) -> Result<Vec<Caption>, StoreError> {
        let rows = CaptionRepo::list(&self.pool, owner).await?;
        Ok(rows.into_iter().map(Caption::from).collect())
    }

    async fn replace_captions(&self, owner: Owner, captions: &[Caption]) -> Result<(), StoreError> {
        Ok(CaptionRepo::replace(&self.pool, owner, captions).await?)
    }

    async fn add_caption(&self, owner: Owner, caption: &Caption) -> Result<bool, StoreError> {
        Ok(CaptionRepo::add_if_absent(&self.pool, owner, caption).await?)
    }

    async fn build(&self, id: DbId) -> Result<Build, StoreError> {
        BuildRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound { entity: "build", id })
    }

    async fn build_status(&self, id: DbId) -> Result<BuildStatus, StoreError> {
        BuildRepo::status_of(&self.pool, id)
            .await?
            .ok_or(StoreError::NotFound { entity: "build", id })
    }

    async fn create_build(&self, input: &CreateBuild) -> Result<Build, StoreError> {
        Ok(BuildRepo::create(&self.pool, input).await?)
    }

    async fn delete_build(&self, id: DbId) -> Result<(), StoreError> {
        if BuildRepo::delete(&self.pool, id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound { entity: "build", id })
        }
    }

    async fn has_active_build(&self, project_id: DbId) -> Result<bool, StoreError> {
        Ok(BuildRepo::has_active_build(&self.pool, project_id).await?)
    }

    async fn queued_builds(&self, limit: i64) -> Result<Vec<Build>, StoreError> {
        Ok(BuildRepo::list_queued(&self.pool, limit).await?)
    }

    async fn previous_successful(&self, build: &Build) -> Result<Option<Build>, StoreError> {
        Ok(BuildRepo::previous_successful(&self.pool, build).await?)
    }

    async fn transition(&self, id: DbId, transition: Transition) -> Result<bool, StoreError> {
        Ok(BuildRepo::transition(&self.pool, id, transition).await?)
    }

    async fn mark_errored(&self, id: DbId, description: Option<&str>) -> Result<(), StoreError> {
        Ok(BuildRepo::mark_errored(&self.pool, id, description).await?)
    }

    async fn set_stage(
        &self,
        id: DbId,
        stage: BuildStage,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(BuildRepo::set_stage(&self.pool, id, stage, message).await?)
    }

    async fn save_artifacts(&self, id: DbId, artifacts: &BuildArtifacts) -> Result<(), StoreError> {
        Ok(BuildRepo::save_artifacts(&self.pool, id, artifacts).await?)
    }
}
