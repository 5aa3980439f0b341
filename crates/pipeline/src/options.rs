//! Project render option batches.

use commitreel_core::render_options::RenderOptionSet;
use commitreel_core::types::DbId;
use commitreel_db::models::owner::Owner;

use crate::error::PipelineError;
use crate::Pipeline;

impl Pipeline {
    /// Validate and store a batch of `(name, value)` options for a project.
    ///
    /// Any unknown name or unparsable value rejects the whole batch and
    /// leaves the stored options untouched. On success the project's
    /// options are replaced by exactly this batch.
    pub async fn set_project_options<'a, I>(
        &self,
        project_id: DbId,
        entries: I,
    ) -> Result<RenderOptionSet, PipelineError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)> + Send,
    {
        let options = RenderOptionSet::parse_batch(entries)?;
        self.store.project(project_id).await?;

        self.store
            .replace_options(Owner::Project(project_id), &options.to_stored())
            .await?;
        self.store.set_project_changed(project_id, true).await?;

        tracing::info!(project_id, count = options.len(), "Project options updated");
        Ok(options)
    }

    /// Stored options of a project or build as a typed set.
    pub async fn option_set(&self, owner: Owner) -> Result<RenderOptionSet, PipelineError> {
        let rows = self.store.options(owner).await?;
        Ok(RenderOptionSet::from_stored(&rows))
    }
}
