//! Refreshing a project's commit log and tags from its remote.

use chrono::Utc;

use commitreel_core::captions::Caption;
use commitreel_core::error::CoreError;
use commitreel_core::gource_log::{self, LogAnalysis};
use commitreel_core::types::DbId;
use commitreel_core::vcs::{self, Tag};
use commitreel_db::models::owner::Owner;
use commitreel_db::models::project::{Project, ProjectLogUpdate};

use crate::blob::keys;
use crate::error::PipelineError;
use crate::Pipeline;

/// Result of [`Pipeline::refresh_project_log`].
#[derive(Debug, Clone)]
pub struct RefreshedLog {
    pub project: Project,
    pub analysis: LogAnalysis,
    pub tags: Vec<Tag>,
    /// Captions created from tags, when requested.
    pub captions_added: usize,
}

impl Pipeline {
    /// Download the latest history for a project and store it as the
    /// project's log.
    ///
    /// URL and remote failures are input errors
    /// ([`PipelineError::is_input_error`]); no build is involved yet.
    pub async fn refresh_project_log(
        &self,
        project_id: DbId,
        load_captions_from_tags: bool,
    ) -> Result<RefreshedLog, PipelineError> {
        let project = self.store.project(project_id).await?;
        let url = self.remote_url(&project)?;

        let extracted = self
            .vcs()
            .extract_log(&url, &project.project_branch)
            .await?;
        let analysis = gource_log::analyze(&extracted.log_text)?;

        let key = self
            .blobs
            .save(&keys::project_log(project_id), extracted.log_text.as_bytes())
            .await?;
        let (commit_hash, commit_preview) = match &extracted.commit {
            Some(commit) => (Some(commit.hash.clone()), Some(commit.subject.clone())),
            None => (None, None),
        };
        let update = ProjectLogUpdate {
            project_log: key,
            commit_hash,
            // Time of the newest log entry rather than of the commit object.
            commit_time: Some(analysis.end_date),
            commit_preview,
        };
        let project = self.store.update_project_log(project_id, &update).await?;

        let captions_added = if load_captions_from_tags {
            self.add_tag_captions(project_id, &extracted.tags).await
        } else {
            0
        };

        tracing::info!(
            project_id,
            num_changes = analysis.num_changes,
            num_commits = analysis.num_commits,
            tags = extracted.tags.len(),
            captions_added,
            "Project log refreshed",
        );
        Ok(RefreshedLog {
            project,
            analysis,
            tags: extracted.tags,
            captions_added,
        })
    }

    /// Fetch only the tags of a project's remote and add each as a caption.
    /// Returns the number of captions created.
    pub async fn refresh_project_tags(&self, project_id: DbId) -> Result<usize, PipelineError> {
        let project = self.store.project(project_id).await?;
        let url = self.remote_url(&project)?;
        let tags = self
            .vcs()
            .extract_tags(&url, &project.project_branch)
            .await?;
        let added = self.add_tag_captions(project_id, &tags).await;
        tracing::info!(project_id, tags = tags.len(), added, "Project tags loaded");
        Ok(added)
    }

    pub(crate) fn remote_url(&self, project: &Project) -> Result<String, PipelineError> {
        let url = project.project_url.as_deref().ok_or_else(|| {
            CoreError::Validation(format!("project {} has no remote URL", project.id))
        })?;
        vcs::validate_project_url(url, &self.config.project_domains)?;
        Ok(url.to_string())
    }

    /// Individual caption failures are logged and skipped.
    async fn add_tag_captions(&self, project_id: DbId, tags: &[Tag]) -> usize {
        let mut added = 0;
        for tag in tags {
            let caption = Caption::new(tag.timestamp.with_timezone(&Utc), tag.name.clone());
            match self.store.add_caption(Owner::Project(project_id), &caption).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(project_id, tag = %tag.name, error = %e, "Failed to add tag caption");
                }
            }
        }
        added
    }
}
