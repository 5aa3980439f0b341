//! In-memory [`BuildStore`] with the same transition semantics as the
//! Postgres store. Used by tests and local dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use commitreel_core::build_status::{BuildStage, BuildStatus, Transition};
use commitreel_core::captions::{self, Caption};
use commitreel_core::render_options::StoredOption;
use commitreel_core::types::DbId;
use commitreel_db::models::avatar::{Avatar, CreateAvatar};
use commitreel_db::models::build::{Build, BuildArtifacts, CreateBuild};
use commitreel_db::models::owner::Owner;
use commitreel_db::models::project::{CreateProject, Project, ProjectLogUpdate, ProjectMedia};
use commitreel_db::models::status::ACTIVE_STATUSES;

use crate::store::{BuildStore, StoreError};

#[derive(Default)]
struct State {
    next_id: DbId,
    projects: BTreeMap<DbId, Project>,
    builds: BTreeMap<DbId, Build>,
    options: HashMap<Owner, Vec<StoredOption>>,
    captions: HashMap<Owner, Vec<Caption>>,
    avatars: Vec<Avatar>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn project_mut(&mut self, id: DbId) -> Result<&mut Project, StoreError> {
        self.projects
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "project", id })
    }

    fn build_mut(&mut self, id: DbId) -> Result<&mut Build, StoreError> {
        self.builds
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "build", id })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_project(&self, input: &CreateProject) -> Project {
        let mut state = self.lock();
        let now = Utc::now();
        let project = Project {
            id: state.next_id(),
            name: input.name.clone(),
            project_url: input.project_url.clone(),
            project_branch: input.project_branch.clone().unwrap_or_else(|| "master".into()),
            project_log: None,
            project_log_updated_at: None,
            project_log_commit_hash: None,
            project_log_commit_time: None,
            project_log_commit_preview: None,
            video_size: input.video_size.clone().unwrap_or_else(|| "1280x720".into()),
            build_title: input.build_title.clone(),
            build_logo: None,
            build_logo_resize: true,
            build_background: None,
            build_background_resize: true,
            build_audio: None,
            build_audio_name: None,
            is_project_changed: false,
            created_at: now,
            updated_at: now,
        };
        state.projects.insert(project.id, project.clone());
        project
    }

    pub fn set_project_media(&self, id: DbId, media: &ProjectMedia) -> Result<Project, StoreError> {
        let mut state = self.lock();
        let project = state.project_mut(id)?;
        project.build_logo = media.build_logo.clone();
        project.build_logo_resize = media.build_logo_resize;
        project.build_background = media.build_background.clone();
        project.build_background_resize = media.build_background_resize;
        project.build_audio = media.build_audio.clone();
        project.build_audio_name = media.build_audio_name.clone();
        project.is_project_changed = true;
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    pub fn create_avatar(&self, input: &CreateAvatar, aliases: &[&str]) -> Avatar {
        let mut state = self.lock();
        let now = Utc::now();
        let mut aliases: Vec<String> = aliases.iter().map(|a| a.to_string()).collect();
        aliases.sort();
        let avatar = Avatar {
            id: state.next_id(),
            project_id: input.project_id,
            name: input.name.clone(),
            image: input.image.clone(),
            aliases,
            created_at: now,
            updated_at: now,
        };
        state.avatars.push(avatar.clone());
        avatar
    }
}

fn apply_job(build: &mut Build, job: commitreel_core::build_status::BuildJob) {
    build.status_id = job.status.id();
    build.queued_at = job.timestamps.queued_at;
    build.running_at = job.timestamps.running_at;
    build.aborted_at = job.timestamps.aborted_at;
    build.completed_at = job.timestamps.completed_at;
    build.errored_at = job.timestamps.errored_at;
    build.current_build_stage = job.stage;
    build.current_build_message = job.stage_message;
    build.error_description = job.error_description;
    build.updated_at = Utc::now();
}

fn keep<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if let Some(value) = value {
        *slot = Some(value.clone());
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn project(&self, id: DbId) -> Result<Project, StoreError> {
        Ok(self.lock().project_mut(id)?.clone())
    }

    async fn update_project_log(
        &self,
        id: DbId,
        update: &ProjectLogUpdate,
    ) -> Result<Project, StoreError> {
        let mut state = self.lock();
        let project = state.project_mut(id)?;
        let now = Utc::now();
        project.project_log = Some(update.project_log.clone());
        project.project_log_updated_at = Some(now);
        project.project_log_commit_hash = update.commit_hash.clone();
        project.project_log_commit_time = update.commit_time;
        project.project_log_commit_preview = update.commit_preview.clone();
        project.is_project_changed = true;
        project.updated_at = now;
        Ok(project.clone())
    }

    async fn set_project_changed(&self, id: DbId, changed: bool) -> Result<(), StoreError> {
        self.lock().project_mut(id)?.is_project_changed = changed;
        Ok(())
    }

    async fn project_avatars(&self, project_id: DbId) -> Result<Vec<Avatar>, StoreError> {
        Ok(self
            .lock()
            .avatars
            .iter()
            .filter(|a| a.project_id == Some(project_id))
            .cloned()
            .collect())
    }

    async fn global_avatars(&self) -> Result<Vec<Avatar>, StoreError> {
        Ok(self
            .lock()
            .avatars
            .iter()
            .filter(|a| a.project_id.is_none())
            .cloned()
            .collect())
    }

    async fn options(&self, owner: Owner) -> Result<Vec<StoredOption>, StoreError> {
        let mut options = self.lock().options.get(&owner).cloned().unwrap_or_default();
        options.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(options)
    }

    async fn replace_options(
        &self,
        owner: Owner,
        options: &[StoredOption],
    ) -> Result<(), StoreError> {
        self.lock().options.insert(owner, options.to_vec());
        Ok(())
    }

    async fn captions(&self, owner: Owner) -> Result<Vec<Caption>, StoreError> {
        let captions = self.lock().captions.get(&owner).cloned().unwrap_or_default();
        Ok(captions::normalize(captions))
    }

    async fn replace_captions(&self, owner: Owner, captions: &[Caption]) -> Result<(), StoreError> {
        self.lock()
            .captions
            .insert(owner, captions::normalize(captions.iter().cloned()));
        Ok(())
    }

    async fn add_caption(&self, owner: Owner, caption: &Caption) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let entry = state.captions.entry(owner).or_default();
        if entry.contains(caption) {
            return Ok(false);
        }
        entry.push(caption.clone());
        Ok(true)
    }

    async fn build(&self, id: DbId) -> Result<Build, StoreError> {
        Ok(self.lock().build_mut(id)?.clone())
    }

    async fn build_status(&self, id: DbId) -> Result<BuildStatus, StoreError> {
        Ok(self.lock().build_mut(id)?.status())
    }

    async fn create_build(&self, input: &CreateBuild) -> Result<Build, StoreError> {
        let mut state = self.lock();
        if !state.projects.contains_key(&input.project_id) {
            return Err(StoreError::NotFound {
                entity: "project",
                id: input.project_id,
            });
        }
        let status = input.status.unwrap_or(BuildStatus::Pending);
        let now = Utc::now();
        let build = Build {
            id: state.next_id(),
            project_id: input.project_id,
            status_id: status.id(),
            project_branch: input.project_branch.clone(),
            project_log: input.project_log.clone(),
            project_log_commit_hash: input.project_log_commit_hash.clone(),
            project_log_commit_time: input.project_log_commit_time,
            project_log_commit_preview: input.project_log_commit_preview.clone(),
            project_captions: input.project_captions.clone(),
            build_logo: input.build_logo.clone(),
            build_background: input.build_background.clone(),
            build_audio: input.build_audio.clone(),
            build_audio_name: input.build_audio_name.clone(),
            video_size: input.video_size.clone(),
            content: input.content.clone(),
            screenshot: None,
            thumbnail: None,
            duration: input.duration,
            size: input.size,
            stdout: None,
            stderr: None,
            is_full_build: input.is_full_build,
            current_build_stage: None,
            current_build_message: None,
            error_description: None,
            queued_at: (status == BuildStatus::Queued).then_some(now),
            running_at: None,
            aborted_at: None,
            completed_at: None,
            errored_at: None,
            created_at: now,
            updated_at: now,
        };
        state.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn delete_build(&self, id: DbId) -> Result<(), StoreError> {
        let mut state = self.lock();
        state
            .builds
            .remove(&id)
            .ok_or(StoreError::NotFound { entity: "build", id })?;
        state.options.remove(&Owner::Build(id));
        state.captions.remove(&Owner::Build(id));
        Ok(())
    }

    async fn has_active_build(&self, project_id: DbId) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .builds
            .values()
            .any(|b| b.project_id == project_id && ACTIVE_STATUSES.contains(&b.status())))
    }

    async fn queued_builds(&self, limit: i64) -> Result<Vec<Build>, StoreError> {
        let state = self.lock();
        let mut queued: Vec<Build> = state
            .builds
            .values()
            .filter(|b| b.status() == BuildStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by_key(|b| (b.queued_at.is_none(), b.queued_at, b.id));
        queued.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(queued)
    }

    async fn previous_successful(&self, build: &Build) -> Result<Option<Build>, StoreError> {
        Ok(self
            .lock()
            .builds
            .values()
            .rev()
            .find(|b| b.project_id == build.project_id && b.id < build.id && b.content.is_some())
            .cloned())
    }

    async fn transition(&self, id: DbId, transition: Transition) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let build = state.build_mut(id)?;
        let mut job = build.job();
        if job.apply(transition, Utc::now()).is_err() {
            return Ok(false);
        }
        apply_job(build, job);
        Ok(true)
    }

    async fn mark_errored(&self, id: DbId, description: Option<&str>) -> Result<(), StoreError> {
        let mut state = self.lock();
        let build = state.build_mut(id)?;
        let mut job = build.job();
        job.mark_errored(Utc::now(), description);
        apply_job(build, job);
        Ok(())
    }

    async fn set_stage(
        &self,
        id: DbId,
        stage: BuildStage,
        message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let build = state.build_mut(id)?;
        let mut job = build.job();
        job.set_stage(stage, message);
        apply_job(build, job);
        Ok(())
    }

    async fn save_artifacts(&self, id: DbId, artifacts: &BuildArtifacts) -> Result<(), StoreError> {
        let mut state = self.lock();
        let build = state.build_mut(id)?;
        keep(&mut build.project_log, &artifacts.project_log);
        keep(&mut build.project_captions, &artifacts.project_captions);
        keep(&mut build.build_logo, &artifacts.build_logo);
        keep(&mut build.build_background, &artifacts.build_background);
        keep(&mut build.build_audio, &artifacts.build_audio);
        keep(&mut build.content, &artifacts.content);
        keep(&mut build.screenshot, &artifacts.screenshot);
        keep(&mut build.thumbnail, &artifacts.thumbnail);
        keep(&mut build.duration, &artifacts.duration);
        keep(&mut build.size, &artifacts.size);
        keep(&mut build.stdout, &artifacts.stdout);
        keep(&mut build.stderr, &artifacts.stderr);
        build.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup(status: Option<BuildStatus>) -> (MemoryStore, Build) {
        let store = MemoryStore::new();
        let project = store.create_project(&CreateProject {
            name: "demo".into(),
            project_url: None,
            project_branch: None,
            video_size: None,
            build_title: None,
        });
        let build = store
            .create_build(&CreateBuild {
                project_id: project.id,
                status,
                project_branch: project.project_branch.clone(),
                video_size: project.video_size.clone(),
                is_full_build: true,
                ..Default::default()
            })
            .await
            .unwrap();
        (store, build)
    }

    #[tokio::test]
    async fn transitions_are_guarded() {
        let (store, build) = setup(None).await;

        assert!(!store.transition(build.id, Transition::Run).await.unwrap());
        assert!(store.transition(build.id, Transition::Queue).await.unwrap());
        assert!(store.transition(build.id, Transition::Run).await.unwrap());
        let build = store.build(build.id).await.unwrap();
        assert_eq!(build.status(), BuildStatus::Running);
        assert!(build.queued_at.is_some() && build.running_at.is_some());
    }

    #[tokio::test]
    async fn queued_insert_stamps_queued_at() {
        let (_, queued) = setup(Some(BuildStatus::Queued)).await;
        assert!(queued.queued_at.is_some());
        let (_, pending) = setup(Some(BuildStatus::Pending)).await;
        assert!(pending.queued_at.is_none());
    }

    #[tokio::test]
    async fn errored_keeps_first_timestamp() {
        let (store, build) = setup(None).await;

        store.mark_errored(build.id, Some("first")).await.unwrap();
        let first = store.build(build.id).await.unwrap();
        store.mark_errored(build.id, None).await.unwrap();
        let second = store.build(build.id).await.unwrap();
        assert_eq!(first.errored_at, second.errored_at);
        assert_eq!(second.error_description.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn artifacts_only_overwrite_given_fields() {
        let (store, build) = setup(None).await;
        store
            .save_artifacts(
                build.id,
                &BuildArtifacts {
                    content: Some("builds/1/video.mp4".into()),
                    size: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .save_artifacts(
                build.id,
                &BuildArtifacts {
                    thumbnail: Some("builds/1/thumb.jpg".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let build = store.build(build.id).await.unwrap();
        assert_eq!(build.content.as_deref(), Some("builds/1/video.mp4"));
        assert_eq!(build.size, Some(10));
        assert_eq!(build.thumbnail.as_deref(), Some("builds/1/thumb.jpg"));
    }
}
