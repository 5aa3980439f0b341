//! Integration tests against a live Postgres.
//!
//! Run with `DATABASE_URL` set and `cargo test -p commitreel-db -- --ignored`.

use chrono::{TimeZone, Utc};
use sqlx::PgPool;

use commitreel_core::build_status::{BuildStage, BuildStatus, Transition};
use commitreel_core::captions::Caption;
use commitreel_core::render_options::StoredOption;
use commitreel_db::models::avatar::CreateAvatar;
use commitreel_db::models::build::{BuildArtifacts, CreateBuild};
use commitreel_db::models::owner::Owner;
use commitreel_db::models::project::{CreateProject, Project};
use commitreel_db::repositories::{AvatarRepo, BuildRepo, CaptionRepo, OptionRepo, ProjectRepo};

async fn project(pool: &PgPool) -> Project {
    ProjectRepo::create(
        pool,
        &CreateProject {
            name: "demo".into(),
            project_url: Some("https://github.com/acme/demo".into()),
            project_branch: None,
            video_size: None,
            build_title: None,
        },
    )
    .await
    .unwrap()
}

fn snapshot(project: &Project, status: BuildStatus) -> CreateBuild {
    CreateBuild {
        project_id: project.id,
        status: Some(status),
        project_branch: project.project_branch.clone(),
        video_size: project.video_size.clone(),
        is_full_build: true,
        ..Default::default()
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn project_defaults(pool: PgPool) {
    commitreel_db::health_check(&pool).await.unwrap();
    let project = project(&pool).await;
    assert_eq!(project.project_branch, "master");
    assert_eq!(project.video_size, "1280x720");
    assert!(!project.is_project_changed);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn queued_insert_stamps_queued_at(pool: PgPool) {
    let project = project(&pool).await;
    let queued = BuildRepo::create(&pool, &snapshot(&project, BuildStatus::Queued))
        .await
        .unwrap();
    let pending = BuildRepo::create(&pool, &snapshot(&project, BuildStatus::Pending))
        .await
        .unwrap();

    assert_eq!(queued.status(), BuildStatus::Queued);
    assert!(queued.queued_at.is_some());
    assert_eq!(pending.status(), BuildStatus::Pending);
    assert!(pending.queued_at.is_none());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn guarded_transition_refuses_wrong_source_state(pool: PgPool) {
    let project = project(&pool).await;
    let build = BuildRepo::create(&pool, &snapshot(&project, BuildStatus::Pending))
        .await
        .unwrap();

    assert!(!BuildRepo::transition(&pool, build.id, Transition::Run).await.unwrap());
    let unchanged = BuildRepo::find_by_id(&pool, build.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status(), BuildStatus::Pending);
    assert!(unchanged.running_at.is_none());

    assert!(BuildRepo::transition(&pool, build.id, Transition::Queue).await.unwrap());
    assert!(BuildRepo::transition(&pool, build.id, Transition::Run).await.unwrap());
    assert!(!BuildRepo::transition(&pool, build.id, Transition::Run).await.unwrap());

    let running = BuildRepo::find_by_id(&pool, build.id).await.unwrap().unwrap();
    assert_eq!(running.status(), BuildStatus::Running);
    assert!(running.running_at.is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn mark_errored_is_unconditional_and_keeps_first_timestamp(pool: PgPool) {
    let project = project(&pool).await;
    let build = BuildRepo::create(&pool, &snapshot(&project, BuildStatus::Queued))
        .await
        .unwrap();

    BuildRepo::mark_errored(&pool, build.id, Some("boom")).await.unwrap();
    let first = BuildRepo::find_by_id(&pool, build.id).await.unwrap().unwrap();
    BuildRepo::mark_errored(&pool, build.id, None).await.unwrap();
    let second = BuildRepo::find_by_id(&pool, build.id).await.unwrap().unwrap();

    assert_eq!(second.status(), BuildStatus::Errored);
    assert_eq!(second.errored_at, first.errored_at);
    assert_eq!(second.error_description.as_deref(), Some("boom"));
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stage_artifacts_and_previous_successful(pool: PgPool) {
    let project = project(&pool).await;
    let first = BuildRepo::create(&pool, &snapshot(&project, BuildStatus::Queued))
        .await
        .unwrap();
    BuildRepo::save_artifacts(
        &pool,
        first.id,
        &BuildArtifacts {
            content: Some(format!("builds/{}/video.mp4", first.id)),
            duration: Some(12),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let second = BuildRepo::create(&pool, &snapshot(&project, BuildStatus::Queued))
        .await
        .unwrap();
    BuildRepo::set_stage(&pool, second.id, BuildStage::Gource, Some("Rendering"))
        .await
        .unwrap();

    let previous = BuildRepo::previous_successful(&pool, &second).await.unwrap().unwrap();
    assert_eq!(previous.id, first.id);
    assert_eq!(previous.duration, Some(12));
    assert!(BuildRepo::previous_successful(&pool, &first).await.unwrap().is_none());

    let second = BuildRepo::find_by_id(&pool, second.id).await.unwrap().unwrap();
    assert_eq!(second.current_build_stage.as_deref(), Some("gource"));
    assert!(BuildRepo::has_active_build(&pool, project.id).await.unwrap());
    assert_eq!(BuildRepo::list_queued(&pool, 10).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn options_and_captions_replace_atomically(pool: PgPool) {
    let project = project(&pool).await;
    let owner = Owner::Project(project.id);
    let options = vec![StoredOption {
        name: "seconds-per-day".into(),
        value: "2".into(),
        value_type: "float".into(),
    }];
    OptionRepo::replace(&pool, owner, &options).await.unwrap();
    OptionRepo::replace(&pool, owner, &options).await.unwrap();
    assert_eq!(OptionRepo::list(&pool, owner).await.unwrap().len(), 1);

    let caption = Caption::new(Utc.timestamp_opt(1_300_000_000, 0).unwrap(), "v1.0");
    assert!(CaptionRepo::add_if_absent(&pool, owner, &caption).await.unwrap());
    assert!(!CaptionRepo::add_if_absent(&pool, owner, &caption).await.unwrap());
    assert_eq!(CaptionRepo::list(&pool, owner).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
#[ignore = "requires DATABASE_URL"]
async fn avatars_carry_aliases(pool: PgPool) {
    let project = project(&pool).await;
    let avatar = AvatarRepo::create(
        &pool,
        &CreateAvatar {
            project_id: Some(project.id),
            name: "alice".into(),
            image: Some("avatars/alice.png".into()),
        },
    )
    .await
    .unwrap();
    AvatarRepo::add_alias(&pool, avatar.id, "Alice Smith").await.unwrap();

    let listed = AvatarRepo::list_for_project(&pool, project.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].aliases, vec!["Alice Smith".to_string()]);
    assert!(AvatarRepo::list_global(&pool).await.unwrap().is_empty());
}
