//! Repository for `avatars` and `avatar_aliases`.

use sqlx::PgPool;
use commitreel_core::types::DbId;

use crate::models::avatar::{Avatar, CreateAvatar};

/// Column list with aliases folded into a text array.
const COLUMNS: &str = "\
    a.id, a.project_id, a.name, a.image, \
    ARRAY(SELECT al.name FROM avatar_aliases al WHERE al.avatar_id = a.id ORDER BY al.name) \
        AS aliases, \
    a.created_at, a.updated_at";

pub struct AvatarRepo;

impl AvatarRepo {
    pub async fn create(pool: &PgPool, input: &CreateAvatar) -> Result<Avatar, sqlx::Error> {
        let row: (DbId,) = sqlx::query_as(
            "INSERT INTO avatars (project_id, name, image) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(input.project_id)
        .bind(&input.name)
        .bind(&input.image)
        .fetch_one(pool)
        .await?;
        Self::find_by_id(pool, row.0)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Avatar>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM avatars a WHERE a.id = $1");
        sqlx::query_as::<_, Avatar>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn add_alias(pool: &PgPool, avatar_id: DbId, alias: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO avatar_aliases (avatar_id, name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(avatar_id)
        .bind(alias)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_global(pool: &PgPool) -> Result<Vec<Avatar>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM avatars a WHERE a.project_id IS NULL ORDER BY a.name"
        );
        sqlx::query_as::<_, Avatar>(&query).fetch_all(pool).await
    }

    pub async fn list_for_project(pool: &PgPool, project_id: DbId) -> Result<Vec<Avatar>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM avatars a WHERE a.project_id = $1 ORDER BY a.name"
        );
        sqlx::query_as::<_, Avatar>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }
}
