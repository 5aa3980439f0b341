//! Repository for `project_captions` and `build_captions`.

use sqlx::PgPool;
use commitreel_core::captions::Caption;

use crate::models::caption::CaptionRow;
use crate::models::owner::Owner;

pub struct CaptionRepo;

impl CaptionRepo {
    /// Captions of `owner` in timestamp order.
    pub async fn list(pool: &PgPool, owner: Owner) -> Result<Vec<CaptionRow>, sqlx::Error> {
        let query = format!(
            "SELECT id, {col} AS owner_id, timestamp, text FROM {table} \
             WHERE {col} = $1 ORDER BY timestamp, text",
            col = owner.column(),
            table = owner.captions_table(),
        );
        sqlx::query_as::<_, CaptionRow>(&query)
            .bind(owner.id())
            .fetch_all(pool)
            .await
    }

    /// Insert unless an identical (timestamp, text) caption exists.
    /// Returns `true` when a row was added.
    pub async fn add_if_absent(
        pool: &PgPool,
        owner: Owner,
        caption: &Caption,
    ) -> Result<bool, sqlx::Error> {
        let query = format!(
            "INSERT INTO {table} ({col}, timestamp, text) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
            col = owner.column(),
            table = owner.captions_table(),
        );
        let result = sqlx::query(&query)
            .bind(owner.id())
            .bind(caption.timestamp)
            .bind(&caption.text)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace every caption of `owner` in one transaction.
    pub async fn replace(
        pool: &PgPool,
        owner: Owner,
        captions: &[Caption],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let delete = format!(
            "DELETE FROM {table} WHERE {col} = $1",
            col = owner.column(),
            table = owner.captions_table(),
        );
        sqlx::query(&delete).bind(owner.id()).execute(&mut *tx).await?;

        let insert = format!(
            "INSERT INTO {table} ({col}, timestamp, text) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
            col = owner.column(),
            table = owner.captions_table(),
        );
        for caption in captions {
            sqlx::query(&insert)
                .bind(owner.id())
                .bind(caption.timestamp)
                .bind(&caption.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await
    }
}
