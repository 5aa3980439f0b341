//! Repository for `project_options` and `build_options`.

use sqlx::PgPool;
use commitreel_core::render_options::StoredOption;

use crate::models::option::OptionRow;
use crate::models::owner::Owner;

pub struct OptionRepo;

impl OptionRepo {
    pub async fn list(pool: &PgPool, owner: Owner) -> Result<Vec<OptionRow>, sqlx::Error> {
        let query = format!(
            "SELECT id, {col} AS owner_id, name, value, value_type FROM {table} \
             WHERE {col} = $1 ORDER BY name",
            col = owner.column(),
            table = owner.options_table(),
        );
        sqlx::query_as::<_, OptionRow>(&query)
            .bind(owner.id())
            .fetch_all(pool)
            .await
    }

    /// Replace every option of `owner` with `options` in one transaction.
    pub async fn replace(
        pool: &PgPool,
        owner: Owner,
        options: &[StoredOption],
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let delete = format!(
            "DELETE FROM {table} WHERE {col} = $1",
            col = owner.column(),
            table = owner.options_table(),
        );
        sqlx::query(&delete).bind(owner.id()).execute(&mut *tx).await?;

        let insert = format!(
            "INSERT INTO {table} ({col}, name, value, value_type) VALUES ($1, $2, $3, $4)",
            col = owner.column(),
            table = owner.options_table(),
        );
        for option in options {
            sqlx::query(&insert)
                .bind(owner.id())
                .bind(&option.name)
                .bind(&option.value)
                .bind(&option.value_type)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await
    }
}
