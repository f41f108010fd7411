//! Dealer profiles stored in PostgreSQL

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::PgPool;

use super::{Dealer, DealerStore, OutfitStage};
use crate::error::ApiResult;

const DEALER_COLUMNS: &str =
    "id, name, avatar_url, professional_image_url, outfit_stages, profile";

#[derive(sqlx::FromRow)]
struct DealerRow {
    id: String,
    name: String,
    avatar_url: Option<String>,
    professional_image_url: Option<String>,
    outfit_stages: Json<Vec<OutfitStage>>,
    profile: Json<Map<String, Value>>,
}

impl From<DealerRow> for Dealer {
    fn from(row: DealerRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            avatar_url: row.avatar_url,
            professional_image_url: row.professional_image_url,
            outfit_stages: row.outfit_stages.0,
            profile: row.profile.0,
        }
    }
}

/// Reads the `dealers` table
#[derive(Clone)]
pub struct PgDealerStore {
    pool: PgPool,
}

impl PgDealerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DealerStore for PgDealerStore {
    async fn list_dealers(&self) -> ApiResult<Vec<Dealer>> {
        let rows = sqlx::query_as::<_, DealerRow>(&format!(
            "SELECT {} FROM dealers ORDER BY id",
            DEALER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Dealer::from).collect())
    }

    async fn get_dealer(&self, id: &str) -> ApiResult<Option<Dealer>> {
        let row = sqlx::query_as::<_, DealerRow>(&format!(
            "SELECT {} FROM dealers WHERE id = $1",
            DEALER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Dealer::from))
    }

    async fn ping(&self) -> ApiResult<()> {
        sqlx::query("SELECT 1 FROM dealers LIMIT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "../billing/migrations")]
    #[ignore = "requires a PostgreSQL server at DATABASE_URL"]
    async fn test_reads_dealer_rows(pool: PgPool) {
        sqlx::query(
            r#"
            INSERT INTO dealers (id, name, avatar_url, outfit_stages, profile)
            VALUES ('emma', 'Emma', 'https://cdn.example.com/emma.webp',
                    '[{"stageName": "Elegant"}]', '{"bio": "Croupier"}'),
                   ('ava', 'Ava', NULL, '[]', '{}')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let store = PgDealerStore::new(pool);
        store.ping().await.unwrap();

        let dealers = store.list_dealers().await.unwrap();
        assert_eq!(dealers.len(), 2);
        assert_eq!(dealers[0].id, "ava");

        let emma = store.get_dealer("emma").await.unwrap().unwrap();
        assert_eq!(emma.outfit_stages[0].stage_name.as_deref(), Some("Elegant"));
        assert_eq!(emma.profile["bio"], "Croupier");
        assert!(store.get_dealer("nobody").await.unwrap().is_none());
    }
}
