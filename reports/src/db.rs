use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::StoreConfig;
use crate::error::QueryError;
use crate::executor::QueryExecutor;
use crate::models::CollectionCounts;
use crate::queries::{QueryResult, QuerySpec};

/// Postgres backend. Reads tables `users`, `songs` and `streams`; never
/// writes.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, QueryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;

        tracing::info!("connected to postgres (max {} connections)", config.max_connections);
        Ok(Self { pool })
    }

    /// Close every pooled connection. Waits for checked-out connections to
    /// be returned first.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::debug!("postgres pool closed");
    }
}

#[async_trait]
impl QueryExecutor for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn execute(
        &self,
        spec: &QuerySpec,
        now: DateTime<Utc>,
    ) -> Result<QueryResult, QueryError> {
        let pool = &self.pool;
        let result = match spec {
            QuerySpec::RoyaltiesLastMonth(q) => {
                QueryResult::RoyaltiesLastMonth(q.fetch(pool, now).await?)
            }
            QuerySpec::TopTracksByCountry(q) => {
                QueryResult::TopTracksByCountry(q.fetch(pool, now).await?)
            }
            QuerySpec::PremiumZombies(q) => QueryResult::PremiumZombies(q.fetch(pool, now).await?),
            QuerySpec::GenreDemographics(q) => {
                QueryResult::GenreDemographics(q.fetch(pool, now).await?)
            }
            QuerySpec::HeavyUsers(q) => QueryResult::HeavyUsers(q.fetch(pool, now).await?),
        };
        Ok(result)
    }

    async fn counts(&self) -> Result<CollectionCounts, QueryError> {
        let counts = sqlx::query_as::<_, CollectionCounts>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users) AS users,
                (SELECT COUNT(*) FROM songs) AS songs,
                (SELECT COUNT(*) FROM streams) AS streams
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(counts)
    }
}
