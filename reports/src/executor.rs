use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueryError;
use crate::models::CollectionCounts;
use crate::queries::{QueryResult, QuerySpec};

/// A store that can run the registered reports.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn execute(
        &self,
        spec: &QuerySpec,
        now: DateTime<Utc>,
    ) -> Result<QueryResult, QueryError>;

    async fn counts(&self) -> Result<CollectionCounts, QueryError>;
}

/// Validate and run one report with `now` as the time anchor.
///
/// With a `deadline`, the run is abandoned once it expires and
/// [`QueryError::Timeout`] is returned. Failures are passed through as-is.
pub async fn run_query(
    executor: &dyn QueryExecutor,
    spec: &QuerySpec,
    now: DateTime<Utc>,
    deadline: Option<Duration>,
) -> Result<QueryResult, QueryError> {
    spec.validate()?;

    tracing::info!(
        "running {} on {} backend (now = {})",
        spec.name(),
        executor.backend(),
        now.to_rfc3339()
    );
    let started = Instant::now();

    let result = match deadline {
        Some(limit) => tokio::time::timeout(limit, executor.execute(spec, now))
            .await
            .map_err(|_| QueryError::Timeout(limit))
            .and_then(|r| r),
        None => executor.execute(spec, now).await,
    };

    match &result {
        Ok(rows) => tracing::info!(
            "{} returned {} rows in {:?}",
            spec.name(),
            rows.len(),
            started.elapsed()
        ),
        Err(e) => tracing::error!("{} failed: {}", spec.name(), e),
    }

    result
}
