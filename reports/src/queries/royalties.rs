use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;

use super::{validate_window, window_start};
use crate::error::QueryError;
use crate::memory::Dataset;

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Seconds played per artist over the trailing window, the basis for
/// royalty payouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoyaltiesQuery {
    pub window_days: u32,
}

impl Default for RoyaltiesQuery {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ArtistRoyalty {
    pub artist_name: String,
    #[serde(rename = "totalSeconds")]
    pub total_seconds: f64,
}

pub(crate) const SQL: &str = r#"
SELECT s.artist_name,
       SUM(st.seconds_played)::DOUBLE PRECISION AS total_seconds
FROM streams st
JOIN songs s ON s.id = st.song_id
WHERE st.date >= $1
GROUP BY s.artist_name
ORDER BY total_seconds DESC, s.artist_name ASC
"#;

impl RoyaltiesQuery {
    pub fn validate(&self) -> Result<(), QueryError> {
        validate_window(self.window_days)
    }

    pub fn evaluate(
        &self,
        data: &Dataset,
        now: DateTime<Utc>,
    ) -> Result<Vec<ArtistRoyalty>, QueryError> {
        let streams = data.streams()?;
        let songs = data.song_index()?;
        let since = window_start(now, self.window_days);

        let mut totals: HashMap<&str, f64> = HashMap::new();
        for stream in streams.iter().filter(|s| s.date >= since) {
            // plays of songs missing from the catalog earn nothing
            let Some(song) = songs.get(stream.song_id.as_str()) else {
                continue;
            };
            *totals.entry(song.artist_name.as_str()).or_default() += stream.seconds_played;
        }

        let mut rows: Vec<ArtistRoyalty> = totals
            .into_iter()
            .map(|(artist, total)| ArtistRoyalty {
                artist_name: artist.to_string(),
                total_seconds: total,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_seconds
                .total_cmp(&a.total_seconds)
                .then_with(|| a.artist_name.cmp(&b.artist_name))
        });

        tracing::debug!("royalties: {} artists since {}", rows.len(), since);
        Ok(rows)
    }

    pub async fn fetch(
        &self,
        pool: &PgPool,
        now: DateTime<Utc>,
    ) -> Result<Vec<ArtistRoyalty>, QueryError> {
        let rows = sqlx::query_as::<_, ArtistRoyalty>(SQL)
            .bind(window_start(now, self.window_days))
            .fetch_all(pool)
            .await?;

        Ok(rows)
    }
}
