use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;

use super::{validate_limit, validate_text, validate_window, window_start};
use crate::error::QueryError;
use crate::memory::Dataset;

pub const DEFAULT_COUNTRY: &str = "GT";
pub const DEFAULT_WINDOW_DAYS: u32 = 7;
pub const DEFAULT_LIMIT: usize = 10;

/// Most played songs among listeners registered in one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopTracksQuery {
    pub country: String,
    pub window_days: u32,
    pub limit: usize,
}

impl Default for TopTracksQuery {
    fn default() -> Self {
        Self {
            country: DEFAULT_COUNTRY.to_string(),
            window_days: DEFAULT_WINDOW_DAYS,
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TrackPlays {
    pub song_id: String,
    pub title: String,
    pub artist: String,
    pub total_reproductions: i64,
}

pub(crate) const SQL: &str = r#"
SELECT st.song_id,
       s.title,
       s.artist_name AS artist,
       COUNT(*) AS total_reproductions
FROM streams st
JOIN users u ON u.id = st.user_id
JOIN songs s ON s.id = st.song_id
WHERE st.date >= $1
  AND u.country = $2
GROUP BY st.song_id, s.title, s.artist_name
ORDER BY total_reproductions DESC, st.song_id ASC
LIMIT $3
"#;

impl TopTracksQuery {
    pub fn validate(&self) -> Result<(), QueryError> {
        validate_text("country", &self.country)?;
        validate_window(self.window_days)?;
        validate_limit(self.limit)
    }

    pub fn evaluate(
        &self,
        data: &Dataset,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrackPlays>, QueryError> {
        let streams = data.streams()?;
        let users = data.user_index()?;
        let songs = data.song_index()?;
        let since = window_start(now, self.window_days);

        let mut plays: HashMap<&str, i64> = HashMap::new();
        for stream in streams.iter().filter(|s| s.date >= since) {
            let from_country = users
                .get(stream.user_id.as_str())
                .is_some_and(|u| u.country == self.country);
            if from_country {
                *plays.entry(stream.song_id.as_str()).or_default() += 1;
            }
        }

        let mut rows: Vec<TrackPlays> = plays
            .into_iter()
            .filter_map(|(song_id, count)| {
                let song = songs.get(song_id)?;
                Some(TrackPlays {
                    song_id: song_id.to_string(),
                    title: song.title.clone(),
                    artist: song.artist_name.clone(),
                    total_reproductions: count,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_reproductions
                .cmp(&a.total_reproductions)
                .then_with(|| a.song_id.cmp(&b.song_id))
        });
        rows.truncate(self.limit);

        tracing::debug!(
            "top tracks: {} songs for country {} since {}",
            rows.len(),
            self.country,
            since
        );
        Ok(rows)
    }

    pub async fn fetch(
        &self,
        pool: &PgPool,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrackPlays>, QueryError> {
        let limit = i64::try_from(self.limit)
            .map_err(|_| QueryError::validation(format!("limit too large: {}", self.limit)))?;

        let rows = sqlx::query_as::<_, TrackPlays>(SQL)
            .bind(window_start(now, self.window_days))
            .bind(&self.country)
            .bind(limit)
            .fetch_all(pool)
            .await?;

        Ok(rows)
    }
}
