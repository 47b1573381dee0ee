use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;

use super::{validate_limit, validate_text};
use crate::error::QueryError;
use crate::memory::Dataset;

pub const DEFAULT_ARTIST: &str = "Bad Bunny";
pub const DEFAULT_LIMIT: usize = 5;

/// Listeners ranked by how many different songs of one artist they played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeavyUsersQuery {
    pub artist: String,
    pub limit: usize,
}

impl Default for HeavyUsersQuery {
    fn default() -> Self {
        Self {
            artist: DEFAULT_ARTIST.to_string(),
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HeavyUser {
    pub user_id: String,
    pub total_distinct_songs: i64,
}

pub(crate) const SQL: &str = r#"
SELECT st.user_id,
       COUNT(DISTINCT st.song_id) AS total_distinct_songs
FROM streams st
JOIN songs s ON s.id = st.song_id
WHERE s.artist_name = $1
GROUP BY st.user_id
ORDER BY total_distinct_songs DESC, st.user_id ASC
LIMIT $2
"#;

impl HeavyUsersQuery {
    pub fn validate(&self) -> Result<(), QueryError> {
        validate_text("artist", &self.artist)?;
        validate_limit(self.limit)
    }

    // `now` is unused: the report covers the whole history.
    pub fn evaluate(
        &self,
        data: &Dataset,
        _now: DateTime<Utc>,
    ) -> Result<Vec<HeavyUser>, QueryError> {
        let streams = data.streams()?;
        let songs = data.song_index()?;

        let mut per_user: HashMap<&str, HashSet<&str>> = HashMap::new();
        for stream in streams {
            let by_artist = songs
                .get(stream.song_id.as_str())
                .is_some_and(|s| s.artist_name == self.artist);
            if by_artist {
                per_user
                    .entry(stream.user_id.as_str())
                    .or_default()
                    .insert(stream.song_id.as_str());
            }
        }

        let mut rows: Vec<HeavyUser> = per_user
            .into_iter()
            .map(|(user_id, songs)| HeavyUser {
                user_id: user_id.to_string(),
                total_distinct_songs: songs.len() as i64,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_distinct_songs
                .cmp(&a.total_distinct_songs)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        rows.truncate(self.limit);

        tracing::debug!("heavy users: {} listeners of {}", rows.len(), self.artist);
        Ok(rows)
    }

    pub async fn fetch(
        &self,
        pool: &PgPool,
        _now: DateTime<Utc>,
    ) -> Result<Vec<HeavyUser>, QueryError> {
        let limit = i64::try_from(self.limit)
            .map_err(|_| QueryError::validation(format!("limit too large: {}", self.limit)))?;

        let rows = sqlx::query_as::<_, HeavyUser>(SQL)
            .bind(&self.artist)
            .bind(limit)
            .fetch_all(pool)
            .await?;

        Ok(rows)
    }
}
