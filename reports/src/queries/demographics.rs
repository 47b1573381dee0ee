use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;

use super::validate_text;
use crate::error::QueryError;
use crate::memory::Dataset;
use crate::models::AgeSlotRow;

pub const DEFAULT_GENRE: &str = "Reggaeton";
pub const DEFAULT_BOUNDARIES: [i32; 5] = [15, 21, 31, 41, 61];
pub const DEFAULT_LABEL: &str = "Fuera de rango";

/// Age distribution of the plays of one genre.
///
/// Buckets are `[boundaries[i], boundaries[i + 1])`; ages outside the whole
/// range land in the bucket named `default_label`. Every stream event
/// counts, so a listener with three plays is counted three times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemographicsQuery {
    pub genre: String,
    pub boundaries: Vec<i32>,
    pub default_label: String,
}

impl Default for DemographicsQuery {
    fn default() -> Self {
        Self {
            genre: DEFAULT_GENRE.to_string(),
            boundaries: DEFAULT_BOUNDARIES.to_vec(),
            default_label: DEFAULT_LABEL.to_string(),
        }
    }
}

/// Lower bound of a bucket, or the catch-all label. Bounded buckets sort
/// before the catch-all.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BucketKey {
    Lower(i32),
    Default(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeBucket {
    pub bucket_key: BucketKey,
    pub total_listeners: i64,
    pub avg_age: f64,
}

pub(crate) const SQL: &str = r#"
WITH ages AS (
    SELECT EXTRACT(YEAR FROM age($1::DATE, u.birth_date))::INT AS age
    FROM streams st
    JOIN songs s ON s.id = st.song_id
    JOIN users u ON u.id = st.user_id
    WHERE s.genre = $2
      AND u.birth_date IS NOT NULL
)
SELECT width_bucket(age, $3::INT[]) AS slot,
       COUNT(*) AS total_listeners,
       SUM(age)::BIGINT AS age_sum
FROM ages
GROUP BY slot
ORDER BY slot
"#;

/// Completed years between `birth` and `today`.
///
/// A birth date after `today` yields the negated age counted the other way,
/// truncated toward zero as Postgres `age()` does.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> i32 {
    if birth > today {
        return -age_on(today, birth);
    }
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    years
}

impl DemographicsQuery {
    pub fn validate(&self) -> Result<(), QueryError> {
        validate_text("genre", &self.genre)?;
        validate_text("default_label", &self.default_label)?;
        if self.boundaries.len() < 2 {
            return Err(QueryError::validation(
                "boundaries needs at least two values",
            ));
        }
        if self.boundaries[0] < 0 {
            return Err(QueryError::validation("boundaries must not be negative"));
        }
        if self.boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(QueryError::validation(
                "boundaries must be strictly increasing",
            ));
        }
        Ok(())
    }

    /// Number of boundaries not above `age`, the same numbering Postgres'
    /// `width_bucket` uses. Slot 0 and the last slot are out of range.
    fn slot(&self, age: i32) -> usize {
        self.boundaries.partition_point(|&b| b <= age)
    }

    fn key_for_slot(&self, slot: usize) -> BucketKey {
        if slot == 0 || slot >= self.boundaries.len() {
            BucketKey::Default(self.default_label.clone())
        } else {
            BucketKey::Lower(self.boundaries[slot - 1])
        }
    }

    /// Merge per-slot `(count, age_sum)` partials into ordered buckets.
    fn fold<I>(&self, slots: I) -> Vec<AgeBucket>
    where
        I: IntoIterator<Item = (usize, i64, i64)>,
    {
        let mut buckets: BTreeMap<BucketKey, (i64, i64)> = BTreeMap::new();
        for (slot, count, age_sum) in slots {
            let entry = buckets.entry(self.key_for_slot(slot)).or_default();
            entry.0 += count;
            entry.1 += age_sum;
        }

        buckets
            .into_iter()
            .filter(|(_, (count, _))| *count > 0)
            .map(|(key, (count, age_sum))| AgeBucket {
                bucket_key: key,
                total_listeners: count,
                avg_age: age_sum as f64 / count as f64,
            })
            .collect()
    }

    pub fn evaluate(
        &self,
        data: &Dataset,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgeBucket>, QueryError> {
        let streams = data.streams()?;
        let songs = data.song_index()?;
        let users = data.user_index()?;
        let today = now.date_naive();

        let mut slots: HashMap<usize, (i64, i64)> = HashMap::new();
        for stream in streams {
            let in_genre = songs
                .get(stream.song_id.as_str())
                .is_some_and(|s| s.genre == self.genre);
            if !in_genre {
                continue;
            }
            let Some(birth) = users
                .get(stream.user_id.as_str())
                .and_then(|u| u.birth_date)
            else {
                continue;
            };

            let age = age_on(birth, today);
            let entry = slots.entry(self.slot(age)).or_default();
            entry.0 += 1;
            entry.1 += i64::from(age);
        }

        let rows = self.fold(slots.into_iter().map(|(slot, (count, sum))| (slot, count, sum)));
        tracing::debug!("demographics: {} buckets for genre {}", rows.len(), self.genre);
        Ok(rows)
    }

    pub async fn fetch(
        &self,
        pool: &PgPool,
        now: DateTime<Utc>,
    ) -> Result<Vec<AgeBucket>, QueryError> {
        let rows = sqlx::query_as::<_, AgeSlotRow>(SQL)
            .bind(now.date_naive())
            .bind(&self.genre)
            .bind(&self.boundaries)
            .fetch_all(pool)
            .await?;

        Ok(self.fold(rows.into_iter().map(|row| {
            // width_bucket never returns a negative slot
            let slot = usize::try_from(row.slot).unwrap_or(0);
            (slot, row.total_listeners, row.age_sum)
        })))
    }
}
