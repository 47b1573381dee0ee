//! In-memory backend.
//!
//! Holds the three collections as plain vectors and evaluates reports with
//! the pure `evaluate` functions. A collection that is `None` does not
//! exist, which is how a seed file without e.g. a `"songs"` key behaves.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use records::{Song, Stream, User};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;
use crate::executor::QueryExecutor;
use crate::models::CollectionCounts;
use crate::queries::{QueryResult, QuerySpec};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<User>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub songs: Option<Vec<Song>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streams: Option<Vec<Stream>>,
}

impl Dataset {
    pub fn new(users: Vec<User>, songs: Vec<Song>, streams: Vec<Stream>) -> Self {
        Self {
            users: Some(users),
            songs: Some(songs),
            streams: Some(streams),
        }
    }

    /// Read a JSON seed file of the form `{"users": [...], "songs": [...], "streams": [...]}`.
    pub fn load(path: &Path) -> Result<Self, QueryError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            QueryError::StoreUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let data: Dataset = serde_json::from_str(&raw)
            .map_err(|e| QueryError::Store(format!("bad seed file {}: {}", path.display(), e)))?;
        data.check_streams()?;

        tracing::info!(
            "loaded seed {} ({} users, {} songs, {} streams)",
            path.display(),
            data.users.as_ref().map_or(0, Vec::len),
            data.songs.as_ref().map_or(0, Vec::len),
            data.streams.as_ref().map_or(0, Vec::len)
        );
        Ok(data)
    }

    /// Playback durations must be non-negative.
    fn check_streams(&self) -> Result<(), QueryError> {
        let bad = self
            .streams
            .iter()
            .flatten()
            .find(|s| s.seconds_played < 0.0);
        match bad {
            Some(s) => Err(QueryError::validation(format!(
                "stream {} has negative seconds_played ({})",
                s.id, s.seconds_played
            ))),
            None => Ok(()),
        }
    }

    pub fn users(&self) -> Result<&[User], QueryError> {
        self.users
            .as_deref()
            .ok_or_else(|| QueryError::CollectionNotFound(records::USERS.to_string()))
    }

    pub fn songs(&self) -> Result<&[Song], QueryError> {
        self.songs
            .as_deref()
            .ok_or_else(|| QueryError::CollectionNotFound(records::SONGS.to_string()))
    }

    pub fn streams(&self) -> Result<&[Stream], QueryError> {
        self.streams
            .as_deref()
            .ok_or_else(|| QueryError::CollectionNotFound(records::STREAMS.to_string()))
    }

    pub(crate) fn user_index(&self) -> Result<HashMap<&str, &User>, QueryError> {
        Ok(self.users()?.iter().map(|u| (u.id.as_str(), u)).collect())
    }

    pub(crate) fn song_index(&self) -> Result<HashMap<&str, &Song>, QueryError> {
        Ok(self.songs()?.iter().map(|s| (s.id.as_str(), s)).collect())
    }
}

/// Reports are evaluated on the blocking pool, so a deadline in
/// [`run_query`](crate::run_query) can expire mid-scan.
pub struct MemoryStore {
    data: Arc<Dataset>,
}

impl MemoryStore {
    pub fn new(data: Dataset) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    pub fn open(path: &Path) -> Result<Self, QueryError> {
        Dataset::load(path).map(Self::new)
    }
}

#[async_trait]
impl QueryExecutor for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn execute(
        &self,
        spec: &QuerySpec,
        now: DateTime<Utc>,
    ) -> Result<QueryResult, QueryError> {
        let data = Arc::clone(&self.data);
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || evaluate(&spec, &data, now))
            .await
            .map_err(|e| QueryError::Store(format!("evaluation task failed: {}", e)))?
    }

    async fn counts(&self) -> Result<CollectionCounts, QueryError> {
        Ok(CollectionCounts {
            users: self.data.users()?.len() as i64,
            songs: self.data.songs()?.len() as i64,
            streams: self.data.streams()?.len() as i64,
        })
    }
}

fn evaluate(
    spec: &QuerySpec,
    data: &Dataset,
    now: DateTime<Utc>,
) -> Result<QueryResult, QueryError> {
    let result = match spec {
        QuerySpec::RoyaltiesLastMonth(q) => QueryResult::RoyaltiesLastMonth(q.evaluate(data, now)?),
        QuerySpec::TopTracksByCountry(q) => QueryResult::TopTracksByCountry(q.evaluate(data, now)?),
        QuerySpec::PremiumZombies(q) => QueryResult::PremiumZombies(q.evaluate(data, now)?),
        QuerySpec::GenreDemographics(q) => QueryResult::GenreDemographics(q.evaluate(data, now)?),
        QuerySpec::HeavyUsers(q) => QueryResult::HeavyUsers(q.evaluate(data, now)?),
    };
    Ok(result)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use records::{Song, Stream, User};

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap()
    }

    pub fn days_ago(days: i64) -> DateTime<Utc> {
        now() - Duration::days(days)
    }

    pub fn user(id: &str, country: &str, subscription: &str) -> User {
        User {
            id: id.to_string(),
            username: format!("{}-name", id),
            email: format!("{}@example.com", id),
            country: country.to_string(),
            subscription: subscription.to_string(),
            birth_date: None,
        }
    }

    pub fn user_born(id: &str, country: &str, subscription: &str, birth: NaiveDate) -> User {
        User {
            birth_date: Some(birth),
            ..user(id, country, subscription)
        }
    }

    pub fn song(id: &str, title: &str, artist: &str, genre: &str) -> Song {
        Song {
            id: id.to_string(),
            title: title.to_string(),
            artist_name: artist.to_string(),
            genre: genre.to_string(),
            duration: None,
        }
    }

    pub fn stream(
        id: &str,
        user_id: &str,
        song_id: &str,
        date: DateTime<Utc>,
        seconds: f64,
    ) -> Stream {
        Stream {
            id: id.to_string(),
            user_id: user_id.to_string(),
            song_id: song_id.to_string(),
            date,
            seconds_played: seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn executes_every_registered_query() {
        let store = MemoryStore::new(Dataset::new(
            vec![user("u1", "GT", "Premium")],
            vec![song("s1", "T", "Bad Bunny", "Reggaeton")],
            vec![stream("st1", "u1", "s1", days_ago(1), 30.0)],
        ));

        for name in crate::queries::QueryName::ALL {
            let spec = QuerySpec::defaults(name);
            store.execute(&spec, now()).await.unwrap();
        }
    }

    #[test]
    fn seed_without_a_collection_leaves_it_missing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"users": [], "streams": []}}"#).unwrap();

        let data = Dataset::load(file.path()).unwrap();
        assert!(data.users().unwrap().is_empty());
        assert!(matches!(
            data.songs(),
            Err(QueryError::CollectionNotFound(c)) if c == "songs"
        ));
    }

    #[test]
    fn seed_with_negative_playback_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"streams": [{{"_id": "st9", "user_id": "u1", "song_id": "s1",
                "date": "2025-06-29T20:00:00Z", "seconds_played": -30}}]}}"#
        )
        .unwrap();

        let err = Dataset::load(file.path()).unwrap_err();
        assert!(matches!(err, QueryError::Validation(ref msg) if msg.contains("st9")), "{err:?}");
    }

    #[test]
    fn unreadable_seed_means_store_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = Dataset::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, QueryError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn deadline_interrupts_a_long_scan() {
        let songs: Vec<_> = (0..200)
            .map(|i| song(&format!("s{}", i), "T", "Bad Bunny", "Reggaeton"))
            .collect();
        let streams: Vec<_> = (0..300_000)
            .map(|i| {
                let user = format!("u{}", i % 5_000);
                let song = format!("s{}", i % 200);
                stream(&format!("st{}", i), &user, &song, days_ago(1), 30.0)
            })
            .collect();
        let store = MemoryStore::new(Dataset::new(vec![], songs, streams));

        let spec = QuerySpec::defaults(crate::queries::QueryName::HeavyUsers);
        let limit = std::time::Duration::from_millis(1);
        let err = crate::run_query(&store, &spec, now(), Some(limit))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout(d) if d == limit), "{err:?}");
    }

    #[tokio::test]
    async fn counts_each_collection() {
        let store = MemoryStore::new(Dataset::new(
            vec![user("u1", "GT", "Premium"), user("u2", "GT", "Free")],
            vec![song("s1", "T", "A", "Pop")],
            vec![],
        ));
        let counts = store.counts().await.unwrap();
        assert_eq!((counts.users, counts.songs, counts.streams), (2, 1, 0));
    }
}
