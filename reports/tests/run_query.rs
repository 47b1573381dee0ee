use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use music_reports::memory::{Dataset, MemoryStore};
use music_reports::models::CollectionCounts;
use music_reports::queries::TrackPlays;
use music_reports::{
    get_query, run_query, QueryError, QueryExecutor, QueryName, QueryOverrides, QueryResult,
    QuerySpec,
};
use records::{Song, Stream, User};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap()
}

fn user(id: &str, country: &str) -> User {
    User {
        id: id.to_string(),
        username: id.to_string(),
        email: format!("{}@example.com", id),
        country: country.to_string(),
        subscription: "Premium".to_string(),
        birth_date: None,
    }
}

fn song(id: &str, title: &str, artist: &str) -> Song {
    Song {
        id: id.to_string(),
        title: title.to_string(),
        artist_name: artist.to_string(),
        genre: "Reggaeton".to_string(),
        duration: Some(200),
    }
}

fn stream(id: &str, user_id: &str, song_id: &str) -> Stream {
    Stream {
        id: id.to_string(),
        user_id: user_id.to_string(),
        song_id: song_id.to_string(),
        date: now(),
        seconds_played: 180.0,
    }
}

fn two_country_store() -> MemoryStore {
    MemoryStore::new(Dataset::new(
        vec![user("u1", "GT"), user("u2", "HN")],
        vec![song("s1", "Dakiti", "X"), song("s2", "Unplayed", "Y")],
        vec![stream("st1", "u1", "s1"), stream("st2", "u2", "s1")],
    ))
}

#[tokio::test]
async fn top_tracks_end_to_end() {
    let store = two_country_store();
    let mut spec = get_query("top-tracks-by-country").unwrap();
    spec.apply(&QueryOverrides {
        country: Some("GT".to_string()),
        window_days: Some(7),
        ..Default::default()
    })
    .unwrap();

    let result = run_query(&store, &spec, now(), None).await.unwrap();
    assert_eq!(
        result,
        QueryResult::TopTracksByCountry(vec![TrackPlays {
            song_id: "s1".to_string(),
            title: "Dakiti".to_string(),
            artist: "X".to_string(),
            total_reproductions: 1,
        }])
    );
}

#[tokio::test]
async fn rerunning_with_same_anchor_is_stable() {
    let store = two_country_store();
    for name in QueryName::ALL {
        let spec = QuerySpec::defaults(name);
        let first = run_query(&store, &spec, now(), None).await.unwrap();
        let second = run_query(&store, &spec, now(), None).await.unwrap();
        assert_eq!(first, second, "{} is not stable", name);
    }
}

#[tokio::test]
async fn legacy_alias_runs_the_same_report() {
    let store = two_country_store();
    let by_alias = run_query(&store, &get_query("heavyUsersBadBunny").unwrap(), now(), None)
        .await
        .unwrap();
    let by_name = run_query(&store, &get_query("heavy-users").unwrap(), now(), None)
        .await
        .unwrap();
    assert_eq!(by_alias, by_name);
}

#[tokio::test]
async fn missing_collection_is_not_an_empty_result() {
    let mut data = Dataset::new(vec![user("u1", "GT")], vec![], vec![]);
    data.songs = None;
    let store = MemoryStore::new(data);

    let err = run_query(&store, &get_query("royaltiesLastMonth").unwrap(), now(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::CollectionNotFound(c) if c == "songs"));
}

#[tokio::test]
async fn invalid_spec_is_rejected_before_execution() {
    let store = two_country_store();
    let spec = QuerySpec::HeavyUsers(music_reports::queries::HeavyUsersQuery {
        artist: "Bad Bunny".to_string(),
        limit: 0,
    });
    let err = run_query(&store, &spec, now(), None).await.unwrap_err();
    assert!(matches!(err, QueryError::Validation(_)));
}

#[tokio::test]
async fn seed_file_backs_a_memory_store() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "users": [
                {{"_id": "u1", "username": "ana", "email": "ana@example.com",
                  "country": "GT", "subscription": "Premium", "birth_date": "1999-02-14"}}
            ],
            "songs": [
                {{"_id": "s1", "title": "Safaera", "artist_name": "Bad Bunny", "genre": "Reggaeton"}}
            ],
            "streams": [
                {{"_id": "st1", "user_id": "u1", "song_id": "s1",
                  "date": "2025-06-29T20:00:00Z", "seconds_played": 295}}
            ]
        }}"#
    )
    .unwrap();

    let store = MemoryStore::open(file.path()).unwrap();
    let result = run_query(&store, &get_query("reggaetonDemographics").unwrap(), now(), None)
        .await
        .unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(
        json,
        serde_json::json!([{ "bucketKey": 21, "totalListeners": 1, "avgAge": 26.0 }])
    );
}

struct SlowStore;

#[async_trait]
impl QueryExecutor for SlowStore {
    fn backend(&self) -> &'static str {
        "slow"
    }

    async fn execute(
        &self,
        _spec: &QuerySpec,
        _now: DateTime<Utc>,
    ) -> Result<QueryResult, QueryError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(QueryResult::HeavyUsers(Vec::new()))
    }

    async fn counts(&self) -> Result<CollectionCounts, QueryError> {
        Ok(CollectionCounts::default())
    }
}

#[tokio::test]
async fn deadline_expiry_is_a_timeout() {
    let spec = get_query("heavy-users").unwrap();
    let err = run_query(&SlowStore, &spec, now(), Some(Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Timeout(d) if d == Duration::from_millis(20)));
}

struct DownStore;

#[async_trait]
impl QueryExecutor for DownStore {
    fn backend(&self) -> &'static str {
        "down"
    }

    async fn execute(
        &self,
        _spec: &QuerySpec,
        _now: DateTime<Utc>,
    ) -> Result<QueryResult, QueryError> {
        Err(QueryError::StoreUnavailable("connection refused".to_string()))
    }

    async fn counts(&self) -> Result<CollectionCounts, QueryError> {
        Err(QueryError::StoreUnavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn store_failures_pass_through_unchanged() {
    let spec = get_query("premium-zombies").unwrap();
    let err = run_query(&DownStore, &spec, now(), Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::StoreUnavailable(msg) if msg == "connection refused"));
}
