//! Record shapes of the streaming service collections.
//!
//! These mirror the documents stored by the service. Nothing in this
//! workspace writes them; the reports only read.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const USERS: &str = "users";
pub const SONGS: &str = "songs";
pub const STREAMS: &str = "streams";

/// Subscription tier that marks a paying account.
pub const PREMIUM: &str = "Premium";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    pub country: String,
    pub subscription: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
}

impl User {
    pub fn is_premium(&self) -> bool {
        self.subscription == PREMIUM
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Song {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub artist_name: String,
    pub genre: String,
    /// Track length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
}

/// One playback event. `user_id` and `song_id` are weak references: the
/// referenced documents may be missing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Stream {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub song_id: String,
    pub date: DateTime<Utc>,
    pub seconds_played: f64,
}
