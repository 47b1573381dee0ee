//! Registry of the five business reports.
//!
//! Every report is a parameter struct plus two evaluators: `evaluate`
//! (pure, over an in-memory [`Dataset`](crate::memory::Dataset)) and
//! `fetch` (one SQL statement against Postgres). Both take the time anchor
//! explicitly so that "now" is fixed once per invocation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

pub mod demographics;
pub mod heavy_users;
pub mod premium_zombies;
pub mod royalties;
pub mod top_tracks;

pub use demographics::{AgeBucket, BucketKey, DemographicsQuery};
pub use heavy_users::{HeavyUser, HeavyUsersQuery};
pub use premium_zombies::{PremiumZombiesQuery, ZombieSubscriber};
pub use royalties::{ArtistRoyalty, RoyaltiesQuery};
pub use top_tracks::{TopTracksQuery, TrackPlays};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Users,
    Songs,
    Streams,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Users => records::USERS,
            Collection::Songs => records::SONGS,
            Collection::Streams => records::STREAMS,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryName {
    RoyaltiesLastMonth,
    TopTracksByCountry,
    PremiumZombies,
    GenreDemographics,
    HeavyUsers,
}

impl QueryName {
    pub const ALL: [QueryName; 5] = [
        QueryName::RoyaltiesLastMonth,
        QueryName::TopTracksByCountry,
        QueryName::PremiumZombies,
        QueryName::GenreDemographics,
        QueryName::HeavyUsers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryName::RoyaltiesLastMonth => "royalties-last-month",
            QueryName::TopTracksByCountry => "top-tracks-by-country",
            QueryName::PremiumZombies => "premium-zombies",
            QueryName::GenreDemographics => "genre-demographics",
            QueryName::HeavyUsers => "heavy-users",
        }
    }

    /// Name the report had in the original pipeline collection.
    pub fn alias(self) -> &'static str {
        match self {
            QueryName::RoyaltiesLastMonth => "royaltiesLastMonth",
            QueryName::TopTracksByCountry => "top10Guatemala",
            QueryName::PremiumZombies => "premiumZombies",
            QueryName::GenreDemographics => "reggaetonDemographics",
            QueryName::HeavyUsers => "heavyUsersBadBunny",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            QueryName::RoyaltiesLastMonth => "seconds played per artist over the trailing window",
            QueryName::TopTracksByCountry => "most played songs among listeners of one country",
            QueryName::PremiumZombies => "subscribers of a tier with no recent playback",
            QueryName::GenreDemographics => "age distribution of stream events for a genre",
            QueryName::HeavyUsers => "listeners with the most distinct songs of an artist",
        }
    }

    /// Overridable parameters, as named in [`QueryOverrides`].
    pub fn parameters(self) -> &'static [&'static str] {
        match self {
            QueryName::RoyaltiesLastMonth => &["window_days"],
            QueryName::TopTracksByCountry => &["window_days", "country", "limit"],
            QueryName::PremiumZombies => &["window_days", "tier"],
            QueryName::GenreDemographics => &["genre", "boundaries"],
            QueryName::HeavyUsers => &["artist", "limit"],
        }
    }

    pub fn root(self) -> Collection {
        match self {
            QueryName::PremiumZombies => Collection::Users,
            _ => Collection::Streams,
        }
    }

    /// Every collection the report reads, root first.
    pub fn collections(self) -> &'static [Collection] {
        match self {
            QueryName::RoyaltiesLastMonth | QueryName::HeavyUsers => {
                &[Collection::Streams, Collection::Songs]
            }
            QueryName::TopTracksByCountry | QueryName::GenreDemographics => {
                &[Collection::Streams, Collection::Users, Collection::Songs]
            }
            QueryName::PremiumZombies => &[Collection::Users, Collection::Streams],
        }
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryName {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryName::ALL
            .into_iter()
            .find(|name| name.as_str() == s || name.alias() == s)
            .ok_or_else(|| QueryError::NotFound(s.to_string()))
    }
}

/// Look up a report by canonical name or alias, with default parameters.
pub fn get_query(name: &str) -> Result<QuerySpec, QueryError> {
    let name: QueryName = name.parse()?;
    Ok(QuerySpec::defaults(name))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "query", rename_all = "kebab-case")]
pub enum QuerySpec {
    RoyaltiesLastMonth(RoyaltiesQuery),
    TopTracksByCountry(TopTracksQuery),
    PremiumZombies(PremiumZombiesQuery),
    GenreDemographics(DemographicsQuery),
    HeavyUsers(HeavyUsersQuery),
}

impl QuerySpec {
    pub fn defaults(name: QueryName) -> Self {
        match name {
            QueryName::RoyaltiesLastMonth => QuerySpec::RoyaltiesLastMonth(Default::default()),
            QueryName::TopTracksByCountry => QuerySpec::TopTracksByCountry(Default::default()),
            QueryName::PremiumZombies => QuerySpec::PremiumZombies(Default::default()),
            QueryName::GenreDemographics => QuerySpec::GenreDemographics(Default::default()),
            QueryName::HeavyUsers => QuerySpec::HeavyUsers(Default::default()),
        }
    }

    pub fn name(&self) -> QueryName {
        match self {
            QuerySpec::RoyaltiesLastMonth(_) => QueryName::RoyaltiesLastMonth,
            QuerySpec::TopTracksByCountry(_) => QueryName::TopTracksByCountry,
            QuerySpec::PremiumZombies(_) => QueryName::PremiumZombies,
            QuerySpec::GenreDemographics(_) => QueryName::GenreDemographics,
            QuerySpec::HeavyUsers(_) => QueryName::HeavyUsers,
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        match self {
            QuerySpec::RoyaltiesLastMonth(q) => q.validate(),
            QuerySpec::TopTracksByCountry(q) => q.validate(),
            QuerySpec::PremiumZombies(q) => q.validate(),
            QuerySpec::GenreDemographics(q) => q.validate(),
            QuerySpec::HeavyUsers(q) => q.validate(),
        }
    }

    /// SQL statement the Postgres backend runs for this report.
    pub fn explain(&self) -> &'static str {
        match self {
            QuerySpec::RoyaltiesLastMonth(_) => royalties::SQL,
            QuerySpec::TopTracksByCountry(_) => top_tracks::SQL,
            QuerySpec::PremiumZombies(_) => premium_zombies::SQL,
            QuerySpec::GenreDemographics(_) => demographics::SQL,
            QuerySpec::HeavyUsers(_) => heavy_users::SQL,
        }
    }

    /// Apply caller overrides. Setting a parameter the report does not take
    /// is rejected rather than ignored.
    pub fn apply(&mut self, overrides: &QueryOverrides) -> Result<(), QueryError> {
        let name = self.name();
        if let Some(field) = overrides
            .set_fields()
            .into_iter()
            .find(|field| !name.parameters().contains(field))
        {
            return Err(QueryError::validation(format!(
                "{} does not apply to {}",
                field, name
            )));
        }

        let window_days = overrides.window_days.map(positive_days).transpose()?;
        let limit = overrides.limit.map(positive_limit).transpose()?;

        match self {
            QuerySpec::RoyaltiesLastMonth(q) => {
                if let Some(days) = window_days {
                    q.window_days = days;
                }
            }
            QuerySpec::TopTracksByCountry(q) => {
                if let Some(days) = window_days {
                    q.window_days = days;
                }
                if let Some(country) = &overrides.country {
                    q.country = country.clone();
                }
                if let Some(limit) = limit {
                    q.limit = limit;
                }
            }
            QuerySpec::PremiumZombies(q) => {
                if let Some(days) = window_days {
                    q.window_days = days;
                }
                if let Some(tier) = &overrides.tier {
                    q.tier = tier.clone();
                }
            }
            QuerySpec::GenreDemographics(q) => {
                if let Some(genre) = &overrides.genre {
                    q.genre = genre.clone();
                }
                if let Some(boundaries) = &overrides.boundaries {
                    q.boundaries = parse_boundaries(boundaries)?;
                }
            }
            QuerySpec::HeavyUsers(q) => {
                if let Some(artist) = &overrides.artist {
                    q.artist = artist.clone();
                }
                if let Some(limit) = limit {
                    q.limit = limit;
                }
            }
        }

        self.validate()
    }
}

/// Caller-supplied parameter values. Numbers are signed so a negative
/// window reaches validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOverrides {
    pub window_days: Option<i64>,
    pub country: Option<String>,
    pub tier: Option<String>,
    pub genre: Option<String>,
    pub artist: Option<String>,
    pub limit: Option<i64>,
    /// Comma separated bucket boundaries, e.g. `15,21,31,41,61`.
    pub boundaries: Option<String>,
}

impl QueryOverrides {
    fn set_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.window_days.is_some() {
            fields.push("window_days");
        }
        if self.country.is_some() {
            fields.push("country");
        }
        if self.tier.is_some() {
            fields.push("tier");
        }
        if self.genre.is_some() {
            fields.push("genre");
        }
        if self.artist.is_some() {
            fields.push("artist");
        }
        if self.limit.is_some() {
            fields.push("limit");
        }
        if self.boundaries.is_some() {
            fields.push("boundaries");
        }
        fields
    }
}

/// Results of any report, serialized as a bare JSON array of rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    RoyaltiesLastMonth(Vec<ArtistRoyalty>),
    TopTracksByCountry(Vec<TrackPlays>),
    PremiumZombies(Vec<ZombieSubscriber>),
    GenreDemographics(Vec<AgeBucket>),
    HeavyUsers(Vec<HeavyUser>),
}

impl QueryResult {
    pub fn len(&self) -> usize {
        match self {
            QueryResult::RoyaltiesLastMonth(rows) => rows.len(),
            QueryResult::TopTracksByCountry(rows) => rows.len(),
            QueryResult::PremiumZombies(rows) => rows.len(),
            QueryResult::GenreDemographics(rows) => rows.len(),
            QueryResult::HeavyUsers(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn window_start(now: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(window_days))
}

pub(crate) fn validate_window(window_days: u32) -> Result<(), QueryError> {
    if window_days == 0 {
        return Err(QueryError::validation("window_days must be at least 1"));
    }
    Ok(())
}

pub(crate) fn validate_limit(limit: usize) -> Result<(), QueryError> {
    if limit == 0 {
        return Err(QueryError::validation("limit must be at least 1"));
    }
    Ok(())
}

pub(crate) fn validate_text(field: &str, value: &str) -> Result<(), QueryError> {
    if value.trim().is_empty() {
        return Err(QueryError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn positive_days(days: i64) -> Result<u32, QueryError> {
    u32::try_from(days)
        .ok()
        .filter(|d| *d > 0)
        .ok_or_else(|| QueryError::validation(format!("window_days out of range: {}", days)))
}

fn positive_limit(limit: i64) -> Result<usize, QueryError> {
    usize::try_from(limit)
        .ok()
        .filter(|l| *l > 0)
        .ok_or_else(|| QueryError::validation(format!("limit out of range: {}", limit)))
}

fn parse_boundaries(raw: &str) -> Result<Vec<i32>, QueryError> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<i32>()
                .map_err(|_| QueryError::validation(format!("bad bucket boundary: {:?}", part)))
        })
        .collect()
}
