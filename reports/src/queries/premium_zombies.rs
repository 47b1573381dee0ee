use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;

use super::{validate_text, validate_window, window_start};
use crate::error::QueryError;
use crate::memory::Dataset;

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Literal attached to every row of this report.
pub const ZOMBIE: &str = "ZOMBIE";

/// Paying subscribers without a single play inside the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PremiumZombiesQuery {
    pub tier: String,
    pub window_days: u32,
}

impl Default for PremiumZombiesQuery {
    fn default() -> Self {
        Self {
            tier: records::PREMIUM.to_string(),
            window_days: DEFAULT_WINDOW_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ZombieSubscriber {
    pub username: String,
    pub email: String,
    pub country: String,
    pub subscription: String,
    pub status: String,
}

pub(crate) const SQL: &str = r#"
SELECT u.username,
       u.email,
       u.country,
       u.subscription,
       'ZOMBIE'::TEXT AS status
FROM users u
WHERE u.subscription = $1
  AND NOT EXISTS (
      SELECT 1
      FROM streams st
      WHERE st.user_id = u.id
        AND st.date >= $2
  )
ORDER BY u.id
"#;

impl PremiumZombiesQuery {
    pub fn validate(&self) -> Result<(), QueryError> {
        validate_text("tier", &self.tier)?;
        validate_window(self.window_days)
    }

    pub fn evaluate(
        &self,
        data: &Dataset,
        now: DateTime<Utc>,
    ) -> Result<Vec<ZombieSubscriber>, QueryError> {
        let users = data.users()?;
        let streams = data.streams()?;
        let since = window_start(now, self.window_days);

        // anti-join: a user is active if any of their plays is recent
        let active: HashSet<&str> = streams
            .iter()
            .filter(|s| s.date >= since)
            .map(|s| s.user_id.as_str())
            .collect();

        let rows: Vec<ZombieSubscriber> = users
            .iter()
            .filter(|u| u.subscription == self.tier && !active.contains(u.id.as_str()))
            .map(|u| ZombieSubscriber {
                username: u.username.clone(),
                email: u.email.clone(),
                country: u.country.clone(),
                subscription: u.subscription.clone(),
                status: ZOMBIE.to_string(),
            })
            .collect();

        tracing::debug!(
            "premium zombies: {} of {} users inactive since {}",
            rows.len(),
            users.len(),
            since
        );
        Ok(rows)
    }

    pub async fn fetch(
        &self,
        pool: &PgPool,
        now: DateTime<Utc>,
    ) -> Result<Vec<ZombieSubscriber>, QueryError> {
        let rows = sqlx::query_as::<_, ZombieSubscriber>(SQL)
            .bind(&self.tier)
            .bind(window_start(now, self.window_days))
            .fetch_all(pool)
            .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::fixtures::{days_ago, now, song, stream, user};

    fn usernames(rows: &[ZombieSubscriber]) -> Vec<&str> {
        rows.iter().map(|r| r.username.as_str()).collect()
    }

    #[test]
    fn recent_play_keeps_user_alive() {
        let data = Dataset::new(
            vec![user("u1", "GT", "Premium")],
            vec![song("s1", "T", "A", "Pop")],
            vec![stream("st1", "u1", "s1", days_ago(29), 10.0)],
        );
        let rows = PremiumZombiesQuery::default().evaluate(&data, now()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn only_stale_plays_make_a_zombie() {
        let data = Dataset::new(
            vec![user("u1", "GT", "Premium")],
            vec![song("s1", "T", "A", "Pop")],
            vec![stream("st1", "u1", "s1", days_ago(31), 10.0)],
        );
        let rows = PremiumZombiesQuery::default().evaluate(&data, now()).unwrap();
        assert_eq!(
            rows,
            vec![ZombieSubscriber {
                username: "u1-name".to_string(),
                email: "u1@example.com".to_string(),
                country: "GT".to_string(),
                subscription: "Premium".to_string(),
                status: ZOMBIE.to_string(),
            }]
        );
    }

    #[test]
    fn examines_all_activity_of_each_user() {
        let data = Dataset::new(
            vec![
                user("u1", "GT", "Premium"),
                user("u2", "GT", "Premium"),
                user("u3", "SV", "Premium"),
                user("u4", "GT", "Free"),
            ],
            vec![song("s1", "T", "A", "Pop")],
            vec![
                stream("st1", "u1", "s1", days_ago(90), 10.0),
                stream("st2", "u1", "s1", days_ago(2), 10.0),
                stream("st3", "u2", "s1", days_ago(45), 10.0),
            ],
        );
        let rows = PremiumZombiesQuery::default().evaluate(&data, now()).unwrap();
        assert_eq!(usernames(&rows), vec!["u2-name", "u3-name"]);
        assert!(rows
            .iter()
            .all(|r| r.subscription == "Premium" && r.status == ZOMBIE));
    }

    #[test]
    fn tier_and_window_are_parameters() {
        let data = Dataset::new(
            vec![user("u1", "GT", "Family")],
            vec![song("s1", "T", "A", "Pop")],
            vec![stream("st1", "u1", "s1", days_ago(10), 10.0)],
        );
        let query = PremiumZombiesQuery {
            tier: "Family".to_string(),
            window_days: 7,
        };
        let rows = query.evaluate(&data, now()).unwrap();
        assert_eq!(usernames(&rows), vec!["u1-name"]);
    }

    #[test]
    fn missing_streams_collection_is_an_error() {
        let mut data = Dataset::new(vec![user("u1", "GT", "Premium")], vec![], vec![]);
        data.streams = None;
        let err = PremiumZombiesQuery::default().evaluate(&data, now()).unwrap_err();
        assert!(matches!(err, QueryError::CollectionNotFound(c) if c == "streams"));
    }
}
