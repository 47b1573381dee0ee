use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::QueryError;

const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/music_reports";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 3001);

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    /// Reads `DATABASE_URL`, `DB_MAX_CONNECTIONS` and `DB_ACQUIRE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, QueryError> {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());
        let max_connections = env_or("DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let acquire_timeout = env_or("DB_ACQUIRE_TIMEOUT_SECS", DEFAULT_ACQUIRE_TIMEOUT_SECS)?;

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub query_timeout: Option<Duration>,
}

impl ServerConfig {
    /// Reads `REPORTS_ADDR` and the optional `QUERY_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, QueryError> {
        let addr = env_or("REPORTS_ADDR", SocketAddr::from(DEFAULT_ADDR))?;
        let query_timeout = match std::env::var("QUERY_TIMEOUT_SECS") {
            Ok(raw) => Some(Duration::from_secs(parse_var("QUERY_TIMEOUT_SECS", &raw)?)),
            Err(_) => None,
        };

        Ok(Self {
            addr,
            query_timeout,
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, QueryError> {
    match std::env::var(key) {
        Ok(raw) => parse_var(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, QueryError> {
    raw.trim()
        .parse()
        .map_err(|_| QueryError::validation(format!("{} has an invalid value: {:?}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbers_and_addresses() {
        assert_eq!(parse_var::<u32>("N", " 12 ").unwrap(), 12);
        let addr: SocketAddr = parse_var("ADDR", "127.0.0.1:8080").unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_var::<u64>("QUERY_TIMEOUT_SECS", "soon").unwrap_err();
        assert!(matches!(err, QueryError::Validation(msg) if msg.contains("QUERY_TIMEOUT_SECS")));
    }
}
