use std::time::Duration;

use crate::errors::AppError;
use crate::feed::DEFAULT_POLL_INTERVAL;
use crate::gateway::DataBackend;

const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: DataBackend,
    pub database_url: Option<String>,
    pub port: u16,
    pub poll_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: DataBackend::Sqlite,
            database_url: None,
            port: DEFAULT_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let backend = match lookup("DATA_BACKEND") {
            Some(raw) => DataBackend::parse(&raw)
                .ok_or_else(|| AppError::configuration(format!("DATA_BACKEND `{raw}` is not sqlite or memory")))?,
            None => defaults.backend,
        };

        let port = lookup("APP_PORT")
            .map(|val| val.parse::<u16>())
            .unwrap_or(Ok(defaults.port))
            .map_err(|_| AppError::configuration("APP_PORT must be a valid port number"))?;

        let poll_interval = lookup("POLL_INTERVAL_MS")
            .map(|val| val.parse::<u64>())
            .unwrap_or(Ok(defaults.poll_interval.as_millis() as u64))
            .map_err(|_| AppError::configuration("POLL_INTERVAL_MS must be a whole number of milliseconds"))?;
        if poll_interval == 0 {
            return Err(AppError::configuration("POLL_INTERVAL_MS must be greater than zero"));
        }

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if backend == DataBackend::Sqlite && database_url.is_none() {
            return Err(AppError::configuration("DATABASE_URL must be set for the sqlite backend"));
        }

        Ok(Self {
            backend,
            database_url,
            port,
            poll_interval: Duration::from_millis(poll_interval),
        })
    }
}
