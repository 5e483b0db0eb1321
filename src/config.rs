use std::env;

use uuid::Uuid;

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub api_base_url: String,
    pub courier_id: Uuid,
    pub location_interval_ms: u64,
    pub feed_interval_ms: u64,
    pub courier_lat: f64,
    pub courier_lng: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        let courier_id = match env::var("COURIER_ID") {
            Ok(raw) => raw
                .parse::<Uuid>()
                .map_err(|err| DispatchError::Internal(format!("invalid COURIER_ID: {err}")))?,
            Err(_) => Uuid::new_v4(),
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            api_base_url: env::var("API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            courier_id,
            location_interval_ms: parse_or_default("LOCATION_INTERVAL_MS", 3000)?,
            feed_interval_ms: parse_or_default("FEED_INTERVAL_MS", 5000)?,
            courier_lat: parse_or_default("COURIER_LAT", 0.0)?,
            courier_lng: parse_or_default("COURIER_LNG", 0.0)?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
