use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::models::location::GeoPoint;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub maps_api_key: Option<String>,
    pub order_refresh_interval: Duration,
    pub status_poll_interval: Duration,
    pub chat_poll_interval: Duration,
    pub request_timeout: Duration,
    pub event_buffer_size: usize,
    pub default_kitchen: GeoPoint,
    pub max_single_point_zoom: u8,
    pub local_utc_offset_minutes: i32,
    pub user_position: Option<GeoPoint>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let user_position = match (optional::<f64>("USER_LAT")?, optional::<f64>("USER_LNG")?) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            (None, None) => None,
            _ => {
                return Err(AppError::Internal(
                    "USER_LAT and USER_LNG must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_base_url: env::var("API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000/api".to_string()),
            api_token: non_empty("API_TOKEN"),
            maps_api_key: non_empty("MAPS_API_KEY"),
            order_refresh_interval: Duration::from_secs(parse_or_default("ORDER_REFRESH_SECS", 15)?),
            status_poll_interval: Duration::from_secs(parse_or_default("STATUS_POLL_SECS", 10)?),
            chat_poll_interval: Duration::from_secs(parse_or_default("CHAT_POLL_SECS", 5)?),
            request_timeout: Duration::from_secs(parse_or_default("REQUEST_TIMEOUT_SECS", 10)?),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 256)?,
            default_kitchen: GeoPoint {
                lat: parse_or_default("DEFAULT_KITCHEN_LAT", 6.9271)?,
                lng: parse_or_default("DEFAULT_KITCHEN_LNG", 79.8612)?,
            },
            max_single_point_zoom: parse_or_default("MAX_SINGLE_POINT_ZOOM", 15)?,
            local_utc_offset_minutes: parse_or_default("LOCAL_UTC_OFFSET_MINUTES", 330)?,
            user_position,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            api_base_url: "http://localhost:8000/api".to_string(),
            api_token: None,
            maps_api_key: None,
            order_refresh_interval: Duration::from_secs(15),
            status_poll_interval: Duration::from_secs(10),
            chat_poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            event_buffer_size: 256,
            default_kitchen: GeoPoint {
                lat: 6.9271,
                lng: 79.8612,
            },
            max_single_point_zoom: 15,
            local_utc_offset_minutes: 330,
            user_position: None,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn optional<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    Ok(optional(key)?.unwrap_or(default))
}
