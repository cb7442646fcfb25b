use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// Minimum seconds a voter waits between score updates for one course.
    pub cooldown_s: u64,
    /// Optimistic-write retry budget per request.
    pub max_write_attempts: u32,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "1111"),
            redis_url: require("REDIS_URL"),
            cooldown_s: try_load("VOTE_COOLDOWN_S", "60"),
            max_write_attempts: try_load("VOTE_MAX_WRITE_ATTEMPTS", "6"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn require(key: &str) -> String {
    // One store, one way to configure it. No fallback probing.
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => panic!("Missing required environment variable {key}"),
    }
}
