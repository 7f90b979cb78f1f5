// src/config.rs

use std::{env, net::SocketAddr, str::FromStr};

use dotenvy::dotenv;
use url::Url;

use crate::error::AppError;

/// Number of qualifying violations that forces submission.
pub const DEFAULT_VIOLATION_LIMIT: u32 = 3;
/// Remaining seconds at which the low-time banner appears.
pub const DEFAULT_LOW_TIME_THRESHOLD_SECS: u64 = 60;
/// How long the low-time banner stays visible.
pub const DEFAULT_LOW_TIME_BANNER_SECS: u64 = 5;

const DEFAULT_DATABASE_URL: &str = "sqlite://proctor.db?mode=rwc";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

/// Engine knobs shared by every session started by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub violation_limit: u32,
    pub low_time_threshold_secs: u64,
    pub low_time_banner_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            violation_limit: DEFAULT_VIOLATION_LIMIT,
            low_time_threshold_secs: DEFAULT_LOW_TIME_THRESHOLD_SECS,
            low_time_banner_secs: DEFAULT_LOW_TIME_BANNER_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub remote_base_url: Url,
    pub listen_addr: SocketAddr,
    pub rust_log: String,
    pub session: SessionSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let jwt_secret = required("JWT_SECRET")?;

        let remote_base_url = Url::parse(&required("REMOTE_BASE_URL")?)
            .map_err(|e| AppError::Config(format!("REMOTE_BASE_URL is not a valid URL: {}", e)))?;

        let listen_addr = parse_or("LISTEN_ADDR", DEFAULT_LISTEN_ADDR.parse().ok())?;

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let session = SessionSettings {
            violation_limit: parse_or("VIOLATION_LIMIT", Some(DEFAULT_VIOLATION_LIMIT))?,
            low_time_threshold_secs: parse_or(
                "LOW_TIME_THRESHOLD_SECS",
                Some(DEFAULT_LOW_TIME_THRESHOLD_SECS),
            )?,
            low_time_banner_secs: parse_or(
                "LOW_TIME_BANNER_SECS",
                Some(DEFAULT_LOW_TIME_BANNER_SECS),
            )?,
        };

        if session.violation_limit == 0 {
            return Err(AppError::Config(
                "VIOLATION_LIMIT must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            jwt_secret,
            remote_base_url,
            listen_addr,
            rust_log,
            session,
        })
    }
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::Config(format!("{} must be set", key)))
}

fn parse_or<T: FromStr>(key: &str, default: Option<T>) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => default.ok_or_else(|| AppError::Config(format!("{} must be set", key))),
    }
}
