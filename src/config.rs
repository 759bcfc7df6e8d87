use failure::Error;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dedup::{DEFAULT_COOLDOWN, DEFAULT_LOCATION_TOLERANCE};

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_BACKEND_URL: &str = "http://localhost:3000";
const DEFAULT_GPS_FILE: &str = "gps_coords.txt";
const DEFAULT_FRAMES_DIR: &str = "frames";
const DEFAULT_JOURNAL_PATH: &str = "violations.db";
const DEFAULT_WEBHOOK_PORT: u16 = 8402;
const DEFAULT_CAPTURE_INTERVAL_SECS: u64 = 10;
const DEFAULT_MAX_CONCURRENT_FRAMES: usize = 2;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub backend_url: String,
    pub mapbox_access_token: Option<String>,
    pub gps_file: PathBuf,
    pub camera_url: Option<String>,
    pub capture_interval: Duration,
    pub webhook_port: u16,
    pub frames_dir: PathBuf,
    pub photos_url: Option<String>,
    pub journal_path: String,
    pub cooldown: Duration,
    pub location_tolerance: f64,
    pub max_concurrent_frames: usize,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let gemini_api_key = var("GEMINI_API_KEY")
            .ok_or_else(|| format_err!("GEMINI_API_KEY environment variable unset"))?;
        let cooldown = match parsed::<u64, _>(&var, "COOLDOWN_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_COOLDOWN,
        };
        let location_tolerance =
            parsed(&var, "LOCATION_TOLERANCE")?.unwrap_or(DEFAULT_LOCATION_TOLERANCE);
        if !(location_tolerance > 0.0) {
            bail!("LOCATION_TOLERANCE must be positive, got {}", location_tolerance);
        }
        let max_concurrent_frames =
            parsed(&var, "MAX_CONCURRENT_FRAMES")?.unwrap_or(DEFAULT_MAX_CONCURRENT_FRAMES);
        if max_concurrent_frames == 0 {
            bail!("MAX_CONCURRENT_FRAMES must be at least 1");
        }
        let http_timeout_secs =
            parsed(&var, "HTTP_TIMEOUT_SECS")?.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        if http_timeout_secs == 0 {
            bail!("HTTP_TIMEOUT_SECS must be at least 1");
        }
        Ok(Config {
            gemini_api_key,
            gemini_model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            backend_url: var("BACKEND_URL").unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            mapbox_access_token: var("MAPBOX_ACCESS_TOKEN"),
            gps_file: PathBuf::from(var("GPS_FILE").unwrap_or_else(|| DEFAULT_GPS_FILE.to_string())),
            camera_url: var("CAMERA_URL"),
            capture_interval: Duration::from_secs(
                parsed(&var, "CAPTURE_INTERVAL_SECS")?.unwrap_or(DEFAULT_CAPTURE_INTERVAL_SECS),
            ),
            webhook_port: parsed(&var, "WEBHOOK_PORT")?.unwrap_or(DEFAULT_WEBHOOK_PORT),
            frames_dir: PathBuf::from(
                var("FRAMES_DIR").unwrap_or_else(|| DEFAULT_FRAMES_DIR.to_string()),
            ),
            photos_url: var("PHOTOS_URL"),
            journal_path: var("JOURNAL_PATH").unwrap_or_else(|| DEFAULT_JOURNAL_PATH.to_string()),
            cooldown,
            location_tolerance,
            max_concurrent_frames,
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }
}

fn parsed<T, F>(var: &F, key: &str) -> Result<Option<T>, Error>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format_err!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(None),
    }
}
