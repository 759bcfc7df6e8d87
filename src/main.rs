mod backend;
mod camera;
mod config;
mod db;
mod dedup;
mod geocode;
mod gps;
mod identity;
mod processor;
mod types;
mod vision;
mod webhook;

use crate::backend::BackendClient;
use crate::camera::SnapshotPoller;
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::geocode::Geocoder;
use crate::processor::{PhotoStore, Processor};
use crate::vision::VisionClient;
use env_logger::Env;
use log::{error, info, warn};
use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc::channel, Mutex};

#[macro_use]
extern crate failure;

/// Seconds since the epoch, the clock every tracker timestamp uses.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Shared client for every outbound call. A request that outlives `timeout`
/// fails instead of holding a frame slot.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, failure::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| format_err!("Unable to build HTTP client: {}", e))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    info!("Starting parking-watch");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let client = match http_client(config.http_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to start: {}", e);
            std::process::exit(1);
        }
    };
    let processor = match build_processor(&config, client.clone()) {
        Ok(processor) => processor,
        Err(e) => {
            error!("Unable to start: {}", e);
            std::process::exit(1);
        }
    };
    let default_fix = processor.default_fix;

    let (tx, rx) = channel(8);
    let processor_task = tokio::spawn(processor.run(rx, config.max_concurrent_frames));
    let webhook_task = tokio::spawn(webhook::run(config.webhook_port, tx.clone()));
    let poller_task = tokio::spawn({
        let poller = config.camera_url.as_ref().map(|url| {
            SnapshotPoller::new(
                client,
                url,
                config.capture_interval,
                default_fix,
            )
        });
        async move {
            match poller {
                Some(poller) => poller.run(tx).await,
                None => info!("CAMERA_URL unset; accepting webhook frames only"),
            }
        }
    });
    tokio::select! {
        result = processor_task => {
            if let Err(e) = result {
                error!("Processor task failed: {}", e);
            }
        }
        result = webhook_task => {
            if let Err(e) = result {
                error!("Webhook task failed: {}", e);
            }
        }
        result = poller_task, if config.camera_url.is_some() => {
            if let Err(e) = result {
                error!("Camera task failed: {}", e);
            }
        }
    }
    info!("Exiting main");
}

fn build_processor(
    config: &Config,
    client: reqwest::Client,
) -> Result<Processor, failure::Error> {
    let default_fix = match gps::read_fix(&config.gps_file) {
        Ok(Some(fix)) => {
            info!("GPS fix {}, {}", fix.latitude, fix.longitude);
            Some(fix)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("{}; location mode disabled", e);
            None
        }
    };
    fs::create_dir_all(&config.frames_dir)
        .map_err(|e| format_err!("Unable to create {:?}: {}", config.frames_dir, e))?;
    let journal = db::open(&config.journal_path)
        .map_err(|e| format_err!("Unable to open journal {}: {}", config.journal_path, e))?;
    match db::count_incidents(&journal) {
        Ok(count) => info!("Journal holds {} reported incident(s)", count),
        Err(e) => warn!("Unable to read journal: {}", e),
    }

    Ok(Processor {
        vision: VisionClient::new(
            client.clone(),
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
        ),
        geocoder: Geocoder::new(client.clone(), config.mapbox_access_token.clone()),
        backend: BackendClient::new(client, &config.backend_url),
        tracker: Arc::new(Mutex::new(Deduplicator::new(
            config.cooldown,
            config.location_tolerance,
        ))),
        journal: Arc::new(Mutex::new(journal)),
        photos: PhotoStore {
            dir: config.frames_dir.clone(),
            base_url: config.photos_url.clone(),
        },
        default_fix,
    })
}
