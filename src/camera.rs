//! Pulls snapshots from an IP Webcam phone app on a fixed interval.

use crate::gps;
use crate::now_secs;
use crate::types::{CapturedFrame, GpsFix};
use failure::Error;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::time::delay_for;

pub struct SnapshotPoller {
    client: reqwest::Client,
    camera_url: String,
    interval: Duration,
    /// Fix from the GPS file; when absent the phone is asked for one.
    fixed: Option<GpsFix>,
}

impl SnapshotPoller {
    pub fn new(
        client: reqwest::Client,
        camera_url: &str,
        interval: Duration,
        fixed: Option<GpsFix>,
    ) -> Self {
        SnapshotPoller {
            client,
            camera_url: camera_url.trim_end_matches('/').to_string(),
            interval,
            fixed,
        }
    }

    pub async fn run(self, mut tx: Sender<CapturedFrame>) {
        info!(
            "Polling {} every {}s",
            self.camera_url,
            self.interval.as_secs()
        );
        loop {
            match self.capture().await {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        error!("Frame processor has shut down; stopping poller");
                        return;
                    }
                }
                Err(e) => warn!("Unable to capture snapshot: {}", e),
            }
            delay_for(self.interval).await;
        }
    }

    async fn capture(&self) -> Result<CapturedFrame, Error> {
        let url = format!("{}/shot.jpg", self.camera_url);
        let data = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        debug!("Fetched {} byte snapshot", data.len());
        let image = image::load_from_memory_with_format(&data, image::ImageFormat::Jpeg)?;
        let fix = match self.fixed {
            Some(fix) => Some(fix),
            None => match gps::fetch_ip_webcam(&self.client, &self.camera_url).await {
                Ok(fix) => fix,
                Err(e) => {
                    debug!("No GPS from camera: {}", e);
                    None
                }
            },
        };
        Ok(CapturedFrame {
            source: self.camera_url.clone(),
            image,
            fix,
            captured_at: now_secs(),
        })
    }
}
