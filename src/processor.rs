use crate::backend::BackendClient;
use crate::db::{self, IncidentRow, Outcome};
use crate::dedup::Deduplicator;
use crate::geocode::Geocoder;
use crate::identity;
use crate::types::{Analysis, CapturedFrame, GpsFix, Incident, Observation};
use crate::vision::VisionClient;
use chrono::{DateTime, Utc};
use failure::Error;
use futures::StreamExt;
use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::{mpsc::Receiver, Mutex};
use uuid::Uuid;

const FALLBACK_DESCRIPTION: &str = "Vehicul parcat ilegal";

/// What happened to one analyzed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoViolation,
    /// No plate and no coordinates: nothing to key the vehicle on.
    Untracked,
    /// The vehicle is known but the backend needs coordinates.
    NoLocation,
    Suppressed,
    Reported,
    Failed,
}

/// Where incident photos are written and how the backend should refer to
/// them.
pub struct PhotoStore {
    pub dir: PathBuf,
    pub base_url: Option<String>,
}

impl PhotoStore {
    fn save(&self, image: &DynamicImage) -> Result<String, Error> {
        let name = format!("{:x}.jpeg", Uuid::new_v4().to_simple());
        let path = self.dir.join(&name);
        image
            .save(&path)
            .map_err(|e| format_err!("Error saving photo to {:?}: {}", path, e))?;
        Ok(match &self.base_url {
            Some(base) => base.clone() + &name,
            None => path.display().to_string(),
        })
    }
}

pub struct Processor {
    pub vision: VisionClient,
    pub geocoder: Geocoder,
    pub backend: BackendClient,
    pub tracker: Arc<Mutex<Deduplicator>>,
    pub journal: Arc<Mutex<Connection>>,
    pub photos: PhotoStore,
    /// Used for frames that arrive without their own coordinates.
    pub default_fix: Option<GpsFix>,
}

impl Processor {
    pub async fn run(self, rx: Receiver<CapturedFrame>, concurrency: usize) {
        info!("Processing frames, up to {} at a time", concurrency);
        let processor = &self;
        rx.for_each_concurrent(concurrency, |frame| async move {
            processor.process_frame(frame).await;
        })
        .await;
        error!("Frame channel closed");
    }

    async fn process_frame(&self, frame: CapturedFrame) {
        debug!("Processing frame from {}", frame.source);
        let image = frame.image.resize(1024, 768, FilterType::Triangle);
        let jpeg = match encode_jpeg(&image) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                error!("Unable to encode frame from {}: {}", frame.source, e);
                return;
            }
        };
        let text = match self.vision.analyze(&jpeg).await {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!("Vision model returned no text for frame from {}", frame.source);
                return;
            }
            Err(e) => {
                error!("Vision request failed for frame from {}: {}", frame.source, e);
                return;
            }
        };
        let fix = frame.fix.or(self.default_fix);
        let decision = self
            .handle_analysis(&text, &image, fix, frame.captured_at)
            .await;
        info!("Frame from {}: {:?}", frame.source, decision);
    }

    /// Runs everything after the vision model: identity, suppression, and
    /// reporting. The tracker only learns about a vehicle once the backend
    /// has accepted the incident.
    pub async fn handle_analysis(
        &self,
        text: &str,
        image: &DynamicImage,
        fix: Option<GpsFix>,
        seen_at: f64,
    ) -> Decision {
        let analysis = identity::parse_analysis(text);
        if !analysis.violation {
            return Decision::NoViolation;
        }
        let observation = match identity::resolve(&analysis, fix, seen_at) {
            Some(observation) => observation,
            None => {
                warn!("Violation without plate or GPS fix; cannot track it");
                return Decision::Untracked;
            }
        };
        let vehicle_id = observation.vehicle_id();
        let (latitude, longitude) = match (observation.latitude, observation.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                warn!("Violation by {} without GPS fix; not reporting", vehicle_id);
                return Decision::NoLocation;
            }
        };

        let claim = self.tracker.lock().await.claim(&observation);
        let claim = match claim {
            Some(claim) => claim,
            None => {
                info!("Suppressing duplicate report for {}", vehicle_id);
                self.journal_detection(&observation, Outcome::Suppressed)
                    .await;
                return Decision::Suppressed;
            }
        };

        let place = self.geocoder.lookup(latitude, longitude).await;
        let photo = match self.photos.save(image) {
            Ok(photo) => Some(photo),
            Err(e) => {
                warn!("{}", e);
                None
            }
        };
        let incident = Incident {
            address: place.address,
            district: place.district,
            latitude,
            longitude,
            datetime: rfc3339(seen_at),
            ai_description: ai_description(&analysis),
            car_number: analysis.plate.clone(),
            photos: photo.iter().cloned().collect(),
        };

        match self.backend.post_incident(&incident).await {
            Ok(backend_id) => {
                {
                    let mut tracker = self.tracker.lock().await;
                    tracker.complete(claim, seen_at);
                    debug!("{} live report(s)", tracker.live_entries());
                }
                info!("Reported {} at {}", vehicle_id, incident.address);
                let journal = self.journal.lock().await;
                db::record_detection(
                    &journal,
                    &vehicle_id,
                    observation.identifier_kind().as_str(),
                    seen_at,
                    Outcome::Reported,
                );
                db::record_incident(
                    &journal,
                    &IncidentRow {
                        id: &format!("{:x}", Uuid::new_v4().to_simple()),
                        backend_id,
                        vehicle_id: &vehicle_id,
                        reported_at: seen_at,
                        address: &incident.address,
                        district: &incident.district,
                        photo: photo.as_deref(),
                    },
                );
                Decision::Reported
            }
            Err(e) => {
                self.tracker.lock().await.abandon(claim);
                error!("Incident for {} not recorded: {}", vehicle_id, e);
                self.journal_detection(&observation, Outcome::Failed).await;
                Decision::Failed
            }
        }
    }

    async fn journal_detection(&self, observation: &Observation, outcome: Outcome) {
        let journal = self.journal.lock().await;
        db::record_detection(
            &journal,
            &observation.vehicle_id(),
            observation.identifier_kind().as_str(),
            observation.timestamp,
            outcome,
        );
    }
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, Error> {
    let mut out = vec![];
    image.write_to(&mut out, ImageOutputFormat::Jpeg(85))?;
    Ok(out)
}

fn ai_description(analysis: &Analysis) -> String {
    let mut parts = vec![];
    if let Some(description) = &analysis.description {
        parts.push(description.clone());
    }
    if let Some(location) = &analysis.location {
        parts.push(format!("parcata {}", location));
    }
    if parts.is_empty() {
        FALLBACK_DESCRIPTION.to_string()
    } else {
        parts.join(", ")
    }
}

fn rfc3339(secs: f64) -> String {
    let at: DateTime<Utc> = (UNIX_EPOCH + Duration::from_secs_f64(secs.max(0.0))).into();
    at.to_rfc3339()
}
