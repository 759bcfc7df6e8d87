use crate::types::Incident;
use failure::Fail;
use log::{debug, info};
use reqwest::StatusCode;
use serde_json::{json, Value};

#[derive(Debug, Fail)]
pub enum PostError {
    #[fail(display = "backend rejected incident with {}: {}", status, body)]
    Rejected { status: StatusCode, body: String },
    #[fail(display = "backend unreachable: {}", _0)]
    Transport(#[cause] reqwest::Error),
}

impl From<reqwest::Error> for PostError {
    fn from(e: reqwest::Error) -> Self {
        PostError::Transport(e)
    }
}

/// Posts incidents to the backend's `/api/incidents` endpoint.
pub struct BackendClient {
    client: reqwest::Client,
    endpoint: String,
}

impl BackendClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        BackendClient {
            client,
            endpoint: format!("{}/api/incidents", base_url.trim_end_matches('/')),
        }
    }

    /// Only a 201 counts as recorded. Returns the backend's incident id when
    /// it sends one back.
    pub async fn post_incident(&self, incident: &Incident) -> Result<Option<u64>, PostError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload(incident))
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(PostError::Rejected { status, body });
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let id = body["data"]["id"].as_u64();
        info!("Backend accepted incident {:?}", id);
        Ok(id)
    }
}

fn payload(incident: &Incident) -> Value {
    let payload = json!({
        "address": incident.address,
        "district": incident.district,
        "latitude": incident.latitude,
        "longitude": incident.longitude,
        "datetime": incident.datetime,
        "ai_description": incident.ai_description,
        "car_number": incident.car_number,
        "photos": incident.photos,
    });
    debug!("Incident payload: {}", payload);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incident() -> Incident {
        Incident {
            address: "Piața Victoriei 1".to_string(),
            district: "Cetate".to_string(),
            latitude: 45.7537,
            longitude: 21.2257,
            datetime: "2026-10-16T08:00:00+00:00".to_string(),
            ai_description: "Autoturism alb, parcata pe trecere".to_string(),
            car_number: None,
            photos: vec!["frames/a.jpeg".to_string()],
        }
    }

    #[test]
    fn payload_carries_optional_plate_as_null() {
        let body = payload(&incident());
        assert_eq!(body["district"], "Cetate");
        assert_eq!(body["car_number"], Value::Null);
        assert_eq!(body["photos"][0], "frames/a.jpeg");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        let backend = BackendClient::new(reqwest::Client::new(), "http://127.0.0.1:9/");
        match backend.post_incident(&incident()).await {
            Err(PostError::Transport(_)) => {}
            other => panic!("expected transport error, got {:?}", other),
        }
    }
}
