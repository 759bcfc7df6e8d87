use base64::{engine::general_purpose, Engine as _};
use failure::Error;
use log::{debug, info};
use serde_json::{json, Value};
use url::Url;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const PROMPT: &str = "Analizează această imagine de parcare.

Identifică orice vehicul care este parcat în afara unui loc marcat sau pe o zonă interzisă/hașurată (zone cu linii diagonale, pe pistă de biciclete, pe trecere de pietoni).

Dacă detectezi o încălcare, răspunde:
ÎNCĂLCARE: DA
NUMĂR_ÎNMATRICULARE: [număr sau \"NECITIBIL\"]
DESCRIERE_VEHICUL: [culoare și tip]
LOCAȚIE_ÎNCĂLCARE: [unde este parcată ilegal]

Dacă NU există încălcare, răspunde doar:
ÎNCĂLCARE: NU
";

/// Client for the Gemini `generateContent` endpoint.
pub struct VisionClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl VisionClient {
    pub fn new(client: reqwest::Client, api_key: String, model: String) -> Self {
        VisionClient {
            client,
            api_key,
            model,
        }
    }

    /// Sends a JPEG frame with the parking prompt. `Ok(None)` means the model
    /// answered without any text.
    pub async fn analyze(&self, jpeg: &[u8]) -> Result<Option<String>, Error> {
        let url = Url::parse_with_params(
            &format!("{}/{}:generateContent", GEMINI_BASE, self.model),
            &[("key", &self.api_key)],
        )?;
        info!("Sending {} byte frame to {}", jpeg.len(), self.model);
        let response = self
            .client
            .post(url)
            .json(&request_body(jpeg))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Vision model returned {}: {}", status, body);
        }
        let json: Value = response.json().await?;
        let text = response_text(&json);
        debug!("Vision model answered: {:?}", text);
        Ok(text)
    }
}

fn request_body(jpeg: &[u8]) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": PROMPT },
                {
                    "inline_data": {
                        "mime_type": "image/jpeg",
                        "data": general_purpose::STANDARD.encode(jpeg),
                    }
                }
            ]
        }]
    })
}

fn response_text(json: &Value) -> Option<String> {
    let parts = json["candidates"][0]["content"]["parts"].as_array()?;
    let text: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join(""))
    }
}
