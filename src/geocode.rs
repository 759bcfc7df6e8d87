use failure::Error;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

pub const UNKNOWN_ADDRESS: &str = "Adresa necunoscuta";
pub const UNKNOWN_DISTRICT: &str = "Necunoscut";

const MAPBOX_BASE: &str = "https://api.mapbox.com/geocoding/v5/mapbox.places";

const DISTRICTS: [&str; 33] = [
    "Aradului",
    "Blașcovici",
    "Braytim",
    "Cetate",
    "Ciarda Roșie",
    "Circumvalațiunii",
    "Complexul Studențesc",
    "Dâmbovița",
    "Elisabetin",
    "Fabric",
    "Fratelia",
    "Freidorf",
    "Ghiroda Nouă",
    "Girocului",
    "Iosefin",
    "Kuncz",
    "Lipovei",
    "Martirilor",
    "Medicinei",
    "Mehala",
    "Modern",
    "Odobescu",
    "Olimpia–Stadion",
    "Plăvăț",
    "Plopi",
    "Ronaț",
    "Sever Bocu",
    "Soarelui",
    "Steaua",
    "Șagului",
    "Tipografilor",
    "Torontalului",
    "UMT–Pădurea Verde",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub address: String,
    pub district: String,
}

impl Place {
    fn unknown() -> Self {
        Place {
            address: UNKNOWN_ADDRESS.to_string(),
            district: UNKNOWN_DISTRICT.to_string(),
        }
    }
}

/// Reverse geocoder backed by Mapbox. Never fails: lookups that cannot be
/// completed fall back to the unknown address and district.
pub struct Geocoder {
    client: reqwest::Client,
    access_token: Option<String>,
    cache: Mutex<HashMap<String, Place>>,
}

impl Geocoder {
    pub fn new(client: reqwest::Client, access_token: Option<String>) -> Self {
        if access_token.is_none() {
            warn!("MAPBOX_ACCESS_TOKEN unset; incidents will carry fallback addresses");
        }
        Geocoder {
            client,
            access_token,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lookup(&self, latitude: f64, longitude: f64) -> Place {
        let token = match &self.access_token {
            Some(token) => token,
            None => return Place::unknown(),
        };
        let cache_key = format!("{:.4},{:.4}", latitude, longitude);
        if let Some(place) = self.cached(&cache_key) {
            debug!("Geocode cache hit for {}", cache_key);
            return place;
        }
        match self.fetch(token, latitude, longitude).await {
            Ok(json) => {
                let place = place_from_features(&json);
                info!(
                    "Geocoded {}, {} to {} ({})",
                    latitude, longitude, place.address, place.district
                );
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(cache_key, place.clone());
                }
                place
            }
            Err(e) => {
                warn!("Reverse geocoding failed for {}: {}", cache_key, e);
                Place::unknown()
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Place> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    async fn fetch(&self, token: &str, latitude: f64, longitude: f64) -> Result<Value, Error> {
        let url = Url::parse_with_params(
            &format!("{}/{},{}.json", MAPBOX_BASE, longitude, latitude),
            &[
                ("access_token", token),
                ("types", "address,neighborhood,locality"),
                ("language", "ro"),
            ],
        )?;
        let json = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(json)
    }
}

fn place_from_features(json: &Value) -> Place {
    let features = match json["features"].as_array() {
        Some(features) => features,
        None => return Place::unknown(),
    };
    let address = features
        .iter()
        .find(|f| {
            f["place_type"]
                .as_array()
                .map_or(false, |types| types.iter().any(|t| t == "address"))
        })
        .and_then(|f| f["place_name"].as_str())
        .map(str::to_string);
    let district = features
        .iter()
        .flat_map(|f| vec![f["place_name"].as_str(), f["text"].as_str()])
        .flatten()
        .find_map(district_in)
        .or_else(|| address.as_deref().and_then(district_in));
    Place {
        address: address.unwrap_or_else(|| UNKNOWN_ADDRESS.to_string()),
        district: district
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_DISTRICT.to_string()),
    }
}

fn district_in(text: &str) -> Option<&'static str> {
    DISTRICTS.iter().copied().find(|d| text.contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn picks_address_and_district() {
        let body = json!({
            "features": [
                {
                    "place_type": ["address"],
                    "text": "Strada Alba Iulia",
                    "place_name": "Strada Alba Iulia 2, Timișoara, Timiș, România"
                },
                {
                    "place_type": ["neighborhood"],
                    "text": "Cetate",
                    "place_name": "Cetate, Timișoara, Timiș, România"
                }
            ]
        });
        let place = place_from_features(&body);
        assert_eq!(place.address, "Strada Alba Iulia 2, Timișoara, Timiș, România");
        assert_eq!(place.district, "Cetate");
    }

    #[test]
    fn district_falls_back_to_address_text() {
        let body = json!({
            "features": [
                {"place_type": ["address"], "text": "Bulevardul", "place_name": "Bulevardul Take Ionescu, Fabric"}
            ]
        });
        assert_eq!(place_from_features(&body).district, "Fabric");
    }

    #[test]
    fn incomplete_data_uses_fallbacks() {
        assert_eq!(place_from_features(&json!({})), Place::unknown());
        let body = json!({"features": [{"place_type": ["locality"], "text": "Dumbrăvița"}]});
        let place = place_from_features(&body);
        assert_eq!(place.address, UNKNOWN_ADDRESS);
        assert_eq!(place.district, UNKNOWN_DISTRICT);
    }

    #[tokio::test]
    async fn without_token_lookup_is_unknown() {
        let geocoder = Geocoder::new(reqwest::Client::new(), None);
        assert_eq!(geocoder.lookup(45.75, 21.22).await, Place::unknown());
    }
}
