use image::DynamicImage;
use std::fmt;

/// A frame handed from a frame source to the processor.
#[derive(Debug)]
pub struct CapturedFrame {
    pub source: String,
    pub image: DynamicImage,
    pub fix: Option<GpsFix>,
    pub captured_at: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Plate,
    LocationDesc,
}

impl IdentifierKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentifierKind::Plate => "plate",
            IdentifierKind::LocationDesc => "location_desc",
        }
    }
}

/// How a vehicle is tracked. Location keys carry coordinates already rounded
/// to the 0.001 degree grid.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleKey {
    Plate(String),
    LocationDesc {
        lat: f64,
        lon: f64,
        description: String,
    },
}

impl VehicleKey {
    pub fn kind(&self) -> IdentifierKind {
        match self {
            VehicleKey::Plate(_) => IdentifierKind::Plate,
            VehicleKey::LocationDesc { .. } => IdentifierKind::LocationDesc,
        }
    }

    /// Canonical string form, used as the tracker's map key.
    pub fn vehicle_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for VehicleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VehicleKey::Plate(plate) => write!(f, "{}", plate),
            VehicleKey::LocationDesc {
                lat,
                lon,
                description,
            } => write!(f, "{:.3}_{:.3}_{}", lat, lon, description),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub key: VehicleKey,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub color_tag: Option<String>,
    pub timestamp: f64,
}

impl Observation {
    pub fn vehicle_id(&self) -> String {
        self.key.vehicle_id()
    }

    pub fn identifier_kind(&self) -> IdentifierKind {
        self.key.kind()
    }
}

/// Fields pulled out of the vision model's answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub violation: bool,
    pub plate: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
}

/// Payload posted to the incident backend.
#[derive(Debug, Clone)]
pub struct Incident {
    pub address: String,
    pub district: String,
    pub latitude: f64,
    pub longitude: f64,
    pub datetime: String,
    pub ai_description: String,
    pub car_number: Option<String>,
    pub photos: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_key_renders_grid_and_description() {
        let key = VehicleKey::LocationDesc {
            lat: 45.754,
            lon: 21.226,
            description: "alb_masina".to_string(),
        };
        assert_eq!(key.vehicle_id(), "45.754_21.226_alb_masina");
        assert_eq!(key.kind(), IdentifierKind::LocationDesc);
    }

    #[test]
    fn whole_degree_coordinates_keep_three_decimals() {
        let key = VehicleKey::LocationDesc {
            lat: 45.0,
            lon: 21.2,
            description: "alb".to_string(),
        };
        assert_eq!(key.vehicle_id(), "45.000_21.200_alb");
    }

    #[test]
    fn plate_key_is_the_plate() {
        let key = VehicleKey::Plate("TM12ABC".to_string());
        assert_eq!(key.vehicle_id(), "TM12ABC");
        assert_eq!(key.kind().as_str(), "plate");
    }
}
