//! Turns the vision model's free-text answer into a stable vehicle key.

use crate::types::{Analysis, GpsFix, Observation, VehicleKey};

const UNREADABLE_MARKERS: [&str; 2] = ["NECITIBIL", "UNREADABLE"];
const UNKNOWN_DESCRIPTION: &str = "unknown";

const VIOLATION_LABELS: [&str; 3] = ["ÎNCĂLCARE", "INCALCARE", "VIOLATION"];
const PLATE_LABELS: [&str; 4] = ["NUMĂR", "NUMAR", "PLATE", "ÎNMATRICULARE"];
const DESCRIPTION_LABELS: [&str; 2] = ["DESCRIERE", "DESCRIPTION"];
const LOCATION_LABELS: [&str; 3] = ["LOCAȚIE", "LOCATIE", "LOCATION"];

// Ordered: the first keyword found wins. "albastru" and "galben" both
// contain "alb", so they must precede it.
const COLORS: &[(&str, &str)] = &[
    ("albastr", "albastru"),
    ("blue", "albastru"),
    ("galben", "galben"),
    ("yellow", "galben"),
    ("alb", "alb"),
    ("white", "alb"),
    ("negr", "negru"),
    ("neagr", "negru"),
    ("black", "negru"),
    ("argint", "argintiu"),
    ("silver", "argintiu"),
    ("gri", "gri"),
    ("grey", "gri"),
    ("gray", "gri"),
    ("roșu", "rosu"),
    ("rosu", "rosu"),
    ("roși", "rosu"),
    ("rosi", "rosu"),
    ("red", "rosu"),
    ("verde", "verde"),
    ("green", "verde"),
    ("portocaliu", "portocaliu"),
    ("orange", "portocaliu"),
    ("maro", "maro"),
    ("brown", "maro"),
    ("vișiniu", "visiniu"),
    ("visiniu", "visiniu"),
    ("bej", "bej"),
];

// Priority order: larger vehicles first, generic "car" last.
const VEHICLE_TYPES: &[(&str, &str)] = &[
    ("autobuz", "autobuz"),
    ("microbuz", "duba"),
    ("camion", "camion"),
    ("truck", "camion"),
    ("dubă", "duba"),
    ("duba", "duba"),
    ("van", "duba"),
    ("bus", "autobuz"),
    ("suv", "suv"),
    ("motociclet", "motocicleta"),
    ("motorcycle", "motocicleta"),
    ("scuter", "motocicleta"),
    ("autoturism", "masina"),
    ("mașin", "masina"),
    ("masin", "masina"),
    ("car", "masina"),
];

/// Normalized description plus the color it was built from, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Description {
    pub normalized: String,
    pub color: Option<String>,
}

pub fn parse_analysis(text: &str) -> Analysis {
    let mut analysis = Analysis::default();
    for line in text.lines() {
        let (label, value) = match line.find(':') {
            // Models like to wrap labels in markdown bold.
            Some(idx) => (
                line[..idx].to_uppercase(),
                line[idx + 1..].trim().trim_matches('*').trim(),
            ),
            None => continue,
        };
        if has_label(&label, &PLATE_LABELS) {
            if analysis.plate.is_none() {
                analysis.plate = plate_value(value);
            }
        } else if has_label(&label, &DESCRIPTION_LABELS) {
            if analysis.description.is_none() && !value.is_empty() {
                analysis.description = Some(value.to_string());
            }
        } else if has_label(&label, &LOCATION_LABELS) {
            if analysis.location.is_none() && !value.is_empty() {
                analysis.location = Some(value.to_string());
            }
        } else if has_label(&label, &VIOLATION_LABELS) {
            let flag = value.split_whitespace().next().map(str::to_uppercase);
            if let Some("DA") | Some("YES") = flag.as_deref() {
                analysis.violation = true;
            }
        }
    }
    analysis
}

fn has_label(label: &str, names: &[&str]) -> bool {
    names.iter().any(|name| label.contains(name))
}

fn plate_value(value: &str) -> Option<String> {
    let upper = value.to_uppercase();
    if value.is_empty() || UNREADABLE_MARKERS.iter().any(|m| upper.contains(m)) {
        None
    } else {
        Some(value.to_string())
    }
}

pub fn normalize_description(raw: Option<&str>) -> Description {
    let lower = match raw.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_lowercase(),
        _ => {
            return Description {
                normalized: UNKNOWN_DESCRIPTION.to_string(),
                color: None,
            }
        }
    };
    let color = first_keyword(&lower, COLORS);
    let vehicle_type = first_keyword(&lower, VEHICLE_TYPES);
    let normalized = match (color, vehicle_type) {
        (Some(c), Some(t)) => format!("{}_{}", c, t),
        (Some(c), None) => c.to_string(),
        (None, Some(t)) => t.to_string(),
        (None, None) => lower.split_whitespace().take(3).collect::<Vec<_>>().join("_"),
    };
    Description {
        normalized,
        color: color.map(str::to_string),
    }
}

fn first_keyword(haystack: &str, table: &[(&str, &'static str)]) -> Option<&'static str> {
    table
        .iter()
        .find(|(keyword, _)| haystack.contains(keyword))
        .map(|(_, canonical)| *canonical)
}

/// Rounds to the 0.001 degree grid (~111 m).
pub fn round_grid(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Builds the observation for a detected violation. Without a plate the key
/// needs both coordinates; `None` means there is not enough signal to track.
pub fn resolve(analysis: &Analysis, fix: Option<GpsFix>, timestamp: f64) -> Option<Observation> {
    let description = normalize_description(analysis.description.as_deref());
    let key = match (&analysis.plate, fix) {
        (Some(plate), _) => VehicleKey::Plate(plate.clone()),
        (None, Some(fix)) => VehicleKey::LocationDesc {
            lat: round_grid(fix.latitude),
            lon: round_grid(fix.longitude),
            description: description.normalized,
        },
        (None, None) => return None,
    };
    Some(Observation {
        key,
        latitude: fix.map(|f| f.latitude),
        longitude: fix.map(|f| f.longitude),
        color_tag: description.color,
        timestamp,
    })
}
