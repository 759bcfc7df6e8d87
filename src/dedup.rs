//! Duplicate-incident suppression.
//!
//! A vehicle is suppressed while it has a live report: an entry younger than
//! the cooldown. An entry whose age is greater than or equal to the cooldown
//! is expired, so a vehicle recorded at `t` may be reported again at exactly
//! `t + cooldown`.
//!
//! Plate keys and location keys never match each other, even when they
//! describe the same car.
//!
//! Claims expire on the same rule as reports, so a claim that is never
//! settled stops blocking its vehicle once the cooldown has passed.

use crate::types::{IdentifierKind, Observation, VehicleKey};
use log::{debug, warn};
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30 * 60);
/// Per-axis tolerance in degrees, roughly 200 m.
pub const DEFAULT_LOCATION_TOLERANCE: f64 = 0.002;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportedEntry {
    pub key: VehicleKey,
    pub reported_at: f64,
}

/// Reservation handed out by [`Deduplicator::claim`]. It must be given back
/// through `complete` or `abandon`, or it lapses after the cooldown.
#[derive(Debug)]
#[must_use]
pub struct ReportClaim {
    key: VehicleKey,
}

#[derive(Debug)]
pub struct Deduplicator {
    cooldown: f64,
    location_tolerance: f64,
    reported: HashMap<String, ReportedEntry>,
    in_flight: HashMap<String, (VehicleKey, f64)>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Deduplicator::new(DEFAULT_COOLDOWN, DEFAULT_LOCATION_TOLERANCE)
    }
}

impl Deduplicator {
    pub fn new(cooldown: Duration, location_tolerance: f64) -> Self {
        Deduplicator {
            cooldown: cooldown.as_secs_f64(),
            location_tolerance,
            reported: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Purges expired entries, then reports whether `observation` matches a
    /// live report exactly or, for location keys, by proximity and color.
    pub fn should_suppress(&mut self, observation: &Observation) -> bool {
        self.purge(observation.timestamp);
        let vehicle_id = observation.vehicle_id();
        self.reported
            .iter()
            .any(|(id, entry)| self.matches(observation, &vehicle_id, id, &entry.key))
    }

    /// Marks a vehicle as reported. Only call this once the backend has
    /// accepted the incident.
    pub fn record_reported(&mut self, key: &VehicleKey, timestamp: f64) {
        self.reported.insert(
            key.vehicle_id(),
            ReportedEntry {
                key: key.clone(),
                reported_at: timestamp,
            },
        );
    }

    /// Suppression check and reservation in one step. Returns `None` when the
    /// observation matches a live report or another caller's claim.
    pub fn claim(&mut self, observation: &Observation) -> Option<ReportClaim> {
        if self.should_suppress(observation) {
            return None;
        }
        let vehicle_id = observation.vehicle_id();
        let pending = self
            .in_flight
            .iter()
            .any(|(id, (key, _))| self.matches(observation, &vehicle_id, id, key));
        if pending {
            debug!("{} is already being reported", vehicle_id);
            return None;
        }
        self.in_flight
            .insert(vehicle_id, (observation.key.clone(), observation.timestamp));
        Some(ReportClaim {
            key: observation.key.clone(),
        })
    }

    pub fn complete(&mut self, claim: ReportClaim, timestamp: f64) {
        self.in_flight.remove(&claim.key.vehicle_id());
        self.record_reported(&claim.key, timestamp);
    }

    pub fn abandon(&mut self, claim: ReportClaim) {
        self.in_flight.remove(&claim.key.vehicle_id());
    }

    pub fn live_entries(&self) -> usize {
        self.reported.len()
    }

    #[cfg(test)]
    pub fn entry(&self, vehicle_id: &str) -> Option<&ReportedEntry> {
        self.reported.get(vehicle_id)
    }

    fn purge(&mut self, now: f64) {
        let cooldown = self.cooldown;
        let before = self.reported.len();
        self.reported.retain(|_, entry| now - entry.reported_at < cooldown);
        let purged = before - self.reported.len();
        if purged > 0 {
            debug!("Purged {} expired report(s)", purged);
        }
        let before = self.in_flight.len();
        self.in_flight
            .retain(|_, (_, claimed_at)| now - *claimed_at < cooldown);
        let lapsed = before - self.in_flight.len();
        if lapsed > 0 {
            warn!("Dropped {} claim(s) that were never settled", lapsed);
        }
    }

    fn matches(
        &self,
        observation: &Observation,
        vehicle_id: &str,
        stored_id: &str,
        stored: &VehicleKey,
    ) -> bool {
        if vehicle_id == stored_id {
            return true;
        }
        if observation.identifier_kind() != IdentifierKind::LocationDesc {
            return false;
        }
        let (lat, lon, color) = match (
            observation.latitude,
            observation.longitude,
            observation.color_tag.as_deref(),
        ) {
            (Some(lat), Some(lon), Some(color)) => (lat, lon, color),
            _ => return false,
        };
        match stored {
            VehicleKey::LocationDesc {
                lat: stored_lat,
                lon: stored_lon,
                description,
            } => {
                (lat - stored_lat).abs() < self.location_tolerance
                    && (lon - stored_lon).abs() < self.location_tolerance
                    && description.contains(color)
            }
            VehicleKey::Plate(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::round_grid;

    fn plate(p: &str, timestamp: f64) -> Observation {
        Observation {
            key: VehicleKey::Plate(p.to_string()),
            latitude: None,
            longitude: None,
            color_tag: None,
            timestamp,
        }
    }

    fn located(
        lat: f64,
        lon: f64,
        description: &str,
        color: Option<&str>,
        timestamp: f64,
    ) -> Observation {
        Observation {
            key: VehicleKey::LocationDesc {
                lat: round_grid(lat),
                lon: round_grid(lon),
                description: description.to_string(),
            },
            latitude: Some(lat),
            longitude: Some(lon),
            color_tag: color.map(str::to_string),
            timestamp,
        }
    }

    #[test]
    fn empty_tracker_never_suppresses() {
        let mut dedup = Deduplicator::default();
        assert!(!dedup.should_suppress(&plate("X123ABC", 0.0)));
        assert_eq!(dedup.live_entries(), 0);
    }

    #[test]
    fn suppresses_within_cooldown_and_expires_at_the_boundary() {
        let mut dedup = Deduplicator::default();
        let first = plate("X123ABC", 0.0);
        dedup.record_reported(&first.key, 0.0);
        assert!(dedup.should_suppress(&plate("X123ABC", 100.0)));
        assert!(dedup.should_suppress(&plate("X123ABC", 1799.9)));
        assert!(!dedup.should_suppress(&plate("X123ABC", 1800.0)));
        assert_eq!(dedup.live_entries(), 0);
    }

    #[test]
    fn expired_entries_are_purged_on_lookup() {
        let mut dedup =
            Deduplicator::new(Duration::from_secs(60), DEFAULT_LOCATION_TOLERANCE);
        dedup.record_reported(&VehicleKey::Plate("OLD1".to_string()), 0.0);
        dedup.record_reported(&VehicleKey::Plate("NEW1".to_string()), 50.0);
        assert!(!dedup.should_suppress(&plate("OTHER", 70.0)));
        assert_eq!(dedup.live_entries(), 1);
        assert!(dedup.entry("NEW1").is_some());
        assert!(dedup.entry("OLD1").is_none());
    }

    #[test]
    fn record_overwrites_the_timestamp() {
        let mut dedup = Deduplicator::default();
        let key = VehicleKey::Plate("B01ABC".to_string());
        dedup.record_reported(&key, 0.0);
        dedup.record_reported(&key, 1000.0);
        assert_eq!(dedup.live_entries(), 1);
        assert!(dedup.should_suppress(&plate("B01ABC", 2500.0)));
    }

    #[test]
    fn same_grid_cell_matches_exactly() {
        let mut dedup = Deduplicator::default();
        let a = located(45.7537, 21.2256, "alb_masina", Some("alb"), 0.0);
        let b = located(45.7538, 21.2257, "alb_masina", Some("alb"), 10.0);
        assert_eq!(a.vehicle_id(), "45.754_21.226_alb_masina");
        assert_eq!(a.vehicle_id(), b.vehicle_id());
        dedup.record_reported(&a.key, 0.0);
        assert!(dedup.should_suppress(&b));
    }

    #[test]
    fn neighbouring_cells_with_shared_color_are_suppressed() {
        let mut dedup = Deduplicator::default();
        let a = located(45.7534, 21.2254, "alb_masina", Some("alb"), 0.0);
        let b = located(45.7546, 21.2266, "alb_duba", Some("alb"), 10.0);
        assert_ne!(a.vehicle_id(), b.vehicle_id());
        dedup.record_reported(&a.key, 0.0);
        assert!(dedup.should_suppress(&b));
    }

    #[test]
    fn distant_or_differently_colored_vehicles_are_not_suppressed() {
        let mut dedup = Deduplicator::default();
        let a = located(45.7534, 21.2254, "alb_masina", Some("alb"), 0.0);
        dedup.record_reported(&a.key, 0.0);
        let too_far_north = located(45.7560, 21.2254, "alb_masina", Some("alb"), 1.0);
        let too_far_east = located(45.7534, 21.2280, "alb_masina", Some("alb"), 1.0);
        let other_color = located(45.7540, 21.2250, "negru_masina", Some("negru"), 1.0);
        assert!(!dedup.should_suppress(&too_far_north));
        assert!(!dedup.should_suppress(&too_far_east));
        assert!(!dedup.should_suppress(&other_color));
    }

    #[test]
    fn yellow_and_white_in_one_cell_are_distinct() {
        let mut dedup = Deduplicator::default();
        let white = located(45.7537, 21.2256, "alb_masina", Some("alb"), 0.0);
        let yellow = located(45.7538, 21.2257, "galben_masina", Some("galben"), 10.0);
        assert_ne!(white.vehicle_id(), yellow.vehicle_id());
        dedup.record_reported(&white.key, 0.0);
        assert!(!dedup.should_suppress(&yellow));
    }

    #[test]
    fn tolerance_is_strict_on_each_axis() {
        let mut dedup = Deduplicator::new(DEFAULT_COOLDOWN, 0.01);
        let stored = located(45.75, 21.22, "alb_masina", Some("alb"), 0.0);
        dedup.record_reported(&stored.key, 0.0);

        let inside_lat = located(45.759, 21.22, "alb_duba", Some("alb"), 1.0);
        let outside_lat = located(45.761, 21.22, "alb_duba", Some("alb"), 1.0);
        let inside_lon = located(45.75, 21.229, "alb_duba", Some("alb"), 1.0);
        let outside_lon = located(45.75, 21.231, "alb_duba", Some("alb"), 1.0);
        assert!(dedup.should_suppress(&inside_lat));
        assert!(!dedup.should_suppress(&outside_lat));
        assert!(dedup.should_suppress(&inside_lon));
        assert!(!dedup.should_suppress(&outside_lon));
    }

    #[test]
    fn fuzzy_match_needs_a_color_tag() {
        let mut dedup = Deduplicator::default();
        let a = located(45.7534, 21.2254, "camion", None, 0.0);
        dedup.record_reported(&a.key, 0.0);
        let nearby = located(45.7546, 21.2266, "camion", None, 1.0);
        assert!(!dedup.should_suppress(&nearby));
    }

    #[test]
    fn plates_and_locations_never_cross_match() {
        let mut dedup = Deduplicator::default();
        dedup.record_reported(&VehicleKey::Plate("alb".to_string()), 0.0);
        let white_car = located(45.7534, 21.2254, "alb_masina", Some("alb"), 1.0);
        assert!(!dedup.should_suppress(&white_car));

        let mut dedup = Deduplicator::default();
        let a = located(45.7534, 21.2254, "alb_masina", Some("alb"), 0.0);
        dedup.record_reported(&a.key, 0.0);
        let mut with_plate = plate("TM01XYZ", 1.0);
        with_plate.latitude = Some(45.7534);
        with_plate.longitude = Some(21.2254);
        with_plate.color_tag = Some("alb".to_string());
        assert!(!dedup.should_suppress(&with_plate));
    }

    #[test]
    fn claim_blocks_a_second_claim_until_settled() {
        let mut dedup = Deduplicator::default();
        let obs = plate("CJ10ABC", 0.0);
        let claim = dedup.claim(&obs).expect("first claim");
        assert!(dedup.claim(&plate("CJ10ABC", 1.0)).is_none());
        dedup.abandon(claim);

        let claim = dedup.claim(&plate("CJ10ABC", 2.0)).expect("claim after abandon");
        assert_eq!(dedup.live_entries(), 0);
        dedup.complete(claim, 3.0);
        assert_eq!(dedup.entry("CJ10ABC").map(|e| e.reported_at), Some(3.0));
        assert!(dedup.claim(&plate("CJ10ABC", 4.0)).is_none());
    }

    #[test]
    fn claims_are_fuzzy_matched_too() {
        let mut dedup = Deduplicator::default();
        let a = located(45.7534, 21.2254, "alb_masina", Some("alb"), 0.0);
        let _claim = dedup.claim(&a).expect("first claim");
        assert!(dedup
            .claim(&located(45.7546, 21.2266, "alb_masina", Some("alb"), 1.0))
            .is_none());
    }

    #[test]
    fn unsettled_claim_lapses_after_the_cooldown() {
        let mut dedup = Deduplicator::default();
        let _lost = dedup.claim(&plate("TM07LST", 0.0)).expect("first claim");
        assert!(dedup.claim(&plate("TM07LST", 100.0)).is_none());
        assert!(dedup.claim(&plate("TM07LST", 1799.0)).is_none());
        let retry = dedup.claim(&plate("TM07LST", 1800.0)).expect("claim after lapse");
        dedup.complete(retry, 1801.0);
        assert_eq!(dedup.entry("TM07LST").map(|e| e.reported_at), Some(1801.0));
    }
}
