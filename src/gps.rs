use crate::types::GpsFix;
use failure::Error;
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Reads a `key=value` file with `lat` and `lon` entries. Returns `Ok(None)`
/// when either coordinate is missing, which disables location mode.
pub fn read_fix(path: &Path) -> Result<Option<GpsFix>, Error> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format_err!("Unable to read GPS file {:?}: {}", path, e))?;
    parse_fix(&contents)
}

fn parse_fix(contents: &str) -> Result<Option<GpsFix>, Error> {
    let mut values = HashMap::new();
    for line in contents.lines() {
        let mut parts = line.splitn(2, '=');
        let (key, value) = match (parts.next(), parts.next()) {
            (Some(k), Some(v)) => (k.trim(), v.trim()),
            _ => continue,
        };
        let value: f64 = value
            .parse()
            .map_err(|_| format_err!("Invalid GPS value for {}: {:?}", key, value))?;
        values.insert(key.to_string(), value);
    }
    match (values.get("lat"), values.get("lon")) {
        (Some(&latitude), Some(&longitude)) => Ok(Some(GpsFix {
            latitude,
            longitude,
        })),
        _ => {
            warn!("GPS file is missing lat or lon; location mode disabled");
            Ok(None)
        }
    }
}

/// Asks an IP Webcam phone app for its current location.
pub async fn fetch_ip_webcam(
    client: &reqwest::Client,
    camera_url: &str,
) -> Result<Option<GpsFix>, Error> {
    let url = format!("{}/gps.json", camera_url.trim_end_matches('/'));
    let json: Value = client.get(&url).send().await?.error_for_status()?.json().await?;
    let fix = fix_from_ip_webcam(&json);
    if fix.is_none() {
        debug!("No location in IP Webcam response");
    }
    Ok(fix)
}

fn fix_from_ip_webcam(json: &Value) -> Option<GpsFix> {
    let location = &json["location"];
    Some(GpsFix {
        latitude: location["lat"].as_f64()?,
        longitude: location["lon"].as_f64()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn reads_lat_and_lon() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lat = 45.7537\nlon=21.2257\n\n# comment").unwrap();
        let fix = read_fix(file.path()).unwrap();
        assert_eq!(
            fix,
            Some(GpsFix {
                latitude: 45.7537,
                longitude: 21.2257
            })
        );
    }

    #[test]
    fn missing_coordinate_disables_location() {
        assert_eq!(parse_fix("lat=45.75\n").unwrap(), None);
        assert_eq!(parse_fix("").unwrap(), None);
    }

    #[test]
    fn malformed_value_is_an_error() {
        assert!(parse_fix("lat=north\nlon=21.2").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_fix(Path::new("/nonexistent/gps_coords.txt")).is_err());
    }

    #[test]
    fn parses_ip_webcam_location() {
        let body = json!({"location": {"lat": 45.75, "lon": 21.22, "alt": 90.0}});
        assert_eq!(
            fix_from_ip_webcam(&body),
            Some(GpsFix {
                latitude: 45.75,
                longitude: 21.22
            })
        );
        assert_eq!(fix_from_ip_webcam(&json!({"gps": {}})), None);
    }
}
