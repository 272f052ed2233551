//! Geo-enrichment: resolve the incident's address to coordinates and look up
//! neighboring industrial facilities within a fixed radius. Every failure in
//! this stage degrades — geo fields stay unset, the neighbor list stays
//! empty — and never fails the report.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use plumewatch_common::{IncidentReport, NeighborFacility, TtlCache};

/// Neighbor lookup cap — bounds API cost and map clutter downstream.
pub const MAX_NEIGHBORS: usize = 10;

/// Name fragments that mark a place as an industrial facility. Mixed
/// Turkish/English to match the monitored region's tagging.
pub const INDUSTRIAL_KEYWORDS: &[&str] = &[
    "fabrika", "factory", "plant", "sanayi", "osb", "mill", "refinery", "rafineri", "tesis",
    "warehouse", "depo", "enerji", "santral", "works", "industrial", "petrokimya", "çelik",
];

// --- Geocoder ---

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Address/area string → coordinates, or None when not found.
    async fn geocode(&self, query: &str) -> Result<Option<(f64, f64)>>;
}

/// Nominatim (OpenStreetMap) geocoder. Results are stable for hours to days,
/// so the injected cache should carry a day-scale TTL.
pub struct NominatimGeocoder {
    http: reqwest::Client,
    cache: TtlCache<String, Option<(f64, f64)>>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(cache: TtlCache<String, Option<(f64, f64)>>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .user_agent("plumewatch/0.1 (industrial incident monitor)")
                .build()
                .expect("Failed to build HTTP client"),
            cache,
            base_url: "https://nominatim.openstreetmap.org".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<(f64, f64)>> {
        let key = query.to_string();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        debug!(query, "Geocoding");

        let results: Vec<NominatimResult> = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .context("Nominatim request failed")?
            .json()
            .await
            .context("Nominatim response parse failed")?;

        let coords = results.first().and_then(|r| {
            let lat = r.lat.parse::<f64>().ok()?;
            let lng = r.lon.parse::<f64>().ok()?;
            valid_coords(lat, lng).then_some((lat, lng))
        });

        self.cache.insert(key, coords);
        Ok(coords)
    }
}

// --- PlacesClient ---

#[async_trait]
pub trait PlacesClient: Send + Sync {
    /// Facilities within `radius_m` of the coordinates.
    async fn nearby(&self, lat: f64, lng: f64, radius_m: u32) -> Result<Vec<NeighborFacility>>;
}

/// Overpass API places backend: industrial-tagged OSM nodes and ways around
/// a point.
pub struct OverpassPlaces {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    lat: Option<f64>,
    lon: Option<f64>,
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

impl OverpassPlaces {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(25))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: "https://overpass-api.de/api/interpreter".to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }
}

impl Default for OverpassPlaces {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlacesClient for OverpassPlaces {
    async fn nearby(&self, lat: f64, lng: f64, radius_m: u32) -> Result<Vec<NeighborFacility>> {
        let query = format!(
            r#"[out:json][timeout:20];
(
  node(around:{radius_m},{lat},{lng})["landuse"="industrial"];
  way(around:{radius_m},{lat},{lng})["landuse"="industrial"];
  node(around:{radius_m},{lat},{lng})["man_made"="works"];
  way(around:{radius_m},{lat},{lng})["man_made"="works"];
  way(around:{radius_m},{lat},{lng})["building"="industrial"];
);
out center {MAX_NEIGHBORS};"#
        );

        let data: OverpassResponse = self
            .http
            .post(&self.base_url)
            .form(&[("data", query)])
            .send()
            .await
            .context("Overpass request failed")?
            .json()
            .await
            .context("Overpass response parse failed")?;

        let neighbors = data
            .elements
            .into_iter()
            .filter_map(|el| {
                let name = el.tags.get("name")?.clone();
                let (nlat, nlng) = match (el.lat, el.lon, el.center) {
                    (Some(lat), Some(lon), _) => (lat, lon),
                    (_, _, Some(center)) => (center.lat, center.lon),
                    _ => return None,
                };
                let address = [el.tags.get("addr:street"), el.tags.get("addr:city")]
                    .into_iter()
                    .flatten()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ");
                Some(NeighborFacility {
                    name,
                    address,
                    lat: nlat,
                    lng: nlng,
                })
            })
            .collect();

        Ok(filter_neighbors(neighbors, INDUSTRIAL_KEYWORDS))
    }
}

/// Keep facilities whose name matches the industrial keyword set, capped at
/// [`MAX_NEIGHBORS`]. Places backends that already filter by industrial tags
/// still pass through here so the cap is enforced in one place.
pub(crate) fn filter_neighbors(
    neighbors: Vec<NeighborFacility>,
    keywords: &[&str],
) -> Vec<NeighborFacility> {
    neighbors
        .into_iter()
        .filter(|n| {
            let name = n.name.to_lowercase();
            keywords.iter().any(|k| name.contains(k))
        })
        .take(MAX_NEIGHBORS)
        .collect()
}

/// Coordinates are usable only if finite and inside WGS84 bounds.
pub(crate) fn valid_coords(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && lat.abs() <= 90.0 && lng.abs() <= 180.0
}

// --- GeoEnricher ---

pub struct GeoEnricher {
    geocoder: Box<dyn Geocoder>,
    places: Box<dyn PlacesClient>,
    radius_m: u32,
}

impl GeoEnricher {
    pub fn new(geocoder: Box<dyn Geocoder>, places: Box<dyn PlacesClient>, radius_m: u32) -> Self {
        Self {
            geocoder,
            places,
            radius_m,
        }
    }

    /// Attach coordinates and neighboring facilities to a report.
    /// Infallible by contract: any collaborator failure leaves the geo
    /// fields unknown and the neighbor list empty.
    pub async fn enrich(&self, mut report: IncidentReport) -> IncidentReport {
        let coords = match (report.latitude, report.longitude) {
            (Some(lat), Some(lng)) if valid_coords(lat, lng) => Some((lat, lng)),
            _ => {
                report.latitude = None;
                report.longitude = None;
                match self.geocode_query(&report) {
                    Some(query) => match self.geocoder.geocode(&query).await {
                        Ok(coords) => coords,
                        Err(e) => {
                            warn!(query, error = %e, "Geocoding failed");
                            None
                        }
                    },
                    None => None,
                }
            }
        };

        let Some((lat, lng)) = coords else {
            return report;
        };
        report.latitude = Some(lat);
        report.longitude = Some(lng);

        match self.places.nearby(lat, lng, self.radius_m).await {
            Ok(neighbors) => report.neighboring_facilities = neighbors,
            Err(e) => {
                warn!(lat, lng, error = %e, "Neighbor lookup failed");
            }
        }

        report
    }

    /// Geocoding query from what the report knows: facility plus district
    /// when both exist, district alone otherwise.
    fn geocode_query(&self, report: &IncidentReport) -> Option<String> {
        let district = report.city_district.as_deref();
        match (report.facility.is_resolved(), district) {
            (true, Some(district)) => Some(format!("{}, {district}", report.facility)),
            (true, None) => Some(report.facility.to_string()),
            (false, Some(district)) => Some(district.to_string()),
            (false, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(name: &str) -> NeighborFacility {
        NeighborFacility {
            name: name.to_string(),
            address: String::new(),
            lat: 38.75,
            lng: 35.5,
        }
    }

    #[test]
    fn geo_clients_construct_with_bounded_timeouts() {
        let _ = NominatimGeocoder::new(TtlCache::disabled());
        let _ = OverpassPlaces::new();
    }

    #[test]
    fn valid_coords_accepts_in_range() {
        assert!(valid_coords(38.75, 35.5));
        assert!(valid_coords(-90.0, 180.0));
    }

    #[test]
    fn valid_coords_rejects_out_of_range() {
        assert!(!valid_coords(91.0, 35.5));
        assert!(!valid_coords(38.75, 181.0));
        assert!(!valid_coords(f64::NAN, 35.5));
        assert!(!valid_coords(38.75, f64::INFINITY));
    }

    #[test]
    fn filter_keeps_industrial_names() {
        let kept = filter_neighbors(
            vec![
                neighbor("Kayseri OSB Tekstil Fabrikası"),
                neighbor("Corner Bakery"),
                neighbor("Soma Power Plant"),
            ],
            INDUSTRIAL_KEYWORDS,
        );
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|n| n.name != "Corner Bakery"));
    }

    #[test]
    fn filter_caps_result_count() {
        let many: Vec<NeighborFacility> =
            (0..25).map(|i| neighbor(&format!("Factory {i}"))).collect();
        assert_eq!(filter_neighbors(many, INDUSTRIAL_KEYWORDS).len(), MAX_NEIGHBORS);
    }

    #[test]
    fn filter_empty_input() {
        assert!(filter_neighbors(Vec::new(), INDUSTRIAL_KEYWORDS).is_empty());
    }
}
