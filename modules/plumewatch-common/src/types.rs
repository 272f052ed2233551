use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Literal sentinel the resolver must emit instead of guessing a facility.
pub const UNRESOLVED: &str = "UNRESOLVED";

/// Sentinel for narrative report fields the evidence does not support.
pub const NOT_STATED: &str = "not stated in evidence";

// ---------------------------------------------------------------------------
// Confidence scale
// ---------------------------------------------------------------------------

/// Confidence is normalized to 0.0–1.0 everywhere in the pipeline.
/// The resolver emits it, the synthesizer copies it verbatim, and any
/// consumer maps it to a band with [`ConfidenceBand::of`].
pub const CONFIDENCE_FLOOR: f64 = 0.0;

/// Below this: low. At or above: medium.
pub const CONFIDENCE_MEDIUM: f64 = 0.4;

/// At or above this: high. Requires ≥2 independent evidence fragments.
pub const CONFIDENCE_HIGH: f64 = 0.7;

/// Hard cap when only a single evidence fragment names the facility.
pub const SINGLE_SOURCE_CAP: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn of(confidence: f64) -> Self {
        if confidence >= CONFIDENCE_HIGH {
            ConfidenceBand::High
        } else if confidence >= CONFIDENCE_MEDIUM {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline records
// ---------------------------------------------------------------------------

/// One raw news item from the feed backend. Lives for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub headline: String,
    pub url: String,
    #[serde(default)]
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A cluster of near-duplicate candidates believed to describe the same
/// real-world incident. Owns its members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventGroup {
    /// Normalized representative headline. Sole event identity — doubles as
    /// the persistence key.
    pub group_key: String,
    pub members: Vec<Candidate>,
}

impl EventGroup {
    /// The member carrying the most detail: longest summary, then longest
    /// headline as tie-break.
    pub fn representative(&self) -> &Candidate {
        self.members
            .iter()
            .max_by_key(|c| (c.summary.len(), c.headline.len()))
            .expect("EventGroup is never empty")
    }

    /// Most recent published time across members, if any member has one.
    pub fn latest_published(&self) -> Option<DateTime<Utc>> {
        self.members.iter().filter_map(|c| c.published_at).max()
    }

    pub fn source_urls(&self) -> Vec<String> {
        self.members.iter().map(|c| c.url.clone()).collect()
    }
}

/// A corroborating snippet from the secondary search pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSnippet {
    pub title: String,
    pub url: String,
    pub excerpt: String,
}

/// Supporting text for one EventGroup. Discarded after resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub event_group_key: String,
    /// Extracted article body, or the feed summary when extraction failed.
    /// Empty when neither exists.
    pub article_text: String,
    pub snippets: Vec<SearchSnippet>,
}

/// A facility identity, or the explicit admission that none is supported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FacilityName {
    Named(String),
    Unresolved,
}

impl FacilityName {
    pub fn is_resolved(&self) -> bool {
        matches!(self, FacilityName::Named(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            FacilityName::Named(name) => name,
            FacilityName::Unresolved => UNRESOLVED,
        }
    }
}

impl From<String> for FacilityName {
    fn from(raw: String) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNRESOLVED) {
            FacilityName::Unresolved
        } else {
            FacilityName::Named(trimmed.to_string())
        }
    }
}

impl From<FacilityName> for String {
    fn from(name: FacilityName) -> Self {
        name.as_str().to_string()
    }
}

impl std::fmt::Display for FacilityName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolver's verdict on one evidence bundle.
///
/// Invariants (enforced at parse time, see the resolver):
/// - `facility == Unresolved` ⇒ `confidence == CONFIDENCE_FLOOR`
/// - `facility` named ⇒ `evidence_citation` non-empty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResolution {
    pub facility: FacilityName,
    pub confidence: f64,
    pub evidence_citation: String,
    pub city_district: Option<String>,
    /// Coordinates only when the evidence itself states them.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl EntityResolution {
    pub fn unresolved() -> Self {
        Self {
            facility: FacilityName::Unresolved,
            confidence: CONFIDENCE_FLOOR,
            evidence_citation: String::new(),
            city_district: None,
            latitude: None,
            longitude: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborFacility {
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

/// The persisted end product. Immutable once stored; a re-run with the same
/// `event_key` is skipped, never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentReport {
    pub event_key: String,
    pub facility: FacilityName,
    pub confidence: f64,
    pub evidence_citation: String,
    pub city_district: Option<String>,
    pub cause: String,
    pub physical_extent: String,
    pub operational_impact: String,
    pub emergency_response: String,
    pub environmental_effect: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub neighboring_facilities: Vec<NeighborFacility>,
    pub source_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_thresholds() {
        assert_eq!(ConfidenceBand::of(0.0), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::of(0.39), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::of(0.4), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.69), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.7), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::of(1.0), ConfidenceBand::High);
    }

    #[test]
    fn facility_name_parses_sentinel() {
        assert_eq!(FacilityName::from("UNRESOLVED".to_string()), FacilityName::Unresolved);
        assert_eq!(FacilityName::from("unresolved".to_string()), FacilityName::Unresolved);
        assert_eq!(FacilityName::from("   ".to_string()), FacilityName::Unresolved);
        assert_eq!(
            FacilityName::from(" XYZ Textile ".to_string()),
            FacilityName::Named("XYZ Textile".to_string())
        );
    }

    #[test]
    fn facility_name_roundtrips_through_string() {
        let named: String = FacilityName::Named("Aliağa Petrokimya".to_string()).into();
        assert_eq!(named, "Aliağa Petrokimya");
        let sentinel: String = FacilityName::Unresolved.into();
        assert_eq!(sentinel, UNRESOLVED);
    }

    #[test]
    fn representative_prefers_longest_summary() {
        let group = EventGroup {
            group_key: "k".to_string(),
            members: vec![
                Candidate {
                    headline: "Short".to_string(),
                    url: "u1".to_string(),
                    summary: "a much longer summary with detail".to_string(),
                    published_at: None,
                },
                Candidate {
                    headline: "A considerably longer headline".to_string(),
                    url: "u2".to_string(),
                    summary: "brief".to_string(),
                    published_at: None,
                },
            ],
        };
        assert_eq!(group.representative().url, "u1");
    }

}
