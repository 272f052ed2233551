//! LLM-backed facility-identity resolution with an evidence trail.
//!
//! The model sees only the gathered evidence, must quote a literal excerpt
//! as citation, and must answer UNRESOLVED when no excerpt supports a name.
//! Everything the model claims is re-checked here: a citation that does not
//! appear in the evidence, or a name the evidence never mentions, downgrades
//! the resolution to UNRESOLVED rather than trusting the model.

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};

use ai_client::util::{strip_code_blocks, truncate_to_char_boundary};
use plumewatch_common::{
    json, EntityResolution, EvidenceBundle, FacilityName, PlumewatchError, CONFIDENCE_FLOOR,
    SINGLE_SOURCE_CAP,
};

use crate::generate::TextGenerator;

/// Evidence payload budget per request, in bytes.
const MAX_EVIDENCE_BYTES: usize = 24_000;

const RESOLUTION_SYSTEM_PROMPT: &str = r#"You identify the industrial facility affected by an incident, using ONLY the evidence text supplied by the user. You have no other knowledge; anything not in the evidence does not exist.

Rules:
1. Name the facility ONLY if an excerpt in the evidence literally states it. Copy that excerpt, verbatim, into evidence_citation.
2. If no excerpt supports a facility name, set facility_name to "UNRESOLVED" and evidence_citation to "".
3. confidence is 0.0–1.0 and reflects how many INDEPENDENT evidence fragments agree on the name: one fragment at most 0.6; two or more agreeing fragments may go higher.
4. city_district is the city/district stated in the evidence, or null.
5. latitude/longitude only if the evidence itself states coordinates; otherwise null.

Respond with a single JSON object:
{"facility_name": "...", "confidence": 0.0, "evidence_citation": "...", "city_district": null, "latitude": null, "longitude": null}"#;

/// What the model returns, before validation.
#[derive(Debug, Clone, Deserialize)]
struct RawResolution {
    #[serde(default)]
    facility_name: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    evidence_citation: String,
    #[serde(default)]
    city_district: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

pub struct EntityResolver {
    generator: std::sync::Arc<dyn TextGenerator>,
}

impl EntityResolver {
    pub fn new(generator: std::sync::Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Resolve the facility identity for one evidence bundle.
    ///
    /// Errors only on unparseable model output; a legitimate "cannot name
    /// the facility" is the UNRESOLVED value, not an error.
    pub async fn resolve(&self, bundle: &EvidenceBundle) -> Result<EntityResolution> {
        let user_prompt = render_evidence(bundle);

        let response = self
            .generator
            .generate(RESOLUTION_SYSTEM_PROMPT, &user_prompt)
            .await?;

        let raw: RawResolution = json::parse_first(strip_code_blocks(&response)).ok_or_else(|| {
            PlumewatchError::UnparseableModelOutput(format!(
                "resolution for group {}",
                bundle.event_group_key
            ))
        })?;

        let resolution = validate_resolution(raw, bundle);

        info!(
            group_key = bundle.event_group_key,
            facility = %resolution.facility,
            confidence = resolution.confidence,
            "Entity resolved"
        );
        Ok(resolution)
    }
}

/// Render the bundle as numbered evidence fragments, budget-truncated.
pub(crate) fn render_evidence(bundle: &EvidenceBundle) -> String {
    let mut out = String::new();

    if !bundle.article_text.trim().is_empty() {
        out.push_str("EVIDENCE 1 (article body):\n");
        out.push_str(bundle.article_text.trim());
        out.push('\n');
    }

    for (i, snippet) in bundle.snippets.iter().enumerate() {
        out.push_str(&format!(
            "\nEVIDENCE {} (search result: {} — {}):\n{}\n",
            i + 2,
            snippet.title,
            snippet.url,
            snippet.excerpt
        ));
    }

    if out.is_empty() {
        out.push_str("EVIDENCE: (none gathered)\n");
    }

    truncate_to_char_boundary(&out, MAX_EVIDENCE_BYTES).to_string()
}

/// Enforce the resolution invariants against the actual evidence.
///
/// - unresolved ⇒ confidence at floor, citation empty
/// - named ⇒ citation non-empty, citation literally present in the evidence,
///   and the name itself mentioned in the evidence
/// - fewer than two fragments naming the facility caps confidence at the
///   mid scale; fragments that never mention the name are not corroboration
fn validate_resolution(raw: RawResolution, bundle: &EvidenceBundle) -> EntityResolution {
    let facility = FacilityName::from(raw.facility_name);
    let city_district = raw
        .city_district
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let FacilityName::Named(name) = &facility else {
        return EntityResolution {
            city_district,
            ..EntityResolution::unresolved()
        };
    };

    let citation = raw.evidence_citation.trim().to_string();
    if citation.is_empty() {
        warn!(facility = %name, "Named resolution without citation, downgrading to UNRESOLVED");
        return EntityResolution {
            city_district,
            ..EntityResolution::unresolved()
        };
    }

    if !evidence_contains(bundle, &citation) {
        warn!(facility = %name, "Citation not found in evidence, downgrading to UNRESOLVED");
        return EntityResolution {
            city_district,
            ..EntityResolution::unresolved()
        };
    }

    let naming_fragments = fragments_naming(bundle, name);
    if naming_fragments == 0 {
        warn!(facility = %name, "Facility name not found in evidence, downgrading to UNRESOLVED");
        return EntityResolution {
            city_district,
            ..EntityResolution::unresolved()
        };
    }

    let mut confidence = raw.confidence.clamp(CONFIDENCE_FLOOR, 1.0);
    if naming_fragments < 2 {
        confidence = confidence.min(SINGLE_SOURCE_CAP);
    }

    EntityResolution {
        facility,
        confidence,
        evidence_citation: citation,
        city_district,
        latitude: raw.latitude.filter(|v| v.is_finite()),
        longitude: raw.longitude.filter(|v| v.is_finite()),
    }
}

/// Number of evidence fragments (article body, each snippet) that mention
/// the facility name. Only these count as corroboration.
fn fragments_naming(bundle: &EvidenceBundle, name: &str) -> usize {
    let needle = squash(name);
    if needle.is_empty() {
        return 0;
    }
    let article = usize::from(squash(&bundle.article_text).contains(&needle));
    let snippets = bundle
        .snippets
        .iter()
        .filter(|s| squash(&s.excerpt).contains(&needle) || squash(&s.title).contains(&needle))
        .count();
    article + snippets
}

/// Whitespace-normalized, case-insensitive containment check across all
/// evidence fragments.
fn evidence_contains(bundle: &EvidenceBundle, needle: &str) -> bool {
    let needle = squash(needle);
    if needle.is_empty() {
        return false;
    }
    if squash(&bundle.article_text).contains(&needle) {
        return true;
    }
    bundle.snippets.iter().any(|s| {
        squash(&s.excerpt).contains(&needle) || squash(&s.title).contains(&needle)
    })
}

fn squash(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
