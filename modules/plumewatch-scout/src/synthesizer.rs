//! Second LLM stage: turn a resolution plus its evidence into the structured
//! incident report. Identity fields are copied from the resolution verbatim,
//! never re-derived; narrative fields the evidence does not support get the
//! explicit "not stated in evidence" sentinel instead of a guess.

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use ai_client::util::strip_code_blocks;
use plumewatch_common::{
    json, EntityResolution, EvidenceBundle, IncidentReport, PlumewatchError, NOT_STATED,
};

use crate::generate::TextGenerator;
use crate::resolver::render_evidence;

const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You write a structured report about one industrial incident, using ONLY the evidence text supplied by the user. You have no other knowledge.

For each field, summarize what the evidence states. If the evidence does not state it, use exactly the string "not stated in evidence" — never guess, never omit the field.

Fields:
- cause: what started the incident (fire origin, equipment failure, leak source)
- physical_extent: the physical damage footprint (buildings, units, area affected)
- operational_impact: effect on production/operations (halted lines, closures)
- emergency_response: who responded and what they did
- environmental_effect: smoke, spills, contamination, evacuations of surroundings

Respond with a single JSON object:
{"cause": "...", "physical_extent": "...", "operational_impact": "...", "emergency_response": "...", "environmental_effect": "..."}"#;

#[derive(Debug, Clone, Deserialize)]
struct RawReport {
    #[serde(default)]
    cause: Option<String>,
    #[serde(default)]
    physical_extent: Option<String>,
    #[serde(default)]
    operational_impact: Option<String>,
    #[serde(default)]
    emergency_response: Option<String>,
    #[serde(default)]
    environmental_effect: Option<String>,
}

pub struct ReportSynthesizer {
    generator: std::sync::Arc<dyn TextGenerator>,
}

impl ReportSynthesizer {
    pub fn new(generator: std::sync::Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Produce the report record, geo fields still unset. Errors on
    /// unparseable model output; the orchestrator skips the group then.
    pub async fn synthesize(
        &self,
        resolution: &EntityResolution,
        bundle: &EvidenceBundle,
        source_urls: Vec<String>,
    ) -> Result<IncidentReport> {
        let user_prompt = render_evidence(bundle);

        let response = self
            .generator
            .generate(SYNTHESIS_SYSTEM_PROMPT, &user_prompt)
            .await?;

        let raw: RawReport = json::parse_first(strip_code_blocks(&response)).ok_or_else(|| {
            PlumewatchError::UnparseableModelOutput(format!(
                "report for group {}",
                bundle.event_group_key
            ))
        })?;

        let report = IncidentReport {
            event_key: bundle.event_group_key.clone(),
            // Verbatim from the resolution — the synthesizer has no authority
            // over identity or confidence.
            facility: resolution.facility.clone(),
            confidence: resolution.confidence,
            evidence_citation: resolution.evidence_citation.clone(),
            city_district: resolution.city_district.clone(),
            cause: narrative(raw.cause),
            physical_extent: narrative(raw.physical_extent),
            operational_impact: narrative(raw.operational_impact),
            emergency_response: narrative(raw.emergency_response),
            environmental_effect: narrative(raw.environmental_effect),
            latitude: resolution.latitude,
            longitude: resolution.longitude,
            neighboring_facilities: Vec::new(),
            source_urls,
            created_at: Utc::now(),
        };

        info!(
            event_key = report.event_key,
            facility = %report.facility,
            "Report synthesized"
        );
        Ok(report)
    }
}

/// Sentinel discipline for narrative fields: empty or missing means
/// "not stated in evidence", stated explicitly.
fn narrative(field: Option<String>) -> String {
    match field {
        Some(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => NOT_STATED.to_string(),
    }
}
