//! The run loop: feed → dedup → per-group evidence, resolution, synthesis,
//! geo-enrichment, persistence. One group failing never aborts the run; the
//! outcome of every group is reported in the RunSummary.

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use plumewatch_common::{EventGroup, FacilityName, IncidentReport};

use crate::dedup::{self, DEFAULT_SIMILARITY_THRESHOLD};
use crate::evidence::EvidenceGatherer;
use crate::feed::FeedSource;
use crate::geo::GeoEnricher;
use crate::resolver::EntityResolver;
use crate::store::ReportStore;
use crate::synthesizer::ReportSynthesizer;

/// Base delay before retrying a failed model stage.
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Feed search keywords, one query per entry.
    pub keywords: Vec<String>,
    /// Feed recency window.
    pub window_days: u32,
    /// Per-keyword candidate cap at the feed stage.
    pub max_per_keyword: usize,
    /// Dedup assignment threshold, 0.0–1.0.
    pub similarity_threshold: f64,
    /// Neighbor lookup radius in meters.
    pub neighbor_radius_m: u32,
    /// Hard cap on groups processed per run; model stages are the
    /// expensive part.
    pub max_groups_per_run: usize,
    /// Pause between groups, to stay polite with every upstream API.
    pub pause_between_groups: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            keywords: vec![
                "fabrika yangın".to_string(),
                "fabrika patlama".to_string(),
                "tesis yangın".to_string(),
                "sanayi yangın".to_string(),
                "rafineri yangın".to_string(),
                "kimyasal sızıntı tesis".to_string(),
            ],
            window_days: 7,
            max_per_keyword: 10,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            neighbor_radius_m: 800,
            max_groups_per_run: 12,
            pause_between_groups: Duration::from_secs(2),
        }
    }
}

/// The stage a group failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Synthesize,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Synthesize => "synthesize",
            Stage::Persist => "persist",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Report written; `resolved` is false when the facility stayed
    /// UNRESOLVED.
    Persisted { event_key: String, resolved: bool },
    /// Already in the store (pre-check or insert race), nothing written.
    SkippedDuplicate { event_key: String },
    /// Stage failed after its retry; the group was abandoned for this run.
    Failed { event_key: String, stage: Stage },
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub candidates: usize,
    pub groups: usize,
    pub outcomes: Vec<GroupOutcome>,
}

impl RunSummary {
    pub fn persisted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, GroupOutcome::Persisted { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, GroupOutcome::SkippedDuplicate { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, GroupOutcome::Failed { .. }))
            .count()
    }
}

pub struct Pipeline {
    feed: Box<dyn FeedSource>,
    gatherer: EvidenceGatherer,
    resolver: EntityResolver,
    synthesizer: ReportSynthesizer,
    enricher: GeoEnricher,
    store: Box<dyn ReportStore>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        feed: Box<dyn FeedSource>,
        gatherer: EvidenceGatherer,
        resolver: EntityResolver,
        synthesizer: ReportSynthesizer,
        enricher: GeoEnricher,
        store: Box<dyn ReportStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            feed,
            gatherer,
            resolver,
            synthesizer,
            enricher,
            store,
            config,
        }
    }

    pub async fn run(&self) -> RunSummary {
        let candidates = self
            .feed
            .fetch(
                &self.config.keywords,
                self.config.window_days,
                self.config.max_per_keyword,
            )
            .await;

        let groups = dedup::group(candidates.clone(), self.config.similarity_threshold);
        info!(
            candidates = candidates.len(),
            groups = groups.len(),
            "Run started"
        );

        let mut summary = RunSummary {
            candidates: candidates.len(),
            groups: groups.len(),
            ..RunSummary::default()
        };

        for (i, group) in groups
            .iter()
            .take(self.config.max_groups_per_run)
            .enumerate()
        {
            if i > 0 {
                tokio::time::sleep(self.config.pause_between_groups).await;
            }
            let outcome = self.process_group(group).await;
            info!(event_key = group.group_key, outcome = ?outcome, "Group done");
            summary.outcomes.push(outcome);
        }

        info!(
            persisted = summary.persisted(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            "Run finished"
        );
        summary
    }

    async fn process_group(&self, group: &EventGroup) -> GroupOutcome {
        let event_key = group.group_key.clone();

        // Seen in a previous run — skip before spending any model calls.
        match self.store.contains(&event_key).await {
            Ok(true) => return GroupOutcome::SkippedDuplicate { event_key },
            Ok(false) => {}
            Err(e) => {
                warn!(event_key, error = %e, "Store pre-check failed");
                return GroupOutcome::Failed {
                    event_key,
                    stage: Stage::Persist,
                };
            }
        }

        let bundle = self.gatherer.gather(group).await;

        let resolution = match with_one_retry(|| self.resolver.resolve(&bundle)).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(event_key, error = %e, "Resolution failed");
                return GroupOutcome::Failed {
                    event_key,
                    stage: Stage::Resolve,
                };
            }
        };

        let report = match with_one_retry(|| {
            self.synthesizer
                .synthesize(&resolution, &bundle, group.source_urls())
        })
        .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(event_key, error = %e, "Synthesis failed");
                return GroupOutcome::Failed {
                    event_key,
                    stage: Stage::Synthesize,
                };
            }
        };

        let report = self.enricher.enrich(report).await;

        self.persist(report).await
    }

    async fn persist(&self, report: IncidentReport) -> GroupOutcome {
        let event_key = report.event_key.clone();
        let resolved = matches!(report.facility, FacilityName::Named(_));
        match self.store.insert(&report).await {
            Ok(true) => GroupOutcome::Persisted {
                event_key,
                resolved,
            },
            Ok(false) => GroupOutcome::SkippedDuplicate { event_key },
            Err(e) => {
                warn!(event_key, error = %e, "Insert failed");
                GroupOutcome::Failed {
                    event_key,
                    stage: Stage::Persist,
                }
            }
        }
    }
}

/// Run a fallible stage, retrying once after a jittered backoff. Model
/// output is nondeterministic enough that a second attempt often parses.
async fn with_one_retry<T, F, Fut>(mut attempt: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    match attempt().await {
        Ok(value) => Ok(value),
        Err(first) => {
            let jitter = rand::rng().random_range(0..500u64);
            let delay = RETRY_BACKOFF + Duration::from_millis(jitter);
            warn!(error = %first, delay_ms = delay.as_millis() as u64, "Stage failed, retrying once");
            tokio::time::sleep(delay).await;
            attempt().await
        }
    }
}
