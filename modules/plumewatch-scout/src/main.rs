use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use plumewatch_common::{Config, TtlCache};
use plumewatch_scout::evidence::{
    EvidenceGatherer, HttpScraper, NoopSearcher, SerperSearcher, WebSearcher,
};
use plumewatch_scout::feed::GoogleNewsFeed;
use plumewatch_scout::generate::ClaudeGenerator;
use plumewatch_scout::geo::{GeoEnricher, NominatimGeocoder, OverpassPlaces};
use plumewatch_scout::pipeline::{Pipeline, PipelineConfig};
use plumewatch_scout::resolver::EntityResolver;
use plumewatch_scout::store::SqliteStore;
use plumewatch_scout::synthesizer::ReportSynthesizer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let pipeline_config = PipelineConfig::default();

    let feed = GoogleNewsFeed::new(
        "tr",
        "TR",
        TtlCache::new(Duration::from_secs(10 * 60)),
    );

    let scraper = HttpScraper::new(TtlCache::new(Duration::from_secs(60 * 60)));
    let searcher: Box<dyn WebSearcher> = match &config.serper_api_key {
        Some(key) => Box::new(SerperSearcher::new(key)),
        None => {
            info!("No SERPER_API_KEY set, running without corroboration search");
            Box::new(NoopSearcher)
        }
    };
    let gatherer = EvidenceGatherer::new(Box::new(scraper), searcher);

    let generator = Arc::new(ClaudeGenerator::new(
        &config.anthropic_api_key,
        &config.model,
    ));
    let resolver = EntityResolver::new(generator.clone());
    let synthesizer = ReportSynthesizer::new(generator);

    let enricher = GeoEnricher::new(
        Box::new(NominatimGeocoder::new(TtlCache::new(Duration::from_secs(
            24 * 60 * 60,
        )))),
        Box::new(OverpassPlaces::new()),
        pipeline_config.neighbor_radius_m,
    );

    let store = SqliteStore::connect(&config.database_url).await?;

    let pipeline = Pipeline::new(
        Box::new(feed),
        gatherer,
        resolver,
        synthesizer,
        enricher,
        Box::new(store),
        pipeline_config,
    );

    let summary = pipeline.run().await;
    info!(
        candidates = summary.candidates,
        groups = summary.groups,
        persisted = summary.persisted(),
        skipped = summary.skipped(),
        failed = summary.failed(),
        "Scout run complete"
    );
    Ok(())
}
