//! Industrial-incident OSINT scout: discovers incident reports from news
//! feeds, dedups them into events, gathers evidence, resolves the affected
//! facility with an LLM under strict citation rules, synthesizes a
//! structured report, geo-enriches it, and persists it idempotently.

pub mod dedup;
pub mod evidence;
pub mod feed;
pub mod generate;
pub mod geo;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod synthesizer;
