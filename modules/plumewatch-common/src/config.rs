use std::env;

/// Application configuration loaded from environment variables.
///
/// Pipeline parameters (keywords, window, radius, thresholds) are NOT read
/// here — they travel as a plain `PipelineConfig` record supplied by the
/// caller.
#[derive(Debug, Clone)]
pub struct Config {
    // AI provider
    pub anthropic_api_key: String,
    pub model: String,

    // Secondary search (corroboration pass). Optional: without it the
    // gatherer skips Step B and resolutions cap at single-source confidence.
    pub serper_api_key: Option<String>,

    // SQLite report index
    pub database_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            model: env::var("PLUMEWATCH_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            serper_api_key: env::var("SERPER_API_KEY").ok().filter(|k| !k.is_empty()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://plumewatch.db?mode=rwc".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
