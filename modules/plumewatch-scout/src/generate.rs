use anyhow::Result;
use async_trait::async_trait;

use ai_client::Claude;

/// Text-generation collaborator for the two LLM-backed stages. Prod impl is
/// Claude; tests script responses.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns free text expected to contain one structured JSON object.
    /// Callers extract it defensively — surrounding prose is normal.
    async fn generate(&self, system: &str, user: &str) -> Result<String>;
}

/// Claude-backed generator. Temperature pinned to 0.0 so re-runs over the
/// same evidence cannot produce contradictory citations.
pub struct ClaudeGenerator {
    claude: Claude,
}

impl ClaudeGenerator {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            claude: Claude::new(api_key, model),
        }
    }
}

#[async_trait]
impl TextGenerator for ClaudeGenerator {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        self.claude.chat_completion(system, user, 0.0).await
    }
}
