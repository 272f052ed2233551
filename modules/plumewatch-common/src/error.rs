use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlumewatchError {
    /// An external collaborator (feed, search, geocoder, places) failed or
    /// timed out. Stages recover from this locally with a degraded result.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The generation service returned text with no extractable structured
    /// object. The affected group is skipped, never the whole batch.
    #[error("Unparseable model output: {0}")]
    UnparseableModelOutput(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
