pub mod cache;
pub mod config;
pub mod error;
pub mod json;
pub mod types;

pub use cache::TtlCache;
pub use config::Config;
pub use error::PlumewatchError;
pub use types::*;
