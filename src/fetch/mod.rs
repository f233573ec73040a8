pub mod error;
pub mod fetcher;
pub mod render;

// Re-export common types
pub use error::FetchError;
pub use fetcher::{fetcher_from_config, BasicFetcher, PageContent, PageFetcher, StealthFetcher};
pub use render::{RenderClient, RenderScriptRequest, RenderScriptResponse};
