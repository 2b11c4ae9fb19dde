//! # Danmaku Gateway Providers
//!
//! C4: the scraper adapter contract and registry. Concrete provider
//! adapters (per-site scraping) are deliberately out of scope; this
//! crate specifies the adapter trait, the signature-verified registry
//! that discovers/enables/orders them, and the two search dispatch
//! strategies the fallback engine drives them with.

pub mod adapter;
pub mod registry;
pub mod search;

pub use adapter::{
    AdapterDescriptor, EpisodeQuery, MediaKind, ProgressCallback, ProviderEpisodeInfo,
    ProviderSearchInfo, RawComment, ScraperAdapter,
};
pub use registry::{verify_signature, AdapterRegistry, AdapterSettings};
pub use search::{search_all, search_sequentially};
