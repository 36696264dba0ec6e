//! apalert-sources: the three external sources a multiworld session can be
//! read from, behind one [`SourceAgent`] capability.
//!
//! - [`AggregatorAgent`]: third-party aggregation API, full session snapshots
//! - [`NativeAgent`]: the game host's structured API, per-slot item streams
//! - [`HtmlAgent`]: the host's HTML tracker pages, last resort
//!
//! All requests share one [`HttpFetcher`] and its per-host pacing.

pub mod agent;
pub mod aggregator;
pub mod error;
pub mod html;
pub mod http;
pub mod locator;
pub mod native;
pub mod wire;

pub use agent::{SlotFetch, SourceAgent};
pub use aggregator::AggregatorAgent;
pub use error::SourceError;
pub use html::HtmlAgent;
pub use http::{FetcherConfig, HostPacer, HttpFetcher};
pub use locator::{NativeRoom, SessionLink, SessionLocator};
pub use native::NativeAgent;
