//! Upstream ESI access: request building, HTTP client and budget tracking.

mod client;
mod fetcher;
mod rate_governor;
pub mod template;

pub use client::{EsiClient, build_http_client, install_rustls_provider, parse_rate_limit};
pub use fetcher::{EsiError, FetchRequest, FetchResponse, Fetcher, RateLimitSnapshot};
pub use rate_governor::{RateGovernor, RateLimitReached};
