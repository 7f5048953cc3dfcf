//! reqwest-backed ESI client.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tracing::{debug, trace, warn};
use url::Url;

use super::{EsiError, FetchRequest, FetchResponse, Fetcher, RateLimitSnapshot};
use crate::config::EsiSettings;
use crate::{Error, Result};

const ERROR_LIMIT_REMAIN: &str = "x-esi-error-limit-remain";
const ERROR_LIMIT_RESET: &str = "x-esi-error-limit-reset";
const PAGES: &str = "x-pages";

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared HTTP client for upstream calls.
pub fn build_http_client(settings: &EsiSettings) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let mut builder = reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .default_headers(default_headers);

    if settings.request_timeout_secs > 0 {
        builder = builder.timeout(Duration::from_secs(settings.request_timeout_secs));
    }

    if settings.pool_max_idle_per_host > 0 {
        builder = builder.pool_max_idle_per_host(settings.pool_max_idle_per_host);
    }

    Ok(builder.build()?)
}

/// Read ESI rate-limit headers.
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitSnapshot> {
    let header_u32 = |name: &str| -> Option<u32> { headers.get(name)?.to_str().ok()?.trim().parse().ok() };

    let remaining = header_u32(ERROR_LIMIT_REMAIN)?;
    let reset_secs = header_u32(ERROR_LIMIT_RESET).unwrap_or(60);
    Some(RateLimitSnapshot {
        remaining,
        reset_after: Duration::from_secs(u64::from(reset_secs)),
    })
}

fn parse_pages(headers: &HeaderMap) -> Option<u32> {
    headers.get(PAGES)?.to_str().ok()?.trim().parse().ok()
}

/// Fetcher for the live ESI API.
pub struct EsiClient {
    client: reqwest::Client,
    base_url: String,
    datasource: String,
}

impl EsiClient {
    pub fn new(settings: &EsiSettings) -> Result<Self> {
        Url::parse(&settings.base_url)
            .map_err(|e| Error::config(format!("invalid ESI base URL {}: {}", settings.base_url, e)))?;

        Ok(Self {
            client: build_http_client(settings)?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            datasource: settings.datasource.clone(),
        })
    }

    /// Full URL for a request, including the `datasource` parameter.
    pub fn request_url(&self, request: &FetchRequest) -> std::result::Result<Url, EsiError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| EsiError::Template(format!("{}: {}", request.path, e)))?;

        {
            let mut pairs = url.query_pairs_mut();
            if !self.datasource.is_empty() {
                pairs.append_pair("datasource", &self.datasource);
            }
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

#[async_trait]
impl Fetcher for EsiClient {
    async fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchResponse, EsiError> {
        let url = self.request_url(request)?;
        trace!(source_id = %request.source_id, url = %url, "Fetching");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                EsiError::Timeout(url.to_string())
            } else {
                EsiError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let rate_limit = parse_rate_limit(response.headers());
        let pages = parse_pages(response.headers());

        let body = response
            .bytes()
            .await
            .map_err(|e| EsiError::Transport(e.to_string()))?;

        if !status.is_success() {
            let mut message = String::from_utf8_lossy(&body).into_owned();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            warn!(
                source_id = %request.source_id,
                status = status.as_u16(),
                "Upstream returned non-success status"
            );
            return Err(EsiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                message,
            });
        }

        let payload =
            serde_json::from_slice(&body).map_err(|e| EsiError::Decode(e.to_string()))?;

        Ok(FetchResponse {
            payload,
            byte_size: body.len(),
            rate_limit,
            pages,
        })
    }
}
