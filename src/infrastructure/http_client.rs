//! HTTP client for listing navigation with rate limiting and cookie auth
//!
//! The listing is gated behind a signed-in session; the `Cookie` header is read
//! from a file the user exports from their browser and can be reloaded after
//! they sign in again.

use anyhow::{Context, Result};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, USER_AGENT},
};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// HTTP client configuration for crawling
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub cookie_file: Option<PathBuf>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::infrastructure::config::defaults::USER_AGENT.to_string(),
            timeout_seconds: 30,
            max_requests_per_second: 1,
            cookie_file: None,
        }
    }
}

/// A fetched document and where redirects finally landed
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub status: StatusCode,
    pub body: String,
}

/// Rate-limited HTTP client carrying the signed-in cookie header
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    cookie: RwLock<Option<HeaderValue>>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second).context("Rate limit must be greater than 0")?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            cookie: RwLock::new(None),
            config,
        })
    }

    /// Re-read the cookie file; returns whether a cookie header is now set
    pub async fn reload_cookies(&self) -> Result<bool> {
        let Some(path) = &self.config.cookie_file else {
            return Ok(false);
        };
        if !path.exists() {
            warn!("Cookie file {:?} does not exist; requests go out signed-out", path);
            *self.cookie.write().await = None;
            return Ok(false);
        }

        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read cookie file {path:?}"))?;
        let header = parse_cookie_file(&raw);
        let loaded = header.is_some();
        *self.cookie.write().await = header
            .map(|h| HeaderValue::from_str(&h))
            .transpose()
            .context("Cookie file contains characters not allowed in a header")?;
        info!("🍪 Loaded cookies from {:?}", path);
        Ok(loaded)
    }

    /// Fetch a URL with rate limiting; non-success statuses are errors
    pub async fn get_page(&self, url: &str) -> Result<FetchedPage> {
        self.rate_limiter.until_ready().await;
        debug!("Fetching URL: {}", url);

        let mut request = self.client.get(url);
        if let Some(cookie) = self.cookie.read().await.clone() {
            request = request.header(COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {url}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP request failed with status {}: {}", status, url);
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from: {url}"))?;
        debug!("Fetched {} ({} chars)", final_url, body.len());

        Ok(FetchedPage {
            final_url,
            status,
            body,
        })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

/// Accept either a raw `Cookie` header value or a Netscape cookies.txt export
fn parse_cookie_file(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !(l.starts_with('#') && !l.starts_with("#HttpOnly_")))
        .collect();

    let pairs: Vec<String> = lines
        .iter()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            (fields.len() >= 7).then(|| format!("{}={}", fields[5], fields[6]))
        })
        .collect();

    if !pairs.is_empty() {
        return Some(pairs.join("; "));
    }
    lines.first().map(|l| l.trim_start_matches("Cookie:").trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_creation() {
        assert!(HttpClient::new(HttpClientConfig::default()).is_ok());
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let config = HttpClientConfig {
            max_requests_per_second: 0,
            ..Default::default()
        };
        assert!(HttpClient::new(config).is_err());
    }

    #[test]
    fn raw_header_cookie_file() {
        assert_eq!(
            parse_cookie_file("Cookie: session-id=1; ubid-main=2\n").as_deref(),
            Some("session-id=1; ubid-main=2")
        );
    }

    #[test]
    fn netscape_cookie_file() {
        let raw = "# Netscape HTTP Cookie File\n\
                   .amazon.com\tTRUE\t/\tTRUE\t0\tsession-id\t123\n\
                   #HttpOnly_.amazon.com\tTRUE\t/\tTRUE\t0\tat-main\tabc\n";
        assert_eq!(parse_cookie_file(raw).as_deref(), Some("session-id=123; at-main=abc"));
        assert_eq!(parse_cookie_file("\n# only comments\n"), None);
    }

    #[tokio::test]
    async fn missing_cookie_file_leaves_client_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let client = HttpClient::new(HttpClientConfig {
            cookie_file: Some(dir.path().join("absent.txt")),
            ..Default::default()
        })
        .unwrap();
        assert!(!client.reload_cookies().await.unwrap());
    }
}
