//! HTTP-backed listing session
//!
//! Navigation is sequential and paced: every request waits out the configured
//! delay since the previous one and is bounded by the navigation timeout. When a
//! sign-in page comes back instead of the listing, the session waits once for the
//! user to sign in, reloads the cookie file and retries; if it is still signed out
//! it proceeds with an empty page.

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{ListingPage, ListingSession, ListingTarget, Section, SectionCounts};
use crate::infrastructure::config::{AppConfig, vine};
use crate::infrastructure::http_client::{FetchedPage, HttpClient, HttpClientConfig};
use crate::infrastructure::parsing::{ListingParser, ListingSelectors, ParsingError};

/// Pacing and sign-in behaviour of a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub marketplace_url: String,
    pub sections: Vec<Section>,
    pub navigation_timeout: Duration,
    pub request_delay: Duration,
    pub sign_in_wait: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            marketplace_url: config.crawl.marketplace_url.clone(),
            sections: config.crawl.sections.clone(),
            navigation_timeout: config.crawl.navigation_timeout(),
            request_delay: config.crawl.request_delay(),
            sign_in_wait: Duration::from_secs(config.session.sign_in_wait_seconds),
        }
    }
}

pub struct HttpListingSession {
    client: Arc<HttpClient>,
    parser: ListingParser,
    settings: SessionSettings,
    last_navigation: Option<Instant>,
    // page 1 of each section, fetched for the counts and reused by the crawl
    first_pages: HashMap<Section, ListingPage>,
    // set after a sign-in wait that did not help; cleared by the next listing
    signed_out: bool,
}

impl HttpListingSession {
    pub fn new(client: Arc<HttpClient>, parser: ListingParser, settings: SessionSettings) -> Self {
        Self {
            client,
            parser,
            settings,
            last_navigation: None,
            first_pages: HashMap::new(),
            signed_out: false,
        }
    }

    /// Build the HTTP client and parser from the application configuration
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let client = HttpClient::new(HttpClientConfig {
            user_agent: config.session.user_agent.clone(),
            timeout_seconds: config.crawl.navigation_timeout_seconds,
            max_requests_per_second: config.session.max_requests_per_second,
            cookie_file: config.session.cookie_file.clone(),
        })?;
        if !client.reload_cookies().await? {
            warn!("No session cookie loaded; the listing will likely serve a sign-in page");
        }

        let parser = ListingParser::with_selectors(&config.crawl.marketplace_url, &ListingSelectors::default())
            .context("Failed to build listing parser")?;

        Ok(Self::new(Arc::new(client), parser, SessionSettings::from_config(config)))
    }

    async fn pace(&mut self) {
        if let Some(last) = self.last_navigation {
            let elapsed = last.elapsed();
            if elapsed < self.settings.request_delay {
                tokio::time::sleep(self.settings.request_delay - elapsed).await;
            }
        }
        self.last_navigation = Some(Instant::now());
    }

    async fn fetch(&mut self, target: &ListingTarget, page: u32) -> Result<FetchedPage> {
        self.pace().await;
        let url = vine::listing_url(&self.settings.marketplace_url, target, page)?;
        debug!("Navigating to {} page {}: {}", target, page, url);

        tokio::time::timeout(self.settings.navigation_timeout, self.client.get_page(url.as_str()))
            .await
            .map_err(|_| {
                anyhow!(
                    "Navigation to {} page {} timed out after {:?}",
                    target,
                    page,
                    self.settings.navigation_timeout
                )
            })?
    }

    fn parse(&self, fetched: &FetchedPage, target: &ListingTarget, page: u32) -> std::result::Result<ListingPage, ParsingError> {
        if fetched.final_url.contains("/ap/signin") {
            return Err(ParsingError::SignInRequired {
                url: fetched.final_url.clone(),
            });
        }
        self.parser.parse(&fetched.body, target, page)
    }

    async fn navigate(&mut self, target: &ListingTarget, page: u32) -> Result<ListingPage> {
        let fetched = self.fetch(target, page).await?;
        match self.parse(&fetched, target, page) {
            Ok(listing) => {
                self.signed_out = false;
                Ok(listing)
            }
            Err(ParsingError::SignInRequired { url }) => self.recover_sign_in(target, page, &url).await,
            Err(e) => Err(anyhow!(e)).with_context(|| format!("Failed to parse {} page {}", target, page)),
        }
    }

    async fn recover_sign_in(&mut self, target: &ListingTarget, page: u32, url: &str) -> Result<ListingPage> {
        if self.signed_out {
            warn!("Still signed out, treating {} page {} as empty", target, page);
            return Ok(empty_page(page));
        }

        warn!(
            "🔒 Sign-in page served at {}; waiting up to {:?} for a fresh session cookie",
            url, self.settings.sign_in_wait
        );
        tokio::time::sleep(self.settings.sign_in_wait).await;
        match self.client.reload_cookies().await {
            Ok(true) => info!("Session cookie reloaded, retrying {} page {}", target, page),
            Ok(false) => warn!("No session cookie available, retrying {} page {} anyway", target, page),
            Err(e) => warn!("Failed to reload cookies: {}", e),
        }

        let fetched = self.fetch(target, page).await?;
        match self.parse(&fetched, target, page) {
            Ok(listing) => Ok(listing),
            Err(ParsingError::SignInRequired { .. }) => {
                warn!("Sign-in still required, proceeding with {} page {} as empty", target, page);
                self.signed_out = true;
                Ok(empty_page(page))
            }
            Err(e) => Err(anyhow!(e)).with_context(|| format!("Failed to parse {} page {}", target, page)),
        }
    }
}

fn empty_page(page: u32) -> ListingPage {
    ListingPage {
        page_number: page,
        ..ListingPage::default()
    }
}

#[async_trait]
impl ListingSession for HttpListingSession {
    async fn section_counts(&mut self) -> Result<SectionCounts> {
        self.first_pages.clear();
        let mut counts = SectionCounts::new();
        for section in self.settings.sections.clone() {
            let page = self
                .navigate(&ListingTarget::section(section), 1)
                .await
                .with_context(|| format!("Failed to read the result count of {}", section))?;
            let total = page.total_results.unwrap_or(0);
            debug!("Section {} reports {} results", section, total);
            counts.set(section, total);
            self.first_pages.insert(section, page);
        }
        Ok(counts)
    }

    async fn open(&mut self, target: &ListingTarget, page: u32) -> Result<ListingPage> {
        if page == 1 && target.category_id.is_none() {
            if let Some(cached) = self.first_pages.remove(&target.section) {
                return Ok(cached);
            }
        }
        self.navigate(target, page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SIGN_IN: &str = r#"<html><body><form name="signIn"><input id="ap_email"></form></body></html>"#;

    fn listing_html(total: u32, asins: &[&str]) -> String {
        let tiles: String = asins
            .iter()
            .map(|asin| {
                format!(
                    r#"<div class="vvp-item-tile"><div class="vvp-item-product-title-container"><a href="/dp/{asin}"><span class="a-truncate-full">Item {asin}</span></a></div></div>"#
                )
            })
            .collect();
        format!(
            r#"<html><body><div id="vvp-items-grid-container"><p>Displaying 1-24 of {total} results</p><div id="vvp-items">{tiles}</div></div></body></html>"#
        )
    }

    /// Serve `respond(request_index, path)` over plain HTTP on a loopback port
    async fn serve<F>(respond: F) -> (String, Arc<AtomicUsize>)
    where
        F: Fn(usize, &str) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let body = respond(index, &path);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (base, hits)
    }

    fn session(base: &str, sections: Vec<Section>) -> HttpListingSession {
        let client = HttpClient::new(HttpClientConfig {
            max_requests_per_second: 100,
            ..Default::default()
        })
        .unwrap();
        HttpListingSession::new(
            Arc::new(client),
            ListingParser::new(base).unwrap(),
            SessionSettings {
                marketplace_url: base.to_string(),
                sections,
                navigation_timeout: Duration::from_secs(5),
                request_delay: Duration::ZERO,
                sign_in_wait: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn section_counts_reuse_first_pages() {
        let (base, hits) = serve(|_, path| {
            if path.contains("queue=potluck") {
                listing_html(1234, &["B0ABC12345"])
            } else {
                listing_html(7, &["B0DEF67890"])
            }
        })
        .await;
        let mut session = session(&base, vec![Section::Recommended, Section::Available]);

        let counts = session.section_counts().await.unwrap();
        assert_eq!(counts.get(Section::Recommended), 1234);
        assert_eq!(counts.get(Section::Available), 7);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let page = session
            .open(&ListingTarget::section(Section::Recommended), 1)
            .await
            .unwrap();
        assert_eq!(page.items[0].id.as_str(), "B0ABC12345");
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // the cached page is handed out once
        session
            .open(&ListingTarget::section(Section::Recommended), 1)
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sign_in_page_is_retried_once() {
        let (base, hits) = serve(|index, _| {
            if index == 0 {
                SIGN_IN.to_string()
            } else {
                listing_html(3, &["B0ABC12345"])
            }
        })
        .await;
        let mut session = session(&base, vec![Section::Recommended]);

        let page = session
            .open(&ListingTarget::section(Section::Recommended), 2)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_sign_in_proceeds_with_empty_pages() {
        let (base, hits) = serve(|_, _| SIGN_IN.to_string()).await;
        let mut session = session(&base, vec![Section::Recommended]);

        let page = session
            .open(&ListingTarget::section(Section::Recommended), 2)
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.page_number, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // no second wait while still signed out
        session
            .open(&ListingTarget::section(Section::Recommended), 3)
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unreachable_listing_is_a_navigation_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let mut session = session(&base, vec![Section::Recommended]);
        assert!(session.section_counts().await.is_err());
    }
}
