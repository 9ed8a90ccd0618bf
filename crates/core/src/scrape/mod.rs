use crate::config::Settings;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;

pub mod article;
pub mod leaderboard;

const DEFAULT_BASE_URL: &str = "https://rekt.news";
const LEADERBOARD_PATH: &str = "/leaderboard/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// The incident feed as the orchestrator sees it. Stubbed out in tests.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    fn base_url(&self) -> &str;

    /// Fetch the leaderboard page. A failure here is fatal for the run.
    async fn fetch_leaderboard(&self) -> Result<String>;

    /// Fetch one incident's detail page. Failures are per-article and
    /// recoverable.
    async fn fetch_article(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct RektFeedClient {
    http: reqwest::Client,
    base_url: String,
}

impl RektFeedClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings
            .feed_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("REKT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build feed http client")?;

        Ok(Self { http, base_url })
    }

    async fn fetch_html(&self, url: &str) -> Result<String> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .with_context(|| format!("failed to read body from {url}"))?;
        if !status.is_success() {
            anyhow::bail!("GET {url} returned HTTP {status}");
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl FeedSource for RektFeedClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_leaderboard(&self) -> Result<String> {
        let url = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            LEADERBOARD_PATH
        );
        self.fetch_html(&url).await
    }

    async fn fetch_article(&self, url: &str) -> Result<String> {
        self.fetch_html(url).await
    }
}
