//! Raw page transport underneath [`crate::HttpNavigator`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use url::Url;

use partfinder_config::NavigatorConfig;

use crate::NavigationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: FormMethod,
    pub url: Url,
    /// Body pairs for `Post`; `Get` requests carry everything in `url`.
    pub form: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: FormMethod::Get,
            url,
            form: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, NavigationError>;
}

/// reqwest-backed fetcher with a cookie jar, so a session keeps whatever
/// state the vendor sets across page loads.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestFetcher {
    pub fn new(config: &NavigatorConfig) -> Result<Self, NavigationError> {
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .redirect(Policy::limited(10))
            .build()
            .map_err(|e| NavigationError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, NavigationError> {
        let builder = match request.method {
            FormMethod::Get => self.client.get(request.url.clone()),
            FormMethod::Post => self.client.post(request.url.clone()).form(&request.form),
        };

        let resp = builder
            .header("Accept", "text/html,application/xhtml+xml")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NavigationError::Timeout {
                        what: request.url.to_string(),
                        after_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    NavigationError::Transport(format!("{}: {e}", request.url))
                }
            })?;

        let url = resp.url().clone();
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                NavigationError::Timeout {
                    what: url.to_string(),
                    after_ms: self.timeout.as_millis() as u64,
                }
            } else {
                NavigationError::Transport(format!("failed to read body from {url}: {e}"))
            }
        })?;

        Ok(FetchedPage { url, status, body })
    }
}
