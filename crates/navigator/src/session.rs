use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use partfinder_config::NavigatorConfig;

use crate::fetch::{FetchRequest, Fetcher, ReqwestFetcher};
use crate::page::{ClickTarget, Page};
use crate::{Extraction, NavigationError, Navigator};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub pace: Duration,
    pub slow_pace: Duration,
    pub block_markers: Vec<String>,
}

impl SessionSettings {
    pub fn from_config(config: &NavigatorConfig, block_markers: Vec<String>) -> Self {
        Self {
            wait_timeout: Duration::from_secs(config.wait_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            pace: Duration::from_millis(config.pace_ms),
            slow_pace: Duration::from_millis(config.slow_pace_ms),
            block_markers,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&NavigatorConfig::default(), Vec::new())
    }
}

#[derive(Default)]
struct SessionState {
    page: Option<Page>,
    /// Control name → value, submitted with the next form click.
    pending: Vec<(String, String)>,
    last_request: Option<FetchRequest>,
    last_at: Option<Instant>,
    slowed: bool,
}

/// A navigation session over plain HTTP: pages are fetched, parsed on demand,
/// and forms are submitted the way a browser would serialise them.
pub struct HttpNavigator<F: Fetcher = ReqwestFetcher> {
    fetcher: F,
    settings: SessionSettings,
    state: Mutex<SessionState>,
}

impl HttpNavigator<ReqwestFetcher> {
    pub fn from_config(config: &NavigatorConfig, block_markers: Vec<String>) -> Result<Self, NavigationError> {
        if !config.headless {
            debug!("visible mode requested; HTTP sessions have no window to show");
        }
        let fetcher = ReqwestFetcher::new(config)?;
        Ok(Self::with_fetcher(fetcher, SessionSettings::from_config(config, block_markers)))
    }
}

impl<F: Fetcher> HttpNavigator<F> {
    pub fn with_fetcher(fetcher: F, settings: SessionSettings) -> Self {
        Self {
            fetcher,
            settings,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    async fn load(&self, state: &mut SessionState, request: FetchRequest) -> Result<(), NavigationError> {
        let pace = if state.slowed {
            self.settings.slow_pace
        } else {
            self.settings.pace
        };
        if let Some(last) = state.last_at {
            let elapsed = last.elapsed();
            if elapsed < pace {
                tokio::time::sleep(pace - elapsed).await;
            }
        }

        debug!(method = ?request.method, url = %request.url, "fetching");
        state.last_at = Some(Instant::now());
        let fetched = self.fetcher.fetch(&request).await?;
        state.last_request = Some(request);

        let url = fetched.url.to_string();
        match fetched.status {
            403 | 429 => {
                warn!(%url, status = fetched.status, "vendor refused the request");
                return Err(NavigationError::Blocked {
                    url,
                    reason: format!("HTTP {}", fetched.status),
                });
            }
            404 | 410 => return Err(NavigationError::NotFound { what: url }),
            s if s >= 500 => return Err(NavigationError::Transport(format!("HTTP {s} from {url}"))),
            s if s >= 400 => return Err(NavigationError::NotFound {
                what: format!("{url} (HTTP {s})"),
            }),
            _ => {}
        }

        let page = Page::new(fetched.url, fetched.body);
        if let Some(marker) = page.block_marker(&self.settings.block_markers) {
            warn!(%url, %marker, "anti-automation interstitial detected");
            return Err(NavigationError::Blocked { url, reason: marker });
        }

        state.page = Some(page);
        state.pending.clear();
        Ok(())
    }

    fn current_page<'a>(state: &'a SessionState, action: &str) -> Result<&'a Page, NavigationError> {
        state.page.as_ref().ok_or_else(|| NavigationError::NotFound {
            what: format!("a loaded page to {action}"),
        })
    }
}

#[async_trait]
impl<F: Fetcher> Navigator for HttpNavigator<F> {
    async fn goto(&self, url: &str) -> Result<(), NavigationError> {
        let mut state = self.state.lock().await;
        let target = match state.page.as_ref() {
            Some(page) => page.url().join(url),
            None => Url::parse(url),
        }
        .map_err(|e| NavigationError::NotFound {
            what: format!("valid URL `{url}` ({e})"),
        })?;
        self.load(&mut state, FetchRequest::get(target)).await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), NavigationError> {
        let mut state = self.state.lock().await;
        let name = Self::current_page(&state, "fill")?.control_name(selector)?;
        state.pending.retain(|(n, _)| *n != name);
        state.pending.push((name, value.to_string()));
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), NavigationError> {
        let mut state = self.state.lock().await;
        let target = Self::current_page(&state, "click")?.click_target(selector, &state.pending)?;
        let request = match target {
            ClickTarget::Follow(url) => FetchRequest::get(url),
            ClickTarget::Submit(request) => request,
        };
        self.load(&mut state, request).await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), NavigationError> {
        let timeout = timeout.min(self.settings.wait_timeout.max(Duration::from_millis(1)));
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().await;

        loop {
            if Self::current_page(&state, "wait on")?.contains(selector)? {
                return Ok(());
            }
            if Instant::now() + self.settings.poll_interval > deadline {
                return Err(NavigationError::Timeout {
                    what: format!("`{selector}`"),
                    after_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.settings.poll_interval).await;

            // Content that renders late shows up on a fresh load of the same
            // request; keep whatever was filled in so far.
            let Some(request) = state.last_request.clone() else {
                continue;
            };
            let pending = std::mem::take(&mut state.pending);
            self.load(&mut state, request).await?;
            state.pending = pending;
        }
    }

    async fn extract(&self, selector: &str) -> Result<Extraction, NavigationError> {
        let state = self.state.lock().await;
        Self::current_page(&state, "extract from")?.extract(selector)
    }

    async fn current_url(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.page.as_ref().map(|p| p.url().to_string())
    }

    async fn slow_down(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.slowed {
            return false;
        }
        state.slowed = true;
        info!(
            pace_ms = self.settings.slow_pace.as_millis() as u64,
            "slowing down after anti-automation block"
        );
        true
    }
}
