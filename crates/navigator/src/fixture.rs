//! In-memory vendor site for exercising navigation without a network.
//!
//! Routes are keyed by path plus the query/form pairs a request must carry;
//! when several routes match, the one requiring the most pairs wins and
//! later registrations shadow earlier ones of equal specificity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use crate::NavigationError;
use crate::fetch::{FetchRequest, FetchedPage, Fetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Timeout,
    Status(u16),
}

#[derive(Debug, Clone)]
struct Route {
    path: String,
    params: Vec<(String, String)>,
    status: u16,
    body: String,
}

#[derive(Debug, Default)]
struct SiteState {
    routes: Vec<Route>,
    failures: HashMap<String, (Failure, usize)>,
    requests: Vec<FetchRequest>,
}

#[derive(Debug, Clone)]
pub struct FixtureSite {
    base: String,
    state: Arc<Mutex<SiteState>>,
}

impl FixtureSite {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            state: Arc::new(Mutex::new(SiteState::default())),
        }
    }

    /// Absolute URL for `path` on this site.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn page(&self, path: &str, body: impl Into<String>) -> &Self {
        self.route(path, &[], 200, body.into())
    }

    /// A page served only to requests carrying every `(name, value)` pair.
    pub fn page_with(&self, path: &str, params: &[(&str, &str)], body: impl Into<String>) -> &Self {
        self.route(path, params, 200, body.into())
    }

    pub fn status(&self, path: &str, status: u16) -> &Self {
        self.route(path, &[], status, String::new())
    }

    /// Make the next `times` requests for `path` fail before routing.
    pub fn fail_next(&self, path: &str, failure: Failure, times: usize) -> &Self {
        if let Ok(mut state) = self.state.lock() {
            state.failures.insert(path.to_string(), (failure, times));
        }
        self
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.state.lock().map(|s| s.requests.clone()).unwrap_or_default()
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.state
            .lock()
            .map(|s| s.requests.iter().filter(|r| r.url.path() == path).count())
            .unwrap_or_default()
    }

    fn route(&self, path: &str, params: &[(&str, &str)], status: u16, body: String) -> &Self {
        if let Ok(mut state) = self.state.lock() {
            state.routes.push(Route {
                path: path.to_string(),
                params: params
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                status,
                body,
            });
        }
        self
    }
}

fn request_pairs(request: &FetchRequest) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
    pairs.extend(request.form.iter().cloned());
    pairs
}

#[async_trait]
impl Fetcher for FixtureSite {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, NavigationError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| NavigationError::Transport("fixture state poisoned".to_string()))?;
        state.requests.push(request.clone());

        let path = request.url.path().to_string();
        if let Some((failure, remaining)) = state.failures.get_mut(&path) {
            if *remaining > 0 {
                *remaining -= 1;
                match *failure {
                    Failure::Timeout => {
                        return Err(NavigationError::Timeout {
                            what: request.url.to_string(),
                            after_ms: 0,
                        });
                    }
                    Failure::Status(status) => {
                        return Ok(FetchedPage {
                            url: request.url.clone(),
                            status,
                            body: String::new(),
                        });
                    }
                }
            }
        }

        let pairs = request_pairs(request);
        let route = state
            .routes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.path == path && r.params.iter().all(|p| pairs.contains(p)))
            .max_by_key(|(i, r)| (r.params.len(), *i))
            .map(|(_, r)| r.clone());

        let url: Url = request.url.clone();
        Ok(match route {
            Some(route) => FetchedPage {
                url,
                status: route.status,
                body: route.body,
            },
            None => FetchedPage {
                url,
                status: 404,
                body: "<title>Not Found</title>".to_string(),
            },
        })
    }
}
