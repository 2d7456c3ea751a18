//! Search orchestrator: the per-mode state machines.
//!
//! A run is strictly sequential.  Each navigation unit (goto plus the waits
//! and form actions that belong to it) goes through the retry policy as a
//! whole, so a retry always starts from a known page.  Results are
//! accumulated as they are found; a failing run hands them back as a partial
//! report marked incomplete.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use partfinder_config::{NavigatorConfig, SearchConfig, VendorConfig};
use partfinder_llm::{DecisionAnswer, DecisionOracle, Question};
use partfinder_navigator::{Extraction, NavigationError, Navigator};

use crate::error::{SearchError, SearchFailure};
use crate::model::{
    CategoryTaxonomyNode, ComponentResult, Mode, MpnRequest, ParametricRequest, RunMetadata, SearchReport,
    SearchRequest, XrefRequest,
};
use crate::normalizer::{ResultNormalizer, mpn_key};
use crate::resolver::CategoryResolver;
use crate::retry::{OracleCaller, RetryPolicy, navigate};
use crate::taxonomy::{TaxonomyLoader, category_links, flat_tree};
use crate::translator::{ParameterTranslator, filter_schema};

pub struct Orchestrator<N> {
    navigator: N,
    oracle: Option<Arc<dyn DecisionOracle>>,
    vendor: VendorConfig,
    search: SearchConfig,
    policy: RetryPolicy,
    wait_timeout: Duration,
    cancel: CancellationToken,
}

impl<N: Navigator> Orchestrator<N> {
    pub fn new(navigator: N, vendor: VendorConfig) -> Self {
        Self {
            navigator,
            oracle: None,
            vendor,
            search: SearchConfig::default(),
            policy: RetryPolicy::default(),
            wait_timeout: Duration::from_secs(NavigatorConfig::default().wait_timeout_secs),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_oracle(mut self, oracle: Option<Arc<dyn DecisionOracle>>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_search_config(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn vendor(&self) -> &VendorConfig {
        &self.vendor
    }

    fn supports(&self, mode: Mode) -> bool {
        match mode {
            Mode::Mpn => self.vendor.mpn.enabled,
            Mode::Parametric => self.vendor.parametric.enabled,
            Mode::Xref => self.vendor.xref.enabled,
        }
    }

    fn oracle_caller(&self) -> OracleCaller<'_> {
        OracleCaller::new(self.oracle.as_deref(), &self.policy, &self.cancel)
    }

    /// Absolute URL for a path configured relative to the vendor site.
    fn vendor_url(&self, path: &str) -> Result<String, SearchError> {
        let base = Url::parse(&self.vendor.base_url).map_err(|e| {
            SearchError::InvalidInput(format!("vendor base URL `{}`: {e}", self.vendor.base_url))
        })?;
        base.join(path)
            .map(String::from)
            .map_err(|e| SearchError::InvalidInput(format!("vendor path `{path}`: {e}")))
    }

    async fn step<T, F, Fut>(&self, step: &str, unit: F) -> Result<T, SearchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, NavigationError>>,
    {
        navigate(&self.policy, &self.cancel, &self.navigator, step, unit).await
    }

    /// Extract from the page already loaded.
    async fn extract(&self, selector: &str) -> Result<Extraction, SearchError> {
        self.navigator
            .extract(selector)
            .await
            .map_err(|e| SearchError::Extraction(format!("`{selector}`: {e}")))
    }

    fn taxonomy_loader(&self) -> TaxonomyLoader<'_> {
        TaxonomyLoader {
            navigator: &self.navigator,
            vendor: &self.vendor,
            policy: &self.policy,
            cancel: &self.cancel,
            max_pages: self.search.max_taxonomy_pages,
        }
    }

    /// Execute one request.  On failure the results gathered so far come
    /// back inside the error with `complete == false`.
    pub async fn run(&self, request: &SearchRequest) -> Result<SearchReport, SearchFailure> {
        let mut run = Run::new(self, request);
        info!(
            run_id = %run.metadata.run_id,
            mode = %request.mode(),
            query = %run.metadata.query,
            vendor = %self.vendor.name,
            "search started"
        );
        let outcome = run.execute(request).await;
        run.finish(outcome)
    }
}

/// Mutable state of one run.  Caches live here and die with the run.
struct Run<'o, N> {
    orch: &'o Orchestrator<N>,
    metadata: RunMetadata,
    results: Vec<ComponentResult>,
    seen: HashSet<String>,
    resolver: CategoryResolver,
    translator: ParameterTranslator<'o>,
    normalizer: ResultNormalizer<'o>,
}

impl<'o, N: Navigator> Run<'o, N> {
    fn new(orch: &'o Orchestrator<N>, request: &SearchRequest) -> Self {
        Self {
            orch,
            metadata: RunMetadata::start(request.mode(), request.describe(), orch.vendor.name.clone()),
            results: Vec::new(),
            seen: HashSet::new(),
            resolver: CategoryResolver::new(orch.search.similarity_floor),
            translator: ParameterTranslator::new(&orch.vendor),
            normalizer: ResultNormalizer::new(&orch.vendor),
        }
    }

    fn warn(&mut self, message: String) {
        warn!(run_id = %self.metadata.run_id, "{message}");
        self.metadata.warnings.push(message);
    }

    /// Append unless the MPN was already seen.  Listing order is kept.
    fn push(&mut self, result: ComponentResult) {
        if !self.seen.insert(mpn_key(&result.mpn)) {
            debug!(mpn = %result.mpn, "duplicate part number skipped");
            return;
        }
        self.results.push(result);
    }

    async fn execute(&mut self, request: &SearchRequest) -> Result<(), SearchError> {
        request.validate()?;
        if self.orch.cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }
        let mode = request.mode();
        if !self.orch.supports(mode) {
            return Err(SearchError::Unsupported {
                mode,
                vendor: self.orch.vendor.name.clone(),
            });
        }
        match request {
            SearchRequest::Mpn(r) => self.mpn(r).await,
            SearchRequest::Parametric(r) => self.parametric(r).await,
            SearchRequest::Xref(r) => self.xref(r).await,
        }
    }

    fn finish(self, outcome: Result<(), SearchError>) -> Result<SearchReport, SearchFailure> {
        let Run {
            mut metadata, results, ..
        } = self;
        metadata.finished_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                metadata.complete = true;
                info!(
                    run_id = %metadata.run_id,
                    results = results.len(),
                    warnings = metadata.warnings.len(),
                    "search finished"
                );
                Ok(SearchReport { results, metadata })
            }
            Err(err) => {
                metadata.complete = false;
                error!(
                    run_id = %metadata.run_id,
                    stage = %err.stage(),
                    partial = results.len(),
                    error = %err,
                    "search failed"
                );
                Err(SearchFailure {
                    error: err,
                    partial: SearchReport { results, metadata },
                })
            }
        }
    }

    // ── Shared steps ─────────────────────────────────────────────────────────

    async fn resolve_category(&mut self, query: &[String]) -> Result<CategoryTaxonomyNode, SearchError> {
        let orch = self.orch;
        let root = orch.vendor_url(&orch.vendor.parametric.taxonomy_url)?;
        let tree = orch.taxonomy_loader().load(&root, query).await?;
        let node = self
            .resolver
            .resolve(query, &tree, &orch.oracle_caller())
            .await?
            .ok_or_else(|| SearchError::CategoryUnresolved {
                query: query.join(" > "),
            })?;
        self.metadata.category_path = Some(node.path.clone());
        Ok(node)
    }

    /// Visit a product page and build its result.  A page that cannot be
    /// reached still yields the part, with whatever the listing showed.
    async fn detail(
        &mut self,
        mpn: &str,
        url: &str,
        listing_specs: BTreeMap<String, String>,
    ) -> Result<(), SearchError> {
        let orch = self.orch;
        let nav = &orch.navigator;
        let wait = orch.wait_timeout;
        let ready = orch.vendor.detail.ready_selector.as_str();
        let table = orch.vendor.detail.spec_table_selector.as_str();
        let caller = orch.oracle_caller();

        let fetched = orch
            .step("load detail page", || async move {
                nav.goto(url).await?;
                nav.wait_for(ready, wait).await?;
                nav.extract(table).await
            })
            .await;

        let result = match fetched {
            Ok(extraction) => self.normalizer.normalize_detail(mpn, url, &extraction, &caller).await?,
            Err(SearchError::Navigation { source, .. }) => {
                self.warn(format!("detail page for {mpn} unavailable ({source}); listing values kept"));
                ComponentResult {
                    mpn: mpn.to_string(),
                    url: url.to_string(),
                    specs: self.normalizer.canonical_specs(listing_specs, &caller).await?,
                }
            }
            Err(other) => return Err(other),
        };
        self.push(result);
        Ok(())
    }

    // ── MPN ──────────────────────────────────────────────────────────────────

    async fn mpn(&mut self, request: &MpnRequest) -> Result<(), SearchError> {
        let orch = self.orch;
        let cfg = &orch.vendor.mpn;
        let nav = &orch.navigator;
        let wait = orch.wait_timeout;
        let mpn = request.mpn.trim();
        let search_url = orch.vendor_url(&cfg.search_url)?;
        let search_url = search_url.as_str();
        let input = cfg.input_selector.as_str();
        let submit = cfg.submit_selector.as_str();
        let outcome = format!(
            "{}, {}, {}",
            cfg.results_selector, orch.vendor.listing.empty_selector, orch.vendor.detail.ready_selector
        );
        let outcome = outcome.as_str();

        orch.step("submit part number search", || async move {
            nav.goto(search_url).await?;
            nav.wait_for(input, wait).await?;
            nav.fill(input, mpn).await?;
            nav.click(submit).await?;
            nav.wait_for(outcome, wait).await
        })
        .await?;

        let listing = self.normalizer.listing_rows(&orch.extract(&cfg.results_selector).await?);
        for problem in listing.problems {
            self.warn(problem.to_string());
        }

        let wanted = mpn_key(mpn);
        let target = match listing.rows.len() {
            0 => {
                // Some vendors jump straight to the product page on an exact hit.
                let table = orch.extract(&orch.vendor.detail.spec_table_selector).await?;
                if table.is_empty() {
                    info!(%mpn, "no matching part");
                    return Ok(());
                }
                let url = nav.current_url().await.unwrap_or_else(|| search_url.to_string());
                let result = self
                    .normalizer
                    .normalize_detail(mpn, &url, &table, &orch.oracle_caller())
                    .await?;
                self.push(result);
                return Ok(());
            }
            1 => listing.rows.into_iter().next(),
            n => {
                let exact = listing.rows.into_iter().find(|row| mpn_key(&row.mpn) == wanted);
                if exact.is_none() {
                    self.warn(format!("{n} candidates for {mpn}, none matches exactly"));
                }
                exact
            }
        };

        match target {
            Some(row) => self.detail(&row.mpn, &row.url, row.specs).await,
            None => Ok(()),
        }
    }

    // ── Parametric ───────────────────────────────────────────────────────────

    async fn parametric(&mut self, request: &ParametricRequest) -> Result<(), SearchError> {
        let orch = self.orch;
        let cfg = &orch.vendor.parametric;
        let nav = &orch.navigator;
        let wait = orch.wait_timeout;
        let caller = orch.oracle_caller();

        let query = request.category_path();
        let node = self.resolve_category(&query).await?;
        let category_url = node.url.clone().ok_or_else(|| SearchError::CategoryUnresolved {
            query: node.display_path(),
        })?;
        let category_url = category_url.as_str();
        let submit = cfg.submit_selector.as_str();
        let fields = cfg.filter_field_selector.as_str();

        let schema_rows = orch
            .step("load category filters", || async move {
                nav.goto(category_url).await?;
                nav.wait_for(submit, wait).await?;
                nav.extract(fields).await
            })
            .await?;
        let schema = filter_schema(&schema_rows);
        debug!(fields = schema.len(), category = %node.display_path(), "filter schema read");

        let translation = self
            .translator
            .translate(&schema, &request.constraints, &caller)
            .await?;
        self.metadata.unmapped = translation.unmapped.clone();
        for warning in translation.warnings {
            self.warn(warning);
        }

        let fills: Vec<(String, String)> = translation
            .mapping
            .inputs()
            .into_iter()
            .map(|input| (format!("[name='{}']", input.control), input.value))
            .collect();
        let fills = fills.as_slice();
        let outcome = format!("{}, {}", cfg.results_selector, orch.vendor.listing.empty_selector);
        let outcome = outcome.as_str();

        orch.step("submit filtered search", || async move {
            nav.goto(category_url).await?;
            nav.wait_for(submit, wait).await?;
            for (selector, value) in fills {
                nav.fill(selector, value).await?;
            }
            nav.click(submit).await?;
            nav.wait_for(outcome, wait).await
        })
        .await?;

        let mut page = 1usize;
        loop {
            let extraction = orch.extract(&cfg.results_selector).await?;
            let rows = self
                .normalizer
                .normalize_listing(&extraction, &caller, &mut self.metadata.warnings)
                .await?;
            for row in rows {
                if self.results.len() >= request.max_results {
                    break;
                }
                self.push(row);
            }
            debug!(page, results = self.results.len(), "result page read");

            if self.results.len() >= request.max_results {
                break;
            }
            if page >= orch.search.max_pages {
                self.warn(format!("stopped after {page} result pages"));
                break;
            }
            let next = orch
                .extract(&cfg.next_page_selector)
                .await?
                .rows
                .iter()
                .find_map(|row| row.first().and_then(|cell| cell.href.clone()));
            let Some(next) = next else {
                break;
            };
            let next = next.as_str();
            page += 1;
            orch.step("load next result page", || async move {
                nav.goto(next).await?;
                nav.wait_for(outcome, wait).await
            })
            .await?;
        }
        Ok(())
    }

    // ── Cross-reference ──────────────────────────────────────────────────────

    async fn xref(&mut self, request: &XrefRequest) -> Result<(), SearchError> {
        let orch = self.orch;
        let cfg = &orch.vendor.xref;
        let nav = &orch.navigator;
        let wait = orch.wait_timeout;
        let competitor = request.competitor_mpn.trim();

        let form_url = match &request.category_path {
            Some(path) => {
                let node = self.resolve_category(path).await?;
                self.entry_on_category_page(&node).await?
            }
            None => self.probe_entry(competitor).await?,
        };
        let form_url = form_url.as_str();
        let input = cfg.input_selector.as_str();
        let submit = cfg.submit_selector.as_str();
        let outcome = format!("{}, {}", cfg.results_selector, orch.vendor.listing.empty_selector);
        let outcome = outcome.as_str();

        orch.step("submit cross-reference", || async move {
            nav.goto(form_url).await?;
            nav.wait_for(input, wait).await?;
            nav.fill(input, competitor).await?;
            nav.click(submit).await?;
            nav.wait_for(outcome, wait).await
        })
        .await?;

        let extraction = orch.extract(&cfg.results_selector).await?;
        let rows = self
            .normalizer
            .normalize_listing(&extraction, &orch.oracle_caller(), &mut self.metadata.warnings)
            .await?;
        if rows.is_empty() {
            info!(%competitor, "no equivalents listed");
        }
        for row in rows {
            self.push(row);
        }
        Ok(())
    }

    /// The cross-reference form linked from a category page, or the
    /// vendor-wide tool when the page has no such link.
    async fn entry_on_category_page(&mut self, node: &CategoryTaxonomyNode) -> Result<String, SearchError> {
        let orch = self.orch;
        let nav = &orch.navigator;
        let cfg = &orch.vendor.xref;
        let url = node.url.clone().ok_or_else(|| SearchError::CategoryUnresolved {
            query: node.display_path(),
        })?;
        let url = url.as_str();
        let entry = cfg.entry_link_selector.as_str();

        let links = orch
            .step("load category page", || async move {
                nav.goto(url).await?;
                nav.extract(entry).await
            })
            .await?;
        if let Some(href) = links.rows.iter().find_map(|row| row.first().and_then(|c| c.href.clone())) {
            return Ok(href);
        }
        if !cfg.url.is_empty() {
            return orch.vendor_url(&cfg.url);
        }
        Err(SearchError::Navigation {
            step: "find cross-reference entry".to_string(),
            source: NavigationError::NotFound {
                what: format!("`{entry}` on {url}"),
            },
        })
    }

    /// Find the page holding the cross-reference form when no category was
    /// given.  Vendors that scope the tool by category get one inferred from
    /// part-number hints, then from the oracle.
    async fn probe_entry(&mut self, competitor: &str) -> Result<String, SearchError> {
        let orch = self.orch;
        let nav = &orch.navigator;
        let cfg = &orch.vendor.xref;
        let wait = orch.wait_timeout;

        if cfg.url.is_empty() {
            let root = orch.vendor_url(&orch.vendor.parametric.taxonomy_url)?;
            let tree = orch.taxonomy_loader().load(&root, &[]).await?;
            let node = self.pick_category(competitor, &tree).await?;
            return self.entry_on_category_page(&node).await;
        }

        let url = orch.vendor_url(&cfg.url)?;
        let url_ref = url.as_str();
        let probe = format!("{}, {}", cfg.input_selector, cfg.entry_link_selector);
        let probe = probe.as_str();
        let entry = cfg.entry_link_selector.as_str();

        let links = orch
            .step("probe cross-reference entry", || async move {
                nav.goto(url_ref).await?;
                nav.wait_for(probe, wait).await?;
                nav.extract(entry).await
            })
            .await?;
        if !orch.extract(&cfg.input_selector).await?.is_empty() {
            return Ok(url);
        }

        let tree = flat_tree(&orch.vendor.name, Some(url.clone()), category_links(&links));
        let node = self.pick_category(competitor, &tree).await?;
        node.url.ok_or_else(|| SearchError::CategoryUnresolved {
            query: competitor.to_string(),
        })
    }

    async fn pick_category(
        &mut self,
        competitor: &str,
        tree: &CategoryTaxonomyNode,
    ) -> Result<CategoryTaxonomyNode, SearchError> {
        let orch = self.orch;
        let caller = orch.oracle_caller();

        if let Some(hint) = orch.vendor.hint_for(competitor) {
            if let Some(node) = self.resolver.resolve(&hint.path, tree, &caller).await? {
                info!(%competitor, category = %node.display_path(), "category inferred from part number");
                self.metadata.category_path = Some(node.path.clone());
                return Ok(node);
            }
        }

        let leaves = tree.leaves();
        if caller.is_available() && !leaves.is_empty() {
            let question = Question::pick_one(
                "vendor product category of an electronic component",
                competitor,
                leaves.iter().map(|n| n.display_path()).collect(),
            )
            .with_hint("The subject is a competitor's manufacturer part number.");
            if let Some(DecisionAnswer::Picked(label)) = caller.ask(question, "infer category").await? {
                if let Some(node) = leaves.iter().find(|n| n.display_path() == label) {
                    let node = (*node).clone();
                    self.metadata.category_path = Some(node.path.clone());
                    return Ok(node);
                }
            }
        }

        Err(SearchError::CategoryUnresolved {
            query: competitor.to_string(),
        })
    }
}
