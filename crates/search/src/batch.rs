//! Concurrent MPN batches: one orchestrator (and navigator session) per part
//! number, a bounded number in flight, results reported in input order.

use futures::stream::{self, StreamExt};
use tracing::info;

use partfinder_navigator::Navigator;

use crate::error::{SearchError, SearchFailure};
use crate::model::{Mode, RunMetadata, SearchReport, SearchRequest};
use crate::orchestrator::Orchestrator;

#[derive(Debug)]
pub struct BatchItem {
    pub input: String,
    pub outcome: Result<SearchReport, SearchFailure>,
}

impl BatchItem {
    /// The report, complete or partial.
    pub fn report(&self) -> &SearchReport {
        match &self.outcome {
            Ok(report) => report,
            Err(failure) => &failure.partial,
        }
    }
}

/// Read a batch file: one part number per line, blank lines and `#`
/// comments ignored.
pub fn parse_batch(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Search every part number with at most `concurrency` runs in flight.
///
/// `make` builds a fresh orchestrator per item; orchestrators share nothing
/// except what `make` hands them (typically the gated oracle and the
/// cancellation token).
pub async fn run_batch<N, F>(mpns: Vec<String>, concurrency: usize, vendor: &str, make: F) -> Vec<BatchItem>
where
    N: Navigator,
    F: Fn(&str) -> Result<Orchestrator<N>, SearchError>,
{
    info!(items = mpns.len(), concurrency, "batch started");
    let items: Vec<BatchItem> = stream::iter(mpns)
        .map(|mpn| {
            let built = make(&mpn);
            async move {
                let request = SearchRequest::mpn(mpn.clone());
                let outcome = match built {
                    Ok(orchestrator) => orchestrator.run(&request).await,
                    Err(error) => Err(SearchFailure {
                        error,
                        partial: SearchReport {
                            results: Vec::new(),
                            metadata: RunMetadata::start(Mode::Mpn, request.describe(), vendor),
                        },
                    }),
                };
                BatchItem { input: mpn, outcome }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let failed = items.iter().filter(|i| i.outcome.is_err()).count();
    info!(items = items.len(), failed, "batch finished");
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BASE, detail, fast_policy, listing, navigator, search_form, vendor};
    use partfinder_navigator::fixture::FixtureSite;
    use std::time::Duration;

    #[test]
    fn batch_file_skips_comments_and_blanks() {
        let parsed = parse_batch("# capacitors\nGRM0115C1C100GE01\n\n  LQG15HS1N0S02 # inductor\n#\n");
        assert_eq!(parsed, vec!["GRM0115C1C100GE01", "LQG15HS1N0S02"]);
    }

    #[tokio::test]
    async fn items_keep_input_order_and_failures() {
        let site = FixtureSite::new(BASE);
        site.page("/search", search_form());
        for mpn in ["P-1", "P-2"] {
            site.page_with(
                "/search",
                &[("q", mpn)],
                listing("search-results", &[(mpn, "10pF", "16Vdc")], None),
            );
            site.page(&format!("/p/{mpn}"), detail(&[("Capacitance", "10pF")]));
        }
        site.page_with("/search", &[("q", "P-3")], r#"<p class="no-results">none</p>"#);

        let inputs = parse_batch("P-1\nBROKEN\nP-3\nP-2\n");
        let items = run_batch(inputs, 2, "fixture", |mpn| {
            if mpn == "BROKEN" {
                return Err(SearchError::InvalidInput("no session".to_string()));
            }
            Ok(Orchestrator::new(navigator(&site), vendor())
                .with_policy(fast_policy())
                .with_wait_timeout(Duration::from_millis(50)))
        })
        .await;

        let order: Vec<&str> = items.iter().map(|i| i.input.as_str()).collect();
        assert_eq!(order, vec!["P-1", "BROKEN", "P-3", "P-2"]);
        assert_eq!(items[0].report().results[0].mpn, "P-1");
        assert_eq!(items[1].outcome.as_ref().unwrap_err().error.exit_code(), 2);
        assert!(!items[1].report().metadata.complete);
        assert!(items[2].report().results.is_empty());
        assert_eq!(items[3].report().results[0].mpn, "P-2");
    }
}
