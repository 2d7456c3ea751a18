//! Test doubles: a scripted oracle and a small fixture vendor site.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use partfinder_config::VendorConfig;
use partfinder_llm::{DecisionAnswer, DecisionOracle, OracleError, Question};
use partfinder_navigator::fixture::FixtureSite;
use partfinder_navigator::{HttpNavigator, SessionSettings};

use crate::retry::RetryPolicy;

pub const BASE: &str = "https://vendor.test";

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        blocked_cooldown: Duration::from_millis(1),
        oracle_retries: 2,
    }
}

pub fn vendor() -> VendorConfig {
    VendorConfig {
        name: "fixture".to_string(),
        base_url: BASE.to_string(),
        ..VendorConfig::default()
    }
}

pub fn navigator(site: &FixtureSite) -> HttpNavigator<FixtureSite> {
    HttpNavigator::with_fetcher(
        site.clone(),
        SessionSettings {
            wait_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            pace: Duration::ZERO,
            slow_pace: Duration::ZERO,
            block_markers: vec!["captcha".to_string()],
        },
    )
}

/// Oracle that replays a fixed script and records what it was asked.  Once
/// the script runs out it declines.
#[derive(Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<DecisionAnswer, OracleError>>>,
    asked: Mutex<Vec<Question>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<DecisionAnswer, OracleError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn questions(&self) -> Vec<Question> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn ask(&self, question: &Question) -> Result<DecisionAnswer, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.asked.lock().unwrap().push(question.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(DecisionAnswer::Declined))
    }
}

// ── Fixture pages ────────────────────────────────────────────────────────────

pub fn links(class: &str, items: &[(&str, &str)]) -> String {
    items
        .iter()
        .map(|(name, href)| format!(r#"<li><a class="{class}" href="{href}">{name}</a></li>"#))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A listing table with `Part No.`, `Capacitance` and `Rated Voltage`
/// columns; each row links to `/p/<mpn>`.
pub fn listing(id: &str, rows: &[(&str, &str, &str)], next: Option<&str>) -> String {
    let body = rows
        .iter()
        .map(|(mpn, cap, volt)| {
            format!(r#"<tr><td><a href="/p/{mpn}">{mpn}</a></td><td>{cap}</td><td>{volt}</td></tr>"#)
        })
        .collect::<Vec<_>>()
        .join("\n");
    let next = next
        .map(|href| format!(r#"<a class="next-page" href="{href}">Next</a>"#))
        .unwrap_or_default();
    format!(
        r#"<html><body>
<table id="{id}">
  <thead><tr><th>Part No.</th><th>Capacitance</th><th>Rated Voltage</th></tr></thead>
  <tbody>{body}</tbody>
</table>
{next}
</body></html>"#
    )
}

pub fn detail(specs: &[(&str, &str)]) -> String {
    let rows = specs
        .iter()
        .map(|(label, value)| format!("<tr><th>{label}</th><td>{value}</td></tr>"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(r#"<html><body><table class="spec-table">{rows}</table></body></html>"#)
}

pub fn search_form() -> String {
    r#"<html><body>
<form id="search" action="/search" method="get">
  <input type="text" name="q">
  <button type="submit">Search</button>
</form>
</body></html>"#
        .to_string()
}

/// Vendor root with two top-level categories; capacitors has two
/// ceramic subcategories.
pub fn taxonomy(site: &FixtureSite) {
    site.page(
        "/products",
        links(
            "category-link",
            &[("Capacitors", "/products/capacitors"), ("Inductors", "/products/inductors")],
        ),
    );
    site.page(
        "/products/capacitors",
        links(
            "category-link",
            &[
                ("Ceramic Capacitors(SMD)", "/products/capacitors/ceramic-smd"),
                ("Ceramic Capacitors(Lead)", "/products/capacitors/ceramic-lead"),
            ],
        ),
    );
}
