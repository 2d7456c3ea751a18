//! Category resolution: user category path → vendor taxonomy node.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use partfinder_llm::{DecisionAnswer, Question};

use crate::error::SearchError;
use crate::model::CategoryTaxonomyNode;
use crate::retry::OracleCaller;

/// Lower-case and collapse whitespace.
pub fn normalise(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn tokens(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub node: &'a CategoryTaxonomyNode,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    Found(&'a CategoryTaxonomyNode),
    /// Candidates above the similarity floor, in listing order.
    Ambiguous(Vec<Candidate<'a>>),
    NotFound,
}

fn exact<'a>(query: &[String], root: &'a CategoryTaxonomyNode) -> Option<&'a CategoryTaxonomyNode> {
    let mut node = root;
    for segment in query {
        let wanted = normalise(segment);
        node = node.children.iter().find(|c| normalise(&c.name) == wanted)?;
    }
    (!query.is_empty()).then_some(node)
}

/// Pure matching step: exact path first, then token-overlap scoring over
/// leaves.
pub fn match_path<'a>(query: &[String], root: &'a CategoryTaxonomyNode, floor: f64) -> Resolution<'a> {
    if let Some(node) = exact(query, root) {
        return Resolution::Found(node);
    }

    let wanted = tokens(&query.join(" "));
    let candidates: Vec<Candidate<'a>> = root
        .leaves()
        .into_iter()
        .map(|node| Candidate {
            node,
            score: jaccard(&wanted, &tokens(&node.path.join(" "))),
        })
        .filter(|c| c.score >= floor && c.score > 0.0)
        .collect();

    let perfect: Vec<&Candidate<'a>> = candidates.iter().filter(|c| c.score >= 1.0).collect();
    match (candidates.len(), perfect.as_slice()) {
        (0, _) => Resolution::NotFound,
        (1, _) => Resolution::Found(candidates[0].node),
        (_, [only]) => Resolution::Found(only.node),
        _ => Resolution::Ambiguous(candidates),
    }
}

/// Tie-break used when no oracle is configured: the first candidate (listing
/// order) whose path starts with the query's first segment, else the best
/// score, earliest in listing order.
pub fn fallback<'a>(query: &[String], candidates: &[Candidate<'a>]) -> Option<&'a CategoryTaxonomyNode> {
    let head = query.first().map(|s| normalise(s));
    let prefixed = candidates.iter().find(|c| {
        matches!((&head, c.node.path.first()), (Some(h), Some(first)) if normalise(first) == *h)
    });
    if let Some(c) = prefixed {
        return Some(c.node);
    }
    let mut best: Option<&Candidate<'a>> = None;
    for c in candidates {
        if best.is_none_or(|b| c.score > b.score) {
            best = Some(c);
        }
    }
    best.map(|c| c.node)
}

/// Resolver with a per-run cache: the same query against the same taxonomy
/// never reaches the oracle twice.
#[derive(Debug, Default)]
pub struct CategoryResolver {
    floor: f64,
    cache: HashMap<String, Option<CategoryTaxonomyNode>>,
}

impl CategoryResolver {
    pub fn new(floor: f64) -> Self {
        Self {
            floor,
            cache: HashMap::new(),
        }
    }

    fn key(query: &[String]) -> String {
        query.iter().map(|s| normalise(s)).collect::<Vec<_>>().join("\u{1f}")
    }

    pub async fn resolve(
        &mut self,
        query: &[String],
        taxonomy: &CategoryTaxonomyNode,
        oracle: &OracleCaller<'_>,
    ) -> Result<Option<CategoryTaxonomyNode>, SearchError> {
        let key = Self::key(query);
        if let Some(hit) = self.cache.get(&key) {
            debug!(query = %query.join(" > "), "category resolution cache hit");
            return Ok(hit.clone());
        }

        let resolved = match match_path(query, taxonomy, self.floor) {
            Resolution::Found(node) => Some(node.clone()),
            Resolution::NotFound => None,
            Resolution::Ambiguous(candidates) => {
                self.disambiguate(query, &candidates, oracle).await?
            }
        };

        if let Some(node) = &resolved {
            info!(query = %query.join(" > "), resolved = %node.display_path(), "category resolved");
        }
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    async fn disambiguate(
        &self,
        query: &[String],
        candidates: &[Candidate<'_>],
        oracle: &OracleCaller<'_>,
    ) -> Result<Option<CategoryTaxonomyNode>, SearchError> {
        if !oracle.is_available() {
            let chosen = fallback(query, candidates);
            if let Some(node) = chosen {
                info!(
                    candidates = candidates.len(),
                    chosen = %node.display_path(),
                    "ambiguous category without an oracle; using deterministic fallback"
                );
            }
            return Ok(chosen.cloned());
        }

        let labels: Vec<String> = candidates.iter().map(|c| c.node.display_path()).collect();
        let question = Question::pick_one("vendor product category", query.join(" > "), labels)
            .with_hint("Paths are written parent > child.");
        match oracle.ask(question, "resolve category").await? {
            Some(DecisionAnswer::Picked(label)) => Ok(candidates
                .iter()
                .find(|c| c.node.display_path() == label)
                .map(|c| c.node.clone())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedOracle, fast_policy};
    use partfinder_llm::OracleError;
    use tokio_util::sync::CancellationToken;

    fn node(path: &[&str], children: Vec<CategoryTaxonomyNode>) -> CategoryTaxonomyNode {
        CategoryTaxonomyNode {
            name: path.last().copied().unwrap_or_default().to_string(),
            path: path.iter().map(|s| s.to_string()).collect(),
            url: Some(format!("https://vendor.test/{}", path.join("/"))),
            children,
        }
    }

    fn taxonomy() -> CategoryTaxonomyNode {
        let mut root = CategoryTaxonomyNode::root("vendor", None);
        root.children = vec![
            node(
                &["Capacitors"],
                vec![
                    node(&["Capacitors", "Ceramic Capacitors(SMD)"], vec![]),
                    node(&["Capacitors", "Ceramic Capacitors(Lead)"], vec![]),
                    node(&["Capacitors", "Polymer Aluminum Electrolytic"], vec![]),
                ],
            ),
            node(
                &["Inductors"],
                vec![node(&["Inductors", "Ceramic Core Inductors"], vec![])],
            ),
        ];
        root
    }

    fn q(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_ignores_case_and_spacing() {
        let tax = taxonomy();
        match match_path(&q(&["capacitors", "ceramic  capacitors(smd)"]), &tax, 0.34) {
            Resolution::Found(n) => assert_eq!(n.name, "Ceramic Capacitors(SMD)"),
            other => panic!("expected exact match, got {other:?}"),
        }
    }

    #[test]
    fn fuzzy_match_reports_ambiguity_in_listing_order() {
        let tax = taxonomy();
        let Resolution::Ambiguous(candidates) = match_path(&q(&["Capacitors", "Ceramic"]), &tax, 0.34) else {
            panic!("expected ambiguity");
        };
        let names: Vec<&str> = candidates.iter().map(|c| c.node.name.as_str()).collect();
        assert_eq!(names, vec!["Ceramic Capacitors(SMD)", "Ceramic Capacitors(Lead)"]);
    }

    #[test]
    fn token_identical_path_is_found() {
        let tax = taxonomy();
        let res = match_path(&q(&["Capacitors", "Ceramic Capacitors SMD"]), &tax, 0.34);
        assert!(matches!(res, Resolution::Found(n) if n.name == "Ceramic Capacitors(SMD)"));
    }

    #[test]
    fn nothing_above_floor_is_not_found() {
        let tax = taxonomy();
        assert_eq!(match_path(&q(&["Connectors"]), &tax, 0.34), Resolution::NotFound);
    }

    #[test]
    fn fallback_prefers_query_prefix_then_score() {
        let tax = taxonomy();
        let Resolution::Ambiguous(candidates) = match_path(&q(&["Ceramic"]), &tax, 0.2) else {
            panic!("expected ambiguity");
        };
        // No candidate path starts with "Ceramic"; best score wins, ties by listing order.
        let chosen = fallback(&q(&["Ceramic"]), &candidates).unwrap();
        assert_eq!(chosen.name, "Ceramic Capacitors(SMD)");

        let Resolution::Ambiguous(candidates) = match_path(&q(&["Inductors", "Ceramic"]), &tax, 0.2) else {
            panic!("expected ambiguity");
        };
        let chosen = fallback(&q(&["Inductors", "Ceramic"]), &candidates).unwrap();
        assert_eq!(chosen.name, "Ceramic Core Inductors");
    }

    #[tokio::test]
    async fn resolution_is_cached_and_idempotent() {
        let tax = taxonomy();
        let oracle = ScriptedOracle::new(vec![Ok(DecisionAnswer::Picked(
            "Capacitors > Ceramic Capacitors(Lead)".to_string(),
        ))]);
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let caller = OracleCaller::new(Some(&oracle), &policy, &cancel);
        let mut resolver = CategoryResolver::new(0.34);

        let query = q(&["Capacitors", "Ceramic"]);
        let first = resolver.resolve(&query, &tax, &caller).await.unwrap();
        let second = resolver.resolve(&query, &tax, &caller).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.unwrap().name, "Ceramic Capacitors(Lead)");
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn exact_match_never_asks_the_oracle() {
        let tax = taxonomy();
        let oracle = ScriptedOracle::new(vec![]);
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let caller = OracleCaller::new(Some(&oracle), &policy, &cancel);
        let mut resolver = CategoryResolver::new(0.34);
        let found = resolver
            .resolve(&q(&["Capacitors", "Ceramic Capacitors(SMD)"]), &tax, &caller)
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn oracle_decline_means_unresolved() {
        let tax = taxonomy();
        let oracle = ScriptedOracle::new(vec![Ok(DecisionAnswer::Declined)]);
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let caller = OracleCaller::new(Some(&oracle), &policy, &cancel);
        let mut resolver = CategoryResolver::new(0.34);
        let found = resolver.resolve(&q(&["Capacitors", "Ceramic"]), &tax, &caller).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn auth_failure_propagates() {
        let tax = taxonomy();
        let oracle = ScriptedOracle::new(vec![Err(OracleError::AuthFailed("bad key".to_string()))]);
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let caller = OracleCaller::new(Some(&oracle), &policy, &cancel);
        let mut resolver = CategoryResolver::new(0.34);
        let err = resolver
            .resolve(&q(&["Capacitors", "Ceramic"]), &tax, &caller)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 6);
    }
}
