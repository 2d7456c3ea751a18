//! Lazy, breadth-first construction of the vendor's category tree.
//!
//! Only as many levels as the query path has are loaded.  At each level the
//! loader expands just the nodes whose name matches the query segment exactly;
//! when none does, every node of that level is expanded so fuzzy matching has
//! something to score.  The total number of pages is bounded.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use partfinder_config::VendorConfig;
use partfinder_navigator::{Extraction, Navigator};

use crate::error::SearchError;
use crate::model::CategoryTaxonomyNode;
use crate::resolver::normalise;
use crate::retry::{RetryPolicy, navigate};

struct Slot {
    name: String,
    path: Vec<String>,
    url: Option<String>,
    parent: Option<usize>,
}

pub struct TaxonomyLoader<'a> {
    pub navigator: &'a dyn Navigator,
    pub vendor: &'a VendorConfig,
    pub policy: &'a RetryPolicy,
    pub cancel: &'a CancellationToken,
    pub max_pages: usize,
}

/// Child categories listed on a page, de-duplicated by link target.
pub fn category_links(extraction: &Extraction) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    extraction
        .rows
        .iter()
        .filter_map(|row| {
            let cell = row.first()?;
            let href = cell.href.clone()?;
            let name = cell.text.trim().to_string();
            (!name.is_empty() && seen.insert(href.clone())).then_some((name, href))
        })
        .collect()
}

impl TaxonomyLoader<'_> {
    /// Category links on `url`, or nothing when the page has none.
    async fn children_of(&self, url: &str) -> Result<Vec<(String, String)>, SearchError> {
        let nav = self.navigator;
        let selector = self.vendor.parametric.category_link_selector.as_str();
        let extraction = navigate(self.policy, self.cancel, nav, "load category page", || async move {
            nav.goto(url).await?;
            nav.extract(selector).await
        })
        .await?;
        Ok(category_links(&extraction))
    }

    pub async fn load(&self, root_url: &str, query: &[String]) -> Result<CategoryTaxonomyNode, SearchError> {
        let mut arena = vec![Slot {
            name: self.vendor.name.clone(),
            path: Vec::new(),
            url: Some(root_url.to_string()),
            parent: None,
        }];
        let mut frontier = vec![0usize];
        let mut pages = 0usize;
        let depth = query.len().max(1);

        'levels: for level in 0..depth {
            let mut discovered = Vec::new();
            for &idx in &frontier {
                if pages >= self.max_pages {
                    warn!(max_pages = self.max_pages, "taxonomy page budget exhausted");
                    break 'levels;
                }
                let Some(url) = arena[idx].url.clone() else {
                    continue;
                };
                pages += 1;
                for (name, href) in self.children_of(&url).await? {
                    let mut path = arena[idx].path.clone();
                    path.push(name.clone());
                    arena.push(Slot {
                        name,
                        path,
                        url: Some(href),
                        parent: Some(idx),
                    });
                    discovered.push(arena.len() - 1);
                }
            }
            debug!(level, discovered = discovered.len(), pages, "taxonomy level loaded");

            let Some(segment) = query.get(level) else {
                break;
            };
            let wanted = normalise(segment);
            let matching: Vec<usize> = discovered
                .iter()
                .copied()
                .filter(|&i| normalise(&arena[i].name) == wanted)
                .collect();
            frontier = if matching.is_empty() { discovered } else { matching };
        }

        Ok(assemble(&arena, 0))
    }
}

fn assemble(arena: &[Slot], idx: usize) -> CategoryTaxonomyNode {
    let slot = &arena[idx];
    CategoryTaxonomyNode {
        name: slot.name.clone(),
        path: slot.path.clone(),
        url: slot.url.clone(),
        children: arena
            .iter()
            .enumerate()
            .filter(|(_, s)| s.parent == Some(idx))
            .map(|(i, _)| assemble(arena, i))
            .collect(),
    }
}

/// Flat tree built from one page of links, e.g. the category picker on a
/// cross-reference landing page.
pub fn flat_tree(name: &str, url: Option<String>, links: Vec<(String, String)>) -> CategoryTaxonomyNode {
    let mut root = CategoryTaxonomyNode::root(name, url);
    root.children = links
        .into_iter()
        .map(|(name, href)| CategoryTaxonomyNode {
            path: vec![name.clone()],
            name,
            url: Some(href),
            children: Vec::new(),
        })
        .collect();
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BASE, fast_policy, navigator, taxonomy, vendor};
    use partfinder_navigator::fixture::FixtureSite;

    fn q(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn expands_only_the_matching_branch() {
        let site = FixtureSite::new(BASE);
        taxonomy(&site);
        let nav = navigator(&site);
        let vendor = vendor();
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let loader = TaxonomyLoader {
            navigator: &nav,
            vendor: &vendor,
            policy: &policy,
            cancel: &cancel,
            max_pages: 10,
        };

        let tree = loader
            .load(&site.url("/products"), &q(&["Capacitors", "Ceramic Capacitors(SMD)"]))
            .await
            .unwrap();
        assert_eq!(tree.children.len(), 2);
        let caps = &tree.children[0];
        assert_eq!(caps.children.len(), 2);
        assert_eq!(caps.children[0].path, vec!["Capacitors", "Ceramic Capacitors(SMD)"]);
        assert_eq!(
            caps.children[0].url.as_deref(),
            Some("https://vendor.test/products/capacitors/ceramic-smd")
        );
        assert!(tree.children[1].children.is_empty());
        assert_eq!(site.request_count("/products/inductors"), 0);
    }

    #[tokio::test]
    async fn unmatched_level_expands_everything_within_budget() {
        let site = FixtureSite::new(BASE);
        taxonomy(&site);
        site.page("/products/inductors", "<p>no subcategories</p>");
        let nav = navigator(&site);
        let vendor = vendor();
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let loader = TaxonomyLoader {
            navigator: &nav,
            vendor: &vendor,
            policy: &policy,
            cancel: &cancel,
            max_pages: 2,
        };

        let tree = loader
            .load(&site.url("/products"), &q(&["Capacitor", "Ceramic"]))
            .await
            .unwrap();
        // Root plus one category page fit in the budget.
        assert_eq!(site.request_count("/products/capacitors"), 1);
        assert_eq!(site.request_count("/products/inductors"), 0);
        assert_eq!(tree.leaves().len(), 3);
    }
}
