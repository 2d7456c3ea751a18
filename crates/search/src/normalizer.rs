//! Turns extracted listing rows and detail tables into `ComponentResult`s
//! with canonical spec keys.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use partfinder_config::VendorConfig;
use partfinder_llm::{DecisionAnswer, DecisionQuery, Question};
use partfinder_navigator::{ExtractedRow, Extraction};

use crate::error::{DataError, SearchError};
use crate::model::ComponentResult;
use crate::resolver::normalise;
use crate::retry::OracleCaller;

/// A partial result row from a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub mpn: String,
    pub url: String,
    pub specs: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Listing {
    pub rows: Vec<ListingRow>,
    pub problems: Vec<DataError>,
}

/// Snake-case fallback key for a label nobody recognised.
pub fn clean_key(label: &str) -> String {
    let mut out = String::new();
    for c in label.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

/// MPN comparison key: uppercase with whitespace removed.
pub fn mpn_key(mpn: &str) -> String {
    mpn.split_whitespace().collect::<String>().to_uppercase()
}

pub struct ResultNormalizer<'a> {
    vendor: &'a VendorConfig,
    /// Vendor label → canonical key, for every label met so far this run.
    labels: HashMap<String, String>,
}

impl<'a> ResultNormalizer<'a> {
    pub fn new(vendor: &'a VendorConfig) -> Self {
        Self {
            vendor,
            labels: HashMap::new(),
        }
    }

    fn synonym_key(&self, label: &str) -> Option<String> {
        let wanted = normalise(label);
        self.vendor
            .spec_synonyms
            .iter()
            .find(|(key, labels)| normalise(key) == wanted || labels.iter().any(|l| normalise(l) == wanted))
            .map(|(key, _)| key.clone())
    }

    /// Map vendor labels to canonical spec keys.  The synonym table is tried
    /// first, then the oracle for whatever is left, then `clean_key`.  Each
    /// label is decided once per run.
    pub async fn label_keys(
        &mut self,
        labels: &[String],
        oracle: &OracleCaller<'_>,
    ) -> Result<BTreeMap<String, String>, SearchError> {
        let mut fresh: Vec<&String> = labels.iter().filter(|l| !self.labels.contains_key(*l)).collect();
        fresh.sort();
        fresh.dedup();

        let mut unknown = Vec::new();
        for label in fresh {
            match self.synonym_key(label) {
                Some(key) => {
                    self.labels.insert(label.clone(), key);
                }
                None => unknown.push(label.clone()),
            }
        }

        if !unknown.is_empty() && oracle.is_available() {
            let targets: Vec<String> = self.vendor.spec_synonyms.keys().cloned().collect();
            let question = Question::new(DecisionQuery::MapLabels {
                labels: unknown.clone(),
                targets,
            });
            if let Some(DecisionAnswer::Labels(mapped)) = oracle.ask(question, "map spec labels").await? {
                debug!(mapped = mapped.len(), asked = unknown.len(), "oracle mapped spec labels");
                self.labels.extend(mapped);
            }
        }
        for label in unknown {
            let key = clean_key(&label);
            self.labels.entry(label).or_insert(key);
        }

        Ok(labels
            .iter()
            .filter_map(|l| self.labels.get(l).map(|k| (l.clone(), k.clone())))
            .collect())
    }

    fn column(headers: &[String], wanted: &[String]) -> Option<usize> {
        let wanted: Vec<String> = wanted.iter().map(|w| normalise(w)).collect();
        headers.iter().position(|h| wanted.contains(&normalise(h)))
    }

    /// Rows of a result table.  The MPN column is found by header (first
    /// column otherwise); the product URL comes from a URL column, the MPN
    /// cell's link, or any link in the row, in that order.
    pub fn listing_rows(&self, extraction: &Extraction) -> Listing {
        let listing = &self.vendor.listing;
        let mpn_col = Self::column(&extraction.headers, &listing.mpn_headers).unwrap_or(0);
        let url_col = Self::column(&extraction.headers, &listing.url_headers);

        let mut out = Listing::default();
        for (idx, row) in extraction.rows.iter().enumerate() {
            let row_no = idx + 1;
            let Some(mpn) = row
                .cells
                .get(mpn_col)
                .map(|c| c.text.trim().to_string())
                .filter(|m| !m.is_empty())
            else {
                out.problems.push(DataError::MissingMpn { row: row_no });
                continue;
            };
            let Some(url) = row_url(row, mpn_col, url_col) else {
                out.problems.push(DataError::MissingUrl { row: row_no, mpn });
                continue;
            };

            let specs = extraction
                .headers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != mpn_col && Some(*i) != url_col)
                .filter_map(|(i, header)| {
                    let text = row.cells.get(i)?.text.trim();
                    (!text.is_empty() && !header.trim().is_empty()).then(|| (header.clone(), text.to_string()))
                })
                .collect();
            out.rows.push(ListingRow { mpn, url, specs });
        }
        out
    }

    /// Label → value pairs of a two-column spec table.
    pub fn detail_pairs(extraction: &Extraction) -> BTreeMap<String, String> {
        let mut pairs = BTreeMap::new();
        for row in &extraction.rows {
            if let [label, value, ..] = row.cells.as_slice() {
                let label = label.text.trim().trim_end_matches(':').trim();
                if !label.is_empty() {
                    pairs.entry(label.to_string()).or_insert_with(|| value.text.trim().to_string());
                }
            }
        }
        pairs
    }

    /// Rename raw labels to canonical keys.  Values are kept as displayed.
    pub async fn canonical_specs(
        &mut self,
        raw: BTreeMap<String, String>,
        oracle: &OracleCaller<'_>,
    ) -> Result<BTreeMap<String, String>, SearchError> {
        if raw.is_empty() {
            return Ok(raw);
        }
        let labels: Vec<String> = raw.keys().cloned().collect();
        let keys = self.label_keys(&labels, oracle).await?;
        let mut specs = BTreeMap::new();
        for (label, value) in raw {
            let key = keys.get(&label).cloned().unwrap_or_else(|| clean_key(&label));
            if !specs.contains_key(&key) {
                specs.insert(key, value);
                continue;
            }
            // Two labels share a canonical key; the later one keeps its own.
            let fallback = clean_key(&label);
            let mut alt = if fallback.is_empty() { key.clone() } else { fallback };
            let mut n = 2;
            while specs.contains_key(&alt) {
                alt = format!("{key}_{n}");
                n += 1;
            }
            warn!(%label, %key, stored_as = %alt, "spec labels collide on one key");
            specs.insert(alt, value);
        }
        Ok(specs)
    }

    /// Listing rows as results, reporting row problems as warnings.
    pub async fn normalize_listing(
        &mut self,
        extraction: &Extraction,
        oracle: &OracleCaller<'_>,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<ComponentResult>, SearchError> {
        let listing = self.listing_rows(extraction);
        for problem in &listing.problems {
            warn!(%problem, "skipping listing row data");
            warnings.push(problem.to_string());
        }
        let mut results = Vec::with_capacity(listing.rows.len());
        for row in listing.rows {
            let specs = self.canonical_specs(row.specs, oracle).await?;
            results.push(ComponentResult {
                mpn: row.mpn,
                url: row.url,
                specs,
            });
        }
        Ok(results)
    }

    pub async fn normalize_detail(
        &mut self,
        mpn: &str,
        url: &str,
        extraction: &Extraction,
        oracle: &OracleCaller<'_>,
    ) -> Result<ComponentResult, SearchError> {
        let specs = self.canonical_specs(Self::detail_pairs(extraction), oracle).await?;
        Ok(ComponentResult {
            mpn: mpn.to_string(),
            url: url.to_string(),
            specs,
        })
    }
}

fn row_url(row: &ExtractedRow, mpn_col: usize, url_col: Option<usize>) -> Option<String> {
    let from_url_col = url_col.and_then(|i| row.cells.get(i)).and_then(|c| {
        c.href.clone().or_else(|| {
            let text = c.text.trim();
            text.starts_with("http").then(|| text.to_string())
        })
    });
    from_url_col
        .or_else(|| row.cells.get(mpn_col).and_then(|c| c.href.clone()))
        .or_else(|| row.cells.iter().find_map(|c| c.href.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedOracle, fast_policy, vendor};
    use partfinder_navigator::ExtractedCell;
    use tokio_util::sync::CancellationToken;

    fn cell(text: &str, href: Option<&str>) -> ExtractedCell {
        ExtractedCell {
            tag: "td".to_string(),
            text: text.to_string(),
            href: href.map(str::to_string),
            attrs: BTreeMap::new(),
        }
    }

    fn table() -> Extraction {
        Extraction {
            headers: vec!["Part No.".into(), "Capacitance".into(), "Rated Voltage".into(), "Q Factor".into()],
            rows: vec![
                ExtractedRow {
                    cells: vec![
                        cell("GRM0115C1C100GE01", Some("https://vendor.test/p/GRM0115C1C100GE01")),
                        cell("10pF", None),
                        cell("16Vdc", None),
                        cell("", None),
                    ],
                },
                ExtractedRow {
                    cells: vec![cell("", None), cell("1µF", None)],
                },
                ExtractedRow {
                    cells: vec![cell("GRM155R71C104KA88", None), cell("0.1µF", None), cell("16Vdc", None), cell("30", None)],
                },
                ExtractedRow {
                    cells: vec![
                        cell("GRM155R71C104KA88D", Some("https://vendor.test/p/GRM155R71C104KA88D")),
                        cell("0.1µF", None),
                        cell("16Vdc", None),
                        cell("30", None),
                    ],
                },
            ],
        }
    }

    #[test]
    fn clean_keys_are_snake_case() {
        assert_eq!(clean_key("Q Factor"), "q_factor");
        assert_eq!(clean_key("  ESR (100kHz) "), "esr_100khz");
    }

    #[test]
    fn listing_rows_report_missing_data() {
        let vendor = vendor();
        let normalizer = ResultNormalizer::new(&vendor);
        let listing = normalizer.listing_rows(&table());
        assert_eq!(listing.rows.len(), 2);
        assert_eq!(listing.rows[0].specs.get("Capacitance").map(String::as_str), Some("10pF"));
        assert!(!listing.rows[0].specs.contains_key("Q Factor"));
        assert_eq!(
            listing.problems,
            vec![
                DataError::MissingMpn { row: 2 },
                DataError::MissingUrl {
                    row: 3,
                    mpn: "GRM155R71C104KA88".into()
                }
            ]
        );
    }

    #[tokio::test]
    async fn labels_use_synonyms_then_the_oracle_once() {
        let vendor = vendor();
        let oracle = ScriptedOracle::new(vec![Ok(DecisionAnswer::Labels(BTreeMap::from([(
            "Q Factor".to_string(),
            "tolerance".to_string(),
        )])))]);
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let caller = OracleCaller::new(Some(&oracle), &policy, &cancel);
        let mut normalizer = ResultNormalizer::new(&vendor);
        let mut warnings = Vec::new();

        let results = normalizer.normalize_listing(&table(), &caller, &mut warnings).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].specs.get("capacitance").map(String::as_str), Some("10pF"));
        assert_eq!(results[0].specs.get("rated_voltage").map(String::as_str), Some("16Vdc"));
        assert_eq!(results[1].specs.get("tolerance").map(String::as_str), Some("30"));
        assert_eq!(warnings.len(), 2);
        // Only the label missing from the synonym table reaches the oracle.
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn each_unknown_label_is_asked_about_once() {
        let vendor = vendor();
        let oracle = ScriptedOracle::new(vec![Ok(DecisionAnswer::Labels(BTreeMap::from([(
            "Q Factor".to_string(),
            "tolerance".to_string(),
        )])))]);
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let caller = OracleCaller::new(Some(&oracle), &policy, &cancel);
        let mut normalizer = ResultNormalizer::new(&vendor);
        let mut warnings = Vec::new();
        let row = |mpn: &str, cap: &str, q: &str| ExtractedRow {
            cells: vec![
                cell(mpn, Some(format!("https://vendor.test/p/{mpn}").as_str())),
                cell(cap, None),
                cell(q, None),
            ],
        };
        let extraction = Extraction {
            headers: vec!["Part No.".into(), "Capacitance".into(), "Q Factor".into()],
            rows: vec![row("A1", "1µF", "30"), row("A2", "", "40"), row("A3", "2.2µF", "")],
        };

        let results = normalizer.normalize_listing(&extraction, &caller, &mut warnings).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[1].specs.get("tolerance").map(String::as_str), Some("40"));
        assert!(!results[1].specs.contains_key("capacitance"));
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn colliding_labels_keep_both_values() {
        let vendor = vendor();
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let caller = OracleCaller::new(None, &policy, &cancel);
        let mut normalizer = ResultNormalizer::new(&vendor);
        let raw = BTreeMap::from([
            ("Package".to_string(), "0402 (1005M)".to_string()),
            ("Size Code".to_string(), "0402".to_string()),
        ]);

        let specs = normalizer.canonical_specs(raw, &caller).await.unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs.get("size").map(String::as_str), Some("0402 (1005M)"));
        assert_eq!(specs.get("size_code").map(String::as_str), Some("0402"));
    }

    #[tokio::test]
    async fn detail_tables_fall_back_to_clean_keys_without_oracle() {
        let vendor = vendor();
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        let caller = OracleCaller::new(None, &policy, &cancel);
        let mut normalizer = ResultNormalizer::new(&vendor);
        let extraction = Extraction {
            headers: vec![],
            rows: vec![
                ExtractedRow {
                    cells: vec![cell("Capacitance:", None), cell("10pF", None)],
                },
                ExtractedRow {
                    cells: vec![cell("Shelf Life", None), cell("2 years", None)],
                },
            ],
        };
        let result = normalizer
            .normalize_detail("GRM0115C1C100GE01", "https://vendor.test/p/x", &extraction, &caller)
            .await
            .unwrap();
        assert_eq!(result.specs.get("capacitance").map(String::as_str), Some("10pF"));
        assert_eq!(result.specs.get("shelf_life").map(String::as_str), Some("2 years"));
    }
}
