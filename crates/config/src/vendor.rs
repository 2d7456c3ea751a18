//! Vendor profile: every fact about one catalog site lives here as data.
//!
//! The search core reads entry points, selectors, column names and synonym
//! tables from this profile and never branches on a vendor's identity.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub name: String,
    /// Root that relative entry points below are joined onto.
    pub base_url: String,
    /// Lower-cased substrings that identify an anti-automation interstitial.
    pub block_markers: Vec<String>,
    pub listing: ListingConfig,
    pub detail: DetailPageConfig,
    pub mpn: MpnSearchConfig,
    pub parametric: ParametricSearchConfig,
    pub xref: XrefSearchConfig,
    /// Canonical constraint name → vendor filter labels it may appear under.
    pub parameter_synonyms: BTreeMap<String, Vec<String>>,
    /// Canonical spec key → column/label spellings used on result pages.
    pub spec_synonyms: BTreeMap<String, Vec<String>>,
}

/// Column headers that carry the part number and product link in result
/// listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub mpn_headers: Vec<String>,
    pub url_headers: Vec<String>,
    /// Marker the vendor renders instead of a results table when nothing
    /// matched.
    pub empty_selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailPageConfig {
    /// Element whose presence means the detail page finished rendering.
    pub ready_selector: String,
    /// Label/value table(s) holding the product specification.
    pub spec_table_selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MpnSearchConfig {
    pub enabled: bool,
    pub search_url: String,
    pub input_selector: String,
    pub submit_selector: String,
    pub results_selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParametricSearchConfig {
    pub enabled: bool,
    /// Page listing the top-level product categories.
    pub taxonomy_url: String,
    /// Links to child categories on any taxonomy page.
    pub category_link_selector: String,
    /// Filter controls on a category's parametric page.
    pub filter_field_selector: String,
    pub submit_selector: String,
    pub results_selector: String,
    pub next_page_selector: String,
    /// Range filters are submitted as `<field><suffix>` inputs.
    pub range_min_suffix: String,
    pub range_max_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XrefSearchConfig {
    pub enabled: bool,
    /// Vendor-wide cross-reference tool.  Empty when the tool only exists
    /// underneath a category page.
    pub url: String,
    /// Link from a category page to that category's cross-reference tool.
    pub entry_link_selector: String,
    pub input_selector: String,
    pub submit_selector: String,
    pub results_selector: String,
    pub category_hints: Vec<CategoryHint>,
}

/// Part-number patterns that imply a category path.  Patterns are regular
/// expressions matched case-insensitively against the trimmed part number;
/// anchor them (`^GRM`) so a series code cannot match mid-string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryHint {
    pub patterns: Vec<String>,
    pub path: Vec<String>,
}

impl CategoryHint {
    fn regexes(&self) -> Result<Vec<Regex>, regex::Error> {
        self.patterns
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| RegexBuilder::new(p.trim()).case_insensitive(true).build())
            .collect()
    }

    pub fn matches(&self, part_number: &str) -> bool {
        let part_number = part_number.trim();
        self.regexes()
            .map(|set| set.iter().any(|re| re.is_match(part_number)))
            .unwrap_or(false)
    }
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            name: "example-components".to_string(),
            base_url: "https://www.example-components.com".to_string(),
            block_markers: vec![
                "captcha".to_string(),
                "access denied".to_string(),
                "unusual traffic".to_string(),
            ],
            listing: ListingConfig::default(),
            detail: DetailPageConfig::default(),
            mpn: MpnSearchConfig::default(),
            parametric: ParametricSearchConfig::default(),
            xref: XrefSearchConfig::default(),
            parameter_synonyms: default_parameter_synonyms(),
            spec_synonyms: default_spec_synonyms(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            mpn_headers: strings(&["Part No.", "Part Number", "MPN", "Part #"]),
            url_headers: strings(&["URL", "Link", "Product Page"]),
            empty_selector: ".no-results".to_string(),
        }
    }
}

impl Default for DetailPageConfig {
    fn default() -> Self {
        Self {
            ready_selector: "table.spec-table".to_string(),
            spec_table_selector: "table.spec-table".to_string(),
        }
    }
}

impl Default for MpnSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: "/search".to_string(),
            input_selector: "form#search input[name='q']".to_string(),
            submit_selector: "form#search button[type='submit']".to_string(),
            results_selector: "table#search-results".to_string(),
        }
    }
}

impl Default for ParametricSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            taxonomy_url: "/products".to_string(),
            category_link_selector: "a.category-link".to_string(),
            filter_field_selector: "form#filters [data-filter]".to_string(),
            submit_selector: "form#filters button[type='submit']".to_string(),
            results_selector: "table#search-results".to_string(),
            next_page_selector: "a.next-page".to_string(),
            range_min_suffix: "_min".to_string(),
            range_max_suffix: "_max".to_string(),
        }
    }
}

impl Default for XrefSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "/cross-reference".to_string(),
            entry_link_selector: "a.xref-link".to_string(),
            input_selector: "form#xref input[name='competitor']".to_string(),
            submit_selector: "form#xref button[type='submit']".to_string(),
            results_selector: "table#xref-results".to_string(),
            category_hints: vec![
                CategoryHint {
                    patterns: strings(&[r"^GRM\d", r"^GCM\d", r"^CL\d{2}[A-Z]", r"^C\d{4}C", r"^CAP\d"]),
                    path: strings(&["Capacitors", "Ceramic Capacitors"]),
                },
                CategoryHint {
                    patterns: strings(&[r"^RC\d{4}", r"^ERJ-?\d", r"^CRCW\d", r"^RES\d"]),
                    path: strings(&["Resistors", "Chip Resistors"]),
                },
                CategoryHint {
                    patterns: strings(&[r"^LQ[GHMW]\d", r"^MLZ\d", r"^IND\d"]),
                    path: strings(&["Inductors", "Chip Inductors"]),
                },
            ],
        }
    }
}

impl VendorConfig {
    /// First configured hint with a pattern matching `part_number`.
    pub fn hint_for(&self, part_number: &str) -> Option<&CategoryHint> {
        self.xref.category_hints.iter().find(|hint| hint.matches(part_number))
    }

    /// Reject hint patterns that do not compile.
    pub fn check_hints(&self) -> Result<(), regex::Error> {
        self.xref
            .category_hints
            .iter()
            .try_for_each(|hint| hint.regexes().map(drop))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

fn default_parameter_synonyms() -> BTreeMap<String, Vec<String>> {
    [
        ("Capacitance", &["Cap", "Capacitance Value", "Nominal Capacitance"][..]),
        ("Rated Voltage", &["Voltage", "Rated Voltage DC", "Voltage Rating", "Vdc"][..]),
        ("Tolerance", &["Capacitance Tolerance", "Tol"][..]),
        (
            "Temperature Characteristic",
            &["Dielectric", "Temperature Coefficient", "TC"][..],
        ),
        ("Resistance", &["Resistance Value", "Nominal Resistance"][..]),
        ("Inductance", &["Inductance Value", "Nominal Inductance"][..]),
        ("Size", &["Case Size", "Package", "Size Code", "L x W"][..]),
        ("Operating Temperature", &["Operating Temperature Range", "Temp Range"][..]),
    ]
    .into_iter()
    .map(|(canonical, aliases)| (canonical.to_string(), strings(aliases)))
    .collect()
}

fn default_spec_synonyms() -> BTreeMap<String, Vec<String>> {
    [
        ("capacitance", &["Capacitance", "Cap", "Capacitance Value", "Nominal Capacitance"][..]),
        ("rated_voltage", &["Rated Voltage", "Rated Voltage DC", "Voltage", "Voltage Rating"][..]),
        ("tolerance", &["Tolerance", "Capacitance Tolerance", "Tol"][..]),
        (
            "temperature_characteristic",
            &["Temperature Characteristic", "Dielectric", "Temperature Coefficient", "TC"][..],
        ),
        ("resistance", &["Resistance", "Resistance Value"][..]),
        ("inductance", &["Inductance", "Inductance Value"][..]),
        ("size", &["Size", "Case Size", "Package", "Size Code", "L x W"][..]),
        (
            "operating_temperature",
            &["Operating Temperature", "Operating Temperature Range", "Temp Range"][..],
        ),
        ("packaging", &["Packaging", "Package Type"][..]),
        ("status", &["Status", "Lifecycle", "Product Status"][..]),
    ]
    .into_iter()
    .map(|(canonical, aliases)| (canonical.to_string(), strings(aliases)))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_for_matches_case_insensitively() {
        let vendor = VendorConfig::default();
        let hint = vendor.hint_for("grm188r71h104ka93d").unwrap();
        assert_eq!(hint.path, vec!["Capacitors", "Ceramic Capacitors"]);
        assert!(vendor.hint_for("ZZZ-000").is_none());
    }

    #[test]
    fn hints_match_series_prefixes_only() {
        let vendor = VendorConfig::default();
        let path = |mpn: &str| vendor.hint_for(mpn).map(|h| h.path[0].as_str());
        assert_eq!(path("RC0402FR-0710KL"), Some("Resistors"));
        assert_eq!(path(" CL05A105KA5NQNC"), Some("Capacitors"));
        assert_eq!(path("LQG15HS2N2S02D"), Some("Inductors"));
        // Series codes buried inside other part numbers.
        assert_eq!(path("TPS62RC1"), None);
        assert_eq!(path("BAV99RL"), None);
        assert_eq!(path("SCAPE-12"), None);
        assert_eq!(path("RCA-JACK"), None);
    }

    #[test]
    fn broken_hint_patterns_are_reported() {
        let mut vendor = VendorConfig::default();
        assert!(vendor.check_hints().is_ok());
        vendor.xref.category_hints.push(CategoryHint {
            patterns: vec!["^(GRM".to_string()],
            path: vec!["Capacitors".to_string()],
        });
        assert!(vendor.check_hints().is_err());
        assert!(!vendor.xref.category_hints[3].matches("GRM188"));
    }

    #[test]
    fn default_profile_enables_every_mode() {
        let vendor = VendorConfig::default();
        assert!(vendor.mpn.enabled && vendor.parametric.enabled && vendor.xref.enabled);
        assert!(vendor.parameter_synonyms.contains_key("Capacitance"));
        assert!(vendor.spec_synonyms.contains_key("capacitance"));
    }
}
