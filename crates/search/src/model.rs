//! Request, taxonomy, mapping and result types shared across the search core.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SearchError;

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Mpn,
    Parametric,
    Xref,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mpn => "mpn",
            Self::Parametric => "parametric",
            Self::Xref => "xref",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpnRequest {
    pub mpn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametricRequest {
    pub category: String,
    pub subcategory: Option<String>,
    pub constraints: BTreeMap<String, Constraint>,
    pub max_results: usize,
}

impl ParametricRequest {
    pub fn category_path(&self) -> Vec<String> {
        let mut path = vec![self.category.trim().to_string()];
        if let Some(sub) = self.subcategory.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            path.push(sub.to_string());
        }
        path
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrefRequest {
    pub competitor_mpn: String,
    pub category_path: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchRequest {
    Mpn(MpnRequest),
    Parametric(ParametricRequest),
    Xref(XrefRequest),
}

impl SearchRequest {
    pub fn mpn(mpn: impl Into<String>) -> Self {
        Self::Mpn(MpnRequest { mpn: mpn.into() })
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Mpn(_) => Mode::Mpn,
            Self::Parametric(_) => Mode::Parametric,
            Self::Xref(_) => Mode::Xref,
        }
    }

    /// Short human description used in logs and run metadata.
    pub fn describe(&self) -> String {
        match self {
            Self::Mpn(r) => r.mpn.trim().to_string(),
            Self::Parametric(r) => r.category_path().join(" > "),
            Self::Xref(r) => r.competitor_mpn.trim().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        match self {
            Self::Mpn(r) => {
                if r.mpn.trim().is_empty() {
                    return Err(SearchError::InvalidInput("part number is empty".to_string()));
                }
            }
            Self::Parametric(r) => {
                if r.category.trim().is_empty() {
                    return Err(SearchError::InvalidInput("category is empty".to_string()));
                }
                if r.max_results == 0 {
                    return Err(SearchError::InvalidInput("max_results must be at least 1".to_string()));
                }
                for (name, constraint) in &r.constraints {
                    constraint.validate(name)?;
                }
            }
            Self::Xref(r) => {
                if r.competitor_mpn.trim().is_empty() {
                    return Err(SearchError::InvalidInput(
                        "competitor part number is empty".to_string(),
                    ));
                }
                if let Some(path) = &r.category_path {
                    if path.is_empty() || path.iter().any(|s| s.trim().is_empty()) {
                        return Err(SearchError::InvalidInput(
                            "category path must be a non-empty list of names".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Constraints ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Constraint {
    Range {
        min: Option<f64>,
        max: Option<f64>,
        unit: Option<String>,
    },
    OneOf {
        values: Vec<String>,
    },
    /// Needs interpretation before it can be submitted.
    FreeText {
        text: String,
    },
}

/// A finite number from a JSON number or numeric string.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|v| v.is_finite())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Constraint {
    pub fn range(min: Option<f64>, max: Option<f64>, unit: Option<&str>) -> Self {
        Self::Range {
            min,
            max,
            unit: unit.map(str::to_string),
        }
    }

    /// Read one constraint from the JSON a user supplied.
    ///
    /// Objects with `min`/`max`/`value`/`unit` become ranges, arrays become
    /// accepted-value sets, bare numbers (or numeric strings) become exact
    /// values and any other string is free text.
    pub fn from_json(name: &str, value: &Value) -> Result<Self, SearchError> {
        let bad = |why: &str| SearchError::InvalidInput(format!("parameter `{name}`: {why}"));
        match value {
            Value::Object(map) => {
                let field = |key: &str| -> Result<Option<f64>, SearchError> {
                    match map.get(key) {
                        None | Some(Value::Null) => Ok(None),
                        Some(v) => number(v)
                            .map(Some)
                            .ok_or_else(|| bad(&format!("`{key}` is not a number"))),
                    }
                };
                let exact = field("value")?;
                let min = field("min")?.or(exact);
                let max = field("max")?.or(exact);
                let unit = match map.get("unit") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(u)) if u.trim().is_empty() => None,
                    Some(Value::String(u)) => Some(u.trim().to_string()),
                    Some(_) => return Err(bad("`unit` must be a string")),
                };
                if min.is_none() && max.is_none() {
                    return Err(bad("a range needs `min`, `max` or `value`"));
                }
                Ok(Self::Range { min, max, unit })
            }
            Value::Array(items) => {
                let values = items
                    .iter()
                    .map(|v| scalar_text(v).ok_or_else(|| bad("accepted values must be scalars")))
                    .collect::<Result<Vec<_>, _>>()?;
                if values.is_empty() {
                    return Err(bad("accepted-value list is empty"));
                }
                Ok(Self::OneOf { values })
            }
            Value::Number(_) => Ok(Self::Range {
                min: number(value),
                max: number(value),
                unit: None,
            }),
            Value::String(s) if s.trim().is_empty() => Err(bad("value is empty")),
            Value::String(s) if s.trim().parse::<f64>().is_ok_and(|v| !v.is_finite()) => {
                Err(bad("value must be a finite number"))
            }
            Value::String(s) => match number(value) {
                Some(n) => Ok(Self::Range {
                    min: Some(n),
                    max: Some(n),
                    unit: None,
                }),
                None => Ok(Self::FreeText {
                    text: s.trim().to_string(),
                }),
            },
            Value::Bool(b) => Ok(Self::OneOf {
                values: vec![b.to_string()],
            }),
            Value::Null => Err(bad("value is null")),
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), SearchError> {
        if let Self::Range { min, max, .. } = self {
            if min.iter().chain(max.iter()).any(|v| !v.is_finite()) {
                return Err(SearchError::InvalidInput(format!(
                    "parameter `{name}`: bounds must be finite numbers"
                )));
            }
        }
        if let Self::Range {
            min: Some(min),
            max: Some(max),
            ..
        } = self
        {
            if min > max {
                return Err(SearchError::InvalidInput(format!(
                    "parameter `{name}`: min {min} is greater than max {max}"
                )));
            }
        }
        Ok(())
    }

    /// Plain-language rendering for oracle prompts and warnings.
    pub fn describe(&self) -> String {
        match self {
            Self::Range { min, max, unit } => {
                let unit = unit.as_deref().map(|u| format!(" {u}")).unwrap_or_default();
                match (min, max) {
                    (Some(a), Some(b)) if a == b => format!("{a}{unit}"),
                    (Some(a), Some(b)) => format!("{a} to {b}{unit}"),
                    (Some(a), None) => format!("at least {a}{unit}"),
                    (None, Some(b)) => format!("at most {b}{unit}"),
                    (None, None) => "any value".to_string(),
                }
            }
            Self::OneOf { values } => format!("one of {}", values.join(", ")),
            Self::FreeText { text } => text.clone(),
        }
    }
}

/// Parse the `--parameters` object into named constraints.
pub fn constraints_from_json(value: &Value) -> Result<BTreeMap<String, Constraint>, SearchError> {
    let map = value.as_object().ok_or_else(|| {
        SearchError::InvalidInput("parameters must be a JSON object of name → constraint".to_string())
    })?;
    map.iter()
        .map(|(name, v)| {
            let constraint = Constraint::from_json(name, v)?;
            constraint.validate(name)?;
            Ok((name.trim().to_string(), constraint))
        })
        .collect()
}

// ── Taxonomy ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTaxonomyNode {
    pub name: String,
    /// Names from the first level below the root down to this node.
    pub path: Vec<String>,
    pub url: Option<String>,
    pub children: Vec<CategoryTaxonomyNode>,
}

impl CategoryTaxonomyNode {
    pub fn root(name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            name: name.into(),
            path: Vec::new(),
            url,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Leaves below this node in listing order.  The root itself is never
    /// reported.
    pub fn leaves(&self) -> Vec<&CategoryTaxonomyNode> {
        let mut out = Vec::new();
        for child in &self.children {
            if child.is_leaf() {
                out.push(child);
            } else {
                out.extend(child.leaves());
            }
        }
        out
    }

    pub fn display_path(&self) -> String {
        self.path.join(" > ")
    }
}

// ── Field mapping ────────────────────────────────────────────────────────────

/// How a constraint value is rewritten before submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueTransform {
    Identity,
    Convert { from: String, to: String },
    Choose { option: String },
}

/// One value written into one vendor form control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterInput {
    pub control: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedField {
    pub field_id: String,
    pub label: String,
    pub transform: ValueTransform,
    pub inputs: Vec<FilterInput>,
}

/// Canonical constraint name → the vendor filter it was bound to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub fields: BTreeMap<String, MappedField>,
}

impl FieldMapping {
    pub fn inputs(&self) -> Vec<FilterInput> {
        self.fields.values().flat_map(|f| f.inputs.iter().cloned()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub mpn: String,
    pub url: String,
    pub specs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub mode: Mode,
    pub query: String,
    pub vendor: String,
    pub category_path: Option<Vec<String>>,
    /// Constraints dropped because no vendor filter could carry them.
    pub unmapped: Vec<String>,
    pub warnings: Vec<String>,
    /// `false` when the run was cut short; results are then a prefix.
    pub complete: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunMetadata {
    pub fn start(mode: Mode, query: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            query: query.into(),
            vendor: vendor.into(),
            category_path: None,
            unmapped: Vec::new(),
            warnings: Vec::new(),
            complete: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub results: Vec<ComponentResult>,
    pub metadata: RunMetadata,
}
