//! Parameter translation: user constraints → vendor filter inputs.
//!
//! Field names are matched by label, id and the vendor's synonym table before
//! the oracle is asked to pick a field.  Values are converted with the fixed
//! unit table; the oracle only ever chooses names and options.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use partfinder_config::VendorConfig;
use partfinder_llm::{DecisionAnswer, DecisionQuery, Question};
use partfinder_navigator::Extraction;

use crate::error::SearchError;
use crate::model::{Constraint, FieldMapping, FilterInput, MappedField, ValueTransform};
use crate::resolver::normalise;
use crate::retry::OracleCaller;
use crate::units::{self, Bounds, format_number, parse_bounds, parse_quantity};

/// Constraint name holding a free-text requirement sentence.
pub const DETAILS_KEY: &str = "details";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Submitted as `<id><min suffix>` / `<id><max suffix>` inputs.
    Range { unit: Option<String> },
    Choice { options: Vec<FilterOption> },
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterField {
    pub id: String,
    pub label: String,
    /// `name` of the form control for choice and text fields.
    pub control: String,
    pub kind: FieldKind,
}

/// Read the filter schema from the controls matched on a category page.
///
/// Each control carries `data-filter` (its id) and optionally `data-label`,
/// `data-unit` and `data-kind="range"`.
pub fn filter_schema(extraction: &Extraction) -> Vec<FilterField> {
    extraction
        .rows
        .iter()
        .filter_map(|row| {
            let el = row.first()?;
            let id = el
                .attr("data-filter")
                .or_else(|| el.attr("name"))
                .map(str::trim)
                .filter(|s| !s.is_empty())?
                .to_string();
            let label = ["data-label", "aria-label", "title"]
                .iter()
                .find_map(|a| el.attr(a).map(str::trim).filter(|s| !s.is_empty()))
                .map(str::to_string)
                .unwrap_or_else(|| id.clone());
            let control = el.attr("name").unwrap_or(&id).to_string();
            let unit = el.attr("data-unit").map(str::trim).filter(|u| !u.is_empty());

            let kind = if el.tag == "select" {
                let options = row.cells[1..]
                    .iter()
                    .filter_map(|opt| {
                        let value = opt.attr("value").map(str::to_string).unwrap_or_else(|| opt.text.clone());
                        (!value.trim().is_empty()).then(|| FilterOption {
                            value,
                            label: opt.text.clone(),
                        })
                    })
                    .collect();
                FieldKind::Choice { options }
            } else if el.attr("data-kind") == Some("range") || unit.is_some() {
                FieldKind::Range {
                    unit: unit.map(str::to_string),
                }
            } else {
                FieldKind::Text
            };

            Some(FilterField {
                id,
                label,
                control,
                kind,
            })
        })
        .collect()
}

/// Outcome of translating one constraint set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    pub mapping: FieldMapping,
    /// Constraint names that could not be bound to any filter.
    pub unmapped: Vec<String>,
    pub warnings: Vec<String>,
}

impl Translation {
    pub fn is_partial(&self) -> bool {
        !self.unmapped.is_empty()
    }
}

/// Maps one request's constraints onto a category's filter form.  The form
/// is filled once per run; pagination follows the vendor's next links, so
/// the mapping is applied a single time.
pub struct ParameterTranslator<'a> {
    vendor: &'a VendorConfig,
}

impl<'a> ParameterTranslator<'a> {
    pub fn new(vendor: &'a VendorConfig) -> Self {
        Self { vendor }
    }

    pub async fn translate(
        &self,
        schema: &[FilterField],
        constraints: &BTreeMap<String, Constraint>,
        oracle: &OracleCaller<'_>,
    ) -> Result<Translation, SearchError> {
        let mut out = Translation::default();
        let mut pending: Vec<(String, Constraint, Option<usize>)> = Vec::new();
        let mut segments = Vec::new();

        for (name, constraint) in constraints {
            if normalise(name) == DETAILS_KEY {
                match constraint {
                    Constraint::FreeText { text } => {
                        segments.extend(self.split_details(text, schema, oracle, &mut out).await?);
                    }
                    other => {
                        out.unmapped.push(name.clone());
                        out.warnings
                            .push(format!("`{name}` must be free text, got {}", other.describe()));
                    }
                }
                continue;
            }
            pending.push((name.clone(), constraint.clone(), None));
        }
        // Named constraints claim their fields before details phrases do.
        pending.extend(segments);

        for (name, constraint, preset) in pending {
            let field = match preset {
                Some(idx) if is_bound(&out.mapping, &schema[idx]) => {
                    warn!(constraint = %name, field = %schema[idx].id, "filter already constrained");
                    out.unmapped.push(name.clone());
                    out.warnings.push(format!(
                        "`{name}` dropped: filter `{}` is already set by another constraint",
                        schema[idx].label
                    ));
                    continue;
                }
                Some(idx) => Some(idx),
                None => self.find_field(&name, &constraint, schema, &out.mapping, oracle).await?,
            };
            let Some(idx) = field else {
                out.unmapped.push(name.clone());
                out.warnings.push(format!("no vendor filter for `{name}`; constraint dropped"));
                continue;
            };
            let field = &schema[idx];

            match self.encode(&name, &constraint, field, oracle).await? {
                Ok((transform, inputs)) => {
                    debug!(constraint = %name, field = %field.id, ?transform, "constraint mapped");
                    out.mapping.fields.insert(
                        name.clone(),
                        MappedField {
                            field_id: field.id.clone(),
                            label: field.label.clone(),
                            transform,
                            inputs,
                        },
                    );
                }
                Err(reason) => {
                    warn!(constraint = %name, field = %field.id, %reason, "constraint dropped");
                    out.unmapped.push(name.clone());
                    out.warnings.push(format!("`{name}` dropped: {reason}"));
                }
            }
        }

        if out.is_partial() {
            info!(unmapped = ?out.unmapped, "translated with a reduced filter set");
        }
        Ok(out)
    }

    /// Ask the oracle to cut a requirement sentence into per-field phrases.
    async fn split_details(
        &self,
        text: &str,
        schema: &[FilterField],
        oracle: &OracleCaller<'_>,
        out: &mut Translation,
    ) -> Result<Vec<(String, Constraint, Option<usize>)>, SearchError> {
        if !oracle.is_available() || schema.is_empty() {
            out.unmapped.push(DETAILS_KEY.to_string());
            out.warnings
                .push("free-text details need the oracle and at least one vendor filter".to_string());
            return Ok(Vec::new());
        }
        let fields: Vec<String> = schema.iter().map(|f| f.label.clone()).collect();
        let question = Question::new(DecisionQuery::SplitRequirements {
            text: text.to_string(),
            fields,
        });
        let Some(DecisionAnswer::Segments(segments)) = oracle.ask(question, "split details").await? else {
            out.unmapped.push(DETAILS_KEY.to_string());
            out.warnings.push("details could not be split into filter requirements".to_string());
            return Ok(Vec::new());
        };
        if segments.is_empty() {
            out.unmapped.push(DETAILS_KEY.to_string());
            out.warnings.push("no filterable requirement found in details".to_string());
        }
        let mut pending = Vec::new();
        for seg in segments {
            let name = format!("{DETAILS_KEY}: {}", seg.field);
            match schema.iter().position(|f| f.label == seg.field) {
                Some(idx) => pending.push((name, Constraint::FreeText { text: seg.phrase }, Some(idx))),
                None => {
                    out.warnings
                        .push(format!("`{name}` dropped: the page has no filter with that label"));
                    out.unmapped.push(name);
                }
            }
        }
        Ok(pending)
    }

    fn synonyms_of(&self, name: &str) -> Vec<String> {
        let wanted = normalise(name);
        self.vendor
            .parameter_synonyms
            .iter()
            .filter(|(canonical, aliases)| {
                normalise(canonical) == wanted || aliases.iter().any(|a| normalise(a) == wanted)
            })
            .flat_map(|(canonical, aliases)| std::iter::once(canonical.clone()).chain(aliases.iter().cloned()))
            .map(|s| normalise(&s))
            .collect()
    }

    async fn find_field(
        &self,
        name: &str,
        constraint: &Constraint,
        schema: &[FilterField],
        bound: &FieldMapping,
        oracle: &OracleCaller<'_>,
    ) -> Result<Option<usize>, SearchError> {
        let taken = |f: &FilterField| is_bound(bound, f);
        let wanted = normalise(name);
        if let Some(idx) = schema
            .iter()
            .position(|f| !taken(f) && (normalise(&f.label) == wanted || normalise(&f.id) == wanted))
        {
            return Ok(Some(idx));
        }

        let synonyms = self.synonyms_of(name);
        if let Some(idx) = schema
            .iter()
            .position(|f| !taken(f) && (synonyms.contains(&normalise(&f.label)) || synonyms.contains(&normalise(&f.id))))
        {
            return Ok(Some(idx));
        }

        let free: Vec<&FilterField> = schema.iter().filter(|f| !taken(f)).collect();
        if free.is_empty() || !oracle.is_available() {
            return Ok(None);
        }
        let question = Question::pick_one(
            "vendor filter field",
            format!("{name} ({})", constraint.describe()),
            free.iter().map(|f| f.label.clone()).collect(),
        )
        .with_hint("Choose the filter that constrains the same physical property.");
        match oracle.ask(question, "map parameter").await? {
            Some(DecisionAnswer::Picked(label)) => Ok(schema.iter().position(|f| !taken(f) && f.label == label)),
            _ => Ok(None),
        }
    }

    /// Turn one constraint into inputs for `field`.  The inner `Err` is a
    /// reason to drop the constraint; the outer one is fatal.
    async fn encode(
        &self,
        name: &str,
        constraint: &Constraint,
        field: &FilterField,
        oracle: &OracleCaller<'_>,
    ) -> Result<Result<(ValueTransform, Vec<FilterInput>), String>, SearchError> {
        Ok(match &field.kind {
            FieldKind::Range { unit } => self.encode_range(constraint, field, unit.as_deref()),
            FieldKind::Choice { options } => {
                self.encode_choice(name, constraint, field, options, oracle).await?
            }
            FieldKind::Text => encode_text(constraint, field),
        })
    }

    fn encode_range(
        &self,
        constraint: &Constraint,
        field: &FilterField,
        native: Option<&str>,
    ) -> Result<(ValueTransform, Vec<FilterInput>), String> {
        let bounds = match constraint {
            Constraint::Range { min, max, unit } => Bounds {
                min: *min,
                max: *max,
                unit: unit.clone(),
            },
            Constraint::FreeText { text } => parse_bounds(text).map_err(|e| e.to_string())?,
            Constraint::OneOf { values } => match values.as_slice() {
                [single] => {
                    let q = parse_quantity(single).map_err(|e| e.to_string())?;
                    Bounds {
                        min: Some(q.value),
                        max: Some(q.value),
                        unit: q.unit,
                    }
                }
                _ => return Err("a range filter cannot take a list of values".to_string()),
            },
        };

        let conversion = match (bounds.unit.as_deref(), native) {
            (Some(from), Some(to)) if from != to => {
                units::convert(1.0, from, to).map_err(|e| e.to_string())?;
                Some((from.to_string(), to.to_string()))
            }
            _ => None,
        };

        let suffixes = &self.vendor.parametric;
        let mut inputs = Vec::new();
        for (bound, suffix) in [
            (bounds.min, &suffixes.range_min_suffix),
            (bounds.max, &suffixes.range_max_suffix),
        ] {
            let Some(value) = bound else { continue };
            let converted = match &conversion {
                Some((from, to)) => units::convert(value, from, to).map_err(|e| e.to_string())?,
                None => value,
            };
            inputs.push(FilterInput {
                control: format!("{}{}", field.id, suffix),
                value: format_number(converted),
            });
        }
        if inputs.is_empty() {
            return Err("range has no bounds".to_string());
        }
        let transform = match conversion {
            Some((from, to)) => ValueTransform::Convert { from, to },
            None => ValueTransform::Identity,
        };
        Ok((transform, inputs))
    }

    async fn encode_choice(
        &self,
        name: &str,
        constraint: &Constraint,
        field: &FilterField,
        options: &[FilterOption],
        oracle: &OracleCaller<'_>,
    ) -> Result<Result<(ValueTransform, Vec<FilterInput>), String>, SearchError> {
        let wanted: Vec<String> = match constraint {
            Constraint::OneOf { values } => values.clone(),
            Constraint::FreeText { text } => vec![text.clone()],
            Constraint::Range {
                min: Some(a),
                max: Some(b),
                unit,
            } if a == b => vec![format!("{}{}", format_number(*a), unit.as_deref().unwrap_or(""))],
            Constraint::Range { .. } => {
                return Ok(Err(format!("`{}` only offers fixed options", field.label)));
            }
        };

        let chosen = wanted.iter().find_map(|w| match_option(w, options));
        let chosen = match chosen {
            Some(option) => Some(option),
            None if oracle.is_available() && !options.is_empty() => {
                let question = Question::pick_one(
                    format!("option of the `{}` filter", field.label),
                    format!("{name}: {}", constraint.describe()),
                    options.iter().map(|o| o.label.clone()).collect(),
                );
                match oracle.ask(question, "choose filter option").await? {
                    Some(DecisionAnswer::Picked(label)) => options.iter().find(|o| o.label == label),
                    _ => None,
                }
            }
            None => None,
        };

        Ok(match chosen {
            Some(option) => Ok((
                ValueTransform::Choose {
                    option: option.label.clone(),
                },
                vec![FilterInput {
                    control: field.control.clone(),
                    value: option.value.clone(),
                }],
            )),
            None => Err(format!("no `{}` option matches {}", field.label, constraint.describe())),
        })
    }
}

fn is_bound(mapping: &FieldMapping, field: &FilterField) -> bool {
    mapping.fields.values().any(|m| m.field_id == field.id)
}

fn encode_text(constraint: &Constraint, field: &FilterField) -> Result<(ValueTransform, Vec<FilterInput>), String> {
    let value = match constraint {
        Constraint::FreeText { text } => text.clone(),
        Constraint::OneOf { values } if values.len() == 1 => values[0].clone(),
        Constraint::Range {
            min: Some(a),
            max: Some(b),
            unit,
        } if a == b => format!("{}{}", format_number(*a), unit.as_deref().unwrap_or("")),
        other => return Err(format!("`{}` takes a single value, got {}", field.label, other.describe())),
    };
    Ok((
        ValueTransform::Identity,
        vec![FilterInput {
            control: field.control.clone(),
            value,
        }],
    ))
}

/// Deterministic option match: normalised label or value equality, then
/// numeric equality when both sides read as quantities in the same dimension.
pub fn match_option<'o>(wanted: &str, options: &'o [FilterOption]) -> Option<&'o FilterOption> {
    let norm = normalise(wanted);
    let compact = |s: &str| normalise(s).replace(' ', "");
    if let Some(hit) = options
        .iter()
        .find(|o| normalise(&o.label) == norm || normalise(&o.value) == norm || compact(&o.label) == compact(wanted))
    {
        return Some(hit);
    }

    let q = parse_quantity(wanted).ok()?;
    options.iter().find(|o| {
        let Ok(candidate) = parse_quantity(&o.label) else {
            return false;
        };
        let value = match (&q.unit, &candidate.unit) {
            (Some(from), Some(to)) => match units::convert(q.value, from, to) {
                Ok(v) => v,
                Err(_) => return false,
            },
            (None, None) => q.value,
            _ => return false,
        };
        (value - candidate.value).abs() <= 1e-9 * value.abs().max(candidate.value.abs()).max(1e-12)
    })
}
