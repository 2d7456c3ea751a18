//! Fixed unit table and deterministic value parsing.
//!
//! Numbers submitted to a vendor are always computed here, never by the
//! oracle.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::UnitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Capacitance,
    Resistance,
    Inductance,
    Voltage,
    Current,
    Frequency,
    Power,
    Length,
    Temperature,
}

const UNITS: &[(&str, Dimension, f64)] = &[
    ("F", Dimension::Capacitance, 1.0),
    ("mF", Dimension::Capacitance, 1e-3),
    ("µF", Dimension::Capacitance, 1e-6),
    ("uF", Dimension::Capacitance, 1e-6),
    ("nF", Dimension::Capacitance, 1e-9),
    ("pF", Dimension::Capacitance, 1e-12),
    ("Ω", Dimension::Resistance, 1.0),
    ("ohm", Dimension::Resistance, 1.0),
    ("ohms", Dimension::Resistance, 1.0),
    ("mΩ", Dimension::Resistance, 1e-3),
    ("kΩ", Dimension::Resistance, 1e3),
    ("kohm", Dimension::Resistance, 1e3),
    ("MΩ", Dimension::Resistance, 1e6),
    ("H", Dimension::Inductance, 1.0),
    ("mH", Dimension::Inductance, 1e-3),
    ("µH", Dimension::Inductance, 1e-6),
    ("uH", Dimension::Inductance, 1e-6),
    ("nH", Dimension::Inductance, 1e-9),
    ("V", Dimension::Voltage, 1.0),
    ("mV", Dimension::Voltage, 1e-3),
    ("kV", Dimension::Voltage, 1e3),
    ("Vdc", Dimension::Voltage, 1.0),
    ("A", Dimension::Current, 1.0),
    ("mA", Dimension::Current, 1e-3),
    ("µA", Dimension::Current, 1e-6),
    ("uA", Dimension::Current, 1e-6),
    ("Hz", Dimension::Frequency, 1.0),
    ("kHz", Dimension::Frequency, 1e3),
    ("MHz", Dimension::Frequency, 1e6),
    ("GHz", Dimension::Frequency, 1e9),
    ("W", Dimension::Power, 1.0),
    ("mW", Dimension::Power, 1e-3),
    ("kW", Dimension::Power, 1e3),
    ("m", Dimension::Length, 1.0),
    ("mm", Dimension::Length, 1e-3),
    ("µm", Dimension::Length, 1e-6),
    ("um", Dimension::Length, 1e-6),
    ("°C", Dimension::Temperature, 1.0),
    ("℃", Dimension::Temperature, 1.0),
    ("degC", Dimension::Temperature, 1.0),
];

fn canonical_spelling(unit: &str) -> String {
    unit.trim()
        .replace('\u{03BC}', "\u{00B5}") // Greek mu → micro sign
        .replace('\u{2126}', "\u{03A9}") // ohm sign → Greek omega
}

/// Dimension and scale factor (relative to the SI base) of `unit`.
///
/// Exact spelling wins; otherwise a case-insensitive match is accepted when it
/// is unambiguous (`"UF"` → `uF`, but `"mω"` could be milli or mega).
pub fn lookup(unit: &str) -> Result<(Dimension, f64), UnitError> {
    let spelled = canonical_spelling(unit);
    if let Some((_, dim, factor)) = UNITS.iter().find(|(sym, _, _)| *sym == spelled) {
        return Ok((*dim, *factor));
    }
    let lowered = spelled.to_lowercase();
    let mut folded = UNITS.iter().filter(|(sym, _, _)| sym.to_lowercase() == lowered);
    match (folded.next(), folded.next()) {
        (Some((_, dim, factor)), None) => Ok((*dim, *factor)),
        _ => Err(UnitError::Unknown(unit.trim().to_string())),
    }
}

pub fn is_known(unit: &str) -> bool {
    lookup(unit).is_ok()
}

pub fn convert(value: f64, from: &str, to: &str) -> Result<f64, UnitError> {
    let (from_dim, from_factor) = lookup(from)?;
    let (to_dim, to_factor) = lookup(to)?;
    if from_dim != to_dim {
        return Err(UnitError::Incompatible {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    Ok(value * from_factor / to_factor)
}

/// Render a number for a form field: nine significant digits, no trailing
/// zeros, no exponent for everyday magnitudes.
pub fn format_number(value: f64) -> String {
    let rounded: f64 = format!("{value:.8e}").parse().unwrap_or(value);
    if rounded == rounded.trunc() && rounded.abs() < 1e15 {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: Option<String>,
}

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<num>[-+]?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)\s*(?P<unit>°C|℃|[A-Za-zµμΩΩ]+)?")
        .expect("quantity pattern is valid")
});

struct Found {
    start: usize,
    end: usize,
    raw: String,
    quantity: Quantity,
}

fn scan(text: &str) -> Vec<Found> {
    QUANTITY
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let num = caps.name("num")?;
            let value: f64 = num.as_str().parse().ok()?;
            let unit = caps
                .name("unit")
                .map(|u| u.as_str())
                .filter(|u| is_known(u))
                .map(canonical_spelling);
            // Only consume the unit text when it was recognised.
            let end = if unit.is_some() { whole.end() } else { num.end() };
            Some(Found {
                start: whole.start(),
                end,
                raw: num.as_str().to_string(),
                quantity: Quantity { value, unit },
            })
        })
        .collect()
}

/// Parse a single value such as `"1.1µF"` or `"50 V"`.
pub fn parse_quantity(text: &str) -> Result<Quantity, UnitError> {
    let found = scan(text);
    match found.as_slice() {
        [only] if text[..only.start].trim().is_empty() && text[only.end..].trim().is_empty() => {
            Ok(only.quantity.clone())
        }
        _ => Err(UnitError::Unparsable(text.to_string())),
    }
}

const UPPER: &[&str] = &["max", "<=", "<", "≤", "up to", "at most", "or less", "below", "under", "less than"];
const LOWER: &[&str] = &["min", ">=", ">", "≥", "at least", "or more", "above", "over", "greater than"];
const RANGE_SEPARATORS: &[&str] = &["to", "-", "~", "–", "...", "…"];

/// Parse free-text bounds: `"max 50V"`, `">= 10 nF"`, `"1 to 2.2 µF"`,
/// `"16V or more"`, or a single value meaning an exact match.
pub fn parse_bounds(text: &str) -> Result<Bounds, UnitError> {
    let found = scan(text);
    let lowered = text.to_lowercase();
    let unparsable = || UnitError::Unparsable(text.to_string());

    if let [first, second, ..] = found.as_slice() {
        let gap = text[first.end..second.start].trim();
        let dash_joined = gap.is_empty() && second.raw.starts_with('-');
        if RANGE_SEPARATORS.contains(&gap) || dash_joined {
            let lo = first.quantity.value;
            let mut hi = if dash_joined {
                second.quantity.value.abs()
            } else {
                second.quantity.value
            };
            let unit = match (&first.quantity.unit, &second.quantity.unit) {
                (Some(a), Some(b)) if a != b => {
                    hi = convert(hi, b, a)?;
                    Some(a.clone())
                }
                (a, b) => a.clone().or_else(|| b.clone()),
            };
            return Ok(Bounds {
                min: Some(lo.min(hi)),
                max: Some(lo.max(hi)),
                unit,
            });
        }
    }

    let first = found.first().ok_or_else(unparsable)?;
    let trailing_plus = text[first.end..].trim_start().starts_with('+');
    let upper = UPPER.iter().any(|k| lowered.contains(k));
    let lower = LOWER.iter().any(|k| lowered.contains(k)) || trailing_plus;
    let q = &first.quantity;

    match (lower, upper) {
        (true, true) => Err(unparsable()),
        (true, false) => Ok(Bounds {
            min: Some(q.value),
            max: None,
            unit: q.unit.clone(),
        }),
        (false, true) => Ok(Bounds {
            min: None,
            max: Some(q.value),
            unit: q.unit.clone(),
        }),
        (false, false) => Ok(Bounds {
            min: Some(q.value),
            max: Some(q.value),
            unit: q.unit.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn microfarad_round_trips_through_vendor_units() {
        for value in [1.0, 1.1, 0.47, 22.0, 100.0] {
            for native in ["pF", "nF", "F", "mF"] {
                let there = convert(value, "µF", native).unwrap();
                let back = convert(there, native, "µF").unwrap();
                assert!(close(back, value), "{value} µF via {native} came back as {back}");
            }
        }
    }

    #[test]
    fn spellings_and_case_folding() {
        assert_eq!(lookup("μF").unwrap(), lookup("µF").unwrap());
        assert_eq!(lookup("UF").unwrap(), (Dimension::Capacitance, 1e-6));
        assert_eq!(lookup("kΩ").unwrap(), (Dimension::Resistance, 1e3));
        assert!(lookup("mω").is_err());
        assert!(lookup("furlong").is_err());
    }

    #[test]
    fn incompatible_dimensions_are_refused() {
        assert_eq!(
            convert(1.0, "V", "pF"),
            Err(UnitError::Incompatible {
                from: "V".to_string(),
                to: "pF".to_string()
            })
        );
    }

    #[test]
    fn numbers_are_formatted_for_forms() {
        assert_eq!(format_number(convert(1.0, "µF", "pF").unwrap()), "1000000");
        assert_eq!(format_number(convert(1.1, "µF", "pF").unwrap()), "1100000");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(16.0), "16");
    }

    #[test]
    fn parse_single_quantities() {
        assert_eq!(
            parse_quantity("1.1µF").unwrap(),
            Quantity {
                value: 1.1,
                unit: Some("µF".to_string())
            }
        );
        assert_eq!(parse_quantity(" 50 V ").unwrap().unit.as_deref(), Some("V"));
        assert_eq!(parse_quantity("0402").unwrap().unit, None);
        assert!(parse_quantity("X7R").is_err());
        assert!(parse_quantity("1 to 2 V").is_err());
    }

    #[test]
    fn parse_free_text_bounds() {
        assert_eq!(
            parse_bounds("max 50V").unwrap(),
            Bounds {
                min: None,
                max: Some(50.0),
                unit: Some("V".to_string())
            }
        );
        assert_eq!(parse_bounds(">= 10 nF").unwrap().min, Some(10.0));
        assert_eq!(parse_bounds("16V or more").unwrap().min, Some(16.0));
        assert_eq!(parse_bounds("100V+").unwrap().min, Some(100.0));

        let range = parse_bounds("1 to 2.2 µF").unwrap();
        assert_eq!((range.min, range.max), (Some(1.0), Some(2.2)));
        assert_eq!(range.unit.as_deref(), Some("µF"));

        let temp = parse_bounds("-55 to 125 °C").unwrap();
        assert_eq!((temp.min, temp.max), (Some(-55.0), Some(125.0)));

        let mixed = parse_bounds("470nF to 1µF").unwrap();
        assert_eq!(mixed.unit.as_deref(), Some("nF"));
        assert!(close(mixed.max.unwrap(), 1000.0));

        let exact = parse_bounds("10 pF").unwrap();
        assert_eq!((exact.min, exact.max), (Some(10.0), Some(10.0)));

        assert!(parse_bounds("between min and max").is_err());
        assert!(parse_bounds("no numbers").is_err());
    }
}
