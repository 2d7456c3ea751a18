//! Command-line inputs that may be inline JSON or a file, and the result /
//! metadata files a run writes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use partfinder_search::{BatchItem, ComponentResult, RunMetadata, SearchError, SearchReport};

/// Parse an argument that is either a path to a JSON file or inline JSON.
pub fn json_arg(flag: &str, raw: &str) -> Result<Value, SearchError> {
    let path = Path::new(raw.trim());
    let (text, origin) = if path.is_file() {
        let text = fs::read_to_string(path)
            .map_err(|e| SearchError::InvalidInput(format!("{flag}: cannot read {}: {e}", path.display())))?;
        (text, path.display().to_string())
    } else {
        (raw.to_string(), "inline value".to_string())
    };
    serde_json::from_str(&text).map_err(|e| SearchError::InvalidInput(format!("{flag}: {origin} is not valid JSON: {e}")))
}

/// `--category-path`: a JSON array of category names.
pub fn category_path_arg(raw: &str) -> Result<Vec<String>, SearchError> {
    let value = json_arg("--category-path", raw)?;
    let invalid = || SearchError::InvalidInput("--category-path must be a JSON array of strings".to_string());
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|item| item.as_str().map(|s| s.trim().to_string()).ok_or_else(invalid))
        .collect()
}

/// `results.json` → `results.meta.json`.
pub fn meta_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    output.with_file_name(format!("{stem}.meta.json"))
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let rendered = serde_json::to_string_pretty(value)?;
    fs::write(path, rendered + "\n").with_context(|| format!("writing {}", path.display()))
}

/// Write the results array, plus metadata next to it when writing a file.
pub fn emit(results: &[ComponentResult], metadata: &impl Serialize, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            write_json(path, &results)?;
            write_json(&meta_path(path), metadata)?;
            tracing::info!(path = %path.display(), results = results.len(), "results written");
        }
        None => println!("{}", serde_json::to_string_pretty(&results)?),
    }
    Ok(())
}

pub fn emit_report(report: &SearchReport, output: Option<&Path>) -> Result<()> {
    emit(&report.results, &report.metadata, output)
}

#[derive(Debug, Serialize)]
struct BatchEntry<'a> {
    input: &'a str,
    error: Option<String>,
    metadata: &'a RunMetadata,
}

/// Batch output: every item's results in input order, one metadata entry
/// per item.
pub fn emit_batch(items: &[BatchItem], output: Option<&Path>) -> Result<()> {
    let results: Vec<ComponentResult> = items.iter().flat_map(|i| i.report().results.iter().cloned()).collect();
    let entries: Vec<BatchEntry<'_>> = items
        .iter()
        .map(|item| BatchEntry {
            input: &item.input,
            error: item.outcome.as_ref().err().map(|f| f.error.to_string()),
            metadata: &item.report().metadata,
        })
        .collect();
    emit(&results, &entries, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use partfinder_search::Mode;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn json_arg_reads_files_and_inline_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.json");
        fs::write(&path, r#"{"Capacitance": {"min": 1, "unit": "µF"}}"#).unwrap();

        let from_file = json_arg("--parameters", path.to_str().unwrap()).unwrap();
        assert_eq!(from_file["Capacitance"]["unit"], "µF");
        let inline = json_arg("--parameters", r#"{"Rated Voltage": 16}"#).unwrap();
        assert_eq!(inline["Rated Voltage"], 16);
        assert_eq!(json_arg("--parameters", "{not json").unwrap_err().exit_code(), 2);
    }

    #[test]
    fn category_path_must_be_strings() {
        assert_eq!(
            category_path_arg(r#"["Capacitors", " Ceramic Capacitors(SMD) "]"#).unwrap(),
            vec!["Capacitors", "Ceramic Capacitors(SMD)"]
        );
        assert!(category_path_arg(r#"["Capacitors", 3]"#).is_err());
        assert!(category_path_arg(r#""Capacitors""#).is_err());
    }

    #[test]
    fn report_files_are_written_side_by_side() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("out").join("results.json");
        let mut metadata = RunMetadata::start(Mode::Mpn, "GRM0115C1C100GE01", "fixture");
        metadata.complete = true;
        let report = SearchReport {
            results: vec![ComponentResult {
                mpn: "GRM0115C1C100GE01".to_string(),
                url: "https://vendor.test/p/GRM0115C1C100GE01".to_string(),
                specs: BTreeMap::from([("capacitance".to_string(), "10pF".to_string())]),
            }],
            metadata,
        };

        emit_report(&report, Some(&output)).unwrap();

        let results: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(results[0]["mpn"], "GRM0115C1C100GE01");
        assert_eq!(results[0]["specs"]["capacitance"], "10pF");
        let meta_file = dir.path().join("out").join("results.meta.json");
        assert_eq!(meta_path(&output), meta_file);
        let meta: Value = serde_json::from_str(&fs::read_to_string(meta_file).unwrap()).unwrap();
        assert_eq!(meta["complete"], true);
        assert_eq!(meta["mode"], "mpn");
    }
}
