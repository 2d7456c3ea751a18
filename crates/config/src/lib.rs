use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod vendor;

pub use vendor::{
    CategoryHint, DetailPageConfig, ListingConfig, MpnSearchConfig, ParametricSearchConfig,
    VendorConfig, XrefSearchConfig,
};

/// Default location of the configuration file, relative to the working
/// directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/partfinder.toml";

// ── Decision oracle ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// OpenAI-compatible endpoint root (the `/chat/completions` suffix is
    /// appended).  Overridden by `OPENAI_BASE_URL`.
    pub base_url: String,
    pub model: String,
    /// API key.  Overridden by `OPENAI_API_KEY` and by the CLI `--api-key`
    /// flag.  Only required when a search actually consults the oracle.
    pub api_key: String,
    /// Per-call timeout, measured from the moment the rate gate is passed.
    pub timeout_secs: u64,
    /// Token-bucket budget shared by every search running in this process.
    pub requests_per_minute: u32,
    /// Calls allowed in flight at once across the process.
    pub max_concurrent: usize,
    /// Bounded retries for rate-limited or timed-out calls.
    pub max_retries: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
            requests_per_minute: 30,
            max_concurrent: 1,
            max_retries: 2,
        }
    }
}

impl OracleConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

// ── Navigator ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    pub user_agent: String,
    /// HTTP timeout applied to every page load and form submission.
    pub request_timeout_secs: u64,
    /// Upper bound for a single `wait_for`.
    pub wait_timeout_secs: u64,
    /// Interval between re-polls while waiting for a selector.
    pub poll_interval_ms: u64,
    /// Minimum spacing between consecutive requests of one session.
    pub pace_ms: u64,
    /// Spacing used after the one-time slow-down following an anti-bot block.
    pub slow_pace_ms: u64,
    /// `false` when `--visible` was requested.
    pub headless: bool,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            request_timeout_secs: 30,
            wait_timeout_secs: 10,
            poll_interval_ms: 500,
            pace_ms: 250,
            slow_pace_ms: 2_000,
            headless: true,
        }
    }
}

// ── Retry policy ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts for a navigation step that times out (first try included).
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Pause before the single retry that follows an anti-bot block.
    pub blocked_cooldown_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 4_000,
            blocked_cooldown_ms: 5_000,
        }
    }
}

// ── Search behaviour ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum token-overlap score for a category candidate to be considered.
    pub similarity_floor: f64,
    /// Upper bound on taxonomy pages visited while building the category tree.
    pub max_taxonomy_pages: usize,
    /// Overall run timeout.  `0` disables it.
    pub run_timeout_secs: u64,
    /// Independent searches run at once by `partfinder batch`.
    pub batch_concurrency: usize,
    /// Default page budget for parametric pagination, on top of `max_results`.
    pub max_pages: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.34,
            max_taxonomy_pages: 40,
            run_timeout_secs: 300,
            batch_concurrency: 4,
            max_pages: 20,
        }
    }
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// Directory for the daily rolling log file.  Empty disables file logging.
    pub log_dir: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub oracle: OracleConfig,
    pub navigator: NavigatorConfig,
    pub retry: RetryConfig,
    pub search: SearchConfig,
    pub telemetry: TelemetryConfig,
    pub vendor: VendorConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                config.oracle.api_key = key;
            }
        }

        if let Ok(url) = env::var("OPENAI_BASE_URL") {
            if !url.trim().is_empty() {
                config.oracle.base_url = url;
            }
        }

        if let Ok(model) = env::var("PARTFINDER_MODEL") {
            if !model.trim().is_empty() {
                config.oracle.model = model;
            }
        }

        config.vendor.check_hints()?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Apply a CLI-supplied API key.  Blank keys leave the configured value.
    pub fn with_api_key(mut self, api_key: Option<&str>) -> Self {
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            self.oracle.api_key = key.trim().to_string();
        }
        self
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_conservative() {
        let cfg = AppConfig::default();
        assert!(!cfg.oracle.has_api_key());
        assert_eq!(cfg.oracle.max_concurrent, 1);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(cfg.navigator.headless);
        assert_eq!(cfg.telemetry.log_level, "info");
        assert!(cfg.search.similarity_floor > 0.0 && cfg.search.similarity_floor < 1.0);
    }

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.oracle.model, OracleConfig::default().model);
        assert!(cfg.vendor.mpn.enabled);
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            r#"
[retry]
max_attempts = 5

[vendor]
name = "acme"
base_url = "https://acme.test"

[vendor.xref]
enabled = false
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_delay_ms, RetryConfig::default().base_delay_ms);
        assert_eq!(cfg.vendor.name, "acme");
        assert!(!cfg.vendor.xref.enabled);
        assert!(cfg.vendor.parametric.enabled);
        assert!(!cfg.vendor.listing.mpn_headers.is_empty());
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/partfinder.toml");

        let mut cfg = AppConfig::default();
        cfg.oracle.model = "gpt-4.1-mini".to_string();
        cfg.search.batch_concurrency = 2;
        cfg.vendor
            .parameter_synonyms
            .insert("Tolerance".to_string(), vec!["Tol.".to_string()]);

        cfg.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.oracle.model, "gpt-4.1-mini");
        assert_eq!(loaded.search.batch_concurrency, 2);
        assert_eq!(
            loaded.vendor.parameter_synonyms.get("Tolerance"),
            Some(&vec!["Tol.".to_string()])
        );
    }

    #[test]
    fn cli_api_key_overrides_and_blank_is_ignored() {
        let mut cfg = AppConfig::default();
        cfg.oracle.api_key = "from-file".to_string();

        let cfg = cfg.with_api_key(Some("   "));
        assert_eq!(cfg.oracle.api_key, "from-file");

        let cfg = cfg.with_api_key(Some("sk-cli"));
        assert_eq!(cfg.oracle.api_key, "sk-cli");
        assert!(cfg.oracle.has_api_key());
    }

    #[test]
    fn env_api_key_overrides_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("oracle.toml");
        fs::write(
            &path,
            r#"
[oracle]
api_key = "from-file"
"#,
        )
        .unwrap();

        // SAFETY: test is single-threaded for this env var.
        unsafe { env::set_var("OPENAI_API_KEY", "from-env") };
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.oracle.api_key, "from-env");
        unsafe { env::remove_var("OPENAI_API_KEY") };
    }
}
