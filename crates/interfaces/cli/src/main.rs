mod logging;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use partfinder_config::{AppConfig, DEFAULT_CONFIG_PATH};
use partfinder_llm::{DecisionOracle, GatedOracle, OpenAiOracle, OracleGate};
use partfinder_navigator::HttpNavigator;
use partfinder_search::{
    Orchestrator, ParametricRequest, RetryPolicy, SearchError, SearchFailure, SearchRequest, XrefRequest,
    constraints_from_json, parse_batch, run_batch,
};

#[derive(Debug, Parser)]
#[command(
    name = "partfinder",
    version,
    about = "Search an electronic-component vendor catalog by part number, parameters or cross-reference"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Write the results array here; run metadata goes to `<stem>.meta.json`.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Ask for a visible browser session.
    #[arg(long)]
    visible: bool,
    /// Oracle API key (overrides config and OPENAI_API_KEY).
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Exact manufacturer part number lookup.
    Mpn {
        mpn: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Filtered search within a product category.
    Parametric {
        #[arg(long)]
        category: String,
        #[arg(long)]
        subcategory: Option<String>,
        /// JSON object of constraints, inline or as a file path.
        #[arg(long)]
        parameters: String,
        #[arg(long, default_value_t = 10)]
        max_results: usize,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Vendor equivalents of a competitor's part.
    Xref {
        competitor_mpn: String,
        /// JSON array of category names, inline or as a file path.
        #[arg(long)]
        category_path: Option<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Look up every part number in a file (one per line, `#` comments).
    Batch {
        file: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Write a configuration file with every default spelled out.
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<u8> {
    if let Commands::Config {
        command: ConfigCommands::Init { force },
    } = &cli.command
    {
        init_config(&cli.config, *force)?;
        return Ok(0);
    }
    let config = AppConfig::load_from(&cli.config)?;

    let (request, run) = match cli.command {
        Commands::Config { .. } => return Ok(0),
        Commands::Batch { file, run } => {
            let _guard = logging::init(&config.telemetry)?;
            return run_batch_file(config, &file, run).await;
        }
        Commands::Mpn { mpn, run } => (Ok(SearchRequest::mpn(mpn)), run),
        Commands::Parametric {
            category,
            subcategory,
            parameters,
            max_results,
            run,
        } => (parametric_request(category, subcategory, parameters, max_results), run),
        Commands::Xref {
            competitor_mpn,
            category_path,
            run,
        } => (xref_request(competitor_mpn, category_path), run),
    };

    let _guard = logging::init(&config.telemetry)?;
    let request = match request {
        Ok(request) => request,
        Err(error) => return Ok(report_error(&error)),
    };
    run_single(config, request, run).await
}

fn parametric_request(
    category: String,
    subcategory: Option<String>,
    parameters: String,
    max_results: usize,
) -> Result<SearchRequest, SearchError> {
    let constraints = constraints_from_json(&output::json_arg("--parameters", &parameters)?)?;
    if constraints.is_empty() {
        return Err(SearchError::InvalidInput("--parameters needs at least one constraint".to_string()));
    }
    Ok(SearchRequest::Parametric(ParametricRequest {
        category,
        subcategory,
        constraints,
        max_results,
    }))
}

fn xref_request(competitor_mpn: String, category_path: Option<String>) -> Result<SearchRequest, SearchError> {
    let category_path = category_path.map(|raw| output::category_path_arg(&raw)).transpose()?;
    Ok(SearchRequest::Xref(XrefRequest {
        competitor_mpn,
        category_path,
    }))
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default().save_to(path)?;
    println!("wrote {}", path.display());
    Ok(())
}

// ── Runs ─────────────────────────────────────────────────────────────────────

fn build_oracle(config: &AppConfig) -> Result<Option<Arc<dyn DecisionOracle>>, SearchError> {
    if !config.oracle.has_api_key() {
        info!("no oracle API key configured; ambiguous decisions fall back to deterministic rules");
        return Ok(None);
    }
    let client = OpenAiOracle::new(&config.oracle).map_err(|source| SearchError::Oracle {
        step: "create oracle client".to_string(),
        source,
    })?;
    info!(model = client.model(), "decision oracle enabled");
    let gate = OracleGate::from_config(&config.oracle);
    let oracle: Arc<dyn DecisionOracle> = Arc::new(GatedOracle::new(client, gate));
    Ok(Some(oracle))
}

fn build_orchestrator(
    config: &AppConfig,
    oracle: Option<Arc<dyn DecisionOracle>>,
    cancel: CancellationToken,
) -> Result<Orchestrator<HttpNavigator>, SearchError> {
    let navigator = HttpNavigator::from_config(&config.navigator, config.vendor.block_markers.clone()).map_err(
        |source| SearchError::Navigation {
            step: "open vendor session".to_string(),
            source,
        },
    )?;
    Ok(Orchestrator::new(navigator, config.vendor.clone())
        .with_oracle(oracle)
        .with_search_config(config.search.clone())
        .with_policy(RetryPolicy::from_config(&config.retry, &config.oracle))
        .with_wait_timeout(Duration::from_secs(config.navigator.wait_timeout_secs))
        .with_cancel(cancel))
}

fn apply_run_args(config: AppConfig, run: &RunArgs) -> AppConfig {
    let mut config = config.with_api_key(run.api_key.as_deref());
    if run.visible {
        config.navigator.headless = false;
    }
    config
}

/// Cancel `cancel` on Ctrl-C or when the run time limit passes.
fn arm_cancellation(cancel: CancellationToken, limit_secs: u64) {
    tokio::spawn(async move {
        let limit = async {
            if limit_secs == 0 {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(Duration::from_secs(limit_secs)).await;
        };
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::signal::ctrl_c() => warn!("interrupted; keeping the results gathered so far"),
            _ = limit => warn!(limit_secs, "run time limit reached; keeping the results gathered so far"),
        }
        cancel.cancel();
    });
}

fn report_error(error: &SearchError) -> u8 {
    eprintln!("partfinder: {} failure: {error}", error.stage());
    exit_byte(error.exit_code())
}

fn report_failure(failure: &SearchFailure) -> u8 {
    let code = report_error(&failure.error);
    if !failure.partial.results.is_empty() {
        eprintln!(
            "partfinder: {} partial result(s) kept, marked incomplete",
            failure.partial.results.len()
        );
    }
    code
}

fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

async fn run_single(config: AppConfig, request: SearchRequest, run: RunArgs) -> Result<u8> {
    let config = apply_run_args(config, &run);
    let cancel = CancellationToken::new();

    let orchestrator = match build_oracle(&config).and_then(|oracle| build_orchestrator(&config, oracle, cancel.clone()))
    {
        Ok(orchestrator) => orchestrator,
        Err(error) => return Ok(report_error(&error)),
    };
    arm_cancellation(cancel.clone(), config.search.run_timeout_secs);

    let outcome = orchestrator.run(&request).await;
    cancel.cancel();

    match outcome {
        Ok(report) => {
            output::emit_report(&report, run.output.as_deref())?;
            for warning in &report.metadata.warnings {
                eprintln!("warning: {warning}");
            }
            Ok(0)
        }
        Err(failure) => {
            output::emit_report(&failure.partial, run.output.as_deref())?;
            Ok(report_failure(&failure))
        }
    }
}

async fn run_batch_file(config: AppConfig, file: &Path, run: RunArgs) -> Result<u8> {
    let text = match std::fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) => {
            let error = SearchError::InvalidInput(format!("cannot read {}: {e}", file.display()));
            return Ok(report_error(&error));
        }
    };
    let mpns = parse_batch(&text);
    if mpns.is_empty() {
        return Ok(report_error(&SearchError::InvalidInput(format!(
            "{} lists no part numbers",
            file.display()
        ))));
    }

    let config = apply_run_args(config, &run);
    let oracle = match build_oracle(&config) {
        Ok(oracle) => oracle,
        Err(error) => return Ok(report_error(&error)),
    };
    let cancel = CancellationToken::new();
    arm_cancellation(cancel.clone(), config.search.run_timeout_secs);

    let items = run_batch(
        mpns,
        config.search.batch_concurrency,
        &config.vendor.name,
        |_| build_orchestrator(&config, oracle.clone(), cancel.clone()),
    )
    .await;
    let cancelled = cancel.is_cancelled();
    cancel.cancel();

    output::emit_batch(&items, run.output.as_deref())?;

    let mut code = 0;
    for item in &items {
        if let Err(failure) = &item.outcome {
            eprintln!("partfinder: {}:", item.input);
            let item_code = report_failure(failure);
            if code == 0 || item_code == 130 {
                code = item_code;
            }
        }
    }
    if cancelled {
        code = 130;
    }
    Ok(code)
}
