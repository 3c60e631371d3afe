//! dayfeed - command-line host for the daily content cache.
//!
//! Wires the engine to a file store under the user cache directory and the
//! HTTP content source at `DAYFEED_SOURCE_URL`, runs one command, and prints
//! the result as JSON.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;

use dayfeed_core::config::APP_NAME;
use dayfeed_core::strategy::{DeviceClass, UsagePattern};
use dayfeed_core::{
    compat, CacheConfig, Coordinator, DeviceHints, FileStore, HttpContentSource, InteractionKind,
    OptimizationTrigger, VERSION,
};

/// Used when `DAYFEED_SOURCE_URL` is not set.
const DEFAULT_SOURCE_URL: &str = "http://127.0.0.1:8080";

const SOURCE_URL_VAR: &str = "DAYFEED_SOURCE_URL";
const TOKEN_VAR: &str = "DAYFEED_TOKEN";

const USAGE: &str = "\
Usage: dayfeed [options] <command> [args]

Commands:
  today [--stale]        Print today's content
  refresh                Fetch today's content now
  stats                  Statistics report for all services
  health                 Health report for all services
  analytics              Performance analytics report
  benchmark              Run the storage benchmark
  optimize [trigger]     Select and apply an optimization strategy
  sweep                  Run a maintenance sweep
  interact <kind>        Record a user interaction
  legacy <method>        Call a deprecated method by name
  legacy --list          List deprecated methods and their replacements

Options:
  --offline              Start without connectivity
  --background           Treat this run as a background launch
  --device <class>       low_end | mid_range | high_end
  --usage <pattern>      light | moderate | heavy
  --memory-pressure      Report memory pressure to the engine
  --version              Print the version";

struct Args {
    command: String,
    rest: Vec<String>,
    hints: DeviceHints,
    offline: bool,
}

fn parse_args() -> Result<Option<Args>> {
    let mut hints = DeviceHints::default();
    let mut offline = false;
    let mut positional = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                println!("{}", USAGE);
                return Ok(None);
            }
            "--version" | "-V" => {
                println!("dayfeed {}", VERSION);
                return Ok(None);
            }
            "--offline" => offline = true,
            "--background" => hints.background_launch = true,
            "--memory-pressure" => hints.memory_pressure = Some(true),
            "--device" => {
                let value = args.next().context("--device needs a value")?;
                hints.device_class =
                    Some(DeviceClass::from_str(&value).with_context(|| format!("Unknown device class: {}", value))?);
            }
            "--usage" => {
                let value = args.next().context("--usage needs a value")?;
                hints.usage_pattern =
                    Some(UsagePattern::from_str(&value).with_context(|| format!("Unknown usage pattern: {}", value))?);
            }
            _ => positional.push(arg),
        }
    }

    if positional.is_empty() {
        println!("{}", USAGE);
        return Ok(None);
    }
    let command = positional.remove(0);
    Ok(Some(Args {
        command,
        rest: positional,
        hints,
        offline,
    }))
}

fn cache_dir() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
    Ok(cache_dir.join(APP_NAME))
}

fn build_coordinator() -> Result<Coordinator> {
    let dir = cache_dir()?;
    let backend = FileStore::new(dir.clone())
        .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;

    let url = std::env::var(SOURCE_URL_VAR).unwrap_or_else(|_| DEFAULT_SOURCE_URL.to_string());
    let mut source = HttpContentSource::new(url.clone()).context("Failed to build HTTP client")?;
    if let Ok(token) = std::env::var(TOKEN_VAR) {
        source = source.with_token(token);
    }
    info!(cache = %dir.display(), source = %url, "Engine wiring");

    Ok(Coordinator::new(
        CacheConfig::process().clone(),
        Arc::new(backend),
        Arc::new(source),
    ))
}

async fn run(coordinator: &Coordinator, command: &str, rest: &[String], hints: &DeviceHints) -> Result<Value> {
    let value = match command {
        "today" => {
            let allow_stale = rest.iter().any(|a| a == "--stale");
            match coordinator.get_today_content(allow_stale).await {
                Some(record) => serde_json::to_value(record)?,
                None => json!({ "content": null, "hint": "no fresh content; try --stale or refresh" }),
            }
        }
        "refresh" => serde_json::to_value(coordinator.refresh().await.context("Refresh failed")?)?,
        "stats" => serde_json::to_value(coordinator.get_all_statistics().await)?,
        "health" => serde_json::to_value(coordinator.get_all_health_metrics().await)?,
        "analytics" => serde_json::to_value(coordinator.get_performance_analytics().await)?,
        "benchmark" => serde_json::to_value(coordinator.run_benchmark().context("Benchmark failed")?)?,
        "optimize" => {
            let trigger = match rest.first() {
                Some(name) => OptimizationTrigger::from_str(name)
                    .with_context(|| format!("Unknown optimization trigger: {}", name))?,
                None => OptimizationTrigger::Manual,
            };
            let context = coordinator.optimization_context(hints);
            serde_json::to_value(coordinator.execute_optimization_strategy(trigger, &context))?
        }
        "sweep" => serde_json::to_value(coordinator.sweep())?,
        "interact" => {
            let name = rest.first().context("interact needs a kind")?;
            let kind = InteractionKind::from_str(name).with_context(|| format!("Unknown interaction: {}", name))?;
            coordinator.record_interaction(kind);
            json!({ "recorded": kind })
        }
        "legacy" => match rest.first().map(String::as_str) {
            Some("--list") | None => {
                let methods: serde_json::Map<String, Value> = compat::LEGACY_METHODS
                    .iter()
                    .map(|(name, call)| (name.to_string(), Value::from(call.signature())))
                    .collect();
                json!({
                    "deprecated_since": compat::DEPRECATED_SINCE,
                    "removal_version": compat::REMOVAL_VERSION,
                    "methods": methods,
                })
            }
            Some(name) => compat::invoke(coordinator, name)
                .await
                .with_context(|| format!("Legacy call {} failed", name))?,
        },
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = logging::init_tracing().context("Failed to initialize logging")?;

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let coordinator = build_coordinator()?;
    if args.offline {
        coordinator.set_online(false);
    }
    coordinator
        .initialize(args.hints.clone())
        .await
        .context("Invalid configuration")?;

    let result = run(&coordinator, &args.command, &args.rest, &args.hints).await;
    coordinator.shutdown().await;

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
