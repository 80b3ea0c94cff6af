use std::sync::Arc;

use solarlink_rs::config::{ApplyOverrides, ConfigOverrides, SolarlinkConfig, StoreOverrides};
use solarlink_rs::store::crossref_migration_sql;
use solarlink_rs::{LoadError, PhaseSelection, RestStore, RunSummary, Solarlink};
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"solarlink - cross-source matching and enrichment for solar installation records

USAGE:
    solarlink [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to config file (TOML)
        --phase <P>         Phase to emit pairs for: 1, 2, 3 or all [default: all]
        --dry-run           Compute patches and print a sample without writing
        --setup-schema      Print the crossref migration SQL and exit
        --store-url <URL>   Override store base URL
        --concurrency <N>   Override concurrent updates during apply
    -h, --help              Print help

ENVIRONMENT:
    SOLARLINK_CONFIG                Path to config file
    SOLARLINK_STORE__BASE_URL       Store base URL
    SOLARLINK_STORE_KEY             Store API key
    RUST_LOG                        Log filter [default: info]

CONFIG FILE (solarlink.toml):
    [store]
    base_url = "https://db.example.org/rest/v1"

    [matching.broad]
    radius_km = 0.5
    capacity_tolerance = 0.25

    [apply]
    concurrency = 16
"#
    );
}

fn print_summary(summary: &RunSummary) {
    println!("records loaded: {}", summary.records);
    println!(
        "pages: {} fetched, {} failed; rows skipped: {}; duplicate keys: {}",
        summary.load.pages_fetched,
        summary.load.pages_failed,
        summary.load.rows_skipped,
        summary.load.duplicate_keys
    );
    for (phase, stats) in &summary.phases {
        println!(
            "phase {}: {} pairs, {} records matched, {} skipped",
            phase.number(),
            stats.pairs,
            stats.records_matched,
            stats.skipped
        );
    }

    let enrichment = &summary.enrichment;
    println!(
        "targets patched: {} (unchanged: {})",
        enrichment.targets_patched, enrichment.targets_unchanged
    );
    for (field, count) in &enrichment.fields {
        println!("  {:<22} {}", field.column(), count);
    }
    println!("  {:<22} {}", "coordinates filled", enrichment.coordinates_filled);
    println!("  {:<22} {}", "location upgrades", enrichment.location_upgrades);
    println!(
        "  {:<22} {} (dropped at cap: {}, stored lists cleaned: {})",
        "crossrefs added",
        enrichment.crossrefs_added,
        enrichment.crossrefs_dropped_at_cap,
        enrichment.crossrefs_cleaned
    );

    let apply = &summary.apply;
    if apply.dry_run {
        println!("dry run: {} patches would be written", apply.attempted);
        for (id, patch) in &apply.sample {
            println!("  {} {}", id, serde_json::Value::Object(patch.to_json()));
        }
    } else {
        println!(
            "applied: {} of {} ({} failed)",
            apply.applied, apply.attempted, apply.failed
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    if let Some(url) = parse_arg("--store-url") {
        overrides.store = Some(StoreOverrides {
            base_url: Some(url),
        });
    }
    if let Some(concurrency) = parse_arg("--concurrency") {
        overrides.apply = Some(ApplyOverrides {
            concurrency: Some(concurrency.parse()?),
        });
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("SOLARLINK_CONFIG").ok());
    let config = SolarlinkConfig::load(config_path.as_deref(), overrides)?;

    if has_flag("--setup-schema") {
        println!("{}", crossref_migration_sql(&config.store.installations_table));
        return Ok(());
    }

    let selection: PhaseSelection = match parse_arg("--phase") {
        Some(phase) => phase.parse().map_err(anyhow::Error::msg)?,
        None => PhaseSelection::All,
    };
    let dry_run = has_flag("--dry-run");

    let store = RestStore::from_config(&config.store)?;
    let engine = Solarlink::new(Arc::new(store), config)?;

    match engine.run(selection, dry_run).await {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(err) => match err.downcast_ref::<LoadError>() {
            Some(load_err @ LoadError::MissingCrossrefField { .. }) => {
                eprintln!("{load_err}");
                eprintln!();
                eprintln!("{}", crossref_migration_sql(&engine.config().store.installations_table));
                std::process::exit(2);
            }
            _ => Err(err),
        },
    }
}
