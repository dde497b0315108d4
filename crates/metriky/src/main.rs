use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use metriky_core::analytics::ReplicaStore;
use metriky_core::config::{load_config, resolve_config_path};
use metriky_core::pipeline::{ReportRequest, run_report};
use metriky_core::wiki::{MediaWikiClient, MediaWikiClientConfig, WikiPageApi};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "metriky",
    version,
    about = "Append replica-derived activity metrics to a wiki club event section"
)]
struct Cli {
    /// Configured target page, e.g. `praha-2019`.
    target: String,
    /// Leading text of the event heading, e.g. `2024-5-10`. Defaults to the last dated section.
    section: Option<String>,
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, help = "Render the report and print the diff without saving")]
    dry_run: bool,
    #[arg(long, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (config_path, source) = resolve_config_path(cli.config.as_deref());
    let config = load_config(config_path.as_deref())?;
    info!(source = source.as_str(), target = cli.target.as_str(), "configuration loaded");

    let target = config.target(&cli.target)?;
    let mut wiki = MediaWikiClient::new(MediaWikiClientConfig::new(
        config.api_url(target),
        config.user_agent(),
    ))?;
    if !cli.dry_run {
        let (user, password) = bot_credentials()?;
        wiki.login(&user, &password)?;
    }
    let mut store = ReplicaStore::from_config(&config)?;

    let request = ReportRequest {
        target: cli.target.clone(),
        section: cli.section,
        dry_run: cli.dry_run,
    };
    let outcome = run_report(&config, &request, &mut wiki, &mut store)?;

    println!(
        "{} {} (base revision {}, {} requests)",
        if outcome.saved { "saved" } else { "not saved" },
        outcome.page_title,
        outcome.base_revision_id,
        wiki.request_count()
    );
    if cli.diagnostics {
        println!(
            "\n[diagnostics]\n{}",
            config.diagnostics(config_path.as_deref(), source, &cli.target)
        );
    }

    Ok(())
}

fn bot_credentials() -> Result<(String, String)> {
    let user = env::var("WIKI_BOT_USER")
        .ok()
        .filter(|value| !value.trim().is_empty());
    let password = env::var("WIKI_BOT_PASSWORD")
        .ok()
        .filter(|value| !value.is_empty());
    match (user, password) {
        (Some(user), Some(password)) => Ok((user.trim().to_string(), password)),
        _ => bail!(
            "WIKI_BOT_USER and WIKI_BOT_PASSWORD must be set to save; use --dry-run to preview"
        ),
    }
}
