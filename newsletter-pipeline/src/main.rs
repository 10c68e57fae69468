use anyhow::{bail, Context};
use clap::Parser;
use newsletter_pipeline::links::parse_link_list;
use newsletter_pipeline::{NewsletterConfig, NewsletterPipeline, RunRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Turn a list of news links into a formatted newsletter document.
#[derive(Debug, Parser)]
#[command(name = "newsletter-pipeline", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "NEWSLETTER_CONFIG", default_value = "newsletter.toml")]
    config: PathBuf,

    /// Links file: one `url | section | note` per line
    #[arg(long)]
    links: PathBuf,

    /// Free-form editorial instructions
    #[arg(long)]
    instructions: Option<PathBuf>,

    /// Sponsor paragraph placed before the lead
    #[arg(long)]
    sponsor: Option<String>,

    /// Plan the document without publishing it
    #[arg(long)]
    dry_run: bool,

    /// Write the JSON run report here
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {}", e);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting newsletter pipeline");

    let config = NewsletterConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    let links_text = std::fs::read_to_string(&cli.links)
        .with_context(|| format!("reading links from {}", cli.links.display()))?;
    let links = parse_link_list(&links_text);
    if links.is_empty() {
        bail!("no links found in {}", cli.links.display());
    }

    let mut request = RunRequest::new(links).dry_run(cli.dry_run);
    if let Some(path) = &cli.instructions {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading instructions from {}", path.display()))?;
        request = request.with_instructions(text);
    }
    if let Some(sponsor) = cli.sponsor {
        request = request.with_sponsor(sponsor);
    }

    let pipeline = NewsletterPipeline::new(Arc::new(config))?;
    let report = match pipeline.run(request).await {
        Ok(report) => report,
        Err(e) => {
            error!("Run failed: {}", e);
            return Err(e.into());
        }
    };

    for failure in &report.link_failures {
        warn!(
            "Link {} excluded at {:?} ({}): {}",
            failure.position + 1,
            failure.stage,
            failure.kind,
            failure.reason
        );
    }
    match &report.published {
        Some(published) => info!("Newsletter published: {}", published.url),
        None => info!(
            "Newsletter planned with {} operation(s)",
            report.operations.operations.len()
        ),
    }

    let json = serde_json::to_string_pretty(&report)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("writing report to {}", path.display()))?;
            info!("Run report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
