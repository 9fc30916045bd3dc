use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use propfind::models::is_valid_year;
use propfind::scrapers::protocol::BASE_URL;
use propfind::scrapers::runner::{merge_records, year_range};
use propfind::scrapers::scrape_years;
use propfind::{PortalScraper, ScraperConfig, SearchCriteria, SearchType};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Search Uttarakhand property registrations by buyer or seller name.
#[derive(Parser, Debug)]
#[command(name = "propfind", version)]
struct Args {
    /// District code, e.g. 12
    #[arg(long)]
    district: String,

    /// Sub-registrar office code within the district, e.g. 03
    #[arg(long)]
    office: String,

    /// Name (or part of one) to search for
    #[arg(long)]
    name: String,

    /// First registration year
    #[arg(long, value_parser = parse_year)]
    from_year: u16,

    /// Last registration year (defaults to --from-year)
    #[arg(long, value_parser = parse_year)]
    to_year: Option<u16>,

    /// Match the name against buyers or sellers
    #[arg(long, default_value_t = SearchType::Buyer)]
    search_type: SearchType,

    /// Seconds to wait between postbacks
    #[arg(long, env = "PROPFIND_STEP_DELAY", default_value_t = 2)]
    delay_secs: u64,

    /// Per-request timeout in seconds
    #[arg(long, env = "PROPFIND_TIMEOUT", default_value_t = 60)]
    timeout_secs: u64,

    /// Portal address
    #[arg(long, env = "PROPFIND_BASE_URL", default_value = BASE_URL)]
    base_url: String,

    /// User-Agent header sent with every request
    #[arg(long, env = "PROPFIND_USER_AGENT")]
    user_agent: Option<String>,

    /// How many years to scrape at the same time
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Where to write the JSON results
    #[arg(long)]
    output: Option<PathBuf>,
}

fn parse_year(s: &str) -> Result<u16, String> {
    if !is_valid_year(s) {
        return Err(format!("'{}' is not a 4-digit year", s));
    }
    s.parse().map_err(|e| format!("{}", e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!("PropFind - {} search", args.search_type);
    info!("==========================================");

    let mut config = ScraperConfig::new(args.search_type)
        .with_base_url(args.base_url.as_str())
        .with_step_delay(Duration::from_secs(args.delay_secs))
        .with_request_timeout(Duration::from_secs(args.timeout_secs));
    if let Some(user_agent) = &args.user_agent {
        config = config.with_user_agent(user_agent.as_str());
    }
    let scraper = PortalScraper::with_config(config);
    info!("Portal form: {}", scraper.config().form_url());

    let to_year = args.to_year.unwrap_or(args.from_year);
    let years = year_range(args.from_year, to_year);
    let criteria = SearchCriteria::new(&args.district, &args.office, "", &args.name);

    info!(
        "Searching district {}, office {} for '{}' in {} year(s)",
        args.district,
        args.office,
        args.name,
        years.len()
    );

    let outcomes = scrape_years(&scraper, &criteria, &years, args.concurrency).await;
    let records = merge_records(&outcomes);

    for outcome in &outcomes {
        match &outcome.error {
            Some(err) => warn!(
                "{}: stopped after {} page(s), {} records: {}",
                outcome.year,
                outcome.pages,
                outcome.records.len(),
                err
            ),
            None => info!("{}: {} records", outcome.year, outcome.records.len()),
        }
    }

    let summary: Vec<_> = outcomes
        .iter()
        .map(|o| {
            json!({
                "year": o.year,
                "completed": o.completed,
                "pages": o.pages,
                "records": o.records.len(),
                "error": o.error.as_ref().map(|e| e.to_string()),
            })
        })
        .collect();

    let report = json!({
        "search_type": args.search_type,
        "district": args.district,
        "office": args.office,
        "name": args.name,
        "scraped_at": Utc::now(),
        "years": summary,
        "records": records,
    });

    let output = args.output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "propfind_{}_{}-{}.json",
            args.name.replace(char::is_whitespace, "_"),
            args.from_year.min(to_year),
            args.from_year.max(to_year)
        ))
    });

    let json = serde_json::to_string_pretty(&report)?;
    tokio::fs::write(&output, json)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Saved {} records to {}", records.len(), output.display());

    Ok(())
}
