//! Running several years, each in its own session.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::error::PortalError;
use crate::models::{ProgressEvent, PropertyRecord, SearchCriteria};
use crate::scrapers::portal::{EventStream, PortalScraper};
use crate::scrapers::traits::SessionFactory;

/// What one year's scrape produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YearOutcome {
    pub year: String,
    pub records: Vec<PropertyRecord>,
    pub pages: u32,
    /// Set when the year stopped at an `Error`. Records of pages read before
    /// the failure are kept.
    pub error: Option<PortalError>,
    /// True once `Done` arrived.
    pub completed: bool,
}

/// A record tagged with the year it was found under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRecord {
    #[serde(rename = "Year")]
    pub year: String,
    #[serde(flatten)]
    pub record: PropertyRecord,
}

/// Every year from `from` to `to` inclusive, in ascending order whichever
/// bound is larger.
pub fn year_range(from: u16, to: u16) -> Vec<String> {
    (from.min(to)..=from.max(to)).map(|y| y.to_string()).collect()
}

/// Drain a year's events into an outcome, logging progress as it goes.
/// Stops at the first `Error` or `Done`, releasing the year's session.
pub async fn collect_year(year: impl Into<String>, mut events: EventStream) -> YearOutcome {
    let mut outcome = YearOutcome {
        year: year.into(),
        ..Default::default()
    };

    while let Some(event) = events.next().await {
        let terminal = event.is_terminal();
        match event {
            ProgressEvent::Info { message } => info!("[{}] {}", outcome.year, message),
            ProgressEvent::Error(err) => {
                warn!("[{}] {}", outcome.year, err);
                outcome.error = Some(err);
            }
            ProgressEvent::Data { page, records, .. } => {
                outcome.pages = page;
                outcome.records.extend(records);
            }
            ProgressEvent::Done { total, .. } => {
                info!("[{}] finished with {} records", outcome.year, total);
                outcome.completed = true;
            }
        }
        if terminal {
            break;
        }
    }

    outcome
}

/// Scrape each year with the same district, office and name.
///
/// At most `concurrency` years run at once (at least one). Outcomes come
/// back in the order of `years`.
pub async fn scrape_years<F>(
    scraper: &PortalScraper<F>,
    criteria: &SearchCriteria,
    years: &[String],
    concurrency: usize,
) -> Vec<YearOutcome>
where
    F: SessionFactory + 'static,
{
    stream::iter(years)
        .map(|year| collect_year(year.clone(), scraper.scrape(criteria.for_year(year.as_str()))))
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Flatten outcomes into year-tagged records, dropping repeats of the same
/// registration.
pub fn merge_records(outcomes: &[YearOutcome]) -> Vec<YearRecord> {
    let mut seen = HashSet::new();
    outcomes
        .iter()
        .flat_map(|outcome| {
            outcome.records.iter().map(move |record| YearRecord {
                year: outcome.year.clone(),
                record: record.clone(),
            })
        })
        .filter(|tagged| seen.insert(tagged.record.dedup_key(&tagged.year)))
        .collect()
}
