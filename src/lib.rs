//! Client for the Uttarakhand e-registration property search.
//!
//! The portal only answers searches through a chain of dependent postbacks
//! (district, office, year, name, then pager clicks), each carrying the
//! state tokens of the previous response. [`PortalScraper`] replays that chain
//! in a fresh session per year and reports progress and records as a stream
//! of [`ProgressEvent`]s.
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use propfind::{PortalScraper, ProgressEvent, SearchType};
//!
//! let scraper = PortalScraper::new(SearchType::Buyer);
//! let mut events = scraper.scrape_year("12", "03", "2019", "Ram");
//! while let Some(event) = events.next().await {
//!     if let ProgressEvent::Data { records, .. } = event {
//!         println!("{} records", records.len());
//!     }
//! }
//! ```

pub mod error;
pub mod models;
pub mod scrapers;

pub use error::{PortalError, TransportError};
pub use models::{ProgressEvent, PropertyRecord, SearchCriteria, Step};
pub use scrapers::{PortalScraper, ScraperConfig, SearchType};
