pub mod delta;
pub mod extract;
pub mod portal;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod tokens;
pub mod traits;
pub mod types;

pub use portal::{EventStream, PortalScraper};
pub use runner::{scrape_years, YearOutcome, YearRecord};
pub use session::{ReqwestSession, ReqwestSessionFactory};
pub use traits::{PortalSession, SessionFactory};
pub use types::{ScraperConfig, SearchType};
