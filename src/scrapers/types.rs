use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::scrapers::protocol::{BASE_URL, BUYER_PATH, SELLER_PATH, USER_AGENT};

/// Which side of the deed the name filter matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Buyer,
    Seller,
}

impl SearchType {
    pub fn path(self) -> &'static str {
        match self {
            SearchType::Buyer => BUYER_PATH,
            SearchType::Seller => SELLER_PATH,
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchType::Buyer => write!(f, "buyer"),
            SearchType::Seller => write!(f, "seller"),
        }
    }
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buyer" => Ok(SearchType::Buyer),
            "seller" => Ok(SearchType::Seller),
            other => Err(format!("unknown search type '{}'", other)),
        }
    }
}

/// Settings shared by every session a scraper opens.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Scheme and host of the portal, without a trailing slash.
    pub base_url: String,
    pub search_type: SearchType,
    /// Pause before each postback after the first page load.
    pub step_delay: Duration,
    /// Applied to every request on its own.
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            search_type: SearchType::Buyer,
            step_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(60),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl ScraperConfig {
    pub fn new(search_type: SearchType) -> Self {
        Self {
            search_type,
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Address of the search form for the configured search type.
    pub fn form_url(&self) -> String {
        format!("{}{}", self.base_url, self.search_type.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScraperConfig::default();

        assert_eq!(
            config.form_url(),
            "https://online.eregistrationukgov.in/e_search/Buyer_Wise.aspx"
        );
        assert_eq!(config.step_delay, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_builder() {
        let config = ScraperConfig::new(SearchType::Seller)
            .with_base_url("http://127.0.0.1:8080/")
            .with_step_delay(Duration::ZERO);

        assert_eq!(config.form_url(), "http://127.0.0.1:8080/e_search/Seller_Wise.aspx");
        assert_eq!(config.step_delay, Duration::ZERO);
    }

    #[test]
    fn test_search_type_from_str() {
        assert_eq!("Seller".parse::<SearchType>(), Ok(SearchType::Seller));
        assert_eq!("buyer".parse::<SearchType>(), Ok(SearchType::Buyer));
        assert!("owner".parse::<SearchType>().is_err());
    }
}
