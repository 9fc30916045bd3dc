use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::scrapers::protocol::{self, FormFields, PostMode};
use crate::scrapers::traits::{PortalSession, SessionFactory};
use crate::scrapers::types::ScraperConfig;

/// A reqwest client with its own cookie jar, bound to one search form URL.
pub struct ReqwestSession {
    client: Client,
    url: String,
}

impl ReqwestSession {
    pub fn new(config: &ScraperConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(protocol::default_headers())
            .cookie_store(true)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: config.form_url(),
        })
    }

    async fn read_body(response: reqwest::Response) -> Result<String, TransportError> {
        let status = response.status();
        if !status.is_success() {
            warn!("Portal returned status: {}", status);
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await?;
        debug!("Downloaded {} bytes", body.len());
        Ok(body)
    }
}

#[async_trait]
impl PortalSession for ReqwestSession {
    async fn load_form(&mut self) -> Result<String, TransportError> {
        debug!("GET {}", self.url);
        let response = self.client.get(&self.url).send().await?;
        Self::read_body(response).await
    }

    async fn post_form(&mut self, mode: PostMode, form: &FormFields) -> Result<String, TransportError> {
        debug!("POST {} ({:?}, {} fields)", self.url, mode, form.len());
        // `headers` replaces the content type `form` sets.
        let response = self
            .client
            .post(&self.url)
            .form(form)
            .headers(mode.headers())
            .send()
            .await?;
        Self::read_body(response).await
    }
}

/// Opens a [`ReqwestSession`] per year from a shared config.
#[derive(Debug, Clone)]
pub struct ReqwestSessionFactory {
    config: ScraperConfig,
}

impl ReqwestSessionFactory {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

impl SessionFactory for ReqwestSessionFactory {
    type Session = ReqwestSession;

    fn open_session(&self) -> Result<ReqwestSession, TransportError> {
        ReqwestSession::new(&self.config)
    }
}
