use async_trait::async_trait;

use crate::error::TransportError;
use crate::scrapers::protocol::{FormFields, PostMode};

/// One HTTP session with the portal's search form.
///
/// Cookies and any other session identity live as long as the value does;
/// dropping it ends the session.
#[async_trait]
pub trait PortalSession: Send {
    /// GET the search form.
    async fn load_form(&mut self) -> Result<String, TransportError>;

    /// POST a form to the search page and return the response body.
    async fn post_form(&mut self, mode: PostMode, form: &FormFields) -> Result<String, TransportError>;
}

/// Opens a brand-new session for every year that gets scraped.
pub trait SessionFactory: Send + Sync {
    type Session: PortalSession + 'static;

    fn open_session(&self) -> Result<Self::Session, TransportError>;
}
