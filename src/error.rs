use thiserror::Error;

use crate::models::Step;

/// Failure of a single HTTP exchange with the portal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("http status {0}")]
    HttpStatus(u16),

    #[error("connection error: {0}")]
    Connect(String),

    #[error("failed to build http client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportError::Timeout;
        }
        if let Some(status) = err.status() {
            return TransportError::HttpStatus(status.as_u16());
        }
        TransportError::Connect(err.to_string())
    }
}

/// Why a year's scrape stopped early.
///
/// Markup changes on the portal and transient network trouble are not told
/// apart beyond these three kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    #[error("{step} failed: {message}")]
    Network { step: Step, message: String },

    #[error("{step} failed: could not read response: {message}")]
    Parse { step: Step, message: String },

    #[error("pagination to page {page} failed: {message}")]
    Pagination { page: u32, message: String },
}

impl PortalError {
    pub fn network(step: Step, err: impl std::fmt::Display) -> Self {
        PortalError::Network {
            step,
            message: err.to_string(),
        }
    }

    pub fn parse(step: Step, message: impl Into<String>) -> Self {
        PortalError::Parse {
            step,
            message: message.into(),
        }
    }

    /// Step the error happened in.
    pub fn step(&self) -> Step {
        match self {
            PortalError::Network { step, .. } | PortalError::Parse { step, .. } => *step,
            PortalError::Pagination { .. } => Step::Paginate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_step_context() {
        let err = PortalError::network(Step::SelectDistrict, TransportError::Timeout);
        assert_eq!(err.to_string(), "district selection failed: request timed out");

        let err = PortalError::parse(Step::Init, "missing __VIEWSTATE");
        assert_eq!(
            err.to_string(),
            "initial load failed: could not read response: missing __VIEWSTATE"
        );

        let err = PortalError::Pagination {
            page: 3,
            message: "http status 500".to_string(),
        };
        assert_eq!(err.step(), Step::Paginate);
        assert_eq!(err.to_string(), "pagination to page 3 failed: http status 500");
    }
}
