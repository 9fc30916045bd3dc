//! The three rotating state tokens the portal expects echoed on every postback.

use crate::scrapers::protocol::{EVENT_VALIDATION, VIEW_STATE, VIEW_STATE_GENERATOR};

/// Token values observed in one response. `None` means the response did not
/// mention that token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUpdate {
    pub view_state: Option<String>,
    pub event_validation: Option<String>,
    pub generator: Option<String>,
}

impl TokenUpdate {
    /// Record a named field if it is one of the tracked tokens.
    /// Returns false for any other name.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        let slot = match name {
            VIEW_STATE => &mut self.view_state,
            EVENT_VALIDATION => &mut self.event_validation,
            VIEW_STATE_GENERATOR => &mut self.generator,
            _ => return false,
        };
        *slot = Some(value.into());
        true
    }

    pub fn is_empty(&self) -> bool {
        self.view_state.is_none() && self.event_validation.is_none() && self.generator.is_none()
    }

    /// Names of tracked tokens this update lacks.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.view_state.is_none() {
            missing.push(VIEW_STATE);
        }
        if self.event_validation.is_none() {
            missing.push(EVENT_VALIDATION);
        }
        if self.generator.is_none() {
            missing.push(VIEW_STATE_GENERATOR);
        }
        missing
    }
}

/// Current token values plus a revision that moves whenever one of them does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateTokens {
    pub view_state: String,
    pub event_validation: String,
    pub generator: String,
    pub revision: u32,
}

impl StateTokens {
    /// Replace all three tokens from a full page. Fails, naming the missing
    /// tokens, unless the page carried every one of them.
    pub fn replaced(self, update: TokenUpdate) -> Result<Self, Vec<&'static str>> {
        let missing = update.missing();
        if !missing.is_empty() {
            return Err(missing);
        }
        Ok(self.merged(update))
    }

    /// Apply an update. Tokens the update lacks keep their prior value; the
    /// revision only advances when a value actually changes.
    pub fn merged(self, update: TokenUpdate) -> Self {
        let mut next = self.clone();
        if let Some(value) = update.view_state {
            next.view_state = value;
        }
        if let Some(value) = update.event_validation {
            next.event_validation = value;
        }
        if let Some(value) = update.generator {
            next.generator = value;
        }

        if next.view_state != self.view_state
            || next.event_validation != self.event_validation
            || next.generator != self.generator
        {
            next.revision = self.revision + 1;
        }
        next
    }

    /// Form fields in the order the portal's own pages post them.
    pub fn form_fields(&self) -> [(&'static str, String); 3] {
        [
            (VIEW_STATE, self.view_state.clone()),
            (VIEW_STATE_GENERATOR, self.generator.clone()),
            (EVENT_VALIDATION, self.event_validation.clone()),
        ]
    }
}
