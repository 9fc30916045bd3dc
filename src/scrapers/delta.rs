//! Parser for the async-postback delta stream.
//!
//! A delta body is a run of `length|type|id|content|` segments. `length`
//! counts UTF-16 code units of `content`, which may itself contain `|`.

use crate::scrapers::protocol::{DELTA_HIDDEN_FIELD, DELTA_UPDATE_PANEL};
use crate::scrapers::tokens::TokenUpdate;

/// A segment of a delta response that the driver cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaUpdate {
    HiddenField { name: String, value: String },
    Panel { id: String, markup: String },
}

/// Everything useful in one delta response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialPage {
    pub tokens: TokenUpdate,
    pub panels: Vec<(String, String)>,
}

impl PartialPage {
    pub fn from_updates(updates: Vec<DeltaUpdate>) -> Self {
        let mut page = PartialPage::default();
        for update in updates {
            match update {
                DeltaUpdate::HiddenField { name, value } => {
                    page.tokens.set(&name, value);
                }
                DeltaUpdate::Panel { id, markup } => page.panels.push((id, markup)),
            }
        }
        page
    }
}

/// Whether `body` is a delta stream rather than an HTML page. A delta opens
/// with a numeric length field.
pub fn is_delta(body: &str) -> bool {
    match body.split_once('|') {
        Some((length, _)) => {
            let length = length.trim();
            !length.is_empty() && length.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Split a delta body into its hidden-field and panel segments.
///
/// Segments of other types are dropped. A length field that is not a number
/// is skipped and parsing resumes at the next field; a segment cut off at the
/// end of the body is dropped.
pub fn parse_delta(body: &str) -> Vec<DeltaUpdate> {
    let mut updates = Vec::new();
    let mut rest = body;

    while let Some((length, after_length)) = rest.split_once('|') {
        let Ok(length) = length.trim().parse::<usize>() else {
            rest = after_length;
            continue;
        };
        let Some((kind, after_kind)) = after_length.split_once('|') else {
            break;
        };
        let Some((id, after_id)) = after_kind.split_once('|') else {
            break;
        };

        let (content, tail) = match take_utf16(after_id, length) {
            Some((content, tail)) if tail.starts_with('|') => (content, &tail[1..]),
            // Declared length disagrees with the body; fall back to the delimiter.
            _ => match after_id.split_once('|') {
                Some(split) => split,
                None => break,
            },
        };
        rest = tail;

        match kind {
            DELTA_HIDDEN_FIELD => updates.push(DeltaUpdate::HiddenField {
                name: id.to_string(),
                value: content.to_string(),
            }),
            DELTA_UPDATE_PANEL => updates.push(DeltaUpdate::Panel {
                id: id.to_string(),
                markup: content.to_string(),
            }),
            _ => {}
        }
    }

    updates
}

/// Split `s` after `units` UTF-16 code units, if that lands on a char boundary.
fn take_utf16(s: &str, units: usize) -> Option<(&str, &str)> {
    let mut counted = 0;
    for (index, c) in s.char_indices() {
        if counted == units {
            return Some(s.split_at(index));
        }
        counted += c.len_utf16();
        if counted > units {
            return None;
        }
    }
    (counted == units).then_some((s, ""))
}
