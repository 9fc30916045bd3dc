//! Reading whole pages: state tokens, the results grid and its pager.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::models::PropertyRecord;
use crate::scrapers::delta::PartialPage;
use crate::scrapers::protocol::{
    EVENT_VALIDATION, RESULTS_TABLE_ID, VIEW_STATE, VIEW_STATE_GENERATOR,
};
use crate::scrapers::tokens::TokenUpdate;

/// Rows with fewer cells than this are pager or spacer rows.
pub const MIN_DATA_CELLS: usize = 10;

/// What the driver needs from one full page.
///
/// `Html` cannot cross an await point, so pages are boiled down to owned
/// data right after they arrive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsPage {
    pub tokens: TokenUpdate,
    pub records: Vec<PropertyRecord>,
    pub next_page: Option<String>,
}

impl ResultsPage {
    /// Parse a full page that is showing results page `page`.
    pub fn parse(body: &str, page: u32) -> Self {
        let document = Html::parse_document(body);
        Self {
            tokens: parse_tokens(&document),
            records: parse_records(&document),
            next_page: next_page_argument(&document, page),
        }
    }

    /// Results delivered as a delta: the grid is read out of the panel
    /// markup and the tokens are whichever hidden fields came along.
    pub fn from_partial(partial: PartialPage, page: u32) -> Self {
        let mut results = Self {
            tokens: partial.tokens,
            ..Default::default()
        };
        for (id, markup) in &partial.panels {
            let fragment = Html::parse_fragment(markup);
            let records = parse_records(&fragment);
            debug!("Panel {}: {} records", id, records.len());
            results.records.extend(records);
            if results.next_page.is_none() {
                results.next_page = next_page_argument(&fragment, page);
            }
        }
        results
    }
}

/// Read the hidden token inputs of a full page.
pub fn parse_tokens(document: &Html) -> TokenUpdate {
    let mut update = TokenUpdate::default();
    for name in [VIEW_STATE, EVENT_VALIDATION, VIEW_STATE_GENERATOR] {
        let Ok(selector) = Selector::parse(&format!("input#{}", name)) else {
            continue;
        };
        if let Some(input) = document.select(&selector).next() {
            update.set(name, input.value().attr("value").unwrap_or_default());
        }
    }
    update
}

fn results_table(document: &Html) -> Option<ElementRef<'_>> {
    let selector = Selector::parse(&format!("table#{}", RESULTS_TABLE_ID)).ok()?;
    document.select(&selector).next()
}

/// Extract one record per data row of the results grid.
///
/// The first row is the header. Rows of tables nested inside the grid (the
/// pager renders one) are not rows of the grid.
pub fn parse_records(document: &Html) -> Vec<PropertyRecord> {
    let Some(table) = results_table(document) else {
        debug!("No results table on page");
        return Vec::new();
    };
    let Ok(row_selector) = Selector::parse("tr") else {
        return Vec::new();
    };

    let rows: Vec<ElementRef> = table
        .select(&row_selector)
        .filter(|row| owning_table(row).map(|t| t.id()) == Some(table.id()))
        .collect();

    if rows.len() < 2 {
        return Vec::new();
    }

    rows[1..]
        .iter()
        .filter_map(|row| {
            let cells: Vec<String> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| cell.value().name() == "td")
                .map(|cell| cell.text().collect::<String>().trim().to_string())
                .collect();

            if cells.len() < MIN_DATA_CELLS {
                return None;
            }
            Some(PropertyRecord::from_cells(cells))
        })
        .collect()
}

fn owning_table<'a>(row: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    row.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "table")
}

/// The pager argument for the page after `current_page`, if the grid links
/// to it.
///
/// Any link in the grid whose `href` contains `Page$<n+1>` counts, matching
/// how the grid renders its `__doPostBack` pager links.
pub fn next_page_argument(document: &Html, current_page: u32) -> Option<String> {
    let table = results_table(document)?;
    let link_selector = Selector::parse("a[href]").ok()?;
    let argument = format!("Page${}", current_page + 1);

    table
        .select(&link_selector)
        .filter_map(|link| link.value().attr("href"))
        .any(|href| href.contains(&argument))
        .then_some(argument)
}
