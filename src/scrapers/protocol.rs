//! Wire details of the e-registration search pages.
//!
//! Every field identifier, header value and endpoint path the portal relies
//! on lives here. When the portal changes its markup or form names, this is
//! the module to update; the step sequence in `portal` only asks for forms
//! by intent.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};

use crate::models::{SearchCriteria, Step};
use crate::scrapers::tokens::StateTokens;

pub const BASE_URL: &str = "https://online.eregistrationukgov.in";
pub const BUYER_PATH: &str = "/e_search/Buyer_Wise.aspx";
pub const SELLER_PATH: &str = "/e_search/Seller_Wise.aspx";

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// State tokens
pub const VIEW_STATE: &str = "__VIEWSTATE";
pub const EVENT_VALIDATION: &str = "__EVENTVALIDATION";
pub const VIEW_STATE_GENERATOR: &str = "__VIEWSTATEGENERATOR";

// Postback plumbing
pub const EVENT_TARGET: &str = "__EVENTTARGET";
pub const EVENT_ARGUMENT: &str = "__EVENTARGUMENT";
pub const LAST_FOCUS: &str = "__LASTFOCUS";
pub const ASYNC_POST: &str = "__ASYNCPOST";
pub const SCRIPT_MANAGER: &str = "ctl00$ScriptManager1";
pub const UPDATE_PANEL: &str = "ctl00$MainContent$UpdatePanel1";

// Search form
pub const DISTRICT_FIELD: &str = "ctl00$MainContent$ddl_dis";
pub const OFFICE_FIELD: &str = "ctl00$MainContent$ddl_sro";
pub const YEAR_FIELD: &str = "ctl00$MainContent$dd_regyear";
pub const NAME_FIELD: &str = "propAddress";
pub const SEARCH_BUTTON: &str = "ctl00$MainContent$btn_prcd";
pub const SEARCH_BUTTON_VALUE: &str = "Search";
pub const RESULTS_GRID: &str = "ctl00$MainContent$GridView2";

/// `id` attribute of the results table in the rendered page.
pub const RESULTS_TABLE_ID: &str = "GridView2";

// Delta segment types
pub const DELTA_HIDDEN_FIELD: &str = "hiddenField";
pub const DELTA_UPDATE_PANEL: &str = "updatePanel";

/// Form body as ordered name/value pairs.
pub type FormFields = Vec<(&'static str, String)>;

/// How a postback travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostMode {
    /// Async postback through the page's script manager; answered with a
    /// delta stream.
    Partial,
    /// Plain form submission; answered with a whole document.
    Full,
}

impl PostMode {
    pub fn headers(self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match self {
            PostMode::Partial => {
                headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
                headers.insert("X-MicrosoftAjax", HeaderValue::from_static("Delta=true"));
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
                );
            }
            PostMode::Full => {
                headers.insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("application/x-www-form-urlencoded"),
                );
            }
        }
        headers
    }
}

/// Headers sent with every request of a session.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers
}

/// The three dropdowns that each trigger an async postback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    District,
    Office,
    Year,
}

impl Selection {
    pub const ORDER: [Selection; 3] = [Selection::District, Selection::Office, Selection::Year];

    /// Position in the dependency chain, district first.
    pub fn index(self) -> usize {
        match self {
            Selection::District => 0,
            Selection::Office => 1,
            Selection::Year => 2,
        }
    }

    pub fn field(self) -> &'static str {
        match self {
            Selection::District => DISTRICT_FIELD,
            Selection::Office => OFFICE_FIELD,
            Selection::Year => YEAR_FIELD,
        }
    }

    pub fn step(self) -> Step {
        match self {
            Selection::District => Step::SelectDistrict,
            Selection::Office => Step::SelectOffice,
            Selection::Year => Step::SelectYear,
        }
    }

    /// The value this selection carries for the given criteria.
    pub fn value(self, criteria: &SearchCriteria) -> &str {
        match self {
            Selection::District => &criteria.district_id,
            Selection::Office => &criteria.office_id,
            Selection::Year => &criteria.year,
        }
    }
}

/// Async postback for one dropdown change. Dropdowns later in the chain than
/// `selection` are sent empty, as the browser would before they are filled.
pub fn selection_form(
    selection: Selection,
    criteria: &SearchCriteria,
    tokens: &StateTokens,
) -> FormFields {
    let chosen = |s: Selection| {
        if s.index() <= selection.index() {
            s.value(criteria).to_string()
        } else {
            String::new()
        }
    };

    let mut form: FormFields = vec![
        (SCRIPT_MANAGER, format!("{}|{}", UPDATE_PANEL, selection.field())),
        (EVENT_TARGET, selection.field().to_string()),
        (EVENT_ARGUMENT, String::new()),
        (LAST_FOCUS, String::new()),
    ];
    form.extend(tokens.form_fields());
    form.extend([
        (DISTRICT_FIELD, chosen(Selection::District)),
        (OFFICE_FIELD, chosen(Selection::Office)),
        (YEAR_FIELD, chosen(Selection::Year)),
        (NAME_FIELD, String::new()),
        (ASYNC_POST, "true".to_string()),
    ]);
    form
}

/// Full postback of the search button.
pub fn search_form(criteria: &SearchCriteria, tokens: &StateTokens) -> FormFields {
    let mut form = full_postback(criteria, tokens, "", "");
    form.push((SEARCH_BUTTON, SEARCH_BUTTON_VALUE.to_string()));
    form
}

/// Full postback of the results grid's pager.
pub fn page_form(criteria: &SearchCriteria, tokens: &StateTokens, page_argument: &str) -> FormFields {
    full_postback(criteria, tokens, RESULTS_GRID, page_argument)
}

fn full_postback(
    criteria: &SearchCriteria,
    tokens: &StateTokens,
    target: &str,
    argument: &str,
) -> FormFields {
    let mut form: FormFields = vec![
        (EVENT_TARGET, target.to_string()),
        (EVENT_ARGUMENT, argument.to_string()),
        (LAST_FOCUS, String::new()),
    ];
    form.extend(tokens.form_fields());
    form.extend([
        (DISTRICT_FIELD, criteria.district_id.clone()),
        (OFFICE_FIELD, criteria.office_id.clone()),
        (YEAR_FIELD, criteria.year.clone()),
        (NAME_FIELD, criteria.name_pattern.clone()),
    ]);
    form
}
