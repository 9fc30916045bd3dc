use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PortalError;

/// One row of the portal's results grid.
///
/// Values are the trimmed cell text, in the grid's column order. Nothing is
/// parsed or coerced here; `amount` and `market_value` stay as the portal
/// renders them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    #[serde(rename = "Village")]
    pub village: String,
    #[serde(rename = "RegDate")]
    pub reg_date: String,
    #[serde(rename = "RegNo")]
    pub reg_no: String,
    #[serde(rename = "Area")]
    pub area: String,
    #[serde(rename = "PropNo")]
    pub prop_no: String,
    #[serde(rename = "DeedType")]
    pub deed_type: String,
    #[serde(rename = "JildDetails")]
    pub jild_details: String,
    #[serde(rename = "Seller")]
    pub seller: String,
    #[serde(rename = "Buyer")]
    pub buyer: String,
    #[serde(rename = "BuyerGender")]
    pub buyer_gender: String,
    #[serde(rename = "SRO")]
    pub sro: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "MarketValue")]
    pub market_value: String,
}

impl PropertyRecord {
    /// Number of positional fields a record carries.
    pub const FIELD_COUNT: usize = 13;

    /// Build a record from cell texts in grid order. Missing trailing cells
    /// become empty strings; cells past the 13th are ignored.
    pub fn from_cells<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields = cells.into_iter().map(Into::into);
        let mut next = || fields.next().unwrap_or_default();

        Self {
            village: next(),
            reg_date: next(),
            reg_no: next(),
            area: next(),
            prop_no: next(),
            deed_type: next(),
            jild_details: next(),
            seller: next(),
            buyer: next(),
            buyer_gender: next(),
            sro: next(),
            amount: next(),
            market_value: next(),
        }
    }

    /// Key used to drop duplicates when records from several years are merged.
    pub fn dedup_key(&self, year: &str) -> String {
        format!("{}_{}_{}", year, self.reg_no, self.reg_date)
    }
}

/// What to search for. Immutable for the lifetime of one year's scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub district_id: String,
    pub office_id: String,
    pub year: String,
    pub name_pattern: String,
}

impl SearchCriteria {
    pub fn new(
        district_id: impl Into<String>,
        office_id: impl Into<String>,
        year: impl Into<String>,
        name_pattern: impl Into<String>,
    ) -> Self {
        Self {
            district_id: district_id.into(),
            office_id: office_id.into(),
            year: year.into(),
            name_pattern: name_pattern.into(),
        }
    }

    /// Same criteria for another year.
    pub fn for_year(&self, year: impl Into<String>) -> Self {
        Self {
            year: year.into(),
            ..self.clone()
        }
    }
}

/// Four ASCII digits.
pub fn is_valid_year(year: &str) -> bool {
    year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit())
}

/// Steps of the portal workflow, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Init,
    SelectDistrict,
    SelectOffice,
    SelectYear,
    Submit,
    Paginate,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Init => write!(f, "initial load"),
            Step::SelectDistrict => write!(f, "district selection"),
            Step::SelectOffice => write!(f, "office selection"),
            Step::SelectYear => write!(f, "year selection"),
            Step::Submit => write!(f, "search"),
            Step::Paginate => write!(f, "pagination"),
        }
    }
}

/// Everything a year's scrape reports back to its caller.
///
/// A successful scrape ends with exactly one `Done`. `Error` also ends the
/// scrape; nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Info {
        message: String,
    },
    Error(PortalError),
    Data {
        year: String,
        page: u32,
        count: usize,
        records: Vec<PropertyRecord>,
    },
    Done {
        year: String,
        total: usize,
    },
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        ProgressEvent::Info {
            message: message.into(),
        }
    }

    /// True for the variants after which the stream yields nothing more.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Error(_) | ProgressEvent::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cells_pads_missing_fields() {
        let record = PropertyRecord::from_cells(
            ["Ramnagar", "01/01/2019", "123", "10", "P-1", "Sale", "J-1", "Shyam", "Ram Singh", "M"]
                .iter()
                .copied(),
        );

        assert_eq!(record.village, "Ramnagar");
        assert_eq!(record.buyer, "Ram Singh");
        assert_eq!(record.buyer_gender, "M");
        assert_eq!(record.sro, "");
        assert_eq!(record.amount, "");
        assert_eq!(record.market_value, "");
    }

    #[test]
    fn test_from_cells_ignores_extra_cells() {
        let cells: Vec<String> = (0..15).map(|i| format!("c{}", i)).collect();
        let record = PropertyRecord::from_cells(cells);

        assert_eq!(record.market_value, "c12");
    }

    #[test]
    fn test_record_serializes_with_portal_keys() {
        let record = PropertyRecord {
            reg_no: "123".to_string(),
            market_value: "500000".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["RegNo"], "123");
        assert_eq!(json["MarketValue"], "500000");
        assert_eq!(json.as_object().unwrap().len(), PropertyRecord::FIELD_COUNT);
    }

    #[test]
    fn test_dedup_key() {
        let record = PropertyRecord {
            reg_no: "77".to_string(),
            reg_date: "02/03/2020".to_string(),
            ..Default::default()
        };

        assert_eq!(record.dedup_key("2020"), "2020_77_02/03/2020");
    }

    #[test]
    fn test_year_validation() {
        assert!(is_valid_year("2019"));
        assert!(!is_valid_year("19"));
        assert!(!is_valid_year("20a9"));
        assert!(!is_valid_year("20190"));
    }

    #[test]
    fn test_for_year_keeps_other_criteria() {
        let criteria = SearchCriteria::new("12", "03", "2019", "A");
        let next = criteria.for_year("2020");

        assert_eq!(next.year, "2020");
        assert_eq!(next.district_id, "12");
        assert_eq!(next.name_pattern, "A");
    }

    #[test]
    fn test_only_error_and_done_are_terminal() {
        assert!(!ProgressEvent::info("x").is_terminal());
        assert!(ProgressEvent::Done {
            year: "2019".to_string(),
            total: 0
        }
        .is_terminal());
        assert!(ProgressEvent::Error(PortalError::Pagination {
            page: 2,
            message: "timeout".to_string()
        })
        .is_terminal());
    }
}
