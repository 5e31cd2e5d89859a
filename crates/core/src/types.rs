use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Store code reserved for the head office; never counted as a store.
pub const HEAD_OFFICE_STORE_CODE: i64 = 1;
/// `m_locations.type` value for retail stores.
pub const STORE_LOCATION_TYPE: i64 = 2;
/// Marker that store names carry; locations without it are not listed as stores.
pub const STORE_NAME_MARKER: &str = "店";

/// Distribution center shown in the center picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Center {
    pub id: i64,
    pub name: String,
}

/// Lock state of an order control record.
///
/// Persisted and serialized as `"0"` (open) and `"1"` (closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderFlag {
    Open,
    Closed,
}

impl OrderFlag {
    /// Returns the canonical database representation for the flag.
    pub fn as_code(self) -> &'static str {
        match self {
            Self::Open => "0",
            Self::Closed => "1",
        }
    }

    /// Parses the stored representation, accepting surrounding whitespace.
    pub fn from_code(value: &str) -> Option<Self> {
        match value.trim() {
            "0" => Some(Self::Open),
            "1" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for OrderFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl Serialize for OrderFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_code())
    }
}

impl<'de> Deserialize<'de> for OrderFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let raw = String::deserialize(deserializer)?;
        Self::from_code(&raw)
            .ok_or_else(|| D::Error::custom(format!("unknown order flag '{raw}'")))
    }
}

/// Per-center, per-business-day lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderControl {
    pub id: i64,
    pub center_id: i64,
    pub business_date: chrono::NaiveDate,
    pub order_flag: OrderFlag,
}

/// External store identifier used to join stores with submitted orders.
///
/// Numeric codes are kept in canonical integer form and order numerically.
/// Anything else is kept verbatim and orders after every numeric code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreCode {
    text: String,
    number: Option<i64>,
}

impl StoreCode {
    pub fn from_number(value: i64) -> Self {
        Self {
            text: value.to_string(),
            number: Some(value),
        }
    }

    /// Builds a code from the textual form returned by storage.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<i64>() {
            Ok(value) => Self::from_number(value),
            Err(_) => Self {
                text: trimmed.to_string(),
                number: None,
            },
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        self.number
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_numeric(&self) -> bool {
        self.number.is_some()
    }
}

impl Ord for StoreCode {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.number, other.number) {
            (Some(left), Some(right)) => left.cmp(&right),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.text.cmp(&other.text),
        }
    }
}

impl PartialOrd for StoreCode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StoreCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for StoreCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.number {
            Some(value) => serializer.serialize_i64(value),
            None => serializer.serialize_str(&self.text),
        }
    }
}

/// Completion counters for one center and business day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    /// Pending store codes, grouped and joined for display.
    pub pending_list: String,
}

/// Everything the status board shows for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    /// Business date in `YYYY-MM-DD` form.
    pub business_date_db: String,
    /// Business date in long display form, e.g. `2025年11月18日(火)`.
    pub business_date_view: String,
    pub centers: Vec<Center>,
    pub center_id: i64,
    pub location_id: Option<i64>,
    pub summary: SummaryCounts,
    pub order_flag: Option<OrderFlag>,
    pub order_control_id: Option<i64>,
}

/// Result of closing an order control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockOutcome {
    pub ok: bool,
    pub already_closed: bool,
}

impl LockOutcome {
    pub fn closed_now() -> Self {
        Self {
            ok: true,
            already_closed: false,
        }
    }

    pub fn already_closed() -> Self {
        Self {
            ok: true,
            already_closed: true,
        }
    }
}

/// Distinct product line offered for ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedProduct {
    pub product_name: Option<String>,
    pub units_per_case: Option<i64>,
}

/// Order list screen: orderable products, the stores shown as columns and
/// whether the center has a closed ordering window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderList {
    pub centers: Vec<Center>,
    pub center_id: Option<i64>,
    pub product_name: Option<String>,
    pub products: Vec<ListedProduct>,
    pub store_codes: Vec<StoreCode>,
    pub orderable: bool,
}
