//! Minimal CSV writer for the order exports.
//!
//! Output is UTF-8 with `\n` line endings and a header row. A field is quoted
//! when it contains a delimiter, a quote, whitespace that a spreadsheet could
//! trim, or a line break; embedded quotes are doubled.

use serde::Serialize;

use crate::types::StoreCode;

/// A row that can be written to an export.
pub trait CsvRecord {
    /// Column names, in output order.
    fn header() -> &'static [&'static str];

    /// Field values in the same order as [`CsvRecord::header`].
    fn fields(&self) -> Vec<String>;
}

/// Encodes `rows` with a header line. An empty slice still yields the header.
pub fn encode<R: CsvRecord>(rows: &[R]) -> String {
    let mut out = String::new();
    push_line(&mut out, R::header().iter().copied());
    for row in rows {
        let fields = row.fields();
        debug_assert_eq!(fields.len(), R::header().len());
        push_line(&mut out, fields.iter().map(String::as_str));
    }
    out
}

fn push_line<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    let mut first = true;
    for field in fields {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&escape(field));
    }
    out.push('\n');
}

fn escape(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| matches!(c, ',' | '"' | '\n' | '\r' | '\t' | ' '));
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders an optional value as a CSV field; `None` becomes an empty field.
pub fn field<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Download file name: `orders_<YYYYMMDD>[_C<center>].csv`.
pub fn export_filename(business_date_db: &str, center_id: Option<i64>) -> String {
    let center_part = center_id
        .filter(|id| *id > 0)
        .map(|id| format!("_C{id}"))
        .unwrap_or_default();
    format!(
        "orders_{}{center_part}.csv",
        crate::business_date::compact(business_date_db)
    )
}

/// One row of the historical export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalExportRow {
    pub store_code: StoreCode,
    pub product_code: Option<String>,
    /// Empty when the catalog has no entry for the product.
    pub product_name: String,
    pub delivery_slot: Option<i64>,
    pub order_date: Option<String>,
    pub cases: Option<i64>,
    pub cases2: Option<i64>,
    pub cases3: Option<i64>,
}

impl CsvRecord for HistoricalExportRow {
    fn header() -> &'static [&'static str] {
        &[
            "area", "shohincd", "hinmei", "bin", "hatymd", "cases", "cases2", "cases3",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.store_code.to_string(),
            field(&self.product_code),
            self.product_name.clone(),
            field(&self.delivery_slot),
            field(&self.order_date),
            field(&self.cases),
            field(&self.cases2),
            field(&self.cases3),
        ]
    }
}
