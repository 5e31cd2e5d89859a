//! Domain layer for the store ordering status board.
//!
//! Everything here is pure: center resolution, the completed/pending store
//! reconciliation, business date formatting, CSV encoding and the order list
//! shapes. Storage and HTTP concerns live in the sibling crates.

pub mod business_date;
pub mod context;
pub mod csv;
pub mod pending;
pub mod types;

pub use context::{resolve_context, CenterContext};
pub use pending::{format_pending_list, Reconciliation};
pub use types::{
    Center, ListedProduct, LockOutcome, OrderControl, OrderFlag, OrderList, OrderSummary,
    StoreCode, SummaryCounts,
};
