//! Google Sheets adapter for leavedesk.
//!
//! One spreadsheet per grade, one sheet (tab) per class. The first row of a
//! class sheet holds the column labels.

pub mod client;

pub use client::{quote_sheet_name, SheetsGateway};
