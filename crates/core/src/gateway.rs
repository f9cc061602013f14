use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::GatewayError;

/// Snapshot of one class sheet: header labels plus data rows. Rows may be
/// ragged; missing trailing cells read as empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl LedgerTable {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    /// Splits raw sheet values into header and rows.
    pub fn from_values(mut values: Vec<Vec<String>>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let header = values.remove(0);
        Self { header, rows: values }
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.rows.is_empty()
    }

    pub fn column(&self, label: &str) -> Option<usize> {
        self.header.iter().position(|candidate| candidate == label)
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows.get(row).and_then(|values| values.get(column)).map(String::as_str).unwrap_or("")
    }

    fn set_cell(&mut self, row: usize, column: usize, value: &str) -> bool {
        let Some(values) = self.rows.get_mut(row) else {
            return false;
        };
        if values.len() <= column {
            values.resize(column + 1, String::new());
        }
        values[column] = value.to_owned();
        true
    }
}

/// A single ledger cell. `row` is the 1-based sheet row (the header is row 1);
/// `column` is the 0-based column index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAddress {
    pub row: u32,
    pub column: u32,
}

impl CellAddress {
    pub fn for_data_row(data_row: usize, column: usize) -> Self {
        let row = u32::try_from(data_row).unwrap_or(u32::MAX - 2).saturating_add(2);
        let column = u32::try_from(column).unwrap_or(u32::MAX);
        Self { row, column }
    }

    pub fn column_letters(&self) -> String {
        column_letters(self.column)
    }

    pub fn a1(&self) -> String {
        format!("{}{}", self.column_letters(), self.row)
    }

    fn data_row(&self) -> Option<usize> {
        self.row.checked_sub(2).and_then(|row| usize::try_from(row).ok())
    }
}

/// 0 → `A`, 25 → `Z`, 26 → `AA`, 701 → `ZZ`, 702 → `AAA`.
pub fn column_letters(index: u32) -> String {
    let mut remaining = u64::from(index) + 1;
    let mut letters = Vec::new();
    while remaining > 0 {
        let offset = ((remaining - 1) % 26) as u8;
        letters.push(char::from(b'A' + offset));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

#[async_trait]
pub trait RosterGateway: Send + Sync {
    async fn list_classes(&self, grade: &str) -> Result<Vec<String>, GatewayError>;
    async fn list_students(
        &self,
        grade: &str,
        class_name: &str,
    ) -> Result<Vec<String>, GatewayError>;
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn read_table(&self, grade: &str, class_name: &str) -> Result<LedgerTable, GatewayError>;
    async fn write_cell(
        &self,
        grade: &str,
        class_name: &str,
        address: CellAddress,
        value: &str,
    ) -> Result<(), GatewayError>;
}

/// Non-blank names from the name column, deduplicated in first-seen order.
pub fn students_from_table(table: &LedgerTable, name_header: &str) -> Vec<String> {
    let Some(name_column) = table.column(name_header) else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    table
        .rows
        .iter()
        .filter_map(|row| row.get(name_column))
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(*name))
        .map(str::to_owned)
        .collect()
}

/// The fixed, ordered set of grade names callers may choose from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GradeCatalog {
    names: Vec<String>,
}

impl GradeCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|candidate| candidate == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[derive(Clone, Debug)]
struct ClassSheet {
    grade: String,
    class_name: String,
    table: LedgerTable,
}

/// In-process ledger and roster backed by tables held in memory.
pub struct InMemoryLedger {
    sheets: RwLock<Vec<ClassSheet>>,
    name_header: String,
}

impl InMemoryLedger {
    pub fn new(name_header: impl Into<String>) -> Self {
        Self { sheets: RwLock::new(Vec::new()), name_header: name_header.into() }
    }

    pub fn with_table(
        mut self,
        grade: impl Into<String>,
        class_name: impl Into<String>,
        table: LedgerTable,
    ) -> Self {
        self.sheets.get_mut().push(ClassSheet {
            grade: grade.into(),
            class_name: class_name.into(),
            table,
        });
        self
    }

    pub async fn table(&self, grade: &str, class_name: &str) -> Option<LedgerTable> {
        let sheets = self.sheets.read().await;
        sheets
            .iter()
            .find(|sheet| sheet.grade == grade && sheet.class_name == class_name)
            .map(|sheet| sheet.table.clone())
    }
}

#[async_trait]
impl RosterGateway for InMemoryLedger {
    async fn list_classes(&self, grade: &str) -> Result<Vec<String>, GatewayError> {
        let sheets = self.sheets.read().await;
        Ok(sheets
            .iter()
            .filter(|sheet| sheet.grade == grade)
            .map(|sheet| sheet.class_name.clone())
            .collect())
    }

    async fn list_students(
        &self,
        grade: &str,
        class_name: &str,
    ) -> Result<Vec<String>, GatewayError> {
        Ok(self
            .table(grade, class_name)
            .await
            .map(|table| students_from_table(&table, &self.name_header))
            .unwrap_or_default())
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn read_table(&self, grade: &str, class_name: &str) -> Result<LedgerTable, GatewayError> {
        Ok(self.table(grade, class_name).await.unwrap_or_default())
    }

    async fn write_cell(
        &self,
        grade: &str,
        class_name: &str,
        address: CellAddress,
        value: &str,
    ) -> Result<(), GatewayError> {
        let mut sheets = self.sheets.write().await;
        let sheet = sheets
            .iter_mut()
            .find(|sheet| sheet.grade == grade && sheet.class_name == class_name)
            .ok_or_else(|| GatewayError::Decode(format!("no sheet `{class_name}` in `{grade}`")))?;
        let column = usize::try_from(address.column)
            .map_err(|_| GatewayError::Decode(format!("column {} out of range", address.column)))?;
        let written = address
            .data_row()
            .is_some_and(|row| sheet.table.set_cell(row, column, value));
        if written {
            Ok(())
        } else {
            Err(GatewayError::Decode(format!("cell {} is outside the sheet", address.a1())))
        }
    }
}
