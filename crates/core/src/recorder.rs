use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dates::iso_date;
use crate::errors::RecordError;
use crate::gateway::{CellAddress, LedgerGateway};

pub const DEFAULT_LEAVE_MARKER: &str = "請假";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveType {
    Sick,
    Personal,
    Other,
}

impl LeaveType {
    pub const CHOICES: [&'static str; 3] = ["病假", "事假", "其他"];

    /// Unrecognised labels fall back to the generic leave status.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "病假" | "sick" => Self::Sick,
            "事假" | "personal" => Self::Personal,
            _ => Self::Other,
        }
    }

    /// Cell text written for this type. Every status contains `leave_marker`
    /// so a later request recognises the cell as already on leave.
    pub fn status(&self, leave_marker: &str) -> String {
        match self {
            Self::Sick => format!("{leave_marker}(病假)"),
            Self::Personal => format!("{leave_marker}(事假)"),
            Self::Other => leave_marker.to_owned(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sick => "病假",
            Self::Personal => "事假",
            Self::Other => "其他",
        }
    }
}

/// Labels and marker substrings the ledger sheets are laid out with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerLayout {
    pub name_header: String,
    pub present_marker: String,
    pub leave_marker: String,
}

impl Default for LedgerLayout {
    fn default() -> Self {
        Self {
            name_header: "姓名".to_owned(),
            present_marker: "出席".to_owned(),
            leave_marker: DEFAULT_LEAVE_MARKER.to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaveRequest {
    pub grade: String,
    pub class_name: String,
    pub student_name: String,
    pub leave_date: NaiveDate,
    pub leave_type: LeaveType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaveRecord {
    pub request: LeaveRequest,
    pub date_label: String,
    pub cell: CellAddress,
    pub status: String,
}

pub struct LeaveRecorder<L> {
    ledger: Arc<L>,
    layout: LedgerLayout,
}

impl<L> LeaveRecorder<L>
where
    L: LedgerGateway,
{
    pub fn new(ledger: Arc<L>, layout: LedgerLayout) -> Self {
        Self { ledger, layout }
    }

    pub fn layout(&self) -> &LedgerLayout {
        &self.layout
    }

    /// Reads the class sheet, refuses to overwrite an attendance or leave
    /// mark, then writes the leave status into the student's date cell.
    /// The read and the write are not atomic.
    pub async fn record(&self, request: &LeaveRequest) -> Result<LeaveRecord, RecordError> {
        let result = self.try_record(request).await;
        match &result {
            Ok(record) => info!(
                event_name = "ledger.write.completed",
                grade = %request.grade,
                class_name = %request.class_name,
                date = %record.date_label,
                cell = %record.cell.a1(),
                "leave recorded"
            ),
            Err(error) => warn!(
                event_name = "ledger.write.rejected",
                grade = %request.grade,
                class_name = %request.class_name,
                date = %iso_date(request.leave_date),
                reason = error.code(),
                error = %error,
                "leave not recorded"
            ),
        }
        result
    }

    async fn try_record(&self, request: &LeaveRequest) -> Result<LeaveRecord, RecordError> {
        let table = self.ledger.read_table(&request.grade, &request.class_name).await?;
        if table.is_empty() {
            return Err(RecordError::EmptyTable {
                grade: request.grade.clone(),
                class_name: request.class_name.clone(),
            });
        }

        let date_label = iso_date(request.leave_date);
        let name_column = table.column(&self.layout.name_header).ok_or_else(|| {
            RecordError::MissingNameColumn { header: self.layout.name_header.clone() }
        })?;
        let date_column = table
            .column(&date_label)
            .ok_or_else(|| RecordError::MissingDateColumn { date: date_label.clone() })?;

        let row = (0..table.rows.len())
            .find(|row| table.cell(*row, name_column) == request.student_name)
            .ok_or_else(|| RecordError::StudentNotFound {
                student_name: request.student_name.clone(),
            })?;

        let current = table.cell(row, date_column);
        if current.contains(&self.layout.present_marker) {
            return Err(RecordError::AlreadyPresent {
                date: date_label,
                current: current.to_owned(),
            });
        }
        if current.contains(&self.layout.leave_marker) {
            return Err(RecordError::AlreadyOnLeave {
                date: date_label,
                current: current.to_owned(),
            });
        }

        let cell = CellAddress::for_data_row(row, date_column);
        let status = request.leave_type.status(&self.layout.leave_marker);
        self.ledger.write_cell(&request.grade, &request.class_name, cell, &status).await?;

        Ok(LeaveRecord { request: request.clone(), date_label, cell, status })
    }
}
