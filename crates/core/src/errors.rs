use thiserror::Error;

/// Why a free-form date was refused. Returned as data, never raised.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DateRejection {
    #[error("invalid-format: input could not be reduced to a calendar date")]
    InvalidFormat,
    #[error("past-date: date is before today")]
    PastDate,
    #[error("range-exceeded: date is more than {max_months} month(s) ahead")]
    RangeExceeded { max_months: u32 },
}

impl DateRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat => "invalid-format",
            Self::PastDate => "past-date",
            Self::RangeExceeded { .. } => "range-exceeded",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidFormat => {
                "日期格式不正確，請使用如 6月20日、6/20 或 2024/6/20 的格式".to_owned()
            }
            Self::PastDate => "不能請過去的假，請選擇今天或之後的日期".to_owned(),
            Self::RangeExceeded { max_months } => format!("請假日期不能超過{max_months}個月"),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("unknown grade `{0}`")]
    UnknownGrade(String),
    #[error("gateway transport failure: {0}")]
    Transport(String),
    #[error("gateway returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("gateway response could not be decoded: {0}")]
    Decode(String),
}

/// Terminal failures of a conflict-checked ledger write.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("ledger for {grade} {class_name} is empty")]
    EmptyTable { grade: String, class_name: String },
    #[error("missing-name-column: header `{header}` not found")]
    MissingNameColumn { header: String },
    #[error("missing-date-column: no column labelled `{date}`")]
    MissingDateColumn { date: String },
    #[error("student-not-found: `{student_name}`")]
    StudentNotFound { student_name: String },
    #[error("already-present: cell for {date} holds `{current}`")]
    AlreadyPresent { date: String, current: String },
    #[error("already-on-leave: cell for {date} holds `{current}`")]
    AlreadyOnLeave { date: String, current: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl RecordError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyTable { .. } => "empty-table",
            Self::MissingNameColumn { .. } => "missing-name-column",
            Self::MissingDateColumn { .. } => "missing-date-column",
            Self::StudentNotFound { .. } => "student-not-found",
            Self::AlreadyPresent { .. } => "already-present",
            Self::AlreadyOnLeave { .. } => "already-on-leave",
            Self::Gateway(GatewayError::UnknownGrade(_)) => "unknown-grade",
            Self::Gateway(_) => "gateway-failure",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyTable { .. } => "找不到班級資料".to_owned(),
            Self::MissingNameColumn { .. } => "找不到姓名欄位".to_owned(),
            Self::MissingDateColumn { date } => {
                format!("找不到 {date} 的日期欄位，請確認試算表已建立該日期欄位")
            }
            Self::StudentNotFound { .. } => "找不到該學生".to_owned(),
            Self::AlreadyPresent { date, current } => {
                format!("該學生在 {date} 已簽到（{current}），無法請假")
            }
            Self::AlreadyOnLeave { date, .. } => format!("該學生在 {date} 已請假"),
            Self::Gateway(GatewayError::UnknownGrade(_)) => "找不到年級".to_owned(),
            Self::Gateway(_) => "無法存取請假紀錄，請稍後再試".to_owned(),
        }
    }
}

/// Roster lookups that came back empty abort the conversation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("empty-roster: no classes for grade `{grade}`")]
    NoClasses { grade: String },
    #[error("empty-roster: no students in `{grade}` `{class_name}`")]
    NoStudents { grade: String, class_name: String },
}

impl LookupError {
    pub fn code(&self) -> &'static str {
        "empty-roster"
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoClasses { .. } => "❌ 無法取得班級列表，請稍後再試",
            Self::NoStudents { .. } => "❌ 找不到班級或班級中沒有學生",
        }
    }
}
