use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const TRIGGER_KEYWORD: &str = "請假";
pub const RESTART_PHRASE: &str = "再次請假";
pub const CANCEL_PHRASE: &str = "取消";
pub const HELP_PHRASE: &str = "說明";
pub const IDENTITY_PHRASE: &str = "我的ID";
pub const FINISH_PHRASE: &str = "完成";
pub const TODAY_PHRASE: &str = "今天";
pub const TOMORROW_PHRASE: &str = "明天";

/// Progress of one caller's intake. Each variant carries exactly the answers
/// collected before it, so a step can never hold a field it has not asked for.
/// "Idle" is the absence of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum DialogueStep {
    SelectGrade,
    SelectClass {
        grade: String,
    },
    SelectStudent {
        grade: String,
        class_name: String,
    },
    SelectLeaveDate {
        grade: String,
        class_name: String,
        student_name: String,
    },
    SelectLeaveType {
        grade: String,
        class_name: String,
        student_name: String,
        leave_date: NaiveDate,
    },
}

impl DialogueStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectGrade => "select_grade",
            Self::SelectClass { .. } => "select_class",
            Self::SelectStudent { .. } => "select_student",
            Self::SelectLeaveDate { .. } => "select_leave_date",
            Self::SelectLeaveType { .. } => "select_leave_type",
        }
    }

    pub fn grade(&self) -> Option<&str> {
        match self {
            Self::SelectGrade => None,
            Self::SelectClass { grade }
            | Self::SelectStudent { grade, .. }
            | Self::SelectLeaveDate { grade, .. }
            | Self::SelectLeaveType { grade, .. } => Some(grade),
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Self::SelectGrade | Self::SelectClass { .. } => None,
            Self::SelectStudent { class_name, .. }
            | Self::SelectLeaveDate { class_name, .. }
            | Self::SelectLeaveType { class_name, .. } => Some(class_name),
        }
    }

    pub fn student_name(&self) -> Option<&str> {
        match self {
            Self::SelectLeaveDate { student_name, .. }
            | Self::SelectLeaveType { student_name, .. } => Some(student_name),
            _ => None,
        }
    }

    pub fn leave_date(&self) -> Option<NaiveDate> {
        match self {
            Self::SelectLeaveType { leave_date, .. } => Some(*leave_date),
            _ => None,
        }
    }
}

/// State-independent classification of one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputClass {
    Cancel,
    Help,
    Identity,
    Text(String),
}

impl InputClass {
    pub fn classify(text: &str) -> Self {
        let text = text.trim();
        let folded = text.to_lowercase();

        if text == CANCEL_PHRASE || folded == "cancel" {
            Self::Cancel
        } else if text == HELP_PHRASE || folded == "help" {
            Self::Help
        } else if folded == IDENTITY_PHRASE.to_lowercase() || folded == "id" {
            Self::Identity
        } else {
            Self::Text(text.to_owned())
        }
    }
}

pub fn is_trigger(text: &str) -> bool {
    text.contains(TRIGGER_KEYWORD) || text.eq_ignore_ascii_case("leave")
}

pub fn is_finish(text: &str) -> bool {
    text == FINISH_PHRASE
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundKind {
    Follow,
    Text(String),
    Unsupported { event_type: String },
}

/// One caller interaction as delivered by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub caller_id: String,
    pub kind: InboundKind,
}

impl InboundEvent {
    pub fn text(caller_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { caller_id: caller_id.into(), kind: InboundKind::Text(text.into()) }
    }

    pub fn follow(caller_id: impl Into<String>) -> Self {
        Self { caller_id: caller_id.into(), kind: InboundKind::Follow }
    }
}
