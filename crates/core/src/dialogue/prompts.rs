//! Caller-facing reply copy for every dialogue turn.

use chrono::NaiveDate;

use crate::dates::ParsedLeaveDate;
use crate::errors::{DateRejection, LookupError, RecordError};
use crate::recorder::{LeaveRecord, LeaveType};
use crate::reply::{ReplyMessage, MAX_QUICK_REPLIES};

use super::steps::{
    CANCEL_PHRASE, FINISH_PHRASE, HELP_PHRASE, IDENTITY_PHRASE, RESTART_PHRASE, TODAY_PHRASE,
    TOMORROW_PHRASE, TRIGGER_KEYWORD,
};

/// Class names beyond this are listed as text; one chip stays free for cancel.
pub const MAX_CLASS_CHIPS: usize = MAX_QUICK_REPLIES - 1;

pub fn welcome(caller_id: &str, grades: &[String], max_months: u32) -> Vec<ReplyMessage> {
    vec![
        ReplyMessage::text(format!(
            "🎓 歡迎使用請假系統\n\n您的 LINE ID：{caller_id}\n請將此 ID 提供給班主任進行身份認證"
        )),
        ReplyMessage::text(help_text(grades, max_months)),
        menu(),
    ]
}

pub fn help(grades: &[String], max_months: u32) -> Vec<ReplyMessage> {
    vec![
        ReplyMessage::text(help_text(grades, max_months)),
        ReplyMessage::text("請選擇功能：").with_echo_chips([TRIGGER_KEYWORD, IDENTITY_PHRASE]),
    ]
}

fn help_text(grades: &[String], max_months: u32) -> String {
    let listed = grades.join("、");
    let choices = grades.join("/");
    let leave_types = LeaveType::CHOICES.join("/");
    format!(
        "📋 系統功能說明\n\n\
         【主要功能】\n\
         ▪️ 請假申請：幫孩子請病假、事假\n\
         ▪️ 支援年級：{listed}\n\
         ▪️ 請假時間：可請當天或預先請假（最多{max_months}個月內）\n\n\
         【使用步驟】\n\
         1️⃣ 輸入「{TRIGGER_KEYWORD}」開始\n\
         2️⃣ 選擇年級（{choices}）\n\
         3️⃣ 選擇班級名稱\n\
         4️⃣ 輸入學生中文姓名（需完全正確）\n\
         5️⃣ 輸入請假日期\n\
         6️⃣ 選擇請假類型（{leave_types}）\n\n\
         【日期格式範例】\n\
         • 今天、明天\n\
         • 6月20日、六月二十日\n\
         • 6/20、06/20\n\
         • 2026/6/20、2026-06-20\n\n\
         【其他指令】\n\
         • 輸入「{IDENTITY_PHRASE}」- 查看您的 LINE ID\n\
         • 輸入「{HELP_PHRASE}」- 重新顯示使用說明\n\
         • 輸入「{CANCEL_PHRASE}」- 中止請假流程\n\n\
         【注意事項】\n\
         ⚠️ 本系統僅支援單日請假\n\
         ⚠️ 如需請假超過一天，請直接聯絡老師\n\
         ⚠️ 學生姓名需輸入中文全名\n\
         ⚠️ 已簽到的學生無法請假\n\
         ⚠️ 無法請過去日期的假"
    )
}

pub fn menu() -> ReplyMessage {
    ReplyMessage::text("請問需要什麼協助？").with_echo_chips([
        TRIGGER_KEYWORD,
        IDENTITY_PHRASE,
        HELP_PHRASE,
    ])
}

pub fn identity(caller_id: &str) -> Vec<ReplyMessage> {
    vec![
        ReplyMessage::text(format!("🆔 您的 LINE User ID：\n{caller_id}")),
        ReplyMessage::text("需要其他協助嗎？").with_echo_chips([TRIGGER_KEYWORD, HELP_PHRASE]),
    ]
}

pub fn farewell() -> Vec<ReplyMessage> {
    vec![ReplyMessage::text("感謝使用請假系統！")]
}

pub fn cancelled() -> Vec<ReplyMessage> {
    vec![ReplyMessage::text(format!(
        "請假流程已取消。\n\n如需請假，請再次輸入「{TRIGGER_KEYWORD}」。"
    ))]
}

pub fn nothing_to_cancel() -> Vec<ReplyMessage> {
    vec![ReplyMessage::text(format!(
        "目前沒有進行中的請假流程。\n\n如需請假，請輸入「{TRIGGER_KEYWORD}」。"
    ))]
}

pub fn grade_prompt(grades: &[String]) -> Vec<ReplyMessage> {
    choices("請選擇學生的年級：", &format!("共有 {} 個年級", grades.len()), grades)
}

pub fn grade_rejected(grades: &[String]) -> Vec<ReplyMessage> {
    choices("❌ 請選擇正確的年級：", "請輸入下列其中一個年級", grades)
}

pub fn class_listing(grade: &str, classes: &[String]) -> Vec<ReplyMessage> {
    choices("請選擇班級：", &format!("{grade}共有 {} 個班級", classes.len()), classes)
}

/// Options as chips with a trailing cancel chip, or as a plain text list
/// when they would not leave room for the cancel chip.
fn choices(prompt: &str, heading: &str, options: &[String]) -> Vec<ReplyMessage> {
    if options.len() > MAX_CLASS_CHIPS {
        return vec![ReplyMessage::text(format!(
            "{heading}，{}\n\n{}\n\n或輸入「{CANCEL_PHRASE}」結束請假流程",
            prompt.trim_start_matches("❌ ").trim_end_matches('：'),
            options.join("\n")
        ))];
    }
    vec![ReplyMessage::text(prompt)
        .with_echo_chips(options.iter().cloned())
        .with_echo_chips([CANCEL_PHRASE])]
}

pub fn student_prompt() -> Vec<ReplyMessage> {
    vec![
        ReplyMessage::text("請輸入要請假的學生姓名："),
        ReplyMessage::text(format!(
            "💡 提醒：請輸入中文全名\n\n如需取消請假，請點選下方「{CANCEL_PHRASE}」按鈕"
        ))
        .with_echo_chips([CANCEL_PHRASE]),
    ]
}

pub fn date_prompt(today: NaiveDate, max_months: u32) -> Vec<ReplyMessage> {
    let text = format!(
        "請輸入請假日期：\n\n\
         📅 可接受的格式：\n\
         • {} 或 {}\n\
         • {}\n\
         • {}\n\
         • {TODAY_PHRASE}、{TOMORROW_PHRASE}\n\
         • 六月二十日（中文也可以）\n\n\
         ⚠️ 只能請今天或之後的日期（最多{max_months}個月內）",
        today.format("%m/%d"),
        today.format("%-m月%-d日"),
        today.format("%Y/%m/%d"),
        today.format("%Y-%m-%d"),
    );
    vec![ReplyMessage::text(text).with_echo_chips([TODAY_PHRASE, TOMORROW_PHRASE, CANCEL_PHRASE])]
}

pub fn date_rejected(rejection: &DateRejection, today: NaiveDate) -> Vec<ReplyMessage> {
    vec![ReplyMessage::text(format!(
        "❌ {}\n\n請重新輸入日期（例如：{}）",
        rejection.user_message(),
        today.format("%m/%d")
    ))]
}

pub fn leave_type_prompt(date: &ParsedLeaveDate) -> Vec<ReplyMessage> {
    vec![ReplyMessage::text(format!("請假日期：{}\n\n請選擇請假類型：", date.display))
        .with_echo_chips(LeaveType::CHOICES)
        .with_echo_chips([CANCEL_PHRASE])]
}

pub fn confirmation(record: &LeaveRecord) -> Vec<ReplyMessage> {
    let request = &record.request;
    let display = ParsedLeaveDate::new(request.leave_date).display;
    vec![
        ReplyMessage::text(format!(
            "✅ 請假成功！\n\n\
             📅 請假日期：{display}（{}）\n\
             👤 學生：{}\n\
             🏫 班級：{} {}\n\
             📝 類型：{}\n\n\
             請假記錄已更新至系統。",
            record.date_label,
            request.student_name,
            request.grade,
            request.class_name,
            request.leave_type.label(),
        )),
        ReplyMessage::text("需要其他協助嗎？").with_echo_chips([
            RESTART_PHRASE,
            HELP_PHRASE,
            FINISH_PHRASE,
        ]),
    ]
}

pub fn record_failed(error: &RecordError) -> Vec<ReplyMessage> {
    vec![ReplyMessage::text(format!("❌ 請假失敗\n\n原因：{}", error.user_message()))]
}

pub fn lookup_failed(error: &LookupError) -> Vec<ReplyMessage> {
    vec![ReplyMessage::text(error.user_message())]
}
