use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::dates::{DateParser, ParsedLeaveDate};
use crate::errors::{DateRejection, LookupError, RecordError};
use crate::gateway::{GradeCatalog, LedgerGateway, RosterGateway};
use crate::recorder::{LeaveRecorder, LeaveRequest, LeaveType};
use crate::reply::ReplyMessage;
use crate::session::{ConversationStore, TurnLocks};

use super::prompts;
use super::steps::{is_finish, is_trigger, DialogueStep, InboundEvent, InboundKind, InputClass};

/// What a turn does to the caller's session once its action has run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextSession {
    /// Leave the session exactly as it was, including its activity stamp.
    Keep,
    /// Stay on the current step but count the turn as activity.
    Refresh,
    Set(DialogueStep),
    Clear,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnAction {
    ShowMenu,
    ShowHelp,
    ShowIdentity,
    ShowFarewell,
    ConfirmCancel,
    NothingToCancel,
    PromptGrade,
    RejectGrade,
    ListClasses { grade: String },
    ListStudents { grade: String, class_name: String },
    PromptLeaveDate,
    RejectLeaveDate(DateRejection),
    PromptLeaveType(ParsedLeaveDate),
    RecordLeave(LeaveRequest),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: NextSession,
    pub action: TurnAction,
}

impl Transition {
    fn new(next: NextSession, action: TurnAction) -> Self {
        Self { next, action }
    }
}

pub struct TransitionContext<'a> {
    pub grades: &'a GradeCatalog,
    pub parser: &'a DateParser,
    pub now: DateTime<Utc>,
}

/// The dialogue transition table: current step × input class → next session
/// state × side effect. `None` is the idle state. Pure; performs no I/O.
pub fn transition(
    current: Option<&DialogueStep>,
    input: &InputClass,
    ctx: &TransitionContext<'_>,
) -> Transition {
    use NextSession::{Clear, Keep, Refresh, Set};

    let text = match input {
        InputClass::Help => return Transition::new(Keep, TurnAction::ShowHelp),
        InputClass::Identity => return Transition::new(Keep, TurnAction::ShowIdentity),
        InputClass::Cancel => {
            return match current {
                Some(_) => Transition::new(Clear, TurnAction::ConfirmCancel),
                None => Transition::new(Keep, TurnAction::NothingToCancel),
            };
        }
        InputClass::Text(text) => text,
    };

    let Some(step) = current else {
        return if is_trigger(text) {
            Transition::new(Set(DialogueStep::SelectGrade), TurnAction::PromptGrade)
        } else if is_finish(text) {
            Transition::new(Keep, TurnAction::ShowFarewell)
        } else {
            Transition::new(Keep, TurnAction::ShowMenu)
        };
    };

    match step {
        DialogueStep::SelectGrade if ctx.grades.contains(text) => Transition::new(
            Set(DialogueStep::SelectClass { grade: text.clone() }),
            TurnAction::ListClasses { grade: text.clone() },
        ),
        DialogueStep::SelectGrade => Transition::new(Refresh, TurnAction::RejectGrade),
        DialogueStep::SelectClass { grade } => Transition::new(
            Set(DialogueStep::SelectStudent { grade: grade.clone(), class_name: text.clone() }),
            TurnAction::ListStudents { grade: grade.clone(), class_name: text.clone() },
        ),
        DialogueStep::SelectStudent { grade, class_name } => Transition::new(
            Set(DialogueStep::SelectLeaveDate {
                grade: grade.clone(),
                class_name: class_name.clone(),
                student_name: text.clone(),
            }),
            TurnAction::PromptLeaveDate,
        ),
        DialogueStep::SelectLeaveDate { grade, class_name, student_name } => {
            match ctx.parser.parse(text, ctx.now) {
                Ok(parsed) => Transition::new(
                    Set(DialogueStep::SelectLeaveType {
                        grade: grade.clone(),
                        class_name: class_name.clone(),
                        student_name: student_name.clone(),
                        leave_date: parsed.date,
                    }),
                    TurnAction::PromptLeaveType(parsed),
                ),
                Err(rejection) => Transition::new(Refresh, TurnAction::RejectLeaveDate(rejection)),
            }
        }
        DialogueStep::SelectLeaveType { grade, class_name, student_name, leave_date } => {
            Transition::new(
                Clear,
                TurnAction::RecordLeave(LeaveRequest {
                    grade: grade.clone(),
                    class_name: class_name.clone(),
                    student_name: student_name.clone(),
                    leave_date: *leave_date,
                    leave_type: LeaveType::from_label(text),
                }),
            )
        }
    }
}

struct TurnOutcome {
    replies: Vec<ReplyMessage>,
    aborted: bool,
}

impl TurnOutcome {
    fn reply(replies: Vec<ReplyMessage>) -> Self {
        Self { replies, aborted: false }
    }

    fn abort(replies: Vec<ReplyMessage>) -> Self {
        Self { replies, aborted: true }
    }
}

/// Drives one caller's intake dialogue. Turns for the same caller are
/// serialized; every turn yields at least one reply.
pub struct DialogueEngine<R, L> {
    store: Arc<ConversationStore>,
    roster: Arc<R>,
    recorder: LeaveRecorder<L>,
    grades: GradeCatalog,
    parser: DateParser,
    audit: Arc<dyn AuditSink>,
    locks: TurnLocks,
}

impl<R, L> DialogueEngine<R, L>
where
    R: RosterGateway,
    L: LedgerGateway,
{
    pub fn new(
        store: Arc<ConversationStore>,
        roster: Arc<R>,
        recorder: LeaveRecorder<L>,
        grades: GradeCatalog,
        parser: DateParser,
    ) -> Self {
        Self {
            store,
            roster,
            recorder,
            grades,
            parser,
            audit: Arc::new(TracingAuditSink),
            locks: TurnLocks::default(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn grades(&self) -> &GradeCatalog {
        &self.grades
    }

    pub async fn handle_event(
        &self,
        event: &InboundEvent,
        correlation_id: &str,
    ) -> Vec<ReplyMessage> {
        match &event.kind {
            InboundKind::Follow => {
                info!(
                    event_name = "dialogue.follow.received",
                    correlation_id,
                    caller_id = %event.caller_id,
                    "new caller added the bot"
                );
                prompts::welcome(
                    &event.caller_id,
                    self.grades.names(),
                    self.parser.max_advance_months(),
                )
            }
            InboundKind::Text(text) => {
                self.handle_text(&event.caller_id, text, correlation_id).await
            }
            InboundKind::Unsupported { event_type } => {
                debug!(
                    event_name = "dialogue.event.ignored",
                    correlation_id,
                    caller_id = %event.caller_id,
                    event_type = %event_type,
                    "ignoring unsupported event"
                );
                Vec::new()
            }
        }
    }

    pub async fn handle_text(
        &self,
        caller_id: &str,
        text: &str,
        correlation_id: &str,
    ) -> Vec<ReplyMessage> {
        let guard = self.locks.acquire(caller_id).await;

        let now = self.store.clock().now();
        let current = self.store.get_active(caller_id).await.map(|session| session.step);
        let input = InputClass::classify(text);
        let ctx = TransitionContext { grades: &self.grades, parser: &self.parser, now };
        let Transition { next, action } = transition(current.as_ref(), &input, &ctx);

        let from = current.as_ref().map_or("idle", DialogueStep::name);
        let outcome = self.perform(caller_id, correlation_id, action, now).await;

        let to = if outcome.aborted {
            self.store.delete(caller_id).await;
            "idle"
        } else {
            match next {
                NextSession::Keep => from,
                NextSession::Refresh => {
                    if let Some(step) = current.clone() {
                        self.store.set(caller_id, step).await;
                    }
                    from
                }
                NextSession::Set(step) => {
                    let name = step.name();
                    self.store.set(caller_id, step).await;
                    name
                }
                NextSession::Clear => {
                    self.store.delete(caller_id).await;
                    "idle"
                }
            }
        };

        drop(guard);
        self.locks.release(caller_id);

        info!(
            event_name = "dialogue.turn.completed",
            correlation_id,
            caller_id,
            from,
            to,
            replies = outcome.replies.len(),
            "dialogue turn completed"
        );
        outcome.replies
    }

    async fn perform(
        &self,
        caller_id: &str,
        correlation_id: &str,
        action: TurnAction,
        now: DateTime<Utc>,
    ) -> TurnOutcome {
        let months = self.parser.max_advance_months();
        match action {
            TurnAction::ShowMenu => TurnOutcome::reply(vec![prompts::menu()]),
            TurnAction::ShowHelp => TurnOutcome::reply(prompts::help(self.grades.names(), months)),
            TurnAction::ShowIdentity => TurnOutcome::reply(prompts::identity(caller_id)),
            TurnAction::ShowFarewell => TurnOutcome::reply(prompts::farewell()),
            TurnAction::NothingToCancel => TurnOutcome::reply(prompts::nothing_to_cancel()),
            TurnAction::ConfirmCancel => {
                self.audit(
                    caller_id,
                    correlation_id,
                    "dialogue.cancelled",
                    AuditCategory::Dialogue,
                    AuditOutcome::Rejected,
                    now,
                    Vec::new(),
                );
                TurnOutcome::reply(prompts::cancelled())
            }
            TurnAction::PromptGrade => {
                self.audit(
                    caller_id,
                    correlation_id,
                    "dialogue.started",
                    AuditCategory::Dialogue,
                    AuditOutcome::Success,
                    now,
                    Vec::new(),
                );
                TurnOutcome::reply(prompts::grade_prompt(self.grades.names()))
            }
            TurnAction::RejectGrade => {
                TurnOutcome::reply(prompts::grade_rejected(self.grades.names()))
            }
            TurnAction::ListClasses { grade } => {
                let classes = self.roster.list_classes(&grade).await.unwrap_or_else(|error| {
                    warn!(
                        event_name = "roster.lookup.failed",
                        correlation_id,
                        grade = %grade,
                        error = %error,
                        "class lookup failed"
                    );
                    Vec::new()
                });
                if classes.is_empty() {
                    let error = LookupError::NoClasses { grade };
                    return self.abort(caller_id, correlation_id, error, now);
                }
                TurnOutcome::reply(prompts::class_listing(&grade, &classes))
            }
            TurnAction::ListStudents { grade, class_name } => {
                let students =
                    self.roster.list_students(&grade, &class_name).await.unwrap_or_else(|error| {
                        warn!(
                            event_name = "roster.lookup.failed",
                            correlation_id,
                            grade = %grade,
                            class_name = %class_name,
                            error = %error,
                            "student lookup failed"
                        );
                        Vec::new()
                    });
                if students.is_empty() {
                    let error = LookupError::NoStudents { grade, class_name };
                    return self.abort(caller_id, correlation_id, error, now);
                }
                TurnOutcome::reply(prompts::student_prompt())
            }
            TurnAction::PromptLeaveDate => {
                TurnOutcome::reply(prompts::date_prompt(self.parser.today(now), months))
            }
            TurnAction::RejectLeaveDate(rejection) => {
                debug!(
                    event_name = "dialogue.date.rejected",
                    correlation_id,
                    caller_id,
                    reason = rejection.code(),
                    "leave date rejected"
                );
                TurnOutcome::reply(prompts::date_rejected(&rejection, self.parser.today(now)))
            }
            TurnAction::PromptLeaveType(parsed) => {
                TurnOutcome::reply(prompts::leave_type_prompt(&parsed))
            }
            TurnAction::RecordLeave(request) => match self.recorder.record(&request).await {
                Ok(record) => {
                    self.audit(
                        caller_id,
                        correlation_id,
                        "leave.recorded",
                        AuditCategory::Ledger,
                        AuditOutcome::Success,
                        now,
                        vec![
                            ("grade", request.grade.clone()),
                            ("class_name", request.class_name.clone()),
                            ("date", record.date_label.clone()),
                            ("cell", record.cell.a1()),
                            ("status", record.status.clone()),
                        ],
                    );
                    TurnOutcome::reply(prompts::confirmation(&record))
                }
                Err(error) => {
                    let outcome = if matches!(error, RecordError::Gateway(_)) {
                        AuditOutcome::Failed
                    } else {
                        AuditOutcome::Rejected
                    };
                    self.audit(
                        caller_id,
                        correlation_id,
                        "leave.rejected",
                        AuditCategory::Ledger,
                        outcome,
                        now,
                        vec![
                            ("grade", request.grade.clone()),
                            ("class_name", request.class_name.clone()),
                            ("reason", error.code().to_owned()),
                        ],
                    );
                    TurnOutcome::abort(prompts::record_failed(&error))
                }
            },
        }
    }

    fn abort(
        &self,
        caller_id: &str,
        correlation_id: &str,
        error: LookupError,
        now: DateTime<Utc>,
    ) -> TurnOutcome {
        self.audit(
            caller_id,
            correlation_id,
            "dialogue.aborted",
            AuditCategory::Dialogue,
            AuditOutcome::Failed,
            now,
            vec![("reason", error.to_string())],
        );
        TurnOutcome::abort(prompts::lookup_failed(&error))
    }

    #[allow(clippy::too_many_arguments)]
    fn audit(
        &self,
        caller_id: &str,
        correlation_id: &str,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        now: DateTime<Utc>,
        metadata: Vec<(&str, String)>,
    ) {
        let event = metadata.into_iter().fold(
            AuditEvent::new(caller_id, correlation_id, event_type, category, outcome)
                .occurred_at(now),
            |event, (key, value)| event.with_metadata(key, value),
        );
        self.audit.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{transition, DialogueEngine, NextSession, TransitionContext, TurnAction};
    use crate::audit::InMemoryAuditSink;
    use crate::dates::DateParser;
    use crate::dialogue::{DialogueStep, InboundEvent, InputClass};
    use crate::errors::DateRejection;
    use crate::gateway::{GradeCatalog, InMemoryLedger, LedgerTable};
    use crate::recorder::{LeaveRecorder, LeaveType, LedgerLayout};
    use crate::session::{ConversationStore, ManualClock};

    fn now() -> chrono::DateTime<Utc> {
        // 12:00 in Taipei on 2026-10-16.
        Utc.with_ymd_and_hms(2026, 10, 16, 4, 0, 0).single().expect("instant")
    }

    fn grades() -> GradeCatalog {
        GradeCatalog::new(["國中", "先修", "兒美"])
    }

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    fn text(value: &str) -> InputClass {
        InputClass::classify(value)
    }

    fn step_through(current: Option<&DialogueStep>, input: &str) -> (NextSession, TurnAction) {
        let grades = grades();
        let parser = DateParser::taipei();
        let ctx = TransitionContext { grades: &grades, parser: &parser, now: now() };
        let result = transition(current, &text(input), &ctx);
        (result.next, result.action)
    }

    #[test]
    fn idle_only_starts_on_a_trigger() {
        assert_eq!(
            step_through(None, "我要請假"),
            (NextSession::Set(DialogueStep::SelectGrade), TurnAction::PromptGrade)
        );
        assert_eq!(step_through(None, "國中"), (NextSession::Keep, TurnAction::ShowMenu));
        assert_eq!(step_through(None, "完成"), (NextSession::Keep, TurnAction::ShowFarewell));
        assert_eq!(step_through(None, "取消"), (NextSession::Keep, TurnAction::NothingToCancel));
    }

    #[test]
    fn grade_must_come_from_the_catalog() {
        let (next, action) = step_through(Some(&DialogueStep::SelectGrade), "高中");
        assert_eq!((next, action), (NextSession::Refresh, TurnAction::RejectGrade));

        let (next, action) = step_through(Some(&DialogueStep::SelectGrade), "先修");
        assert_eq!(next, NextSession::Set(DialogueStep::SelectClass { grade: "先修".to_owned() }));
        assert_eq!(action, TurnAction::ListClasses { grade: "先修".to_owned() });
    }

    #[test]
    fn class_and_student_are_taken_verbatim() {
        let class_step = DialogueStep::SelectClass { grade: "國中".to_owned() };
        let (next, _) = step_through(Some(&class_step), "不存在的班");
        assert_eq!(
            next,
            NextSession::Set(DialogueStep::SelectStudent {
                grade: "國中".to_owned(),
                class_name: "不存在的班".to_owned(),
            })
        );

        let student_step =
            DialogueStep::SelectStudent { grade: "國中".to_owned(), class_name: "A班".to_owned() };
        let (next, action) = step_through(Some(&student_step), "Jane Doe");
        assert_eq!(action, TurnAction::PromptLeaveDate);
        assert_eq!(
            next,
            NextSession::Set(DialogueStep::SelectLeaveDate {
                grade: "國中".to_owned(),
                class_name: "A班".to_owned(),
                student_name: "Jane Doe".to_owned(),
            })
        );
    }

    #[test]
    fn rejected_dates_keep_the_step() {
        let step = DialogueStep::SelectLeaveDate {
            grade: "國中".to_owned(),
            class_name: "A班".to_owned(),
            student_name: "王小明".to_owned(),
        };

        assert_eq!(
            step_through(Some(&step), "2026-10-15"),
            (NextSession::Refresh, TurnAction::RejectLeaveDate(DateRejection::PastDate))
        );
        let (next, _) = step_through(Some(&step), "明天");
        assert_eq!(
            next,
            NextSession::Set(DialogueStep::SelectLeaveType {
                grade: "國中".to_owned(),
                class_name: "A班".to_owned(),
                student_name: "王小明".to_owned(),
                leave_date: NaiveDate::from_ymd_opt(2026, 10, 17).expect("date"),
            })
        );
    }

    #[test]
    fn any_leave_type_records_and_clears() {
        let step = DialogueStep::SelectLeaveType {
            grade: "國中".to_owned(),
            class_name: "A班".to_owned(),
            student_name: "王小明".to_owned(),
            leave_date: NaiveDate::from_ymd_opt(2026, 10, 16).expect("date"),
        };

        let (next, action) = step_through(Some(&step), "看醫生");
        assert_eq!(next, NextSession::Clear);
        match action {
            TurnAction::RecordLeave(request) => assert_eq!(request.leave_type, LeaveType::Other),
            other => panic!("expected a record action, got {other:?}"),
        }
    }

    #[test]
    fn side_commands_never_touch_the_session() {
        let step = DialogueStep::SelectClass { grade: "國中".to_owned() };
        for input in ["說明", "help", "我的ID", "id"] {
            let (next, _) = step_through(Some(&step), input);
            assert_eq!(next, NextSession::Keep, "input {input}");
        }
        assert_eq!(step_through(Some(&step), "cancel").0, NextSession::Clear);
    }

    fn engine(
        ledger: Arc<InMemoryLedger>,
        clock: ManualClock,
        audit: InMemoryAuditSink,
    ) -> DialogueEngine<InMemoryLedger, InMemoryLedger> {
        let store = Arc::new(ConversationStore::new(Duration::from_secs(600), Arc::new(clock)));
        DialogueEngine::new(
            store,
            Arc::clone(&ledger),
            LeaveRecorder::new(ledger, LedgerLayout::default()),
            grades(),
            DateParser::taipei(),
        )
        .with_audit_sink(Arc::new(audit))
    }

    #[tokio::test]
    async fn empty_class_list_aborts_the_session() {
        let audit = InMemoryAuditSink::default();
        let ledger = Arc::new(InMemoryLedger::new("姓名"));
        let engine = engine(ledger, ManualClock::new(now()), audit.clone());

        engine.handle_text("U1", "請假", "req-1").await;
        let replies = engine.handle_text("U1", "國中", "req-2").await;

        assert_eq!(replies.len(), 1);
        assert!(replies[0].text.contains("無法取得班級列表"));
        assert!(engine.store().get("U1").await.is_none());
        assert_eq!(audit.event_types(), vec!["dialogue.started", "dialogue.aborted"]);
    }

    #[tokio::test]
    async fn empty_student_list_aborts_the_session() {
        let roster = LedgerTable::from_values(vec![row(&["姓名"])]);
        let ledger = Arc::new(InMemoryLedger::new("姓名").with_table("國中", "A班", roster));
        let engine = engine(ledger, ManualClock::new(now()), InMemoryAuditSink::default());

        engine.handle_text("U1", "請假", "req-1").await;
        engine.handle_text("U1", "國中", "req-2").await;
        let replies = engine.handle_text("U1", "A班", "req-3").await;

        assert!(replies[0].text.contains("找不到班級或班級中沒有學生"));
        assert!(engine.store().get("U1").await.is_none());
    }

    #[tokio::test]
    async fn side_commands_answer_without_refreshing_activity() {
        let clock = ManualClock::new(now());
        let ledger = Arc::new(InMemoryLedger::new("姓名"));
        let engine = engine(ledger, clock.clone(), InMemoryAuditSink::default());

        engine.handle_text("U1", "請假", "req-1").await;
        let started = engine.store().get("U1").await.expect("session").last_activity_at;
        clock.advance(chrono::Duration::minutes(5));

        let replies = engine.handle_text("U1", "我的ID", "req-2").await;

        assert!(replies[0].text.contains("U1"));
        let session = engine.store().get("U1").await.expect("session");
        assert_eq!(session.step, DialogueStep::SelectGrade);
        assert_eq!(session.last_activity_at, started);
    }

    #[tokio::test]
    async fn follow_and_unsupported_events() {
        let engine = engine(
            Arc::new(InMemoryLedger::new("姓名")),
            ManualClock::new(now()),
            InMemoryAuditSink::default(),
        );

        let welcome = engine.handle_event(&InboundEvent::follow("U9"), "req-1").await;
        assert_eq!(welcome.len(), 3);
        assert!(welcome[0].text.contains("U9"));
        assert!(engine.store().is_empty().await);

        let unsupported = InboundEvent {
            caller_id: "U9".to_owned(),
            kind: crate::dialogue::InboundKind::Unsupported { event_type: "sticker".to_owned() },
        };
        assert!(engine.handle_event(&unsupported, "req-2").await.is_empty());
    }
}
