pub mod audit;
pub mod config;
pub mod dates;
pub mod dialogue;
pub mod errors;
pub mod gateway;
pub mod recorder;
pub mod reply;
pub mod session;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use config::{AppConfig, ConfigError, LoadOptions, LogFormat};
pub use dates::{DateParser, LeaveDateParseResult, ParsedLeaveDate};
pub use dialogue::{DialogueEngine, DialogueStep, InboundEvent, InboundKind};
pub use errors::{DateRejection, GatewayError, LookupError, RecordError};
pub use gateway::{
    CellAddress, GradeCatalog, InMemoryLedger, LedgerGateway, LedgerTable, RosterGateway,
};
pub use recorder::{LeaveRecord, LeaveRecorder, LeaveRequest, LeaveType, LedgerLayout};
pub use reply::{QuickReplyItem, ReplyMessage};
pub use session::{Clock, ConversationSession, ConversationStore, ManualClock, SystemClock};
