use std::sync::Arc;

use axum::Router;
use leavedesk_core::config::{AppConfig, ConfigError, LoadOptions};
use leavedesk_core::dates::DateParser;
use leavedesk_core::dialogue::DialogueEngine;
use leavedesk_core::errors::GatewayError;
use leavedesk_core::recorder::LeaveRecorder;
use leavedesk_core::session::{ConversationStore, SystemClock};
use leavedesk_line::{HttpReplyClient, ReplyError, SignatureVerifier, WebhookDispatcher};
use leavedesk_sheets::SheetsGateway;
use thiserror::Error;
use tracing::info;

use crate::{health, webhook};

/// Everything a request handler needs; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<WebhookDispatcher>,
    pub store: Arc<ConversationStore>,
    pub grades: Arc<[String]>,
}

pub struct Application {
    pub config: AppConfig,
    pub state: AppState,
}

impl Application {
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("sheets gateway could not be initialised: {0}")]
    Sheets(#[source] GatewayError),
    #[error("reply client could not be initialised: {0}")]
    Reply(#[source] ReplyError),
}

pub fn router(state: AppState) -> Router {
    Router::new().merge(health::routes()).merge(webhook::routes()).with_state(state)
}

pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        grades = config.grades.len(),
        "starting application bootstrap"
    );

    let store = Arc::new(ConversationStore::new(
        config.conversation.idle_timeout(),
        Arc::new(SystemClock),
    ));
    let sheets = Arc::new(
        SheetsGateway::new(&config.sheets, &config.grades, config.ledger.name_header.clone())
            .map_err(BootstrapError::Sheets)?,
    );
    let parser = DateParser::from_offset_minutes(
        config.conversation.utc_offset_minutes,
        config.conversation.max_advance_months,
    );
    let engine = DialogueEngine::new(
        Arc::clone(&store),
        Arc::clone(&sheets),
        LeaveRecorder::new(sheets, config.ledger.layout()),
        config.grade_catalog(),
        parser,
    );
    let replies = HttpReplyClient::from_config(&config.line).map_err(BootstrapError::Reply)?;
    let dispatcher = WebhookDispatcher::new(
        Arc::new(engine),
        Arc::new(replies),
        SignatureVerifier::new(config.line.channel_secret.clone()),
    );

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        "application components initialised"
    );

    let grades = config.grades.iter().map(|grade| grade.name.clone()).collect();
    Ok(Application {
        state: AppState { dispatcher: Arc::new(dispatcher), store, grades },
        config,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use leavedesk_core::dates::DateParser;
    use leavedesk_core::dialogue::DialogueEngine;
    use leavedesk_core::gateway::{GradeCatalog, InMemoryLedger, LedgerTable};
    use leavedesk_core::recorder::{LeaveRecorder, LedgerLayout};
    use leavedesk_core::session::{ConversationStore, SystemClock};
    use leavedesk_line::{RecordingReplyClient, SignatureVerifier, WebhookDispatcher};

    use super::AppState;

    pub const SECRET: &str = "test-channel-secret";

    pub fn sign(body: &[u8]) -> String {
        SignatureVerifier::new(SECRET.to_owned().into()).sign(body).expect("sign")
    }

    /// State backed by an in-memory ledger with one class `701` in grade `國中`.
    pub fn state(replies: RecordingReplyClient) -> AppState {
        let ledger = Arc::new(InMemoryLedger::new("姓名").with_table(
            "國中",
            "701",
            LedgerTable::from_values(vec![vec!["姓名".to_owned()], vec!["Jane Doe".to_owned()]]),
        ));
        let store =
            Arc::new(ConversationStore::new(Duration::from_secs(600), Arc::new(SystemClock)));
        let engine = DialogueEngine::new(
            Arc::clone(&store),
            Arc::clone(&ledger),
            LeaveRecorder::new(ledger, LedgerLayout::default()),
            GradeCatalog::new(["國中"]),
            DateParser::taipei(),
        );
        let dispatcher = WebhookDispatcher::new(
            Arc::new(engine),
            Arc::new(replies),
            SignatureVerifier::new(SECRET.to_owned().into()),
        );
        AppState { dispatcher: Arc::new(dispatcher), store, grades: vec!["國中".to_owned()].into() }
    }
}

#[cfg(test)]
mod tests {
    use leavedesk_core::config::{ConfigOverrides, GradeConfig, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides() -> ConfigOverrides {
        ConfigOverrides {
            line_channel_access_token: Some("line-token".to_owned()),
            line_channel_secret: Some("line-secret".to_owned()),
            sheets_access_token: Some("ya29.token".to_owned()),
            grades: Some(vec![GradeConfig {
                name: "國中".to_owned(),
                spreadsheet_id: "sheet-junior".to_owned(),
            }]),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn bootstrap_fails_fast_without_channel_secret() {
        let result = bootstrap(LoadOptions {
            config_path: Some("/nonexistent/leavedesk.toml".into()),
            overrides: ConfigOverrides { line_channel_secret: Some("  ".to_owned()), ..overrides() },
            ..LoadOptions::default()
        });

        let message = result.err().expect("error").to_string();
        assert!(message.contains("line.channel_secret"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_wires_configured_grades() {
        let app = bootstrap(LoadOptions {
            config_path: Some("/nonexistent/leavedesk.toml".into()),
            overrides: overrides(),
            ..LoadOptions::default()
        })
        .expect("bootstrap");

        assert_eq!(app.state.grades.to_vec(), vec!["國中".to_owned()]);
        assert!(app.state.store.is_empty().await);
    }
}
