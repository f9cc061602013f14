use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use leavedesk_core::config::LineConfig;
use leavedesk_core::reply::ReplyMessage;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, warn};

use crate::messages::ReplyRequest;

const REPLY_PATH: &str = "/v2/bot/message/reply";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplyError {
    #[error("reply client could not be built: {0}")]
    Build(String),
    #[error("reply request failed: {0}")]
    Transport(String),
    #[error("reply endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait ReplyClient: Send + Sync {
    async fn reply(&self, reply_token: &str, messages: &[ReplyMessage]) -> Result<(), ReplyError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReplyClient;

#[async_trait]
impl ReplyClient for NoopReplyClient {
    async fn reply(&self, reply_token: &str, messages: &[ReplyMessage]) -> Result<(), ReplyError> {
        debug!(reply_token, messages = messages.len(), "discarding reply");
        Ok(())
    }
}

/// Keeps every reply in memory instead of sending it.
#[derive(Clone, Default)]
pub struct RecordingReplyClient {
    sent: Arc<Mutex<Vec<(String, Vec<ReplyMessage>)>>>,
    failing_tokens: Arc<Mutex<Vec<String>>>,
}

impl RecordingReplyClient {
    /// Replies sent with `reply_token` will fail with a 400 status.
    pub fn fail_token(&self, reply_token: impl Into<String>) {
        match self.failing_tokens.lock() {
            Ok(mut tokens) => tokens.push(reply_token.into()),
            Err(poisoned) => poisoned.into_inner().push(reply_token.into()),
        }
    }

    pub fn sent(&self) -> Vec<(String, Vec<ReplyMessage>)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn is_failing(&self, reply_token: &str) -> bool {
        match self.failing_tokens.lock() {
            Ok(tokens) => tokens.iter().any(|token| token == reply_token),
            Err(poisoned) => poisoned.into_inner().iter().any(|token| token == reply_token),
        }
    }
}

#[async_trait]
impl ReplyClient for RecordingReplyClient {
    async fn reply(&self, reply_token: &str, messages: &[ReplyMessage]) -> Result<(), ReplyError> {
        if self.is_failing(reply_token) {
            return Err(ReplyError::Status {
                status: 400,
                body: "Invalid reply token".to_owned(),
            });
        }
        let entry = (reply_token.to_owned(), messages.to_vec());
        match self.sent.lock() {
            Ok(mut sent) => sent.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 200, max_delay_ms: 2_000 }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Sends replies to the Messaging API. Transport failures and 5xx responses
/// are retried with exponential backoff; other statuses fail immediately.
pub struct HttpReplyClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: SecretString,
    retry: RetryPolicy,
}

impl HttpReplyClient {
    pub fn new(
        api_base_url: &str,
        access_token: SecretString,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ReplyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ReplyError::Build(error.to_string()))?;
        let endpoint = format!("{}{REPLY_PATH}", api_base_url.trim_end_matches('/'));
        Ok(Self { http, endpoint, access_token, retry })
    }

    pub fn from_config(config: &LineConfig) -> Result<Self, ReplyError> {
        Self::new(
            &config.api_base_url,
            config.channel_access_token.clone(),
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::with_max_retries(config.max_retries),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, request: &ReplyRequest) -> Result<(), ReplyError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.access_token.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|error| ReplyError::Transport(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ReplyError::Status { status: status.as_u16(), body })
    }
}

fn is_retryable(error: &ReplyError) -> bool {
    match error {
        ReplyError::Transport(_) => true,
        ReplyError::Status { status, .. } => *status >= 500,
        ReplyError::Build(_) => false,
    }
}

#[async_trait]
impl ReplyClient for HttpReplyClient {
    async fn reply(&self, reply_token: &str, messages: &[ReplyMessage]) -> Result<(), ReplyError> {
        let request = ReplyRequest::new(reply_token, messages);
        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(()) => return Ok(()),
                Err(error) if is_retryable(&error) && attempt < self.retry.max_retries => {
                    warn!(
                        event_name = "egress.line.reply_retry",
                        attempt,
                        max_retries = self.retry.max_retries,
                        error = %error,
                        "reply attempt failed; retrying"
                    );
                    let delay = self.retry.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use leavedesk_core::config::AppConfig;
    use leavedesk_core::reply::ReplyMessage;

    use super::{
        is_retryable, HttpReplyClient, RecordingReplyClient, ReplyClient, ReplyError, RetryPolicy,
    };

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy { max_retries: 5, base_delay_ms: 100, max_delay_ms: 500 };

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn only_transport_and_server_errors_are_retried() {
        assert!(is_retryable(&ReplyError::Transport("reset".to_owned())));
        assert!(is_retryable(&ReplyError::Status { status: 503, body: String::new() }));
        assert!(!is_retryable(&ReplyError::Status { status: 400, body: String::new() }));
    }

    #[test]
    fn endpoint_is_built_from_the_configured_base_url() {
        let mut config = AppConfig::default().line;
        config.api_base_url = "https://api.line.me/".to_owned();

        let client = HttpReplyClient::from_config(&config).expect("client");

        assert_eq!(client.endpoint(), "https://api.line.me/v2/bot/message/reply");
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_after_retries() {
        let client = HttpReplyClient::new(
            "http://127.0.0.1:9",
            "token".to_owned().into(),
            Duration::from_secs(2),
            RetryPolicy { max_retries: 1, base_delay_ms: 0, max_delay_ms: 0 },
        )
        .expect("client");

        let error = client.reply("token", &[ReplyMessage::text("hi")]).await.expect_err("refused");

        assert!(matches!(error, ReplyError::Transport(_)));
    }

    #[tokio::test]
    async fn recording_client_keeps_replies_and_scripted_failures() {
        let client = RecordingReplyClient::default();
        client.fail_token("expired");

        client.reply("fresh", &[ReplyMessage::text("ok")]).await.expect("reply");
        let error = client.reply("expired", &[ReplyMessage::text("late")]).await;

        assert!(matches!(error, Err(ReplyError::Status { status: 400, .. })));
        assert_eq!(client.sent().len(), 1);
        assert_eq!(client.sent()[0].0, "fresh");
    }
}
