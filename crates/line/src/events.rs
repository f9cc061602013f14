use std::sync::Arc;

use async_trait::async_trait;
use leavedesk_core::dialogue::{DialogueEngine, InboundEvent, InboundKind};
use leavedesk_core::gateway::{LedgerGateway, RosterGateway};
use leavedesk_core::reply::ReplyMessage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::ReplyClient;
use crate::signature::{SignatureError, SignatureVerifier};

/// Body of one webhook delivery. A delivery may batch several events.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl WebhookEvent {
    pub fn user_id(&self) -> Option<&str> {
        self.source
            .as_ref()
            .and_then(|source| source.user_id.as_deref())
            .filter(|user_id| !user_id.is_empty())
    }

    /// Maps the raw event onto the dialogue's input. Events without a user
    /// cannot be attributed to a conversation and yield `None`.
    pub fn to_inbound(&self) -> Option<InboundEvent> {
        let caller_id = self.user_id()?;
        let kind = match (self.event_type.as_str(), &self.message) {
            ("follow", _) => InboundKind::Follow,
            ("message", Some(EventMessage { message_type, text: Some(text) }))
                if message_type == "text" =>
            {
                InboundKind::Text(text.clone())
            }
            ("message", Some(message)) => {
                InboundKind::Unsupported { event_type: format!("message:{}", message.message_type) }
            }
            (other, _) => InboundKind::Unsupported { event_type: other.to_owned() },
        };
        Some(InboundEvent { caller_id: caller_id.to_owned(), kind })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("webhook payload could not be decoded: {0}")]
    Payload(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub received: usize,
    pub handled: usize,
    pub replied: usize,
    pub failed_replies: usize,
    pub ignored: usize,
}

/// Turns one inbound event into the replies owed to the caller.
#[async_trait]
pub trait EventService: Send + Sync {
    async fn handle(&self, event: &InboundEvent, correlation_id: &str) -> Vec<ReplyMessage>;
}

#[async_trait]
impl<R, L> EventService for DialogueEngine<R, L>
where
    R: RosterGateway + 'static,
    L: LedgerGateway + 'static,
{
    async fn handle(&self, event: &InboundEvent, correlation_id: &str) -> Vec<ReplyMessage> {
        self.handle_event(event, correlation_id).await
    }
}

pub struct WebhookDispatcher {
    service: Arc<dyn EventService>,
    replies: Arc<dyn ReplyClient>,
    verifier: SignatureVerifier,
}

impl WebhookDispatcher {
    pub fn new(
        service: Arc<dyn EventService>,
        replies: Arc<dyn ReplyClient>,
        verifier: SignatureVerifier,
    ) -> Self {
        Self { service, replies, verifier }
    }

    /// Verifies and decodes a raw delivery, then dispatches it. Nothing is
    /// handled when the signature check fails.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
        correlation_id: &str,
    ) -> Result<DispatchSummary, DispatchError> {
        if let Err(error) = self.verifier.verify(body, signature) {
            warn!(
                event_name = "ingress.webhook.signature_rejected",
                correlation_id,
                error = %error,
                "rejecting webhook with bad signature"
            );
            return Err(error.into());
        }

        let payload: WebhookPayload = serde_json::from_slice(body)
            .map_err(|error| DispatchError::Payload(error.to_string()))?;
        Ok(self.dispatch(&payload, correlation_id).await)
    }

    /// Handles events in delivery order. A failed reply is logged and does
    /// not stop the remaining events.
    pub async fn dispatch(
        &self,
        payload: &WebhookPayload,
        correlation_id: &str,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary { received: payload.events.len(), ..Default::default() };
        info!(
            event_name = "ingress.webhook.batch_received",
            correlation_id,
            events = summary.received,
            "webhook batch received"
        );

        for event in &payload.events {
            let reply_token = event.reply_token.as_deref();
            let (Some(inbound), Some(reply_token)) = (event.to_inbound(), reply_token) else {
                summary.ignored += 1;
                continue;
            };

            let replies = self.service.handle(&inbound, correlation_id).await;
            summary.handled += 1;
            if replies.is_empty() {
                continue;
            }

            match self.replies.reply(reply_token, &replies).await {
                Ok(()) => summary.replied += 1,
                Err(error) => {
                    summary.failed_replies += 1;
                    warn!(
                        event_name = "egress.line.reply_failed",
                        correlation_id,
                        caller_id = %inbound.caller_id,
                        webhook_event_id = event.webhook_event_id.as_deref().unwrap_or(""),
                        error = %error,
                        "failed to deliver reply"
                    );
                }
            }
        }

        info!(
            event_name = "ingress.webhook.batch_completed",
            correlation_id,
            handled = summary.handled,
            replied = summary.replied,
            failed_replies = summary.failed_replies,
            ignored = summary.ignored,
            "webhook batch completed"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use leavedesk_core::dates::DateParser;
    use leavedesk_core::dialogue::{DialogueEngine, InboundEvent, InboundKind};
    use leavedesk_core::gateway::{GradeCatalog, InMemoryLedger, LedgerTable};
    use leavedesk_core::recorder::{LeaveRecorder, LedgerLayout};
    use leavedesk_core::reply::ReplyMessage;
    use leavedesk_core::session::{ConversationStore, ManualClock};

    use super::{DispatchError, DispatchSummary, EventService, WebhookDispatcher, WebhookPayload};
    use crate::client::RecordingReplyClient;
    use crate::signature::{SignatureError, SignatureVerifier};

    const SECRET: &str = "channel-secret";

    #[derive(Default)]
    struct ScriptedService {
        seen: Mutex<Vec<InboundEvent>>,
    }

    impl ScriptedService {
        fn seen(&self) -> Vec<InboundEvent> {
            match self.seen.lock() {
                Ok(seen) => seen.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    #[async_trait]
    impl EventService for ScriptedService {
        async fn handle(&self, event: &InboundEvent, _correlation_id: &str) -> Vec<ReplyMessage> {
            self.seen.lock().expect("lock").push(event.clone());
            match &event.kind {
                InboundKind::Text(text) => vec![ReplyMessage::text(format!("echo {text}"))],
                InboundKind::Follow => vec![ReplyMessage::text("welcome")],
                InboundKind::Unsupported { .. } => Vec::new(),
            }
        }
    }

    fn text_event(user_id: &str, reply_token: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "message",
            "replyToken": reply_token,
            "source": {"type": "user", "userId": user_id},
            "message": {"type": "text", "id": "1", "text": text},
            "webhookEventId": format!("evt-{reply_token}")
        })
    }

    fn payload(events: Vec<serde_json::Value>) -> WebhookPayload {
        serde_json::from_value(serde_json::json!({"destination": "Ubot", "events": events}))
            .expect("payload")
    }

    fn dispatcher(
        service: Arc<dyn EventService>,
        replies: RecordingReplyClient,
    ) -> WebhookDispatcher {
        WebhookDispatcher::new(
            service,
            Arc::new(replies),
            SignatureVerifier::new(SECRET.to_owned().into()),
        )
    }

    #[test]
    fn events_map_to_dialogue_input() {
        let payload = payload(vec![
            text_event("U1", "r1", "請假"),
            serde_json::json!({"type": "follow", "replyToken": "r2", "source": {"type": "user", "userId": "U2"}}),
            serde_json::json!({
                "type": "message",
                "replyToken": "r3",
                "source": {"type": "user", "userId": "U3"},
                "message": {"type": "sticker", "id": "2"}
            }),
            serde_json::json!({"type": "message", "replyToken": "r4", "source": {"type": "group"}}),
        ]);

        let inbound: Vec<_> = payload.events.iter().map(|event| event.to_inbound()).collect();

        assert_eq!(inbound[0], Some(InboundEvent::text("U1", "請假")));
        assert_eq!(inbound[1], Some(InboundEvent::follow("U2")));
        assert_eq!(
            inbound[2].as_ref().map(|event| event.kind.clone()),
            Some(InboundKind::Unsupported { event_type: "message:sticker".to_owned() })
        );
        assert_eq!(inbound[3], None);
    }

    #[tokio::test]
    async fn batch_is_handled_in_order_and_survives_reply_failures() {
        let service = Arc::new(ScriptedService::default());
        let replies = RecordingReplyClient::default();
        replies.fail_token("r2");
        let dispatcher = dispatcher(service.clone(), replies.clone());

        let summary = dispatcher
            .dispatch(
                &payload(vec![
                    text_event("U1", "r1", "first"),
                    text_event("U1", "r2", "second"),
                    text_event("U1", "r3", "third"),
                    serde_json::json!({"type": "unfollow", "source": {"type": "user", "userId": "U1"}}),
                ]),
                "req-batch",
            )
            .await;

        assert_eq!(
            summary,
            DispatchSummary { received: 4, handled: 3, replied: 2, failed_replies: 1, ignored: 1 }
        );
        let texts: Vec<_> = service
            .seen()
            .into_iter()
            .filter_map(|event| match event.kind {
                InboundKind::Text(text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
        let tokens: Vec<_> = replies.sent().into_iter().map(|(token, _)| token).collect();
        assert_eq!(tokens, vec!["r1", "r3"]);
    }

    #[tokio::test]
    async fn unsigned_or_forged_deliveries_are_not_handled() {
        let service = Arc::new(ScriptedService::default());
        let dispatcher = dispatcher(service.clone(), RecordingReplyClient::default());
        let body = serde_json::to_vec(&serde_json::json!({
            "destination": "Ubot",
            "events": [text_event("U1", "r1", "請假")]
        }))
        .expect("body");

        let missing = dispatcher.handle_webhook(&body, None, "req-1").await;
        let forged = SignatureVerifier::new("other-secret".to_owned().into())
            .sign(&body)
            .expect("sign");
        let mismatched = dispatcher.handle_webhook(&body, Some(&forged), "req-2").await;

        assert_eq!(missing, Err(DispatchError::Signature(SignatureError::Missing)));
        assert_eq!(mismatched, Err(DispatchError::Signature(SignatureError::Mismatch)));
        assert!(service.seen().is_empty());
    }

    #[tokio::test]
    async fn signed_garbage_is_a_payload_error() {
        let dispatcher =
            dispatcher(Arc::new(ScriptedService::default()), RecordingReplyClient::default());
        let body = b"not json";
        let signature =
            SignatureVerifier::new(SECRET.to_owned().into()).sign(body).expect("sign");

        let result = dispatcher.handle_webhook(body, Some(&signature), "req-1").await;

        assert!(matches!(result, Err(DispatchError::Payload(_))));
    }

    #[tokio::test]
    async fn signed_delivery_drives_the_dialogue_engine() {
        let ledger = Arc::new(InMemoryLedger::new("姓名").with_table(
            "國中",
            "701",
            LedgerTable::from_values(vec![vec!["姓名".to_owned()], vec!["Jane Doe".to_owned()]]),
        ));
        let clock = ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 16, 1, 30, 0).single().expect("instant"),
        );
        let store = Arc::new(ConversationStore::new(Duration::from_secs(600), Arc::new(clock)));
        let engine = DialogueEngine::new(
            store.clone(),
            Arc::clone(&ledger),
            LeaveRecorder::new(Arc::clone(&ledger), LedgerLayout::default()),
            GradeCatalog::new(["國中"]),
            DateParser::taipei(),
        );
        let replies = RecordingReplyClient::default();
        let dispatcher = dispatcher(Arc::new(engine), replies.clone());
        let body = serde_json::to_vec(&serde_json::json!({
            "destination": "Ubot",
            "events": [text_event("U1", "r1", "請假"), text_event("U1", "r2", "國中")]
        }))
        .expect("body");
        let signature =
            SignatureVerifier::new(SECRET.to_owned().into()).sign(&body).expect("sign");

        let summary =
            dispatcher.handle_webhook(&body, Some(&signature), "req-1").await.expect("dispatch");

        assert_eq!(summary.replied, 2);
        let sent = replies.sent();
        assert!(sent[1].1[0].quick_replies.iter().any(|chip| chip.text == "701"));
        assert!(store.get("U1").await.is_some());
    }
}
