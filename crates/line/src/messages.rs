use leavedesk_core::reply::{QuickReplyItem, ReplyMessage};
use serde::Serialize;
use tracing::warn;

/// The reply endpoint accepts at most this many messages per call.
pub const MAX_MESSAGES_PER_REPLY: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineMessage {
    Text {
        text: String,
        #[serde(rename = "quickReply", skip_serializing_if = "Option::is_none")]
        quick_reply: Option<QuickReply>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuickReply {
    pub items: Vec<QuickReplyButton>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuickReplyButton {
    Action { action: MessageAction },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageAction {
    Message { label: String, text: String },
}

impl From<&QuickReplyItem> for QuickReplyButton {
    fn from(item: &QuickReplyItem) -> Self {
        Self::Action {
            action: MessageAction::Message { label: item.label.clone(), text: item.text.clone() },
        }
    }
}

impl From<&ReplyMessage> for LineMessage {
    fn from(message: &ReplyMessage) -> Self {
        let quick_reply = message.has_quick_replies().then(|| QuickReply {
            items: message.quick_replies.iter().map(QuickReplyButton::from).collect(),
        });
        Self::Text { text: message.text.clone(), quick_reply }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub reply_token: String,
    pub messages: Vec<LineMessage>,
}

impl ReplyRequest {
    /// Builds the reply body; messages past the per-call limit are dropped.
    pub fn new(reply_token: impl Into<String>, replies: &[ReplyMessage]) -> Self {
        if replies.len() > MAX_MESSAGES_PER_REPLY {
            warn!(
                event_name = "egress.line.messages_truncated",
                requested = replies.len(),
                sent = MAX_MESSAGES_PER_REPLY,
                "reply exceeds message limit; dropping extra messages"
            );
        }
        Self {
            reply_token: reply_token.into(),
            messages: replies.iter().take(MAX_MESSAGES_PER_REPLY).map(LineMessage::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use leavedesk_core::reply::ReplyMessage;
    use serde_json::json;

    use super::{ReplyRequest, MAX_MESSAGES_PER_REPLY};

    #[test]
    fn quick_replies_serialize_as_message_actions() {
        let request = ReplyRequest::new(
            "nHuyWiB7yP5Zw52FIkcQobQuGDXCTA",
            &[
                ReplyMessage::text("請選擇學生的年級：").with_echo_chips(["國中", "取消"]),
                ReplyMessage::text("感謝使用請假系統！"),
            ],
        );

        let value = serde_json::to_value(&request).expect("serialize");

        assert_eq!(
            value,
            json!({
                "replyToken": "nHuyWiB7yP5Zw52FIkcQobQuGDXCTA",
                "messages": [
                    {
                        "type": "text",
                        "text": "請選擇學生的年級：",
                        "quickReply": {
                            "items": [
                                {"type": "action", "action": {"type": "message", "label": "國中", "text": "國中"}},
                                {"type": "action", "action": {"type": "message", "label": "取消", "text": "取消"}}
                            ]
                        }
                    },
                    {"type": "text", "text": "感謝使用請假系統！"}
                ]
            })
        );
    }

    #[test]
    fn extra_messages_are_dropped() {
        let replies: Vec<_> =
            (0..7).map(|index| ReplyMessage::text(format!("message {index}"))).collect();

        let request = ReplyRequest::new("token", &replies);

        assert_eq!(request.messages.len(), MAX_MESSAGES_PER_REPLY);
    }
}
