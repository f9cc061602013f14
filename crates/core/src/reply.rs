use serde::{Deserialize, Serialize};

pub const MAX_QUICK_REPLIES: usize = 13;
pub const MAX_LABEL_CHARS: usize = 20;

/// A suggestion chip. Tapping it re-submits `text` as the caller's next message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReplyItem {
    pub label: String,
    pub text: String,
}

impl QuickReplyItem {
    pub fn new(label: impl AsRef<str>, text: impl Into<String>) -> Self {
        Self { label: label.as_ref().chars().take(MAX_LABEL_CHARS).collect(), text: text.into() }
    }

    /// Chip whose label is also the submitted text.
    pub fn echo(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(&text, text.clone())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub text: String,
    pub quick_replies: Vec<QuickReplyItem>,
}

impl ReplyMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), quick_replies: Vec::new() }
    }

    /// Appends a chip; chips past the platform limit are ignored.
    pub fn with_quick_reply(mut self, item: QuickReplyItem) -> Self {
        if self.quick_replies.len() < MAX_QUICK_REPLIES {
            self.quick_replies.push(item);
        }
        self
    }

    pub fn with_quick_replies<I>(self, items: I) -> Self
    where
        I: IntoIterator<Item = QuickReplyItem>,
    {
        items.into_iter().fold(self, Self::with_quick_reply)
    }

    pub fn with_echo_chips<I, S>(self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_quick_replies(texts.into_iter().map(QuickReplyItem::echo))
    }

    pub fn has_quick_replies(&self) -> bool {
        !self.quick_replies.is_empty()
    }
}
