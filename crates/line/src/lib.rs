//! LINE Messaging API adapter for leavedesk
//!
//! - **Webhook** (`events`) - payload decoding and the batch `WebhookDispatcher`
//! - **Signature** (`signature`) - `X-Line-Signature` verification
//! - **Messages** (`messages`) - reply payloads with quick-reply chips
//! - **Client** (`client`) - reply API client with bounded retry
//!
//! # Flow
//!
//! ```text
//! POST /webhook → verify signature → decode batch → DialogueEngine (per event, in order)
//!                                                        ↓
//!                                     ReplyClient ← ReplyMessage list
//! ```

pub mod client;
pub mod events;
pub mod messages;
pub mod signature;

pub use client::{HttpReplyClient, NoopReplyClient, RecordingReplyClient, ReplyClient, ReplyError};
pub use events::{DispatchError, DispatchSummary, EventService, WebhookDispatcher, WebhookPayload};
pub use signature::{SignatureError, SignatureVerifier, SIGNATURE_HEADER};
