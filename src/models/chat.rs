use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::optimistic::Identified;
use crate::models::order::OrderId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Location,
    Image,
    /// Types without dedicated rendering, e.g. `system`. Shown as
    /// plain text; never sent.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub message_id: Uuid,
    #[serde(default)]
    pub order_id: OrderId,
    pub message: String,
    pub is_own_message: bool,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub message_type: MessageType,
    /// Set locally on an optimistic entry until the server confirms it.
    #[serde(default, skip_deserializing)]
    pub pending: bool,
}

impl ChatMessage {
    pub fn optimistic(order_id: OrderId, message: String, message_type: MessageType) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            order_id,
            message,
            is_own_message: true,
            is_read: false,
            created_at: Utc::now(),
            message_type,
            pending: true,
        }
    }

    /// Display order: `created_at`, ties broken by `message_id`.
    pub fn display_order(a: &Self, b: &Self) -> Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.message_id.cmp(&b.message_id))
    }
}

impl Identified for ChatMessage {
    type Id = Uuid;

    fn id(&self) -> Uuid {
        self.message_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendMessageRequest {
    pub message: String,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuickMessage {
    pub id: u64,
    pub text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum RawQuickMessage {
    Text(String),
    Object {
        #[serde(default)]
        id: Option<u64>,
        #[serde(alias = "message", alias = "template")]
        text: String,
    },
}

pub(crate) fn resolve_quick_messages(raw: Vec<RawQuickMessage>) -> Vec<QuickMessage> {
    raw.into_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let (id, text) = match entry {
                RawQuickMessage::Text(text) => (index as u64, text),
                RawQuickMessage::Object { id, text } => (id.unwrap_or(index as u64), text),
            };
            let text = text.trim().to_string();
            (!text.is_empty()).then_some(QuickMessage { id, text })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_on_created_at_break_by_message_id() {
        let mut a = ChatMessage::optimistic(1, "a".into(), MessageType::Text);
        let mut b = a.clone();
        a.message_id = Uuid::from_u128(2);
        b.message_id = Uuid::from_u128(1);
        let mut list = vec![a.clone(), b.clone()];
        list.sort_by(ChatMessage::display_order);
        assert_eq!(list[0].message_id, b.message_id);
    }

    #[test]
    fn quick_messages_accept_strings_and_objects() {
        let raw: Vec<RawQuickMessage> =
            serde_json::from_str(r#"["On my way", {"id": 9, "message": "Call me"}, "  "]"#)
                .unwrap();
        let quick = resolve_quick_messages(raw);
        assert_eq!(quick.len(), 2);
        assert_eq!(quick[0], QuickMessage { id: 0, text: "On my way".into() });
        assert_eq!(quick[1].id, 9);
    }

    #[test]
    fn unrecognised_message_type_does_not_fail_the_list() {
        let json = r#"[
            {
                "message_id": "6f1c2b1e-8a1f-4a63-9d56-0a1d8f6d1b11",
                "message": "Courier assigned",
                "is_own_message": false,
                "created_at": "2025-01-01T10:00:00Z",
                "message_type": "system"
            },
            {
                "message_id": "6f1c2b1e-8a1f-4a63-9d56-0a1d8f6d1b12",
                "message": "Hi",
                "is_own_message": true,
                "created_at": "2025-01-01T10:01:00Z",
                "message_type": "text"
            }
        ]"#;
        let messages: Vec<ChatMessage> = serde_json::from_str(json).unwrap();
        assert_eq!(messages[0].message_type, MessageType::Other);
        assert_eq!(messages[1].message_type, MessageType::Text);
    }

    #[test]
    fn server_messages_are_never_pending() {
        let json = r#"{
            "message_id": "6f1c2b1e-8a1f-4a63-9d56-0a1d8f6d1b11",
            "order_id": 4,
            "message": "Outside",
            "is_own_message": false,
            "created_at": "2025-01-01T10:00:00Z",
            "pending": true
        }"#;
        let message: ChatMessage = serde_json::from_str(json).unwrap();
        assert!(!message.pending);
        assert_eq!(message.message_type, MessageType::Text);
    }
}
