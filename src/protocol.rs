//! Events exchanged with clients.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}` with
//! kebab-case event names and camelCase fields.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::ChatMessage;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    BindIdentity { name: String },

    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_name: String,
        peer_id: String,
    },

    #[serde(rename_all = "camelCase")]
    SendMessage {
        room_name: String,
        text: String,
        /// Echoed back in the broadcast so the sender can recognise its own message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BindIdentity { .. } => "bind-identity",
            Self::JoinRoom { .. } => "join-room",
            Self::SendMessage { .. } => "send-message",
        }
    }
}

/// One line of room history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryLine {
    pub sender: String,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl From<&ChatMessage> for HistoryLine {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            sender: msg.sender.clone(),
            text: msg.text.clone(),
            timestamp: msg.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    IdentityBound { user_id: Uuid },

    #[serde(rename_all = "camelCase")]
    RoomHistory {
        room_name: String,
        messages: Vec<HistoryLine>,
    },

    #[serde(rename_all = "camelCase")]
    PeerJoined {
        room_name: String,
        peer_id: String,
    },

    #[serde(rename_all = "camelCase")]
    PeerLeft {
        room_name: String,
        peer_id: String,
    },

    #[serde(rename_all = "camelCase")]
    Message {
        room_name: String,
        sender: String,
        text: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },

    Error { reason: String },
}

impl ServerEvent {
    pub fn message(room_name: &str, msg: &ChatMessage, correlation_id: Option<String>) -> Self {
        Self::Message {
            room_name: room_name.to_owned(),
            sender: msg.sender.clone(),
            text: msg.text.clone(),
            timestamp: msg.created_at,
            correlation_id,
        }
    }
}
