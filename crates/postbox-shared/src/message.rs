use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::Frame;
use crate::constants::{MAX_BULK_FRAME, MAX_CLEAN_FRAME, MAX_MESSAGE_FRAME, NO_ACK, PROTOCOL_VSN};
use crate::jid::{Gid, Jid};

/// Message taxonomy. Only `Normal` and `Group` are routed; the rest are
/// reserved. Unknown numeric values survive a decode as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MsgType {
    /// One-to-one chat
    Normal,
    /// One-to-many chat
    Group,
    /// Event sync (delivered, read, ...)
    Sync,
    /// Server-to-client notice
    Sys,
    /// P2P call dialing
    Rtp,
    Bak,
    /// Publish/subscribe
    Pubsub,
    Unknown(u8),
}

impl MsgType {
    /// Whether delivery logic knows how to route this type.
    pub fn is_deliverable(&self) -> bool {
        matches!(self, MsgType::Normal | MsgType::Group)
    }
}

impl Default for MsgType {
    fn default() -> Self {
        MsgType::Unknown(0)
    }
}

impl From<u8> for MsgType {
    fn from(b: u8) -> Self {
        match b {
            1 => MsgType::Normal,
            2 => MsgType::Group,
            3 => MsgType::Sync,
            4 => MsgType::Sys,
            5 => MsgType::Rtp,
            6 => MsgType::Bak,
            7 => MsgType::Pubsub,
            other => MsgType::Unknown(other),
        }
    }
}

impl From<MsgType> for u8 {
    fn from(t: MsgType) -> Self {
        match t {
            MsgType::Normal => 1,
            MsgType::Group => 2,
            MsgType::Sync => 3,
            MsgType::Sys => 4,
            MsgType::Rtp => 5,
            MsgType::Bak => 6,
            MsgType::Pubsub => 7,
            MsgType::Unknown(b) => b,
        }
    }
}

/// Routing and metadata header of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    /// Unique id, assigned by the creator
    pub id: String,
    pub from: Jid,
    pub to: Jid,
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    /// [`NO_ACK`] or [`crate::constants::ACK`]
    pub ack: u8,
    /// Creation time, unix seconds
    pub ct: i64,
    /// Target group, only set for group messages
    pub gid: Gid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attr {
    pub key: String,
    pub val: String,
}

impl Attr {
    pub fn new(key: impl Into<String>, val: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            val: val.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    pub attrs: Vec<Attr>,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub envelope: Envelope,
    pub payload: Payload,
    pub vsn: String,
}

impl Message {
    /// A one-to-one chat message with a fresh id.
    pub fn new_normal(from: Jid, to: Jid, content: impl Into<String>, attrs: Vec<Attr>) -> Self {
        Self::build(from, to, Gid::default(), None, content.into(), MsgType::Normal, attrs)
    }

    /// A group chat message with a fresh id.
    pub fn new_group(from: Jid, gid: Gid, content: impl Into<String>, attrs: Vec<Attr>) -> Self {
        Self::build(from, Jid::default(), gid, None, content.into(), MsgType::Group, attrs)
    }

    /// A system notice. `id` pins the message id; `None` assigns a fresh one.
    pub fn new_sys(id: Option<&str>, attrs: Vec<Attr>) -> Self {
        Self::build(
            Jid::default(),
            Jid::default(),
            Gid::default(),
            id,
            String::new(),
            MsgType::Sys,
            attrs,
        )
    }

    fn build(
        from: Jid,
        to: Jid,
        gid: Gid,
        id: Option<&str>,
        content: String,
        msg_type: MsgType,
        attrs: Vec<Attr>,
    ) -> Self {
        let id = match id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        Self {
            envelope: Envelope {
                id,
                from,
                to,
                msg_type,
                ack: NO_ACK,
                ct: chrono::Utc::now().timestamp(),
                gid,
            },
            payload: Payload { attrs, content },
            vsn: PROTOCOL_VSN.to_string(),
        }
    }

    /// Look up a payload attribute by key.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.payload
            .attrs
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.val.as_str())
    }
}

impl Frame for Message {
    const MAX_FRAME: usize = MAX_MESSAGE_FRAME;
}

/// Messages ordered ascending by creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageBag {
    pub messages: Vec<Message>,
}

impl MessageBag {
    /// Build a bag sorted by `ct`. The sort is stable, so messages created
    /// in the same second keep their input order.
    pub fn sorted(mut messages: Vec<Message>) -> Self {
        messages.sort_by_key(|m| m.envelope.ct);
        Self { messages }
    }

    pub fn ids(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|m| m.envelope.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Frame for MessageBag {
    const MAX_FRAME: usize = MAX_BULK_FRAME;
}

/// Instruction to delete delivered messages from a recipient's mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanMsg {
    pub jid: Jid,
    pub ids: Vec<String>,
}

impl Frame for CleanMsg {
    const MAX_FRAME: usize = MAX_CLEAN_FRAME;
}
