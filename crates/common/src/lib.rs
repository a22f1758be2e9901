// ================
// crates/common/src/lib.rs
// ================
//! Wire protocol for the focusrelay WebSocket server.
//!
//! Every message is a JSON object carrying a `type` field; field names are
//! camelCase on the wire. The `type` value is matched case-insensitively:
//! the two historical client implementations disagreed on casing, so
//! [`decode_client_message`] lower-cases the tag once at the deserialization
//! boundary before dispatch. The raw text frames `"ping"`/`"pong"` are not
//! part of this protocol; the server intercepts them before JSON decoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Meeting identifier, assigned by the web application.
pub type MeetingId = i64;

/// User identifier, assigned by the web application.
pub type UserId = i64;

/// Role of a meeting participant. Focus scores are only ever recorded for
/// students; teachers are the fan-out targets.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    #[must_use]
    pub fn is_teacher(self) -> bool {
        matches!(self, Role::Teacher)
    }
}

/// Screen-share lifecycle action, relayed opaquely to the rest of the room.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScreenShareAction {
    Start,
    Stop,
}

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter a meeting. All four identity fields are required; a message
    /// missing any of them is rejected before any state mutation.
    Join {
        meeting_id: MeetingId,
        user_id: UserId,
        user_name: String,
        user_role: Role,
    },
    /// Request a fresh snapshot of the meeting roster and focus scores.
    /// Teachers use this to rebuild their view on (re)connect.
    RequestMeetingState { meeting_id: MeetingId },
    /// Report a focus score. `student_state` is accepted as an alias because
    /// the older client emitted the broadcast name on the inbound leg too.
    #[serde(alias = "student_state")]
    FocusUpdate {
        meeting_id: MeetingId,
        user_id: UserId,
        #[serde(default)]
        user_name: Option<String>,
        focus_score: f64,
    },
    /// WebRTC offer, relayed verbatim to `target_user_id`.
    Offer {
        meeting_id: MeetingId,
        user_id: UserId,
        target_user_id: UserId,
        offer: Value,
    },
    /// WebRTC answer, relayed verbatim to `target_user_id`.
    Answer {
        meeting_id: MeetingId,
        user_id: UserId,
        target_user_id: UserId,
        answer: Value,
    },
    /// ICE candidate, relayed verbatim to `target_user_id`.
    IceCandidate {
        meeting_id: MeetingId,
        user_id: UserId,
        target_user_id: UserId,
        candidate: Value,
    },
    /// Screen-share start/stop, broadcast to every other room member.
    ScreenShare {
        meeting_id: MeetingId,
        user_id: UserId,
        #[serde(default)]
        user_name: Option<String>,
        action: ScreenShareAction,
    },
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges a successful join; followed immediately by a
    /// `meeting_state` snapshot.
    JoinConfirmed {
        meeting_id: MeetingId,
        user_id: UserId,
    },
    /// Full room snapshot: current roster plus latest focus scores.
    MeetingState {
        meeting_id: MeetingId,
        participants: Vec<ParticipantInfo>,
        students: BTreeMap<UserId, StudentEntry>,
    },
    /// Broadcast to the rest of the room when a participant joins.
    UserJoined {
        meeting_id: MeetingId,
        user_id: UserId,
        user_name: String,
        user_role: Role,
    },
    /// Broadcast to the rest of the room when a participant disconnects,
    /// whether gracefully or via heartbeat eviction.
    UserLeft {
        meeting_id: MeetingId,
        user_id: UserId,
        user_name: String,
    },
    /// Latest focus score for one student, fanned out to teachers only.
    StudentState {
        meeting_id: MeetingId,
        user_id: UserId,
        user_name: String,
        focus_score: f64,
        is_active: bool,
        timestamp: i64,
    },
    /// Best-effort reply for malformed input or unknown message types.
    /// The connection stays open.
    Error { error: String },
    /// Relayed WebRTC offer; `user_id` identifies the sender.
    Offer {
        meeting_id: MeetingId,
        user_id: UserId,
        offer: Value,
    },
    /// Relayed WebRTC answer; `user_id` identifies the sender.
    Answer {
        meeting_id: MeetingId,
        user_id: UserId,
        answer: Value,
    },
    /// Relayed ICE candidate; `user_id` identifies the sender.
    IceCandidate {
        meeting_id: MeetingId,
        user_id: UserId,
        candidate: Value,
    },
    /// Relayed screen-share notification.
    ScreenShare {
        meeting_id: MeetingId,
        user_id: UserId,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        action: ScreenShareAction,
    },
}

/// Roster entry inside a `meeting_state` snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: UserId,
    pub user_name: String,
    pub user_role: Role,
    /// Milliseconds since the Unix epoch.
    pub join_time: i64,
}

/// Latest known focus state for one student.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentEntry {
    pub name: String,
    pub focus_score: f64,
    /// False once the student's connection has dropped; the entry is kept
    /// so teachers still see the last reported score.
    pub is_active: bool,
}

/// Point-in-time view of a room, returned on join and on state requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub participants: Vec<ParticipantInfo>,
    pub students: BTreeMap<UserId, StudentEntry>,
}

/// Reasons an inbound text frame failed to decode into a [`ClientMessage`].
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    #[error("message must be a JSON object")]
    NotObject,
    #[error("missing 'type' field")]
    MissingType,
    #[error("'type' field must be a string")]
    TypeNotString,
    #[error("invalid '{msg_type}' message: {source}")]
    Payload {
        msg_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode an inbound text frame.
///
/// Normalizes the `type` tag to lower case before matching, so `"JOIN"`,
/// `"Join"` and `"join"` all dispatch to the same handler. Unknown types and
/// missing required fields surface as [`DecodeError::Payload`]; the caller
/// replies with an `error` message and keeps the connection open.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    let mut value: Value = serde_json::from_str(text).map_err(DecodeError::NotJson)?;
    let obj = value.as_object_mut().ok_or(DecodeError::NotObject)?;
    let tag = obj
        .get("type")
        .ok_or(DecodeError::MissingType)?
        .as_str()
        .ok_or(DecodeError::TypeNotString)?
        .to_ascii_lowercase();
    obj.insert("type".to_string(), Value::String(tag.clone()));
    serde_json::from_value(value).map_err(|source| DecodeError::Payload {
        msg_type: tag,
        source,
    })
}
