// ============================
// crates/relay-lib/src/handlers.rs
// ============================
//! Message handlers: presence, focus broadcast, signaling relay.
//!
//! Each handler mutates room state through [`Rooms`](crate::rooms::Rooms)
//! and fans results out through the
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry). Send
//! failures to individual recipients are logged and never abort a
//! broadcast.

use chrono::Utc;
use focusrelay_common::{ClientMessage, MeetingId, Role, ServerMessage, UserId};
use metrics::counter;

use crate::metrics::FOCUS_UPDATE;
use crate::registry::ConnId;
use crate::rooms::Participant;
use crate::AppState;

/// What the relay remembers about a joined connection, kept in the shared
/// session map. Removed (not read) on disconnect, which makes cleanup run
/// exactly once even when the connection task and a liveness sweep race.
#[derive(Debug, Clone)]
pub struct Session {
    pub meeting_id: MeetingId,
    pub participant: Participant,
}

/// Dispatch one decoded message. Exhaustive over the message enum: adding
/// a message type without a handler is a compile error, not a silent
/// default-case fallthrough.
pub fn handle_message(state: &AppState, conn_id: ConnId, msg: ClientMessage) {
    match msg {
        ClientMessage::Join {
            meeting_id,
            user_id,
            user_name,
            user_role,
        } => handle_join(state, conn_id, meeting_id, user_id, user_name, user_role),
        ClientMessage::RequestMeetingState { meeting_id } => {
            handle_state_request(state, conn_id, meeting_id);
        },
        ClientMessage::FocusUpdate {
            meeting_id,
            user_id,
            user_name,
            focus_score,
        } => handle_focus_update(
            state,
            Some(conn_id),
            meeting_id,
            user_id,
            user_name.as_deref(),
            focus_score,
            None,
        ),
        ClientMessage::Offer {
            meeting_id,
            user_id,
            target_user_id,
            offer,
        } => relay_to_target(state, meeting_id, target_user_id, ServerMessage::Offer {
            meeting_id,
            user_id,
            offer,
        }),
        ClientMessage::Answer {
            meeting_id,
            user_id,
            target_user_id,
            answer,
        } => relay_to_target(state, meeting_id, target_user_id, ServerMessage::Answer {
            meeting_id,
            user_id,
            answer,
        }),
        ClientMessage::IceCandidate {
            meeting_id,
            user_id,
            target_user_id,
            candidate,
        } => relay_to_target(state, meeting_id, target_user_id, ServerMessage::IceCandidate {
            meeting_id,
            user_id,
            candidate,
        }),
        ClientMessage::ScreenShare {
            meeting_id,
            user_id,
            user_name,
            action,
        } => broadcast_except(state, meeting_id, conn_id, &ServerMessage::ScreenShare {
            meeting_id,
            user_id,
            user_name,
            action,
        }),
    }
}

fn handle_join(
    state: &AppState,
    conn_id: ConnId,
    meeting_id: MeetingId,
    user_id: UserId,
    user_name: String,
    user_role: Role,
) {
    // A connection sits in at most one meeting. Joining a different one
    // completes the leave for the old room first, so the old room can
    // still reach zero members and be removed.
    let moving = state
        .sessions
        .get(&conn_id)
        .is_some_and(|s| s.meeting_id != meeting_id);
    if moving {
        handle_disconnect(state, conn_id);
    }

    let participant = Participant {
        user_id,
        user_name: user_name.clone(),
        role: user_role,
        joined_at: Utc::now().timestamp_millis(),
    };
    let snapshot = state.rooms.join(meeting_id, conn_id, participant.clone());
    state.sessions.insert(conn_id, Session {
        meeting_id,
        participant,
    });
    tracing::info!(meeting_id, user_id, role = ?user_role, "participant joined");

    send_logged(state, conn_id, &ServerMessage::JoinConfirmed {
        meeting_id,
        user_id,
    });
    send_logged(state, conn_id, &ServerMessage::MeetingState {
        meeting_id,
        participants: snapshot.participants,
        students: snapshot.students,
    });
    broadcast_except(state, meeting_id, conn_id, &ServerMessage::UserJoined {
        meeting_id,
        user_id,
        user_name,
        user_role,
    });
}

fn handle_state_request(state: &AppState, conn_id: ConnId, meeting_id: MeetingId) {
    match state.rooms.snapshot(meeting_id) {
        Some(snapshot) => send_logged(state, conn_id, &ServerMessage::MeetingState {
            meeting_id,
            participants: snapshot.participants,
            students: snapshot.students,
        }),
        None => send_logged(state, conn_id, &ServerMessage::Error {
            error: format!("meeting {meeting_id} not found"),
        }),
    }
}

/// Shared by the in-band `focus_update` path and the HTTP sidecar: clamp,
/// upsert, then fan out to teacher connections only. `sender` excludes the
/// originating connection from the fan-out; the sidecar has none.
/// `timestamp` defaults to now. Updates naming a teacher member are
/// dropped: the score map holds students only.
pub fn handle_focus_update(
    state: &AppState,
    sender: Option<ConnId>,
    meeting_id: MeetingId,
    user_id: UserId,
    user_name: Option<&str>,
    focus_score: f64,
    timestamp: Option<i64>,
) {
    let Some(clamped) = state.rooms.update_focus(meeting_id, user_id, user_name, focus_score)
    else {
        if state
            .rooms
            .member_role(meeting_id, user_id)
            .is_some_and(Role::is_teacher)
        {
            tracing::warn!(meeting_id, user_id, "dropped focus update naming a teacher");
            return;
        }
        // Room gone (or never existed): nothing to broadcast. The sidecar
        // treats this as success; a live sender gets told.
        if let Some(conn_id) = sender {
            send_logged(state, conn_id, &ServerMessage::Error {
                error: format!("meeting {meeting_id} not found"),
            });
        }
        return;
    };
    counter!(FOCUS_UPDATE).increment(1);

    let user_name = state
        .rooms
        .snapshot(meeting_id)
        .and_then(|s| s.students.get(&user_id).map(|e| e.name.clone()))
        .unwrap_or_default();
    let msg = ServerMessage::StudentState {
        meeting_id,
        user_id,
        user_name,
        focus_score: clamped,
        is_active: true,
        timestamp: timestamp.unwrap_or_else(|| Utc::now().timestamp_millis()),
    };
    for teacher in state.rooms.teachers(meeting_id) {
        if Some(teacher) == sender {
            continue;
        }
        send_logged(state, teacher, &msg);
    }
}

/// Cleanup for a closed or evicted connection: room leave plus a single
/// `user_left` broadcast. Safe to call from the connection task and the
/// liveness supervisor alike; only the first caller finds a session to
/// remove.
pub fn handle_disconnect(state: &AppState, conn_id: ConnId) {
    let Some((_, sess)) = state.sessions.remove(&conn_id) else {
        return;
    };
    let Some(left) = state.rooms.leave(sess.meeting_id, conn_id) else {
        // Replaced by a rejoin; the room no longer counts this connection.
        return;
    };
    tracing::info!(
        meeting_id = sess.meeting_id,
        user_id = left.user_id,
        "participant left"
    );
    broadcast_except(state, sess.meeting_id, conn_id, &ServerMessage::UserLeft {
        meeting_id: sess.meeting_id,
        user_id: left.user_id,
        user_name: left.user_name,
    });
}

/// Forward a signaling payload, untouched, to the member registered as
/// `target_user_id`. A missing target is logged and dropped; the relay has
/// no delivery guarantee to offer the sender.
fn relay_to_target(
    state: &AppState,
    meeting_id: MeetingId,
    target_user_id: UserId,
    msg: ServerMessage,
) {
    match state.rooms.find_member(meeting_id, target_user_id) {
        Some(target) => send_logged(state, target, &msg),
        None => {
            tracing::warn!(meeting_id, target_user_id, "relay target not in meeting");
        },
    }
}

fn broadcast_except(state: &AppState, meeting_id: MeetingId, skip: ConnId, msg: &ServerMessage) {
    for (member, _) in state.rooms.members(meeting_id) {
        if member == skip {
            continue;
        }
        send_logged(state, member, msg);
    }
}

fn send_logged(state: &AppState, conn_id: ConnId, msg: &ServerMessage) {
    if let Err(err) = state.registry.send(conn_id, msg) {
        // Stale recipient; the sweep will reap it. Never aborts a fan-out.
        tracing::warn!(%conn_id, %err, "failed to deliver message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use axum::extract::ws::Message;
    use focusrelay_common::decode_client_message;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn test_state() -> AppState {
        AppState::new(Settings::default())
    }

    /// Register a fake connection and return its id plus the frame receiver.
    fn fake_conn(state: &AppState) -> (ConnId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (state.registry.register(tx), rx)
    }

    fn join(
        state: &AppState,
        conn_id: ConnId,
        meeting_id: MeetingId,
        user_id: UserId,
        name: &str,
        role: &str,
    ) {
        let msg = decode_client_message(&format!(
            r#"{{"type":"join","meetingId":{meeting_id},"userId":{user_id},"userName":"{name}","userRole":"{role}"}}"#
        ))
        .unwrap();
        handle_message(state, conn_id, msg);
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let Message::Text(text) = frame {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_join_reply_sequence_and_broadcast() {
        let state = test_state();
        let (teacher, mut teacher_rx) = fake_conn(&state);
        let (student, mut student_rx) = fake_conn(&state);

        join(&state, teacher, 20, 1, "Teacher", "teacher");
        let msgs = drain(&mut teacher_rx);
        assert_eq!(msgs[0]["type"], "join_confirmed");
        assert_eq!(msgs[1]["type"], "meeting_state");
        // empty room snapshot for the first joiner
        assert_eq!(msgs[1]["participants"].as_array().unwrap().len(), 1);
        assert!(msgs[1]["students"].as_object().unwrap().is_empty());

        join(&state, student, 20, 2, "Test Student", "student");
        let msgs = drain(&mut student_rx);
        assert_eq!(msgs[0]["type"], "join_confirmed");
        assert_eq!(msgs[1]["type"], "meeting_state");
        assert_eq!(msgs[1]["participants"].as_array().unwrap().len(), 2);

        // the teacher hears about the student, not about itself
        let msgs = drain(&mut teacher_rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "user_joined");
        assert_eq!(msgs[0]["userId"], 2);
        assert_eq!(msgs[0]["userName"], "Test Student");
    }

    #[tokio::test]
    async fn test_joining_another_meeting_leaves_the_first() {
        let state = test_state();
        let (teacher, mut teacher_rx) = fake_conn(&state);
        let (roamer, mut roamer_rx) = fake_conn(&state);
        join(&state, teacher, 1, 10, "Teacher", "teacher");
        join(&state, roamer, 1, 11, "Roamer", "student");
        drain(&mut teacher_rx);
        drain(&mut roamer_rx);

        join(&state, roamer, 2, 11, "Roamer", "student");

        // the first room saw the departure and no longer lists the connection
        let msgs = drain(&mut teacher_rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "user_left");
        assert_eq!(msgs[0]["userId"], 11);
        assert!(state.rooms.members(1).iter().all(|(c, _)| *c != roamer));
        assert_eq!(state.rooms.find_member(2, 11), Some(roamer));

        // disconnecting now empties meeting 2 only
        handle_disconnect(&state, roamer);
        assert!(state.rooms.snapshot(2).is_none());
        assert_eq!(state.rooms.room_count(), 1);
    }

    #[tokio::test]
    async fn test_moving_the_only_member_removes_the_old_room() {
        let state = test_state();
        let (conn, mut rx) = fake_conn(&state);
        join(&state, conn, 1, 5, "Student", "student");
        join(&state, conn, 2, 5, "Student", "student");
        drain(&mut rx);

        assert!(state.rooms.members(1).is_empty());
        assert_eq!(state.rooms.room_count(), 1);
        handle_disconnect(&state, conn);
        assert_eq!(state.rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn test_focus_update_reaches_teachers_only() {
        let state = test_state();
        let (teacher, mut teacher_rx) = fake_conn(&state);
        let (student, mut student_rx) = fake_conn(&state);
        let (student2, mut student2_rx) = fake_conn(&state);
        join(&state, teacher, 20, 1, "Teacher", "teacher");
        join(&state, student, 20, 2, "Test Student", "student");
        join(&state, student2, 20, 3, "Other Student", "student");
        drain(&mut teacher_rx);
        drain(&mut student_rx);
        drain(&mut student2_rx);

        let msg = decode_client_message(
            r#"{"type":"focus_update","meetingId":20,"userId":2,"focusScore":82}"#,
        )
        .unwrap();
        handle_message(&state, student, msg);

        let msgs = drain(&mut teacher_rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "student_state");
        assert_eq!(msgs[0]["userId"], 2);
        assert_eq!(msgs[0]["focusScore"], 82.0);
        assert_eq!(msgs[0]["userName"], "Test Student");
        assert_eq!(msgs[0]["isActive"], true);
        // students never receive other students' scores
        assert!(drain(&mut student2_rx).is_empty());
        assert!(drain(&mut student_rx).is_empty());
    }

    #[tokio::test]
    async fn test_focus_update_naming_a_teacher_is_dropped() {
        let state = test_state();
        let (teacher, mut teacher_rx) = fake_conn(&state);
        let (student, mut student_rx) = fake_conn(&state);
        join(&state, teacher, 20, 1, "Teacher", "teacher");
        join(&state, student, 20, 2, "Student", "student");
        drain(&mut teacher_rx);
        drain(&mut student_rx);

        let msg = decode_client_message(
            r#"{"type":"focus_update","meetingId":20,"userId":1,"focusScore":70}"#,
        )
        .unwrap();
        handle_message(&state, student, msg);

        // no broadcast, no error, and the score map stays students-only
        assert!(drain(&mut teacher_rx).is_empty());
        assert!(drain(&mut student_rx).is_empty());
        let snapshot = state.rooms.snapshot(20).unwrap();
        assert!(!snapshot.students.contains_key(&1));
    }

    #[tokio::test]
    async fn test_focus_update_without_room_reports_error() {
        let state = test_state();
        let (conn, mut rx) = fake_conn(&state);
        let msg = decode_client_message(
            r#"{"type":"focus_update","meetingId":404,"userId":2,"focusScore":50}"#,
        )
        .unwrap();
        handle_message(&state, conn, msg);
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "error");
    }

    #[tokio::test]
    async fn test_offer_relayed_verbatim_to_target_only() {
        let state = test_state();
        let (teacher, mut teacher_rx) = fake_conn(&state);
        let (student, mut student_rx) = fake_conn(&state);
        join(&state, teacher, 20, 1, "Teacher", "teacher");
        join(&state, student, 20, 2, "Student", "student");
        drain(&mut teacher_rx);
        drain(&mut student_rx);

        let msg = decode_client_message(
            r#"{"type":"offer","meetingId":20,"userId":1,"targetUserId":2,"offer":{"sdp":"v=0","sdpType":"offer"}}"#,
        )
        .unwrap();
        handle_message(&state, teacher, msg);

        let msgs = drain(&mut student_rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "offer");
        assert_eq!(msgs[0]["userId"], 1);
        assert_eq!(msgs[0]["offer"], serde_json::json!({"sdp":"v=0","sdpType":"offer"}));
        assert!(drain(&mut teacher_rx).is_empty());
    }

    #[tokio::test]
    async fn test_screen_share_broadcast_to_others() {
        let state = test_state();
        let (teacher, mut teacher_rx) = fake_conn(&state);
        let (student, mut student_rx) = fake_conn(&state);
        let (student2, mut student2_rx) = fake_conn(&state);
        join(&state, teacher, 20, 1, "Teacher", "teacher");
        join(&state, student, 20, 2, "Student", "student");
        join(&state, student2, 20, 3, "Student 2", "student");
        drain(&mut teacher_rx);
        drain(&mut student_rx);
        drain(&mut student2_rx);

        let msg = decode_client_message(
            r#"{"type":"screen_share","meetingId":20,"userId":1,"action":"start"}"#,
        )
        .unwrap();
        handle_message(&state, teacher, msg);

        for rx in [&mut student_rx, &mut student2_rx] {
            let msgs = drain(rx);
            assert_eq!(msgs.len(), 1);
            assert_eq!(msgs[0]["type"], "screen_share");
            assert_eq!(msgs[0]["action"], "start");
        }
        assert!(drain(&mut teacher_rx).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_user_left_once() {
        let state = test_state();
        let (teacher, mut teacher_rx) = fake_conn(&state);
        let (student, _student_rx) = fake_conn(&state);
        join(&state, teacher, 20, 1, "Teacher", "teacher");
        join(&state, student, 20, 2, "Test Student", "student");
        drain(&mut teacher_rx);

        handle_disconnect(&state, student);
        // second call races with the sweep path; must be a no-op
        handle_disconnect(&state, student);

        let msgs = drain(&mut teacher_rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "user_left");
        assert_eq!(msgs[0]["userId"], 2);
        assert_eq!(msgs[0]["userName"], "Test Student");
    }

    #[tokio::test]
    async fn test_state_request_roundtrip() {
        let state = test_state();
        let (teacher, mut teacher_rx) = fake_conn(&state);
        join(&state, teacher, 20, 1, "Teacher", "teacher");
        drain(&mut teacher_rx);

        let msg =
            decode_client_message(r#"{"type":"request_meeting_state","meetingId":20}"#).unwrap();
        handle_message(&state, teacher, msg);
        let msgs = drain(&mut teacher_rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["type"], "meeting_state");

        let msg =
            decode_client_message(r#"{"type":"request_meeting_state","meetingId":99}"#).unwrap();
        handle_message(&state, teacher, msg);
        let msgs = drain(&mut teacher_rx);
        assert_eq!(msgs[0]["type"], "error");
    }
}
