// ============================
// crates/relay-lib/src/rooms.rs
// ============================
//! Per-meeting room state.
//!
//! A room exists if and only if it has at least one member connection: it is
//! created lazily on first join and removed the moment the last member
//! leaves. All mutation goes through [`Rooms`]; the `DashMap` shard lock
//! serializes concurrent join/leave/focus updates on the same meeting, which
//! replaces the implicit single-thread serialization the original
//! event-loop implementation got for free.

use std::collections::{BTreeMap, HashMap};

use dashmap::DashMap;
use focusrelay_common::{
    MeetingId, ParticipantInfo, Role, RoomSnapshot, StudentEntry, UserId,
};
use metrics::counter;

use crate::metrics::{ROOM_CREATED, ROOM_JOIN, ROOM_REMOVED};
use crate::registry::ConnId;

/// Identity of one room member, keyed by its connection. The room maps
/// connection to participant, never the reverse, so a dropped connection
/// can never dangle.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub user_id: UserId,
    pub user_name: String,
    pub role: Role,
    /// Milliseconds since the Unix epoch.
    pub joined_at: i64,
}

#[derive(Default)]
struct Room {
    members: HashMap<ConnId, Participant>,
    focus: BTreeMap<UserId, StudentEntry>,
}

impl Room {
    fn snapshot(&self) -> RoomSnapshot {
        let mut participants: Vec<ParticipantInfo> = self
            .members
            .values()
            .map(|p| ParticipantInfo {
                user_id: p.user_id,
                user_name: p.user_name.clone(),
                user_role: p.role,
                join_time: p.joined_at,
            })
            .collect();
        participants.sort_by_key(|p| (p.join_time, p.user_id));
        RoomSnapshot {
            participants,
            students: self.focus.clone(),
        }
    }
}

/// All live rooms, keyed by meeting id.
#[derive(Default)]
pub struct Rooms {
    rooms: DashMap<MeetingId, Room>,
}

impl Rooms {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant, creating the room if absent. A rejoin with the
    /// same user id replaces the stale member entry rather than duplicating
    /// it; the replaced connection keeps its transport but is no longer a
    /// room member, so its eventual disconnect cleanup is a no-op here.
    /// Returns the snapshot the joining client renders.
    pub fn join(
        &self,
        meeting_id: MeetingId,
        conn_id: ConnId,
        participant: Participant,
    ) -> RoomSnapshot {
        let mut room = self.rooms.entry(meeting_id).or_insert_with(|| {
            counter!(ROOM_CREATED).increment(1);
            tracing::info!(meeting_id, "room created");
            Room::default()
        });
        room.members.retain(|_, p| p.user_id != participant.user_id);
        if participant.role == Role::Student {
            room.focus
                .entry(participant.user_id)
                .and_modify(|entry| {
                    entry.name = participant.user_name.clone();
                    entry.is_active = true;
                })
                .or_insert_with(|| StudentEntry {
                    name: participant.user_name.clone(),
                    focus_score: 0.0,
                    is_active: true,
                });
        }
        room.members.insert(conn_id, participant);
        counter!(ROOM_JOIN).increment(1);
        room.snapshot()
    }

    /// Remove a member. Idempotent: leaving a room one is not in, or a room
    /// that does not exist, is a no-op and returns `None`. The room is
    /// removed once its membership reaches zero. A departing student's
    /// focus entry is kept but marked inactive, so teachers still see the
    /// last reported score.
    pub fn leave(&self, meeting_id: MeetingId, conn_id: ConnId) -> Option<Participant> {
        let left = {
            let mut room = self.rooms.get_mut(&meeting_id)?;
            let left = room.members.remove(&conn_id)?;
            if left.role == Role::Student {
                if let Some(entry) = room.focus.get_mut(&left.user_id) {
                    entry.is_active = false;
                }
            }
            left
        };
        let removed = self
            .rooms
            .remove_if(&meeting_id, |_, room| room.members.is_empty());
        if removed.is_some() {
            counter!(ROOM_REMOVED).increment(1);
            tracing::info!(meeting_id, "room removed");
        }
        Some(left)
    }

    /// Upsert a focus score, clamping it into `[0, 100]`. Out-of-range
    /// input is clamped rather than rejected. Returns the clamped score,
    /// or `None` when the room does not exist (the sidecar treats that as
    /// a silent no-op) or when `user_id` is a teacher member: teacher
    /// entries are never written to the score map. `user_name`, when
    /// absent, falls back to the name the room already knows for this user.
    pub fn update_focus(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
        user_name: Option<&str>,
        score: f64,
    ) -> Option<f64> {
        let mut room = self.rooms.get_mut(&meeting_id)?;
        if room
            .members
            .values()
            .any(|p| p.user_id == user_id && p.role.is_teacher())
        {
            return None;
        }
        let clamped = score.clamp(0.0, 100.0);
        let name = user_name.map(str::to_owned).or_else(|| {
            room.members
                .values()
                .find(|p| p.user_id == user_id)
                .map(|p| p.user_name.clone())
        });
        let entry = room.focus.entry(user_id).or_insert_with(|| StudentEntry {
            name: name.clone().unwrap_or_default(),
            focus_score: clamped,
            is_active: true,
        });
        entry.focus_score = clamped;
        entry.is_active = true;
        if let Some(name) = name {
            entry.name = name;
        }
        Some(clamped)
    }

    /// Read-only snapshot for state-sync requests; `None` if the room does
    /// not exist.
    pub fn snapshot(&self, meeting_id: MeetingId) -> Option<RoomSnapshot> {
        self.rooms.get(&meeting_id).map(|room| room.snapshot())
    }

    /// Current members of a room, for fan-out.
    pub fn members(&self, meeting_id: MeetingId) -> Vec<(ConnId, Participant)> {
        self.rooms
            .get(&meeting_id)
            .map(|room| {
                room.members
                    .iter()
                    .map(|(conn_id, p)| (*conn_id, p.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Teacher-role connections of a room: the fan-out targets for focus
    /// broadcasts. Students never receive other students' scores.
    pub fn teachers(&self, meeting_id: MeetingId) -> Vec<ConnId> {
        self.rooms
            .get(&meeting_id)
            .map(|room| {
                room.members
                    .iter()
                    .filter(|(_, p)| p.role.is_teacher())
                    .map(|(conn_id, _)| *conn_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Role of the member registered as `user_id`, `None` if absent.
    pub fn member_role(&self, meeting_id: MeetingId, user_id: UserId) -> Option<Role> {
        let room = self.rooms.get(&meeting_id)?;
        room.members
            .values()
            .find(|p| p.user_id == user_id)
            .map(|p| p.role)
    }

    /// Connection currently registered for `user_id` in this meeting, for
    /// targeted signaling relay.
    pub fn find_member(&self, meeting_id: MeetingId, user_id: UserId) -> Option<ConnId> {
        let room = self.rooms.get(&meeting_id)?;
        room.members
            .iter()
            .find(|(_, p)| p.user_id == user_id)
            .map(|(conn_id, _)| *conn_id)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
