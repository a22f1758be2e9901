// ==============
// crates/relay-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_SWEEP_EVICTED: &str = "ws.sweep.evicted";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_REMOVED: &str = "room.removed";
pub const ROOM_JOIN: &str = "room.join";
pub const FOCUS_UPDATE: &str = "focus.update";
pub const SIDECAR_FOCUS: &str = "sidecar.focus";
