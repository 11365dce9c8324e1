//! Presence: who is in a document and where their cursor is.
//!
//! Presence is never persisted and never merged. The server rebroadcasts
//! cursor and selection updates as they arrive and keeps only the list of
//! online users per session.

use serde::{Deserialize, Serialize};

use crate::protocol::UserId;

/// Cursor palette, indexed by `user_id % 8`.
pub const USER_COLORS: [&str; 8] = [
    "#FF5733", "#33FF57", "#3357FF", "#F333FF", "#FF33A1", "#33FFF0", "#FFBD33", "#8D33FF",
];

/// Stable cursor color for a user.
pub fn color_for(user_id: UserId) -> &'static str {
    USER_COLORS[(user_id % USER_COLORS.len() as u64) as usize]
}

/// A user as shown in the online list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub user_id: UserId,
    pub username: String,
    pub color: String,
}

impl OnlineUser {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            color: color_for(user_id).to_string(),
        }
    }
}

/// Caret position and selection length, in characters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRange {
    pub position: usize,
    #[serde(default)]
    pub length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    /// Sent once to a joiner with everyone online.
    Init,
    Join,
    Leave,
}

/// Deduplicate by user: one user with two tabs is listed once.
pub fn online_users(mut users: Vec<OnlineUser>) -> Vec<OnlineUser> {
    users.sort_by_key(|u| u.user_id);
    users.dedup_by_key(|u| u.user_id);
    users
}
