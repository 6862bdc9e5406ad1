//! Presence (§4.5): `on`/`off`/`upd` notifications riding the same
//! fan-out path as `data`/`meta`/`ctrl`. No persistence of its own —
//! presence is derived from which sessions currently hold a live
//! subscription to a topic.

use chat_persistence::UserId;
use serde::{Deserialize, Serialize};

/// The `what` field of a `pres` server message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceKind {
    /// Subject came online (first session for that user joined the topic).
    On,
    /// Subject went offline (last session for that user left the topic).
    Off,
    /// An already-online subject's status changed (e.g. mode change, rename).
    Upd,
    /// Subject is composing a message.
    Kp,
    /// Subject read up to a given seq.
    Read,
    /// Subject received up to a given seq.
    Recv,
    /// Subject's subscription to the topic was deleted.
    Gone,
}

#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub kind: PresenceKind,
    pub subject: UserId,
    pub seq: Option<i64>,
}

/// Tracks, per topic, how many live sessions each user currently holds.
/// The transition into/out of zero is what triggers `on`/`off`; `upd` and
/// the per-action notifications (`kp`, `read`, `recv`) are triggered
/// directly by the session/topic actor and never touch this map.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    live_sessions: std::collections::HashMap<UserId, u32>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session join for `user`. Returns `Some(On)` the first
    /// time this user transitions from zero to one live session.
    pub fn session_joined(&mut self, user: UserId) -> Option<PresenceEvent> {
        let count = self.live_sessions.entry(user).or_insert(0);
        *count += 1;
        if *count == 1 {
            Some(PresenceEvent {
                kind: PresenceKind::On,
                subject: user,
                seq: None,
            })
        } else {
            None
        }
    }

    /// Registers a session leave for `user`. Returns `Some(Off)` the last
    /// time this user transitions from one to zero live sessions.
    pub fn session_left(&mut self, user: UserId) -> Option<PresenceEvent> {
        let Some(count) = self.live_sessions.get_mut(&user) else {
            return None;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.live_sessions.remove(&user);
            Some(PresenceEvent {
                kind: PresenceKind::Off,
                subject: user,
                seq: None,
            })
        } else {
            None
        }
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.live_sessions.contains_key(&user)
    }

    pub fn online_users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.live_sessions.keys().copied()
    }
}

pub fn recv_notice(subject: UserId, seq: i64) -> PresenceEvent {
    PresenceEvent {
        kind: PresenceKind::Recv,
        subject,
        seq: Some(seq),
    }
}

pub fn read_notice(subject: UserId, seq: i64) -> PresenceEvent {
    PresenceEvent {
        kind: PresenceKind::Read,
        subject,
        seq: Some(seq),
    }
}

/// A typing indicator is ephemeral: it never reaches the sender's own
/// other sessions (the source behavior this mirrors), only other
/// subscribers.
pub fn typing_notice(subject: UserId) -> PresenceEvent {
    PresenceEvent {
        kind: PresenceKind::Kp,
        subject,
        seq: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_join_emits_on_later_joins_are_silent() {
        let mut tracker = PresenceTracker::new();
        let first = tracker.session_joined(1);
        assert!(matches!(first, Some(PresenceEvent { kind: PresenceKind::On, .. })));
        let second = tracker.session_joined(1);
        assert!(second.is_none());
    }

    #[test]
    fn last_leave_emits_off() {
        let mut tracker = PresenceTracker::new();
        tracker.session_joined(1);
        tracker.session_joined(1);
        assert!(tracker.session_left(1).is_none());
        let event = tracker.session_left(1);
        assert!(matches!(event, Some(PresenceEvent { kind: PresenceKind::Off, .. })));
        assert!(!tracker.is_online(1));
    }

    #[test]
    fn leaving_unknown_user_is_a_noop() {
        let mut tracker = PresenceTracker::new();
        assert!(tracker.session_left(42).is_none());
    }
}
