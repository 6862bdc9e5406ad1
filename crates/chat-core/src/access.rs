//! Mode negotiation (§4.3). `modeGiven` is `override ?? default`, clipped
//! by policy; `modeWant` vs `modeGiven` decide whether an invitation is
//! warranted.

use chat_persistence::{Topic, UserId};
use chat_proto::{AccessMode, ModePair};

/// Result of negotiating a join request against a topic's defaults and any
/// existing override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub given: AccessMode,
    pub needs_approval: bool,
}

/// Negotiate `modeGiven` for a user joining `topic` with `mode_want`.
///
/// `is_auth` selects which of the topic's two default-access fields
/// applies. `override_mode` is an explicit prior grant (e.g. a `grp` topic
/// invitation already approved, or a p2p mirror set by the peer); when
/// absent the topic default is used instead.
pub fn negotiate_join(
    topic: &Topic,
    mode_want: AccessMode,
    is_auth: bool,
    override_mode: Option<AccessMode>,
) -> Negotiation {
    let default = if is_auth {
        topic.default_access_auth
    } else {
        topic.default_access_anon
    };
    let given = override_mode.unwrap_or(default);
    let pair = ModePair::new(mode_want, given);
    Negotiation {
        given: pair.given,
        needs_approval: pair.needs_approval(),
    }
}

/// Policy clip applied to an explicit `set sub` mode grant: only an
/// existing Owner may grant or hold the Owner bit, and a grantor who is
/// not an Approver cannot raise another user's mode at all.
pub fn clip_grant(
    requested: AccessMode,
    grantor_mode: AccessMode,
    grantor_is_owner: bool,
) -> AccessMode {
    let mut clipped = requested;
    if !grantor_is_owner {
        clipped.remove(AccessMode::OWNER);
    }
    if !grantor_mode.is_approver() && !grantor_is_owner {
        // A non-approver cannot widen another user's grant at all; this
        // is enforced by the caller refusing the op outright, but we
        // still clip defensively to the grantor's own ceiling.
        clipped &= grantor_mode;
    }
    clipped
}

/// Errors surfaced by access checks; the topic actor maps these straight
/// to `ctrl` codes (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("permission denied")]
    Forbidden,
    #[error("not a member")]
    NotSubscribed,
}

pub fn require(mode: AccessMode, bit: AccessMode) -> Result<(), AccessError> {
    if mode.contains(bit) {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

/// p2p subscriptions are symmetric: peer A's `modeGiven` is authored by
/// peer B's `modeWant` (clipped to mutual defaults) and vice versa. This
/// computes what B should grant A given B's own want.
pub fn p2p_mirror_grant(peer_mode_want: AccessMode, mutual_default: AccessMode) -> AccessMode {
    peer_mode_want & mutual_default
}

pub fn is_self_subscribe(a: UserId, b: UserId) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_persistence::TopicKind;
    use chrono::Utc;

    fn sample_topic() -> Topic {
        let mut t = Topic::new("grpX", TopicKind::Grp, Utc::now());
        t.default_access_auth = AccessMode::MEMBER_DEFAULT;
        t.default_access_anon = AccessMode::empty();
        t
    }

    #[test]
    fn join_uses_auth_default_when_no_override() {
        let topic = sample_topic();
        let neg = negotiate_join(&topic, AccessMode::MEMBER_DEFAULT, true, None);
        assert_eq!(neg.given, AccessMode::MEMBER_DEFAULT);
        assert!(!neg.needs_approval);
    }

    #[test]
    fn join_wanting_more_than_given_needs_approval() {
        let topic = sample_topic();
        let want = AccessMode::MEMBER_DEFAULT | AccessMode::APPROVE;
        let neg = negotiate_join(&topic, want, true, None);
        assert!(neg.needs_approval);
    }

    #[test]
    fn anon_gets_anon_default() {
        let topic = sample_topic();
        let neg = negotiate_join(&topic, AccessMode::MEMBER_DEFAULT, false, None);
        assert_eq!(neg.given, AccessMode::empty());
        assert!(neg.needs_approval);
    }

    #[test]
    fn grant_clips_owner_bit_from_non_owner() {
        let requested = AccessMode::OWNER | AccessMode::READ;
        let clipped = clip_grant(requested, AccessMode::APPROVE | AccessMode::READ, false);
        assert!(!clipped.is_owner());
    }
}
