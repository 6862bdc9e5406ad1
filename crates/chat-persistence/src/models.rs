use chat_proto::AccessMode;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Opaque 64-bit user id, rendered on the wire as a short tag (`usr42`).
pub type UserId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub default_access_auth: AccessMode,
    pub default_access_anon: AccessMode,
    pub public: serde_json::Value,
    pub tags: Vec<String>,
    /// Salted basic-auth secret hash; never serialized onto the wire, only
    /// compared against at `login`/`acc` time.
    pub cred_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-deleted users are tombstoned, not purged.
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Me,
    Fnd,
    P2p,
    Grp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    pub name: String,
    pub kind: TopicKind,
    /// Set only for `grp` topics; the user id of the current owner.
    pub owner: Option<UserId>,
    pub public: serde_json::Value,
    pub default_access_auth: AccessMode,
    pub default_access_anon: AccessMode,
    pub last_seq: i64,
    pub clear_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
}

impl Topic {
    pub fn new(name: impl Into<String>, kind: TopicKind, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            kind,
            owner: None,
            public: serde_json::Value::Null,
            default_access_auth: AccessMode::MEMBER_DEFAULT,
            default_access_anon: AccessMode::empty(),
            last_seq: 0,
            clear_id: 0,
            created_at: now,
            updated_at: now,
            touched_at: now,
        }
    }
}

/// A soft-deleted range of seqs, inclusive low / exclusive high.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedRange {
    pub low: i64,
    pub hi: i64,
}

impl DeletedRange {
    pub fn contains(&self, seq: i64) -> bool {
        seq >= self.low && seq < self.hi
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub topic: String,
    pub user: UserId,
    pub mode_want: AccessMode,
    pub mode_given: AccessMode,
    pub read_seq: i64,
    pub recv_seq: i64,
    pub deleted_ranges: Vec<DeletedRange>,
    pub private: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, user: UserId, mode_want: AccessMode, mode_given: AccessMode, now: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            user,
            mode_want,
            mode_given,
            read_seq: 0,
            recv_seq: 0,
            deleted_ranges: Vec::new(),
            private: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn effective_mode(&self) -> AccessMode {
        self.mode_want & self.mode_given
    }

    pub fn is_deleted_for_caller(&self, seq: i64) -> bool {
        self.deleted_ranges.iter().any(|r| r.contains(seq))
    }

    /// Bumps `recv_seq`/`read_seq` with monotone-non-decreasing semantics.
    /// Returns false (silent drop, per the `note` contract) if `seq` would
    /// move the cursor backwards.
    pub fn bump_recv(&mut self, seq: i64) -> bool {
        if seq < self.recv_seq {
            return false;
        }
        self.recv_seq = seq;
        true
    }

    pub fn bump_read(&mut self, seq: i64) -> bool {
        if seq < self.read_seq {
            return false;
        }
        self.read_seq = seq;
        if seq > self.recv_seq {
            self.recv_seq = seq;
        }
        true
    }
}

pub type HeaderMap = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub seq: i64,
    pub from: UserId,
    pub created_at: DateTime<Utc>,
    pub head: HeaderMap,
    /// `None` once hard-deleted (tombstoned).
    pub content: Option<serde_json::Value>,
    pub deleted_for: Vec<UserId>,
    pub tombstoned: bool,
}

impl Message {
    pub fn is_visible_to(&self, user: UserId) -> bool {
        !self.deleted_for.contains(&user)
    }
}
