//! Wire envelopes exchanged between a session and its transport.
//!
//! Every envelope is a JSON object carrying exactly one top-level field
//! naming the verb (`{"pub": {...}}`, `{"ctrl": {...}}`), which is exactly
//! what serde's default externally-tagged enum representation produces.

use crate::mode::AccessMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inclusive-exclusive seq range used by `get data` and `del`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqRange {
    pub low: i64,
    /// Exclusive upper bound. `0` or absent means "open-ended".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hi: Option<i64>,
}

/// A free-form header map: well-known keys plus a pass-through bag for
/// anything the core does not interpret.
pub type HeaderMap = HashMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub ver: String,
    pub ua: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// "new" to create an account, or an existing user tag to update one.
    pub user: String,
    pub scheme: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub scheme: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_want: Option<AccessMode>,
    /// `desc`/`sub`/`data` requested inline with the join, e.g. `["desc", "data"]`.
    #[serde(default)]
    pub get: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_data: Option<GetQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub unsub: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub head: HeaderMap,
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GetWhat {
    Desc,
    Sub,
    Data,
    Tags,
    Cred,
    Del,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub topic: String,
    pub what: Vec<GetWhat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<GetQuery>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetDesc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_acs: Option<AccessMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetSub {
    /// Target user tag; defaults to the caller when absent (self mode change).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub mode: AccessMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<SetDesc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<SetSub>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelWhat {
    Msg,
    Sub,
    Topic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub topic: String,
    pub what: DelWhat,
    #[serde(default)]
    pub delseq: Vec<SeqRange>,
    #[serde(default)]
    pub hard: bool,
    /// Present when `what == sub`: the user tag being removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteMsg {
    pub topic: String,
    pub what: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientEnvelope {
    Hi(HiMsg),
    Acc(AccMsg),
    Login(LoginMsg),
    Sub(SubMsg),
    Leave(LeaveMsg),
    Pub(PubMsg),
    Get(GetMsg),
    Set(SetMsg),
    Del(DelMsg),
    Note(NoteMsg),
}

impl ClientEnvelope {
    /// The request `id` to echo in the `ctrl` response, if any. `note`
    /// never carries one and never produces a `ctrl`.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientEnvelope::Hi(m) => Some(&m.id),
            ClientEnvelope::Acc(m) => Some(&m.id),
            ClientEnvelope::Login(m) => Some(&m.id),
            ClientEnvelope::Sub(m) => Some(&m.id),
            ClientEnvelope::Leave(m) => Some(&m.id),
            ClientEnvelope::Pub(m) => Some(&m.id),
            ClientEnvelope::Get(m) => Some(&m.id),
            ClientEnvelope::Set(m) => Some(&m.id),
            ClientEnvelope::Del(m) => Some(&m.id),
            ClientEnvelope::Note(_) => None,
        }
        .filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CtrlParams(#[serde(flatten)] pub HashMap<String, serde_json::Value>);

impl CtrlParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.0.insert(key.to_owned(), v);
        }
        self
    }
}

/// Response to a request, or an unsolicited notice when `id` is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtrlMsg {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    pub code: u16,
    pub text: String,
    #[serde(default, skip_serializing_if = "CtrlParams::is_empty")]
    pub params: CtrlParams,
}

impl CtrlParams {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl CtrlMsg {
    pub fn new(id: impl Into<String>, topic: impl Into<String>, code: u16, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            code,
            text: text.into(),
            params: CtrlParams::new(),
        }
    }

    pub fn with_params(mut self, params: CtrlParams) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMsg {
    pub topic: String,
    pub from: String,
    pub seq: i64,
    pub ts: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub head: HeaderMap,
    /// `None` for a tombstoned message the caller is allowed to see as a
    /// placeholder.
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaMsg {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresWhat {
    On,
    Off,
    Upd,
    Acs,
    Gone,
    Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresMsg {
    pub topic: String,
    pub what: PresWhat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoMsg {
    pub topic: String,
    pub from: String,
    pub what: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerEnvelope {
    Ctrl(CtrlMsg),
    Data(DataMsg),
    Meta(MetaMsg),
    Pres(PresMsg),
    Info(InfoMsg),
}

impl ServerEnvelope {
    pub fn ctrl(msg: CtrlMsg) -> Self {
        ServerEnvelope::Ctrl(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_envelope_serializes_with_single_top_level_key() {
        let env = ClientEnvelope::Pub(PubMsg {
            id: "1".to_owned(),
            topic: "grpX".to_owned(),
            head: HeaderMap::new(),
            content: serde_json::json!("hello"),
        });
        let v: serde_json::Value = serde_json::to_value(&env).unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj.contains_key("pub"));
    }

    #[test]
    fn request_id_empty_string_is_unsolicited() {
        let env = ClientEnvelope::Sub(SubMsg {
            id: String::new(),
            topic: "grpX".to_owned(),
            mode_want: None,
            get: vec![],
            get_data: None,
        });
        assert_eq!(env.request_id(), None);
    }

    #[test]
    fn note_never_has_request_id() {
        let env = ClientEnvelope::Note(NoteMsg {
            topic: "grpX".to_owned(),
            what: "kp".to_owned(),
            seq: None,
            reaction: None,
            content: None,
        });
        assert_eq!(env.request_id(), None);
    }

    #[test]
    fn ctrl_round_trips_through_json() {
        let ctrl = CtrlMsg::new("1", "grpX", 202, "accepted").with_params(CtrlParams::new().with("seq", 1));
        let env = ServerEnvelope::ctrl(ctrl);
        let json = serde_json::to_string(&env).unwrap();
        let back: ServerEnvelope = serde_json::from_str(&json).unwrap();
        match back {
            ServerEnvelope::Ctrl(c) => {
                assert_eq!(c.code, 202);
                assert_eq!(c.params.0.get("seq").unwrap(), 1);
            }
            _ => panic!("expected ctrl"),
        }
    }
}
