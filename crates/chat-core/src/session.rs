//! The session object (§4.2): one instance per live connection. Holds no
//! lock of its own — all shared state lives behind the Hub/topic actors —
//! and owns the bounded outbound channel whose saturation is what decides
//! whether this connection gets disconnected for backpressure.

use crate::auth;
use crate::hub::Hub;
use crate::message::VisibleMessage;
use crate::topic::{JoinOutcome, SessionId, TopicCommand, TopicHandle, TopicError};
use chat_persistence::{Store, SubscriptionStore, Topic, TopicKind, TopicStore, User, UserId, UserStore};
use chat_proto::{
    error_codes, AccMsg, ClientEnvelope, CtrlMsg, CtrlParams, DataMsg, DelMsg, DelWhat, GetMsg, GetQuery, GetWhat,
    LeaveMsg, LoginMsg, MetaMsg, NoteMsg, PubMsg, ServerEnvelope, SetMsg, SubMsg, TopicRef,
};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Outbound channel depth. A session that cannot keep up with this many
/// buffered server envelopes is disconnected rather than left to grow
/// without bound (§5).
pub const OUTBOUND_CAPACITY: usize = 256;

pub struct Session {
    pub user: Option<UserId>,
    is_auth: bool,
    session_id: SessionId,
    hub: Hub,
    store: std::sync::Arc<dyn Store>,
    outbound_tx: mpsc::Sender<ServerEnvelope>,
    joined: HashMap<String, TopicHandle>,
}

impl Session {
    pub fn new(hub: Hub, store: std::sync::Arc<dyn Store>, outbound_tx: mpsc::Sender<ServerEnvelope>) -> Self {
        Self {
            user: None,
            is_auth: false,
            session_id: SessionId::new_v4(),
            hub,
            store,
            outbound_tx,
            joined: HashMap::new(),
        }
    }

    fn ctrl(id: &str, topic: &str, code: u16, params: CtrlParams) -> ServerEnvelope {
        ServerEnvelope::Ctrl(CtrlMsg::new(id, topic, code, error_codes::text_for(code)).with_params(params))
    }

    fn simple_ctrl(id: &str, topic: &str, code: u16) -> ServerEnvelope {
        Self::ctrl(id, topic, code, CtrlParams::new())
    }

    pub async fn dispatch(&mut self, env: ClientEnvelope) -> Vec<ServerEnvelope> {
        let id = env.request_id().unwrap_or("").to_owned();
        match env {
            ClientEnvelope::Hi(_) => vec![Self::simple_ctrl(&id, "", error_codes::OK)],
            ClientEnvelope::Acc(m) => self.handle_acc(&id, m).await,
            ClientEnvelope::Login(m) => self.handle_login(&id, m).await,
            ClientEnvelope::Sub(m) => self.handle_sub(&id, m).await,
            ClientEnvelope::Leave(m) => self.handle_leave(&id, m).await,
            ClientEnvelope::Pub(m) => self.handle_pub(&id, m).await,
            ClientEnvelope::Get(m) => self.handle_get(&id, m).await,
            ClientEnvelope::Set(m) => self.handle_set(&id, m).await,
            ClientEnvelope::Del(m) => self.handle_del(&id, m).await,
            ClientEnvelope::Note(m) => {
                self.handle_note(m).await;
                vec![]
            }
        }
    }

    async fn handle_acc(&mut self, id: &str, m: AccMsg) -> Vec<ServerEnvelope> {
        if m.scheme != "basic" {
            return vec![Self::simple_ctrl(id, "", error_codes::UNPROCESSABLE)];
        }
        if m.user != "new" {
            return vec![Self::simple_ctrl(id, "", error_codes::NOT_ALLOWED)];
        }
        let now = Utc::now();
        let hash = auth::hash_secret(&m.secret, &m.secret);
        let user = User {
            id: 0,
            default_access_auth: chat_proto::AccessMode::MEMBER_DEFAULT,
            default_access_anon: chat_proto::AccessMode::empty(),
            public: serde_json::Value::Null,
            // The hash doubles as a lookup tag so `login` can find this
            // account by re-deriving the same hash from the secret alone.
            tags: vec![hash.clone()],
            cred_hash: Some(hash),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        match UserStore::create(&*self.store, user).await {
            Ok(created) => {
                self.user = Some(created.id);
                self.is_auth = true;
                vec![Self::ctrl(
                    id,
                    "",
                    error_codes::CREATED,
                    CtrlParams::new().with("user", format!("usr{}", created.id)),
                )]
            }
            Err(e) => vec![Self::simple_ctrl(id, "", e.as_ctrl_code())],
        }
    }

    async fn handle_login(&mut self, id: &str, m: LoginMsg) -> Vec<ServerEnvelope> {
        if m.scheme != "basic" {
            return vec![Self::simple_ctrl(id, "", error_codes::UNPROCESSABLE)];
        }
        // `basic` secrets are submitted as the tag-free password only; the
        // tag comes from a prior `hi`/handshake step in a full client, but
        // for this engine the password itself doubles as the lookup key
        // via its hash, matching `acc`'s self-salted scheme.
        let hash = auth::hash_secret(&m.secret, &m.secret);
        let candidates = self.store.find_by_tag(&hash).await.unwrap_or_default();
        match candidates.into_iter().find(|u| u.cred_hash.as_deref() == Some(hash.as_str())) {
            Some(user) => {
                self.user = Some(user.id);
                self.is_auth = true;
                vec![Self::ctrl(
                    id,
                    "",
                    error_codes::OK,
                    CtrlParams::new().with("user", format!("usr{}", user.id)),
                )]
            }
            None => vec![Self::simple_ctrl(id, "", error_codes::UNAUTHORIZED)],
        }
    }

    async fn resolve_topic(&self, raw: &str) -> Result<(String, TopicKind), ()> {
        let parsed = TopicRef::parse(raw).map_err(|_| ())?;
        let kind = if parsed.is_group() {
            TopicKind::Grp
        } else if parsed.is_p2p() {
            TopicKind::P2p
        } else if matches!(parsed, TopicRef::Me) {
            TopicKind::Me
        } else {
            TopicKind::Fnd
        };
        let name = match parsed {
            TopicRef::Usr(peer) => {
                let me = self.user.ok_or(())?;
                if peer == me {
                    return Err(());
                }
                TopicRef::p2p_name(me, peer)
            }
            TopicRef::New => format!("grp{}", new_group_suffix()),
            // `me` is a per-user feed, not a single shared topic: each
            // user's own `me<id>` row is what presence/invitation
            // forwarding targets.
            TopicRef::Me => format!("me{}", self.user.ok_or(())?),
            other => other.canonical(),
        };
        Ok((name, kind))
    }

    async fn handle_sub(&mut self, id: &str, m: SubMsg) -> Vec<ServerEnvelope> {
        let Some(me) = self.user else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::UNAUTHORIZED)];
        };
        let Ok((name, kind)) = self.resolve_topic(&m.topic).await else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::MALFORMED)];
        };

        if self.joined.contains_key(&name) {
            return vec![Self::simple_ctrl(id, &name, error_codes::NOT_MODIFIED)];
        }

        let now = Utc::now();
        let handle = match self
            .hub
            .get_or_spawn(&name, || {
                let mut t = Topic::new(&name, kind, now);
                if kind == TopicKind::Grp {
                    t.owner = Some(me);
                }
                t
            })
            .await
        {
            Ok(h) => h,
            Err(e) => return vec![Self::simple_ctrl(id, &name, e.as_ctrl_code())],
        };

        let mode_want = m.mode_want.unwrap_or(chat_proto::AccessMode::MEMBER_DEFAULT);
        let (reply, res) = oneshot::channel();
        let send_result = handle
            .send(TopicCommand::Join {
                user: me,
                session_id: self.session_id,
                is_auth: self.is_auth,
                mode_want,
                override_mode: if kind == TopicKind::Grp && m.topic == "new" {
                    Some(chat_proto::AccessMode::OWNER_DEFAULT)
                } else {
                    None
                },
                get: m.get.clone(),
                get_data: m.get_data.map(Into::into),
                outbound: self.outbound_tx.clone(),
                reply,
            })
            .await;
        if send_result.is_err() {
            return vec![Self::simple_ctrl(id, &name, error_codes::INTERNAL)];
        }

        match res.await {
            Ok(Ok(outcome)) => {
                self.joined.insert(name.clone(), handle);
                self.render_join_outcome(id, &name, outcome)
            }
            Ok(Err(e)) => vec![Self::simple_ctrl(id, &name, code_for_topic_error(e))],
            Err(_) => vec![Self::simple_ctrl(id, &name, error_codes::INTERNAL)],
        }
    }

    fn render_join_outcome(&self, id: &str, name: &str, outcome: JoinOutcome) -> Vec<ServerEnvelope> {
        let mut out = vec![Self::ctrl(
            id,
            name,
            error_codes::OK,
            CtrlParams::new().with("acs", outcome.effective.to_string()),
        )];
        if outcome.desc.is_some() || outcome.subs.is_some() {
            out.push(ServerEnvelope::Meta(MetaMsg {
                topic: name.to_owned(),
                desc: outcome.desc,
                sub: outcome.subs.map(|subs| subs.iter().map(sub_to_json).collect()),
                tags: None,
            }));
        }
        if let Some(data) = outcome.data {
            out.extend(data.into_iter().map(|m| visible_to_data(name, m)));
        }
        out
    }

    async fn handle_leave(&mut self, id: &str, m: LeaveMsg) -> Vec<ServerEnvelope> {
        let Some(me) = self.user else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::UNAUTHORIZED)];
        };
        let Some(handle) = self.joined.remove(&m.topic) else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::NOT_FOUND)];
        };
        let (reply, res) = oneshot::channel();
        if handle
            .send(TopicCommand::Leave { user: me, session_id: self.session_id, unsub: m.unsub, reply })
            .await
            .is_err()
        {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)];
        }
        match res.await {
            Ok(Ok(())) => vec![Self::simple_ctrl(id, &m.topic, error_codes::OK)],
            Ok(Err(e)) => vec![Self::simple_ctrl(id, &m.topic, code_for_topic_error(e))],
            Err(_) => vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)],
        }
    }

    async fn handle_pub(&mut self, id: &str, m: PubMsg) -> Vec<ServerEnvelope> {
        let Some(me) = self.user else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::UNAUTHORIZED)];
        };
        let Some(handle) = self.joined.get(&m.topic).cloned() else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::NOT_FOUND)];
        };
        let (reply, res) = oneshot::channel();
        if handle
            .send(TopicCommand::Publish { user: me, head: m.head, content: m.content, reply })
            .await
            .is_err()
        {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)];
        }
        match res.await {
            Ok(Ok(seq)) => vec![Self::ctrl(id, &m.topic, error_codes::ACCEPTED, CtrlParams::new().with("seq", seq))],
            Ok(Err(e)) => vec![Self::simple_ctrl(id, &m.topic, code_for_topic_error(e))],
            Err(_) => vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)],
        }
    }

    async fn handle_get(&mut self, id: &str, m: GetMsg) -> Vec<ServerEnvelope> {
        let Some(_me) = self.user else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::UNAUTHORIZED)];
        };
        let Some(handle) = self.joined.get(&m.topic).cloned() else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::NOT_FOUND)];
        };
        let mut out = Vec::new();
        let mut meta_desc = None;
        let mut meta_sub = None;
        for what in &m.what {
            match what {
                GetWhat::Data => {
                    let (reply, res) = oneshot::channel();
                    let query = m.data.clone().map(Into::into).unwrap_or_default();
                    if handle
                        .send(TopicCommand::GetData { user: self.user.unwrap(), query, reply })
                        .await
                        .is_err()
                    {
                        out.push(Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL));
                        continue;
                    }
                    match res.await {
                        Ok(Ok(messages)) => out.extend(messages.into_iter().map(|msg| visible_to_data(&m.topic, msg))),
                        Ok(Err(e)) => out.push(Self::simple_ctrl(id, &m.topic, code_for_topic_error(e))),
                        Err(_) => out.push(Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)),
                    }
                }
                GetWhat::Desc => match TopicStore::get(&*self.store, &m.topic).await {
                    Ok(topic) => meta_desc = Some(serde_json::json!({ "public": topic.public, "acs": topic.default_access_auth })),
                    Err(e) => out.push(Self::simple_ctrl(id, &m.topic, e.as_ctrl_code())),
                },
                GetWhat::Sub => match self.store.get_for_topic(&m.topic).await {
                    Ok(subs) => meta_sub = Some(subs.iter().map(sub_to_json).collect()),
                    Err(e) => out.push(Self::simple_ctrl(id, &m.topic, e.as_ctrl_code())),
                },
                // Tags/cred/del are account-level `get` targets this
                // engine does not yet serve; see SPEC_FULL.md's scope note.
                GetWhat::Tags | GetWhat::Cred | GetWhat::Del => {}
            }
        }
        if meta_desc.is_some() || meta_sub.is_some() {
            out.push(ServerEnvelope::Meta(MetaMsg {
                topic: m.topic.clone(),
                desc: meta_desc,
                sub: meta_sub,
                tags: None,
            }));
        }
        out.push(Self::simple_ctrl(id, &m.topic, error_codes::OK));
        out
    }

    async fn handle_set(&mut self, id: &str, m: SetMsg) -> Vec<ServerEnvelope> {
        let Some(me) = self.user else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::UNAUTHORIZED)];
        };
        let Some(handle) = self.joined.get(&m.topic).cloned() else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::NOT_FOUND)];
        };
        if let Some(sub) = m.sub {
            let target = match sub.user {
                Some(tag) => parse_user_tag(&tag).unwrap_or(me),
                None => me,
            };
            let (reply, res) = oneshot::channel();
            if handle
                .send(TopicCommand::SetSub { actor: me, target, mode: sub.mode, reply })
                .await
                .is_err()
            {
                return vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)];
            }
            return match res.await {
                Ok(Ok(_)) => vec![Self::simple_ctrl(id, &m.topic, error_codes::OK)],
                Ok(Err(e)) => vec![Self::simple_ctrl(id, &m.topic, code_for_topic_error(e))],
                Err(_) => vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)],
            };
        }
        if let Some(desc) = m.desc {
            let (reply, res) = oneshot::channel();
            if handle
                .send(TopicCommand::SetDesc {
                    actor: me,
                    public: desc.public,
                    default_acs: desc.default_acs,
                    reply,
                })
                .await
                .is_err()
            {
                return vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)];
            }
            return match res.await {
                Ok(Ok(())) => vec![Self::simple_ctrl(id, &m.topic, error_codes::OK)],
                Ok(Err(e)) => vec![Self::simple_ctrl(id, &m.topic, code_for_topic_error(e))],
                Err(_) => vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)],
            };
        }
        vec![Self::simple_ctrl(id, &m.topic, error_codes::MALFORMED)]
    }

    async fn handle_del(&mut self, id: &str, m: DelMsg) -> Vec<ServerEnvelope> {
        let Some(me) = self.user else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::UNAUTHORIZED)];
        };
        let Some(handle) = self.joined.get(&m.topic).cloned() else {
            return vec![Self::simple_ctrl(id, &m.topic, error_codes::NOT_FOUND)];
        };
        match m.what {
            DelWhat::Msg => {
                let ranges: Vec<(i64, i64)> = m.delseq.iter().map(|r| (r.low, r.hi.unwrap_or(r.low + 1))).collect();
                let (reply, res) = oneshot::channel();
                if handle
                    .send(TopicCommand::DeleteMessages { actor: me, ranges, hard: m.hard, reply })
                    .await
                    .is_err()
                {
                    return vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)];
                }
                match res.await {
                    Ok(Ok(())) => vec![Self::simple_ctrl(id, &m.topic, error_codes::OK)],
                    Ok(Err(e)) => vec![Self::simple_ctrl(id, &m.topic, code_for_topic_error(e))],
                    Err(_) => vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)],
                }
            }
            DelWhat::Sub => {
                if m.user.is_some() {
                    // Removing another member's subscription is routed
                    // through `set sub` with a clipped mode instead; this
                    // engine only self-unsubscribes via `del sub`.
                    return vec![Self::simple_ctrl(id, &m.topic, error_codes::NOT_ALLOWED)];
                }
                self.joined.remove(&m.topic);
                let (reply, res) = oneshot::channel();
                if handle
                    .send(TopicCommand::Leave { user: me, session_id: self.session_id, unsub: true, reply })
                    .await
                    .is_err()
                {
                    return vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)];
                }
                match res.await {
                    Ok(Ok(())) => vec![Self::simple_ctrl(id, &m.topic, error_codes::OK)],
                    Ok(Err(e)) => vec![Self::simple_ctrl(id, &m.topic, code_for_topic_error(e))],
                    Err(_) => vec![Self::simple_ctrl(id, &m.topic, error_codes::INTERNAL)],
                }
            }
            DelWhat::Topic => vec![Self::simple_ctrl(id, &m.topic, error_codes::NOT_ALLOWED)],
        }
    }

    async fn handle_note(&mut self, m: NoteMsg) {
        if let Some(me) = self.user {
            if let Some(handle) = self.joined.get(&m.topic) {
                let _ = handle
                    .send(TopicCommand::Note {
                        actor: me,
                        what: m.what,
                        seq: m.seq,
                        reaction: m.reaction,
                        content: m.content,
                    })
                    .await;
            }
        }
    }

    /// Leaves every joined topic without unsubscribing, on transport
    /// teardown. Dropping `outbound_tx`'s clones held by those topic
    /// actors is what actually signals the owning transport loop to stop.
    pub async fn disconnect(&mut self) {
        for (_, handle) in self.joined.drain() {
            let (reply, _res) = oneshot::channel::<Result<(), TopicError>>();
            let _ = handle
                .send(TopicCommand::Leave {
                    user: self.user.unwrap_or(0),
                    session_id: self.session_id,
                    unsub: false,
                    reply,
                })
                .await;
        }
    }
}

fn parse_user_tag(tag: &str) -> Option<UserId> {
    tag.strip_prefix("usr").and_then(|s| s.parse().ok())
}

fn sub_to_json(sub: &chat_persistence::Subscription) -> serde_json::Value {
    serde_json::json!({
        "user": format!("usr{}", sub.user),
        "acs": sub.mode_given.to_string(),
        "read": sub.read_seq,
        "recv": sub.recv_seq,
    })
}

fn visible_to_data(topic: &str, msg: VisibleMessage) -> ServerEnvelope {
    ServerEnvelope::Data(DataMsg {
        topic: topic.to_owned(),
        from: format!("usr{}", msg.from),
        seq: msg.seq,
        ts: msg.created_at.to_rfc3339(),
        head: msg.head,
        content: msg.content,
    })
}

fn code_for_topic_error(e: TopicError) -> u16 {
    match e {
        TopicError::Access(_) => error_codes::FORBIDDEN,
        TopicError::Store(se) => se.as_ctrl_code(),
    }
}

fn new_group_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl From<GetQuery> for chat_persistence::SeqQuery {
    fn from(q: GetQuery) -> Self {
        chat_persistence::SeqQuery {
            since: q.since,
            before: q.before,
            limit: q.limit.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_persistence::MemoryStore;
    use std::sync::Arc;

    fn new_session() -> (Session, Hub) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hub = Hub::new(store.clone());
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (Session::new(hub.clone(), store, tx), hub)
    }

    #[tokio::test]
    async fn acc_then_sub_to_new_group_succeeds() {
        let (mut session, _hub) = new_session();
        let acc = session
            .dispatch(ClientEnvelope::Acc(AccMsg {
                id: "1".to_owned(),
                user: "new".to_owned(),
                scheme: "basic".to_owned(),
                secret: "hunter2".to_owned(),
            }))
            .await;
        assert!(matches!(&acc[0], ServerEnvelope::Ctrl(c) if c.code == error_codes::CREATED));

        let sub = session
            .dispatch(ClientEnvelope::Sub(SubMsg {
                id: "2".to_owned(),
                topic: "new".to_owned(),
                mode_want: None,
                get: vec![],
                get_data: None,
            }))
            .await;
        assert!(matches!(&sub[0], ServerEnvelope::Ctrl(c) if c.code == error_codes::OK));
        assert_eq!(session.joined.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_sub_is_not_modified() {
        let (mut session, _hub) = new_session();
        session
            .dispatch(ClientEnvelope::Acc(AccMsg {
                id: "1".to_owned(),
                user: "new".to_owned(),
                scheme: "basic".to_owned(),
                secret: "hunter2".to_owned(),
            }))
            .await;
        session
            .dispatch(ClientEnvelope::Sub(SubMsg {
                id: "2".to_owned(),
                topic: "new".to_owned(),
                mode_want: None,
                get: vec![],
                get_data: None,
            }))
            .await;
        let name = session.joined.keys().next().unwrap().clone();
        let again = session
            .dispatch(ClientEnvelope::Sub(SubMsg {
                id: "3".to_owned(),
                topic: name,
                mode_want: None,
                get: vec![],
                get_data: None,
            }))
            .await;
        assert!(matches!(&again[0], ServerEnvelope::Ctrl(c) if c.code == error_codes::NOT_MODIFIED));
    }

    #[tokio::test]
    async fn pub_without_join_is_not_found() {
        let (mut session, _hub) = new_session();
        session
            .dispatch(ClientEnvelope::Acc(AccMsg {
                id: "1".to_owned(),
                user: "new".to_owned(),
                scheme: "basic".to_owned(),
                secret: "hunter2".to_owned(),
            }))
            .await;
        let out = session
            .dispatch(ClientEnvelope::Pub(PubMsg {
                id: "2".to_owned(),
                topic: "grpAAA".to_owned(),
                head: Default::default(),
                content: serde_json::json!("hi"),
            }))
            .await;
        assert!(matches!(&out[0], ServerEnvelope::Ctrl(c) if c.code == error_codes::NOT_FOUND));
    }
}
