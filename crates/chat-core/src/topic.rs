//! The topic actor (§4.1): one tokio task per live topic, all mutations
//! serialized through a bounded inbound channel. No topic state is ever
//! touched from outside this task once it is running.

use crate::access::{self, AccessError};
use crate::hub::Hub;
use crate::message::{self, VisibleMessage};
use crate::presence::{self, PresenceEvent, PresenceKind, PresenceTracker};
use chat_persistence::{
    DeletedRange, HeaderMap, MessageStore, SeqQuery, Store, StoreError, Subscription, SubscriptionStore, Topic, TopicKind,
    TopicStore, UserId,
};
use chat_proto::{AccessMode, DataMsg, InfoMsg, MetaMsg, PresMsg, PresWhat, ServerEnvelope, TopicRef};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Inbound channel depth for a topic actor. A slow topic (every writer
/// waiting on a single mutex-free actor) backs up before a slow session
/// does, by design (§5).
pub const INBOX_CAPACITY: usize = 256;

/// A topic actor is retired after this much time with zero live sessions.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Grace period a slow session's outbound channel gets before `fan_out`
/// gives up and detaches it (§5). Chosen to absorb a brief burst without
/// letting one stuck reader stall the whole topic actor.
pub const SLOW_SESSION_GRACE: Duration = Duration::from_millis(100);

pub type SessionId = uuid::Uuid;

#[derive(Debug)]
pub struct JoinOutcome {
    pub given: AccessMode,
    pub effective: AccessMode,
    pub desc: Option<serde_json::Value>,
    pub subs: Option<Vec<Subscription>>,
    pub data: Option<Vec<VisibleMessage>>,
}

#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

type Reply<T> = oneshot::Sender<Result<T, TopicError>>;

pub enum TopicCommand {
    Join {
        user: UserId,
        session_id: SessionId,
        is_auth: bool,
        mode_want: AccessMode,
        override_mode: Option<AccessMode>,
        get: Vec<String>,
        get_data: Option<SeqQuery>,
        outbound: mpsc::Sender<ServerEnvelope>,
        reply: Reply<JoinOutcome>,
    },
    Leave {
        user: UserId,
        session_id: SessionId,
        unsub: bool,
        reply: Reply<()>,
    },
    Publish {
        user: UserId,
        head: HeaderMap,
        content: serde_json::Value,
        reply: Reply<i64>,
    },
    GetData {
        user: UserId,
        query: SeqQuery,
        reply: Reply<Vec<VisibleMessage>>,
    },
    SetSub {
        actor: UserId,
        target: UserId,
        mode: AccessMode,
        reply: Reply<AccessMode>,
    },
    SetDesc {
        actor: UserId,
        public: Option<serde_json::Value>,
        default_acs: Option<AccessMode>,
        reply: Reply<()>,
    },
    DeleteMessages {
        actor: UserId,
        ranges: Vec<(i64, i64)>,
        hard: bool,
        reply: Reply<()>,
    },
    Note {
        actor: UserId,
        what: String,
        seq: Option<i64>,
        reaction: Option<String>,
        content: Option<serde_json::Value>,
    },
    /// A push originating from another topic actor (presence forwarded to
    /// a peer's `me` feed, an invitation notice). Delivered to every live
    /// session on this topic, no skip.
    Forward(ServerEnvelope),
    Shutdown,
}

/// Clone-able handle a session or hub uses to talk to a running topic
/// actor. Cloning is cheap; the channel is the only shared state.
#[derive(Clone)]
pub struct TopicHandle {
    pub name: Arc<str>,
    inbox: mpsc::Sender<TopicCommand>,
}

impl TopicHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&self, cmd: TopicCommand) -> Result<(), TopicError> {
        self.inbox
            .send(cmd)
            .await
            .map_err(|_| TopicError::Store(StoreError::Internal))
    }
}

struct LiveSession {
    session_id: SessionId,
    outbound: mpsc::Sender<ServerEnvelope>,
    mode: AccessMode,
}

struct TopicActor {
    store: Arc<dyn Store>,
    hub: Hub,
    topic: Topic,
    live: HashMap<UserId, Vec<LiveSession>>,
    presence: PresenceTracker,
    inbox: mpsc::Receiver<TopicCommand>,
}

/// Spawns the actor task and returns a handle to it. `topic` is the
/// already-loaded (or freshly created) persisted row; the actor owns the
/// in-memory copy for its whole lifetime and periodically flushes
/// mutations back through `store`. `hub` lets the actor reach other
/// topics (a peer's `me` feed) to forward presence and invitations.
pub fn spawn(store: Arc<dyn Store>, topic: Topic, hub: Hub) -> TopicHandle {
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let name: Arc<str> = Arc::from(topic.name.as_str());
    let actor = TopicActor {
        store,
        hub,
        topic,
        live: HashMap::new(),
        presence: PresenceTracker::new(),
        inbox: rx,
    };
    tokio::spawn(actor.run());
    TopicHandle { name, inbox: tx }
}

impl TopicActor {
    async fn run(mut self) {
        loop {
            let idle = tokio::time::sleep(IDLE_TIMEOUT);
            tokio::select! {
                cmd = self.inbox.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd, TopicCommand::Shutdown) {
                                break;
                            }
                            self.handle(cmd).await;
                        }
                        None => break,
                    }
                }
                _ = idle, if self.live.is_empty() => {
                    tracing::debug!(topic = %self.topic.name, "topic idle, retiring");
                    break;
                }
            }
        }
    }

    /// Pushes `env` to every live session except `skip`'s. A session whose
    /// outbound channel is still full after `SLOW_SESSION_GRACE` is treated
    /// as stuck and detached rather than let it stall this actor (§5).
    async fn fan_out(&mut self, env: ServerEnvelope, skip: Option<UserId>) {
        let mut empty_users = Vec::new();
        for (&user, sessions) in self.live.iter_mut() {
            if Some(user) == skip {
                continue;
            }
            let mut dead = Vec::new();
            for (idx, s) in sessions.iter().enumerate() {
                match s.outbound.send_timeout(env.clone(), SLOW_SESSION_GRACE).await {
                    Ok(()) => {}
                    Err(_) => {
                        tracing::warn!(topic = %self.topic.name, user, "dropping slow session for backpressure");
                        dead.push(idx);
                    }
                }
            }
            for &idx in dead.iter().rev() {
                sessions.remove(idx);
            }
            if sessions.is_empty() {
                empty_users.push(user);
            }
        }
        for user in empty_users {
            self.live.remove(&user);
        }
    }

    async fn fan_out_presence(&mut self, event: PresenceEvent) {
        let what = match event.kind {
            PresenceKind::On => PresWhat::On,
            PresenceKind::Off => PresWhat::Off,
            PresenceKind::Upd => PresWhat::Upd,
            PresenceKind::Gone => PresWhat::Gone,
            PresenceKind::Kp | PresenceKind::Read | PresenceKind::Recv => {
                self.fan_out_info(event).await;
                return;
            }
        };
        let msg = PresMsg {
            topic: self.topic.name.clone(),
            what,
            src: Some(format!("usr{}", event.subject)),
        };
        self.fan_out(ServerEnvelope::Pres(msg.clone()), Some(event.subject)).await;
        self.notify_subscribers_me_feed(what, event.subject).await;
    }

    async fn fan_out_info(&mut self, event: PresenceEvent) {
        let what = match event.kind {
            PresenceKind::Kp => "kp",
            PresenceKind::Read => "read",
            PresenceKind::Recv => "recv",
            _ => return,
        };
        let msg = InfoMsg {
            topic: self.topic.name.clone(),
            from: format!("usr{}", event.subject),
            what: what.to_owned(),
            seq: event.seq,
            reaction: None,
            content: None,
            edited_at: None,
        };
        // Typing/read/recv notices never loop back to the subject's own
        // other sessions; only other subscribers see them.
        self.fan_out(ServerEnvelope::Info(msg), Some(event.subject)).await;
    }

    /// Looks up (or spawns) user `user`'s private `me` feed and pushes
    /// `env` into it. Best-effort: a peer with no live `me` session still
    /// gets the row created so a later `sub me` sees the backlog via its
    /// own `get data`, but send failures here are never surfaced to the
    /// caller — presence/invitation forwarding must not fail the op that
    /// triggered it.
    async fn forward_to_me(&self, user: UserId, env: ServerEnvelope) {
        let me_name = format!("me{user}");
        let spawn_name = me_name.clone();
        let handle = self
            .hub
            .get_or_spawn(&me_name, move || Topic::new(spawn_name, TopicKind::Me, Utc::now()))
            .await;
        if let Ok(handle) = handle {
            let _ = handle.send(TopicCommand::Forward(env)).await;
        }
    }

    /// On a presence transition, every other subscriber (not just the ones
    /// currently live on this topic) learns about it via their own `me`
    /// feed, per §4.5/§3.
    async fn notify_subscribers_me_feed(&self, what: PresWhat, subject: UserId) {
        let Ok(subs) = self.store.get_for_topic(&self.topic.name).await else {
            return;
        };
        for sub in subs {
            if sub.user == subject {
                continue;
            }
            let env = ServerEnvelope::Pres(PresMsg {
                topic: self.topic.name.clone(),
                what,
                src: Some(format!("usr{subject}")),
            });
            self.forward_to_me(sub.user, env).await;
        }
    }

    /// For a `p2p` topic, the other participant's id; `None` for any other
    /// topic kind or if the name fails to parse as p2p.
    fn p2p_peer(&self, user: UserId) -> Option<UserId> {
        if self.topic.kind != TopicKind::P2p {
            return None;
        }
        match TopicRef::parse(&self.topic.name).ok()? {
            TopicRef::P2p(a, b) if a == user => Some(b),
            TopicRef::P2p(a, b) if b == user => Some(a),
            _ => None,
        }
    }

    /// p2p subscriptions mirror each other: `requester`'s `modeWant`
    /// (clipped to the topic's mutual default) becomes `peer`'s
    /// `modeGiven`. Creates the peer's subscription row if it doesn't
    /// exist yet, so joining a p2p topic for the first time always
    /// produces the "two mirror subscriptions" the topic actually needs.
    async fn mirror_p2p_grant(&mut self, peer: UserId, requester_mode_want: AccessMode) -> Result<(), TopicError> {
        let grant = access::p2p_mirror_grant(requester_mode_want, self.topic.default_access_auth);
        let mut peer_sub = match SubscriptionStore::get(&*self.store, &self.topic.name, peer).await {
            Ok(sub) => sub,
            Err(StoreError::NotFound) => Subscription::new(&self.topic.name, peer, AccessMode::empty(), grant, Utc::now()),
            Err(e) => return Err(e.into()),
        };
        peer_sub.mode_given = grant;
        peer_sub.updated_at = Utc::now();
        let peer_sub = self.store.upsert(peer_sub).await?;
        if let Some(sessions) = self.live.get_mut(&peer) {
            for s in sessions.iter_mut() {
                s.mode = peer_sub.effective_mode();
            }
        }
        Ok(())
    }

    /// A `grp` join wanting more than the topic's default grants is a
    /// live, non-persisted invitation forwarded to the owner's `me` feed;
    /// the owner resolves it with an ordinary `set sub` grant (§4.3).
    async fn notify_invitation(&self, requester: UserId, mode_want: AccessMode, given: AccessMode) {
        let Some(owner) = self.topic.owner else {
            return;
        };
        if owner == requester {
            return;
        }
        let info = InfoMsg {
            topic: self.topic.name.clone(),
            from: format!("usr{requester}"),
            what: "invite".to_owned(),
            seq: None,
            reaction: None,
            content: Some(serde_json::json!({ "want": mode_want.to_string(), "given": given.to_string() })),
            edited_at: None,
        };
        self.forward_to_me(owner, ServerEnvelope::Info(info)).await;
    }

    async fn handle(&mut self, cmd: TopicCommand) {
        match cmd {
            TopicCommand::Join {
                user,
                session_id,
                is_auth,
                mode_want,
                override_mode,
                get,
                get_data,
                outbound,
                reply,
            } => {
                let outcome = self
                    .do_join(user, session_id, is_auth, mode_want, override_mode, get, get_data, outbound)
                    .await;
                let _ = reply.send(outcome);
            }
            TopicCommand::Leave { user, session_id, unsub, reply } => {
                let result = self.do_leave(user, session_id, unsub).await;
                let _ = reply.send(result);
            }
            TopicCommand::Publish { user, head, content, reply } => {
                let result = self.do_publish(user, head, content).await;
                let _ = reply.send(result);
            }
            TopicCommand::GetData { user, query, reply } => {
                let result = message::history(&*self.store, &self.topic.name, user, query)
                    .await
                    .map_err(TopicError::from);
                let _ = reply.send(result);
            }
            TopicCommand::SetSub { actor, target, mode, reply } => {
                let result = self.do_set_sub(actor, target, mode).await;
                let _ = reply.send(result);
            }
            TopicCommand::SetDesc { actor, public, default_acs, reply } => {
                let result = self.do_set_desc(actor, public, default_acs).await;
                let _ = reply.send(result);
            }
            TopicCommand::DeleteMessages { actor, ranges, hard, reply } => {
                let result = self.do_delete_messages(actor, ranges, hard).await;
                let _ = reply.send(result);
            }
            TopicCommand::Note { actor, what, seq, reaction, content } => {
                self.do_note(actor, what, seq, reaction, content).await;
            }
            TopicCommand::Forward(env) => {
                self.fan_out(env, None).await;
            }
            TopicCommand::Shutdown => {}
        }
    }

    fn mode_of(&self, user: UserId) -> Option<AccessMode> {
        self.live.get(&user).and_then(|v| v.first()).map(|s| s.mode)
    }

    #[allow(clippy::too_many_arguments)]
    async fn do_join(
        &mut self,
        user: UserId,
        session_id: SessionId,
        is_auth: bool,
        mode_want: AccessMode,
        mut override_mode: Option<AccessMode>,
        get: Vec<String>,
        get_data: Option<SeqQuery>,
        outbound: mpsc::Sender<ServerEnvelope>,
    ) -> Result<JoinOutcome, TopicError> {
        let existing = SubscriptionStore::get(&*self.store, &self.topic.name, user).await.ok();
        let peer = self.p2p_peer(user);
        if override_mode.is_none() {
            if let Some(peer_id) = peer {
                if let Ok(peer_sub) = SubscriptionStore::get(&*self.store, &self.topic.name, peer_id).await {
                    override_mode = Some(access::p2p_mirror_grant(peer_sub.mode_want, self.topic.default_access_auth));
                }
            }
        }
        let negotiation = access::negotiate_join(&self.topic, mode_want, is_auth, override_mode.or(existing.as_ref().map(|s| s.mode_given)));

        let sub = match existing {
            Some(mut s) => {
                s.mode_want = mode_want;
                s.updated_at = Utc::now();
                s
            }
            None => Subscription::new(&self.topic.name, user, mode_want, negotiation.given, Utc::now()),
        };
        let sub = self.store.upsert(sub).await?;

        self.live.entry(user).or_default().push(LiveSession {
            session_id,
            outbound: outbound.clone(),
            mode: sub.effective_mode(),
        });
        if let Some(event) = self.presence.session_joined(user) {
            self.fan_out_presence(event).await;
        }

        if let Some(peer_id) = peer {
            self.mirror_p2p_grant(peer_id, mode_want).await?;
        } else if negotiation.needs_approval {
            self.notify_invitation(user, mode_want, negotiation.given).await;
        }

        let mut desc = None;
        let mut subs = None;
        let mut data = None;
        for item in &get {
            match item.as_str() {
                "desc" => desc = Some(serde_json::json!({ "public": self.topic.public, "acs": self.topic.default_access_auth })),
                "sub" => subs = Some(self.store.get_for_topic(&self.topic.name).await?),
                "data" => {
                    let q = get_data.unwrap_or_default();
                    data = Some(message::history(&*self.store, &self.topic.name, user, q).await?);
                }
                _ => {}
            }
        }

        Ok(JoinOutcome {
            given: sub.mode_given,
            effective: sub.effective_mode(),
            desc,
            subs,
            data,
        })
    }

    async fn do_leave(&mut self, user: UserId, session_id: SessionId, unsub: bool) -> Result<(), TopicError> {
        if let Some(sessions) = self.live.get_mut(&user) {
            sessions.retain(|s| s.session_id != session_id);
            if sessions.is_empty() {
                self.live.remove(&user);
            }
        }
        if let Some(event) = self.presence.session_left(user) {
            self.fan_out_presence(event).await;
        }
        if unsub {
            SubscriptionStore::delete(&*self.store, &self.topic.name, user).await?;
            self.fan_out_presence(PresenceEvent {
                kind: PresenceKind::Gone,
                subject: user,
                seq: None,
            })
            .await;
        }
        Ok(())
    }

    async fn do_publish(&mut self, user: UserId, head: HeaderMap, content: serde_json::Value) -> Result<i64, TopicError> {
        let mode = self.mode_of(user).unwrap_or_default();
        access::require(mode, AccessMode::WRITE)?;
        let seq = message::publish(&*self.store, &self.topic.name, user, head.clone(), content.clone(), Utc::now()).await?;
        self.topic.last_seq = seq;
        let msg = DataMsg {
            topic: self.topic.name.clone(),
            from: format!("usr{user}"),
            seq,
            ts: Utc::now().to_rfc3339(),
            head,
            content: Some(content),
        };
        self.fan_out(ServerEnvelope::Data(msg), None).await;
        Ok(seq)
    }

    async fn do_set_sub(&mut self, actor: UserId, target: UserId, requested: AccessMode) -> Result<AccessMode, TopicError> {
        let actor_mode = self.mode_of(actor).unwrap_or_default();
        if actor != target {
            access::require(actor_mode, AccessMode::APPROVE)?;
        }
        let mut sub = SubscriptionStore::get(&*self.store, &self.topic.name, target).await?;
        let clipped = access::clip_grant(requested, actor_mode, actor_mode.is_owner());
        sub.mode_given = clipped;
        sub.updated_at = Utc::now();
        let sub = self.store.upsert(sub).await?;
        if let Some(sessions) = self.live.get_mut(&target) {
            for s in sessions.iter_mut() {
                s.mode = sub.effective_mode();
            }
        }
        self.fan_out_presence(PresenceEvent {
            kind: PresenceKind::Upd,
            subject: target,
            seq: None,
        })
        .await;
        Ok(sub.effective_mode())
    }

    async fn do_set_desc(
        &mut self,
        actor: UserId,
        public: Option<serde_json::Value>,
        default_acs: Option<AccessMode>,
    ) -> Result<(), TopicError> {
        let actor_mode = self.mode_of(actor).unwrap_or_default();
        access::require(actor_mode, AccessMode::OWNER)?;
        if let Some(p) = public {
            self.topic.public = p;
        }
        if let Some(acs) = default_acs {
            self.topic.default_access_auth = acs;
        }
        self.topic.updated_at = Utc::now();
        self.topic = TopicStore::update(&*self.store, self.topic.clone()).await?;
        self.fan_out(
            ServerEnvelope::Meta(MetaMsg {
                topic: self.topic.name.clone(),
                desc: Some(serde_json::json!({ "public": self.topic.public })),
                sub: None,
                tags: None,
            }),
            None,
        )
        .await;
        Ok(())
    }

    async fn do_delete_messages(&mut self, actor: UserId, ranges: Vec<(i64, i64)>, hard: bool) -> Result<(), TopicError> {
        let mode = self.mode_of(actor).unwrap_or_default();
        let for_user = if hard {
            access::require(mode, AccessMode::DELETE)?;
            None
        } else {
            Some(actor)
        };
        self.store.delete_list(&self.topic.name, &ranges, hard, for_user).await?;
        if hard {
            for (lo, hi) in &ranges {
                let info = InfoMsg {
                    topic: self.topic.name.clone(),
                    from: format!("usr{actor}"),
                    what: "del".to_owned(),
                    seq: Some(*lo),
                    reaction: None,
                    content: Some(serde_json::json!({ "low": lo, "hi": hi })),
                    edited_at: None,
                };
                self.fan_out(ServerEnvelope::Info(info), None).await;
            }
        } else if let Ok(sub) = SubscriptionStore::get(&*self.store, &self.topic.name, actor).await {
            let mut sub = sub;
            for (lo, hi) in &ranges {
                sub.deleted_ranges.push(DeletedRange { low: *lo, hi: *hi });
            }
            let _ = self.store.upsert(sub).await;
        }
        Ok(())
    }

    async fn do_note(&mut self, actor: UserId, what: String, seq: Option<i64>, reaction: Option<String>, content: Option<serde_json::Value>) {
        match what.as_str() {
            "kp" => self.fan_out_presence(presence::typing_notice(actor)).await,
            "read" if seq.is_some() => {
                if let Ok(mut sub) = SubscriptionStore::get(&*self.store, &self.topic.name, actor).await {
                    if sub.bump_read(seq.unwrap()) {
                        let _ = self.store.upsert(sub).await;
                        self.fan_out_presence(presence::read_notice(actor, seq.unwrap())).await;
                    }
                }
            }
            "recv" if seq.is_some() => {
                if let Ok(mut sub) = SubscriptionStore::get(&*self.store, &self.topic.name, actor).await {
                    if sub.bump_recv(seq.unwrap()) {
                        let _ = self.store.upsert(sub).await;
                        self.fan_out_presence(presence::recv_notice(actor, seq.unwrap())).await;
                    }
                }
            }
            "edit" if seq.is_some() => {
                let Ok(msg) = self.store.get_one(&self.topic.name, seq.unwrap()).await else { return };
                let Some(new_content) = content else { return };
                if !message::can_edit(&msg, actor, Utc::now()) {
                    return;
                }
                if message::apply_edit(&*self.store, &self.topic.name, &msg, new_content.clone(), Utc::now()).await.is_err() {
                    return;
                }
                let info = InfoMsg {
                    topic: self.topic.name.clone(),
                    from: format!("usr{actor}"),
                    what: "edit".to_owned(),
                    seq,
                    reaction: None,
                    content: Some(new_content),
                    edited_at: Some(Utc::now().to_rfc3339()),
                };
                self.fan_out(ServerEnvelope::Info(info), None).await;
            }
            "unsend" if seq.is_some() => {
                let Ok(msg) = self.store.get_one(&self.topic.name, seq.unwrap()).await else { return };
                if !message::can_unsend(&msg, actor, Utc::now()) {
                    return;
                }
                if message::apply_unsend(&*self.store, &self.topic.name, &msg).await.is_err() {
                    return;
                }
                let info = InfoMsg {
                    topic: self.topic.name.clone(),
                    from: format!("usr{actor}"),
                    what: "unsend".to_owned(),
                    seq,
                    reaction: None,
                    content: None,
                    edited_at: None,
                };
                self.fan_out(ServerEnvelope::Info(info), None).await;
            }
            "react" => {
                let (Some(seq), Some(token)) = (seq, reaction.as_deref()) else { return };
                let Ok(msg) = self.store.get_one(&self.topic.name, seq).await else { return };
                let Ok(now_present) = message::toggle_reaction(&*self.store, &self.topic.name, &msg, actor, token).await else { return };
                let info = InfoMsg {
                    topic: self.topic.name.clone(),
                    from: format!("usr{actor}"),
                    what: "react".to_owned(),
                    seq: Some(seq),
                    reaction: Some(if now_present { token.to_owned() } else { format!("-{token}") }),
                    content: None,
                    edited_at: None,
                };
                self.fan_out(ServerEnvelope::Info(info), None).await;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_persistence::{MemoryStore, TopicKind, TopicStore};

    async fn store_with_topic(name: &str) -> Arc<dyn Store> {
        let store = MemoryStore::new();
        TopicStore::create(&store, Topic::new(name, TopicKind::Grp, Utc::now())).await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn join_then_publish_fans_out_to_other_sessions() {
        let store = store_with_topic("grpX").await;
        let hub = Hub::new(store.clone());
        let handle = spawn(store, Topic::new("grpX", TopicKind::Grp, Utc::now()), hub);

        let (tx_a, _rx_a) = mpsc::channel(8);
        let (reply_a, res_a) = oneshot::channel();
        handle
            .send(TopicCommand::Join {
                user: 1,
                session_id: uuid::Uuid::new_v4(),
                is_auth: true,
                mode_want: AccessMode::MEMBER_DEFAULT,
                override_mode: Some(AccessMode::MEMBER_DEFAULT),
                get: vec![],
                get_data: None,
                outbound: tx_a,
                reply: reply_a,
            })
            .await
            .unwrap();
        res_a.await.unwrap().unwrap();

        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (reply_b, res_b) = oneshot::channel();
        handle
            .send(TopicCommand::Join {
                user: 2,
                session_id: uuid::Uuid::new_v4(),
                is_auth: true,
                mode_want: AccessMode::MEMBER_DEFAULT,
                override_mode: Some(AccessMode::MEMBER_DEFAULT),
                get: vec![],
                get_data: None,
                outbound: tx_b,
                reply: reply_b,
            })
            .await
            .unwrap();
        res_b.await.unwrap().unwrap();

        let (reply_pub, res_pub) = oneshot::channel();
        handle
            .send(TopicCommand::Publish {
                user: 1,
                head: HeaderMap::new(),
                content: serde_json::json!("hello"),
                reply: reply_pub,
            })
            .await
            .unwrap();
        let seq = res_pub.await.unwrap().unwrap();
        assert_eq!(seq, 1);

        let received = rx_b.recv().await.unwrap();
        match received {
            ServerEnvelope::Data(d) => assert_eq!(d.seq, 1),
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn publish_without_write_access_is_rejected() {
        let store = store_with_topic("grpX").await;
        let hub = Hub::new(store.clone());
        let handle = spawn(store, Topic::new("grpX", TopicKind::Grp, Utc::now()), hub);
        let (tx, _rx) = mpsc::channel(8);
        let (reply, res) = oneshot::channel();
        handle
            .send(TopicCommand::Join {
                user: 1,
                session_id: uuid::Uuid::new_v4(),
                is_auth: true,
                mode_want: AccessMode::JOIN | AccessMode::READ,
                override_mode: Some(AccessMode::JOIN | AccessMode::READ),
                get: vec![],
                get_data: None,
                outbound: tx,
                reply,
            })
            .await
            .unwrap();
        res.await.unwrap().unwrap();

        let (reply_pub, res_pub) = oneshot::channel();
        handle
            .send(TopicCommand::Publish {
                user: 1,
                head: HeaderMap::new(),
                content: serde_json::json!("hi"),
                reply: reply_pub,
            })
            .await
            .unwrap();
        assert!(matches!(res_pub.await.unwrap(), Err(TopicError::Access(AccessError::Forbidden))));
    }

    #[tokio::test]
    async fn leave_detaches_only_the_matching_session() {
        let store = store_with_topic("grpX").await;
        let hub = Hub::new(store.clone());
        let handle = spawn(store, Topic::new("grpX", TopicKind::Grp, Utc::now()), hub);

        let (tx1, mut rx1) = mpsc::channel(8);
        let sid1 = uuid::Uuid::new_v4();
        let (reply1, res1) = oneshot::channel();
        handle
            .send(TopicCommand::Join {
                user: 1,
                session_id: sid1,
                is_auth: true,
                mode_want: AccessMode::MEMBER_DEFAULT,
                override_mode: Some(AccessMode::MEMBER_DEFAULT),
                get: vec![],
                get_data: None,
                outbound: tx1,
                reply: reply1,
            })
            .await
            .unwrap();
        res1.await.unwrap().unwrap();

        let (tx2, mut rx2) = mpsc::channel(8);
        let sid2 = uuid::Uuid::new_v4();
        let (reply2, res2) = oneshot::channel();
        handle
            .send(TopicCommand::Join {
                user: 1,
                session_id: sid2,
                is_auth: true,
                mode_want: AccessMode::MEMBER_DEFAULT,
                override_mode: Some(AccessMode::MEMBER_DEFAULT),
                get: vec![],
                get_data: None,
                outbound: tx2,
                reply: reply2,
            })
            .await
            .unwrap();
        res2.await.unwrap().unwrap();

        let (reply_leave, res_leave) = oneshot::channel();
        handle
            .send(TopicCommand::Leave { user: 1, session_id: sid1, unsub: false, reply: reply_leave })
            .await
            .unwrap();
        res_leave.await.unwrap().unwrap();

        let (reply_pub, res_pub) = oneshot::channel();
        handle
            .send(TopicCommand::Publish {
                user: 1,
                head: HeaderMap::new(),
                content: serde_json::json!("still here"),
                reply: reply_pub,
            })
            .await
            .unwrap();
        res_pub.await.unwrap().unwrap();

        assert!(rx2.recv().await.is_some(), "second session must still receive its own publish echo path was not skipped");
        assert!(rx1.try_recv().is_err(), "first (left) session must not receive further fan_out");
    }
}
