//! Mailbox protocol: the handlers a node serves for the identities and
//! groups homed on it, and the client calls that reach them.
//!
//! Handlers run their store work on the blocking pool. Every failure is
//! reported to the requester as a handler failure; where the protocol has
//! a structured response (query, group update, group member) that response
//! is still produced with the error filled in.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use postbox_net::{fresh_peer_id, handler_fn, Handler, HandlerFailure, HandlerResult, Inbound, Transport};
use postbox_shared::constants::{
    PID_MAILBOX_CLEAN, PID_MAILBOX_GROUP_MEMBER, PID_MAILBOX_GROUP_UPDATE, PID_MAILBOX_PUT,
    PID_MAILBOX_QUERY, SUCCESS,
};
use postbox_shared::{
    CleanMsg, Frame, Gid, Group, GroupMember, GroupMemberReq, GroupMemberRsp, GroupRsp, Jid,
    MemberAction, Message, MessageBag,
};
use postbox_store::MailboxStore;

use crate::error::{ChatError, Result};

#[derive(Clone)]
pub struct Mailbox {
    store: MailboxStore,
    transport: Arc<dyn Transport>,
    my_id: Jid,
    timeout: Duration,
}

impl Mailbox {
    pub fn new(
        store: MailboxStore,
        transport: Arc<dyn Transport>,
        my_id: Jid,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            my_id,
            timeout,
        }
    }

    pub fn store(&self) -> &MailboxStore {
        &self.store
    }

    /// Bind every mailbox protocol on the transport.
    pub fn start(&self) {
        let own_segment = self.transport.encode_peer(&self.transport.my_identity());

        self.transport
            .register_handler(PID_MAILBOX_PUT, blocking(self.store.clone(), handle_put));
        self.transport
            .register_handler(PID_MAILBOX_QUERY, blocking(self.store.clone(), handle_query));
        self.transport
            .register_handler(PID_MAILBOX_CLEAN, blocking(self.store.clone(), handle_clean));
        self.transport.register_handler(
            PID_MAILBOX_GROUP_UPDATE,
            blocking(self.store.clone(), move |store, inbound| {
                handle_group_update(store, &own_segment, inbound)
            }),
        );
        self.transport.register_handler(
            PID_MAILBOX_GROUP_MEMBER,
            blocking(self.store.clone(), handle_group_member),
        );

        info!(peer = %self.transport.my_identity(), "Mailbox service started");
    }

    /// Close the store. Handlers still bound fail from now on.
    pub fn stop(&self) -> Result<()> {
        self.store.close()?;
        Ok(())
    }

    // ---- Client calls ----

    async fn request(&self, target: &str, protocol: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        Ok(self
            .transport
            .request_with_timeout(target, protocol, payload, self.timeout)
            .await?)
    }

    /// Pending messages for `jid`, fetched from its mailbox.
    pub async fn query_msg(&self, jid: &Jid) -> Result<MessageBag> {
        let reply = self
            .request(jid.mail_id(), PID_MAILBOX_QUERY, jid.to_frame()?)
            .await?;
        Ok(MessageBag::from_frame(&reply)?)
    }

    pub async fn clean_msg(&self, jid: &Jid, ids: Vec<String>) -> Result<()> {
        let clean = CleanMsg {
            jid: jid.clone(),
            ids,
        };
        self.request(jid.mail_id(), PID_MAILBOX_CLEAN, clean.to_frame()?)
            .await?;
        Ok(())
    }

    /// Create or update a group on our own mailbox. A group without an id
    /// gets a fresh one homed there.
    pub async fn gen_group(&self, mut group: Group) -> Result<Group> {
        let home = self.my_id.mail_id();
        if home.is_empty() {
            return Err(ChatError::MailboxNotFound);
        }
        if group.id.is_empty() {
            group.id = new_gid(home);
        }

        let reply = self
            .request(home, PID_MAILBOX_GROUP_UPDATE, group.to_frame()?)
            .await?;
        let rsp = GroupRsp::from_frame(&reply)?;
        if !rsp.err.is_empty() {
            return Err(ChatError::Mailbox(rsp.err));
        }
        rsp.group
            .ok_or_else(|| ChatError::Mailbox("empty group response".into()))
    }

    /// Add or remove `members` of `gid` on the group's mailbox.
    pub async fn update_members(
        &self,
        gid: &Gid,
        action: MemberAction,
        members: Vec<GroupMember>,
    ) -> Result<()> {
        let req = GroupMemberReq {
            gid: gid.clone(),
            id: Jid::default(),
            action,
            members,
        };
        self.member_request(req).await.map(|_| ())
    }

    /// Walk the membership of `gid` starting at `start`; `From` walks
    /// toward newer members, `To` toward the owner.
    pub async fn query_members(
        &self,
        gid: &Gid,
        start: &Jid,
        action: MemberAction,
    ) -> Result<Vec<GroupMember>> {
        let req = GroupMemberReq {
            gid: gid.clone(),
            id: start.clone(),
            action,
            members: Vec::new(),
        };
        Ok(self.member_request(req).await?.members)
    }

    async fn member_request(&self, req: GroupMemberReq) -> Result<GroupMemberRsp> {
        let reply = self
            .request(req.gid.mail_id(), PID_MAILBOX_GROUP_MEMBER, req.to_frame()?)
            .await?;
        let rsp = GroupMemberRsp::from_frame(&reply)?;
        if !rsp.err.is_empty() {
            return Err(ChatError::Mailbox(rsp.err));
        }
        Ok(rsp)
    }
}

/// A group id whose peer segment comes from a throwaway key and whose
/// mailbox segment is `home`.
pub fn new_gid(home: &str) -> Gid {
    Jid::new(&fresh_peer_id().to_base58(), home)
}

/// Run a synchronous store handler on the blocking pool.
fn blocking<F>(store: MailboxStore, f: F) -> Handler
where
    F: Fn(&MailboxStore, Inbound) -> HandlerResult + Send + Sync + 'static,
{
    let f = Arc::new(f);
    handler_fn(move |inbound| {
        let store = store.clone();
        let f = Arc::clone(&f);
        async move {
            tokio::task::spawn_blocking(move || f(&store, inbound))
                .await
                .unwrap_or_else(|e| Err(HandlerFailure::new(e)))
        }
    })
}

/// A failure whose reply is `body` framed, falling back to the bare error
/// if the body cannot be encoded.
fn fail_with<T: Frame>(body: &T, error: impl std::fmt::Display) -> HandlerFailure {
    match body.to_frame() {
        Ok(frame) => HandlerFailure::with_reply(frame, error),
        Err(_) => HandlerFailure::new(error),
    }
}

pub(crate) fn handle_put(store: &MailboxStore, inbound: Inbound) -> HandlerResult {
    let msg = Message::from_frame(&inbound.payload)
        .map_err(|e| HandlerFailure::with_reply(e.to_string().into_bytes(), e))?;

    // Sender-to-mailbox bindings are not enforced yet; every sender is accepted.
    debug!(
        id = %msg.envelope.id,
        from = %msg.envelope.from,
        caller = %inbound.caller,
        "mailbox put accepted without binding check"
    );

    store
        .inbox()
        .put(&msg)
        .map_err(|e| HandlerFailure::with_reply(e.to_string().into_bytes(), e))?;
    Ok(SUCCESS.to_vec())
}

pub(crate) fn handle_query(store: &MailboxStore, inbound: Inbound) -> HandlerResult {
    let empty = MessageBag::default();
    let jid = Jid::from_frame(&inbound.payload).map_err(|e| fail_with(&empty, e))?;
    let bag = store.inbox().query(&jid).map_err(|e| fail_with(&empty, e))?;

    debug!(jid = %jid.short(), count = bag.len(), "mailbox query");
    bag.to_frame().map_err(HandlerFailure::new)
}

pub(crate) fn handle_clean(store: &MailboxStore, inbound: Inbound) -> HandlerResult {
    let clean = CleanMsg::from_frame(&inbound.payload).map_err(HandlerFailure::new)?;
    match store.inbox().clean(&clean.jid, &clean.ids) {
        Ok(removed) => debug!(jid = %clean.jid.short(), removed, "mailbox clean"),
        Err(e) => warn!(jid = %clean.jid.short(), error = %e, "mailbox clean failed"),
    }
    Ok(SUCCESS.to_vec())
}

/// Create or update a group. The owner is always the caller: a supplied
/// owner jid is kept only when its peer segment is the caller's.
pub(crate) fn handle_group_update(
    store: &MailboxStore,
    own_segment: &str,
    inbound: Inbound,
) -> HandlerResult {
    let mut group = Group::from_frame(&inbound.payload)
        .map_err(|e| fail_with(&GroupRsp::err(&e), e))?;
    if group.id.is_empty() {
        group.id = new_gid(own_segment);
    }

    let caller = inbound.caller.to_base58();
    let groups = store.groups();

    let existing = groups
        .get_group(&group.id)
        .map_err(|e| fail_with(&GroupRsp::err(&e), e))?;
    if let Some(existing) = existing {
        let owner_peer = existing.owner.as_ref().map(|o| o.id.peer_id()).unwrap_or("");
        if owner_peer != caller {
            warn!(gid = %group.id, caller = %caller, "group update by non-owner rejected");
            let err = "not group owner";
            return Err(fail_with(&GroupRsp::err(err), err));
        }
    }

    let (owner_id, owner_name) = match group.owner.take() {
        Some(owner) if owner.id.peer_id() == caller => (owner.id, owner.name),
        Some(owner) => (Jid::from(caller.clone()), owner.name),
        None => (Jid::from(caller.clone()), String::new()),
    };
    group.owner = Some(GroupMember::new(owner_id, owner_name, group.id.clone()));

    let saved = groups
        .save_group(&group)
        .map_err(|e| fail_with(&GroupRsp::err(&e), e))?;

    info!(gid = %saved.id, owner = %caller, "group saved");
    GroupRsp::ok(saved).to_frame().map_err(HandlerFailure::new)
}

pub(crate) fn handle_group_member(store: &MailboxStore, inbound: Inbound) -> HandlerResult {
    let req = GroupMemberReq::from_frame(&inbound.payload).map_err(|e| {
        let rsp = GroupMemberRsp {
            err: e.to_string(),
            ..Default::default()
        };
        fail_with(&rsp, e)
    })?;

    let mut rsp = GroupMemberRsp {
        action: req.action.clone(),
        ..Default::default()
    };
    let groups = store.groups();

    match groups.has_group(&req.gid) {
        Ok(true) => {}
        Ok(false) => {
            rsp.err = "group not found".to_string();
            return Err(fail_with(&rsp, &rsp.err));
        }
        Err(e) => {
            rsp.err = e.to_string();
            return Err(fail_with(&rsp, e));
        }
    }

    match req.action {
        MemberAction::Add | MemberAction::Sub => {
            let mut first_err: Option<String> = None;
            for mut member in req.members {
                member.gid = req.gid.clone();
                member.action = req.action.clone();
                if let Err(e) = groups.handle_member(&member) {
                    warn!(
                        gid = %req.gid,
                        member = %member.id,
                        action = %req.action,
                        error = %e,
                        "membership change failed"
                    );
                    first_err.get_or_insert_with(|| e.to_string());
                }
            }
            if let Some(err) = first_err {
                rsp.err = err;
                return Err(fail_with(&rsp, &rsp.err));
            }
            rsp.result = String::from_utf8_lossy(SUCCESS).into_owned();
        }
        MemberAction::From | MemberAction::To => {
            match groups.query_members(&req.gid, &req.id, &req.action) {
                Ok(members) => rsp.members = members,
                Err(e) => {
                    rsp.err = e.to_string();
                    return Err(fail_with(&rsp, e));
                }
            }
        }
        _ => {
            rsp.err = "action not supported".to_string();
            return Err(fail_with(&rsp, &rsp.err));
        }
    }

    rsp.to_frame().map_err(HandlerFailure::new)
}
