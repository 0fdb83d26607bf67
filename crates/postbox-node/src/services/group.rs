//! `group_*` methods, proxied to the group's mailbox.

use std::sync::Arc;

use serde_json::{json, Value};

use postbox_chat::ChatService;
use postbox_shared::{Frame, Group, GroupMember, Jid, MemberAction};

use crate::error::NodeError;
use crate::rpc::{decode_param, rpc_fn, Api, Req, Rsp, Service};

pub struct GroupService {
    chat: ChatService,
}

impl GroupService {
    pub fn new(chat: ChatService) -> Self {
        Self { chat }
    }

    /// `group_create [group]`: create, or update when the group has an id.
    async fn create(&self, req: &Req) -> Result<Value, NodeError> {
        let param = req
            .params
            .first()
            .ok_or_else(|| NodeError::service(10000, "group not nil"))?;
        let group: Group = decode_param(param).map_err(|e| NodeError::service(10001, e))?;

        let group = self
            .chat
            .create_group(group)
            .await
            .map_err(|e| NodeError::service(10001, e))?;
        group.to_json_value().map_err(|e| NodeError::service(10001, e))
    }

    /// `group_members [gid, start, action?]`: walk the membership from
    /// `start`, toward newer members (`f`, the default) or older (`t`).
    async fn members(&self, req: &Req) -> Result<Value, NodeError> {
        let missing = || NodeError::service(20001, "groupid / memberid not nil");
        let gid = Jid::from(req.str_param(0).ok_or_else(missing)?);
        let start = Jid::from(req.str_param(1).ok_or_else(missing)?);
        let action = req
            .str_param(2)
            .map(|s| MemberAction::from(s.to_string()))
            .unwrap_or(MemberAction::From);

        let members = self
            .chat
            .query_members(&gid, &start, action)
            .await
            .map_err(|e| NodeError::service(20002, e))?;
        members_json(&members).map_err(|e| NodeError::service(20002, e))
    }

    /// `group_update [gid, action, members]`: add (`+`) or remove (`-`)
    /// members.
    async fn update(&self, req: &Req) -> Result<Value, NodeError> {
        let missing = || NodeError::service(30001, "groupid / action / members not nil");
        let gid = Jid::from(req.str_param(0).ok_or_else(missing)?);
        let action = MemberAction::from(req.str_param(1).ok_or_else(missing)?.to_string());
        let members: Vec<GroupMember> = decode_param(req.params.get(2).ok_or_else(missing)?)
            .map_err(|e| NodeError::service(30001, e))?;

        self.chat
            .update_members(&gid, action, members)
            .await
            .map_err(|e| NodeError::service(30002, e))?;
        Ok(json!("success"))
    }
}

fn members_json(members: &[GroupMember]) -> Result<Value, postbox_shared::CodecError> {
    members
        .iter()
        .map(|m| m.to_json_value())
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

impl Service for GroupService {
    fn apis(self: Arc<Self>) -> Api {
        let create = Arc::clone(&self);
        let members = Arc::clone(&self);
        let update = self;

        Api {
            namespace: "group",
            methods: vec![
                (
                    "create",
                    rpc_fn(move |req: Req| {
                        let svc = Arc::clone(&create);
                        async move { Rsp::from_result(req.id.clone(), svc.create(&req).await) }
                    }),
                ),
                (
                    "members",
                    rpc_fn(move |req: Req| {
                        let svc = Arc::clone(&members);
                        async move { Rsp::from_result(req.id.clone(), svc.members(&req).await) }
                    }),
                ),
                (
                    "update",
                    rpc_fn(move |req: Req| {
                        let svc = Arc::clone(&update);
                        async move { Rsp::from_result(req.id.clone(), svc.update(&req).await) }
                    }),
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use postbox_chat::ChatConfig;
    use postbox_net::{fresh_peer_id, MemoryNetwork, Transport};
    use postbox_store::MailboxStore;

    use super::*;
    use crate::rpc::RpcRegistry;

    fn node(network: &MemoryNetwork) -> ChatService {
        let transport = network.join();
        let seg = transport.my_identity().to_base58();
        let chat = ChatService::with_store(
            Jid::new(&seg, &seg),
            Path::new("."),
            transport,
            MailboxStore::in_memory().unwrap(),
            ChatConfig {
                request_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );
        chat.start().unwrap();
        chat
    }

    async fn call(registry: &RpcRegistry, method: &str, params: Vec<Value>) -> Rsp {
        let req = Req {
            id: "g".into(),
            method: method.into(),
            params,
            ..Default::default()
        };
        registry.lookup(method).unwrap()(req).await
    }

    fn ids(value: &Value) -> Vec<String> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn create_update_and_walk() {
        let network = MemoryNetwork::new();
        let chat = node(&network);
        let mut registry = RpcRegistry::new();
        registry.register_service(Arc::new(GroupService::new(chat.clone())));

        let rsp = call(&registry, "group_create", vec![json!({"name": "team"})]).await;
        let group = rsp.result.unwrap();
        let gid = group["id"].as_str().unwrap().to_string();
        let owner = group["owner"]["id"].as_str().unwrap().to_string();
        assert_eq!(group["name"], "team");
        assert_eq!(owner, chat.my_id().peer_id());
        assert!(!group["lastlog"].as_str().unwrap().is_empty());

        let member = Jid::new(&fresh_peer_id().to_base58(), chat.my_id().mail_id()).to_string();
        let members = json!([{"id": member, "name": "mia"}]);
        let rsp = call(&registry, "group_update", vec![json!(gid), json!("+"), members]).await;
        assert_eq!(rsp.result, Some(json!("success")));

        let rsp = call(&registry, "group_members", vec![json!(gid), json!(owner)]).await;
        assert_eq!(ids(&rsp.result.unwrap()), vec![owner.clone(), member.clone()]);

        let rsp = call(&registry, "group_members", vec![json!(gid), json!(member), json!("t")]).await;
        assert_eq!(ids(&rsp.result.unwrap()), vec![member.clone(), owner.clone()]);

        let members = json!([{"id": member}]).to_string();
        let rsp = call(&registry, "group_update", vec![json!(gid), json!("-"), json!(members)]).await;
        assert!(rsp.error.is_none());

        let rsp = call(&registry, "group_members", vec![json!(gid), json!(owner)]).await;
        assert_eq!(ids(&rsp.result.unwrap()), vec![owner]);
    }

    #[tokio::test]
    async fn error_codes() {
        let network = MemoryNetwork::new();
        let chat = node(&network);
        let mut registry = RpcRegistry::new();
        registry.register_service(Arc::new(GroupService::new(chat.clone())));

        let code = |rsp: Rsp| rsp.error.unwrap().code;
        assert_eq!(code(call(&registry, "group_create", vec![]).await), "10000");
        assert_eq!(code(call(&registry, "group_create", vec![json!("{")]).await), "10001");
        assert_eq!(code(call(&registry, "group_members", vec![]).await), "20001");

        let unknown = Jid::new(&fresh_peer_id().to_base58(), chat.my_id().mail_id()).to_string();
        let rsp = call(&registry, "group_members", vec![json!(unknown), json!(unknown)]).await;
        let err = rsp.error.unwrap();
        assert_eq!(err.code, "20002");
        assert!(err.message.contains("group not found"));

        assert_eq!(code(call(&registry, "group_update", vec![json!(unknown)]).await), "30001");
        let rsp = call(&registry, "group_update", vec![json!(unknown), json!("+"), json!([])]).await;
        assert_eq!(code(rsp), "30002");
    }
}
