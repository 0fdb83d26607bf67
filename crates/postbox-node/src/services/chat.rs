//! Top-level chat methods: `sendmsg`, `myid`, `conns`.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::debug;

use postbox_chat::ChatService;
use postbox_net::Transport;
use postbox_shared::{Jid, Message};

use crate::error::NodeError;
use crate::rpc::{rpc_fn, Req, Rsp, RpcRegistry};

pub fn register(registry: &mut RpcRegistry, chat: &ChatService) {
    let svc = chat.clone();
    registry.register_fn(
        "sendmsg",
        rpc_fn(move |req: Req| {
            let chat = svc.clone();
            async move {
                let result = send_msg(&chat, &req).await;
                Rsp::from_result(req.id, result)
            }
        }),
    );

    let svc = chat.clone();
    registry.register_fn(
        "myid",
        rpc_fn(move |req: Req| {
            let id = svc.my_id().to_string();
            async move { Rsp::ok(req.id, id) }
        }),
    );

    let svc = chat.clone();
    registry.register_fn(
        "conns",
        rpc_fn(move |req: Req| {
            let chat = svc.clone();
            async move { Rsp::ok(req.id, conns(&chat).await) }
        }),
    );
}

/// `sendmsg [to, word, word, ...]`: the words are joined with spaces into
/// the message content.
async fn send_msg(chat: &ChatService, req: &Req) -> Result<Value, NodeError> {
    let to = req
        .str_param(0)
        .ok_or_else(|| NodeError::Send("recipient not str".into()))?;
    let words = req
        .params
        .get(1..)
        .unwrap_or_default()
        .iter()
        .map(|v| v.as_str().ok_or_else(|| NodeError::Send("item not str".into())))
        .collect::<Result<Vec<_>, _>>()?;

    let msg = Message::new_normal(chat.my_id().clone(), Jid::from(to), words.join(" "), vec![]);
    chat.send_msg(&msg)
        .await
        .map_err(|e| NodeError::Send(e.to_string()))?;

    debug!(id = %msg.envelope.id, to = %to, "message sent over rpc");
    Ok(json!("success"))
}

/// `conns`: connected peers, direct ones as a list and relayed ones grouped
/// by the relay they come through.
async fn conns(chat: &ChatService) -> Value {
    let started = Instant::now();
    let connections = chat.transport().connections().await;

    let mut direct = Vec::new();
    let mut relay: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for info in &connections {
        let entry = json!({
            "id": info.peer_id.to_base58(),
            "addrs": [info.address.to_string()],
        });
        match info.relay() {
            Some(relay_id) => relay.entry(relay_id.to_base58()).or_default().push(entry),
            None => direct.push(entry),
        }
    }

    json!({
        "time_used": format!("{:?}", started.elapsed()),
        "total": connections.len(),
        "direct": direct,
        "relay": relay,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use postbox_chat::{msg_handler, ChatConfig};
    use postbox_net::{MemoryNetwork, Transport};
    use postbox_store::MailboxStore;

    use super::*;

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

    fn registry(chat: &ChatService) -> RpcRegistry {
        let mut registry = RpcRegistry::new();
        register(&mut registry, chat);
        registry
    }

    fn req(method: &str, params: Vec<Value>) -> Req {
        Req {
            id: "9".into(),
            method: method.into(),
            params,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn myid_and_conns() {
        let network = MemoryNetwork::new();
        let chat = node(&network);
        let other = node(&network);
        let registry = registry(&chat);

        let rsp = registry.lookup("myid").unwrap()(req("myid", vec![])).await;
        assert_eq!(rsp.result, Some(json!(chat.my_id().to_string())));

        let rsp = registry.lookup("conns").unwrap()(req("conns", vec![])).await;
        let conns = rsp.result.unwrap();
        assert_eq!(conns["total"], 1);
        let peer = &conns["direct"][0];
        let other_id = other.transport().my_identity().to_base58();
        assert_eq!(peer["id"], other_id);
        assert_eq!(peer["addrs"][0], format!("/p2p/{other_id}"));
        assert_eq!(conns["relay"], json!({}));
    }

    #[tokio::test]
    async fn sendmsg_joins_words() {
        let network = MemoryNetwork::new();
        let alice = node(&network);
        let bob = node(&network);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        bob.append_handler(msg_handler(move |msg| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
            }
        }));

        let registry = registry(&alice);
        let params = vec![json!(bob.my_id().to_string()), json!("hello"), json!("bob")];
        let rsp = registry.lookup("sendmsg").unwrap()(req("sendmsg", params)).await;
        assert_eq!(rsp.result, Some(json!("success")));

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.payload.content, "hello bob");
        assert_eq!(&got.envelope.from, alice.my_id());
    }

    #[tokio::test]
    async fn sendmsg_rejects_bad_params() {
        let network = MemoryNetwork::new();
        let chat = node(&network);
        let send = registry(&chat).lookup("sendmsg").unwrap();

        let rsp = send(req("sendmsg", vec![])).await;
        assert_eq!(rsp.error.unwrap().code, "1003");

        let params = vec![json!(chat.my_id().to_string()), json!(5)];
        let rsp = send(req("sendmsg", params)).await;
        let err = rsp.error.unwrap();
        assert_eq!(err.code, "1003");
        assert_eq!(err.message, "item not str");
    }
}
