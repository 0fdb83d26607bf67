use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Method,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use postbox_chat::{msg_handler, ChatService};
use postbox_shared::constants::INBOUND_QUEUE_CAPACITY;
use postbox_shared::{Attr, Frame, Message};

use crate::rpc::{Gateway, Req, Rsp};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub chat: ChatService,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/rpc", post(rpc))
        .route("/chat", get(chat_socket))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A body that does not parse is treated as an empty request, which the
/// gateway rejects for lack of a token.
async fn rpc(State(state): State<AppState>, body: Bytes) -> Json<Rsp> {
    let req = serde_json::from_slice::<Req>(&body).unwrap_or_else(|e| {
        debug!(error = %e, "malformed rpc body");
        Req::default()
    });
    Json(state.gateway.handle(req).await)
}

async fn chat_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_messages(socket, state))
}

type WsSink = SplitSink<WebSocket, WsMessage>;

/// The first frame must be a `Req` carrying a valid token. After the
/// acknowledgment, pending mailbox messages are pushed and cleaned, then
/// live messages are forwarded until the socket closes.
async fn stream_messages(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let req = match stream.next().await {
        Some(Ok(WsMessage::Text(text))) => serde_json::from_str::<Req>(&text).unwrap_or_default(),
        _ => return,
    };

    if !state.gateway.tokens().is_valid(&req.token).await {
        warn!(method = %req.method, "websocket rejected: bad token");
        let notice = notice(&req.method, "error", "error_token");
        let _ = send(&mut sink, &notice).await;
        let _ = sink.close().await;
        return;
    }
    if send(&mut sink, &notice(&req.method, "result", "success")).await.is_err() {
        return;
    }
    info!("websocket client attached");

    if !push_backlog(&state.chat, &mut sink).await {
        return;
    }

    let (tx, mut rx) = mpsc::channel::<Message>(INBOUND_QUEUE_CAPACITY);
    let handler_id = state.chat.append_handler(msg_handler(move |msg| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(msg).await;
        }
    }));

    loop {
        tokio::select! {
            Some(msg) = rx.recv() => {
                if send(&mut sink, &msg).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => debug!(text = %text, "websocket input ignored"),
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.chat.drop_handler(&handler_id);
    info!("websocket client detached");
}

/// Push everything waiting in our mailbox and clean what was delivered.
/// Returns `false` once the socket is gone.
async fn push_backlog(chat: &ChatService, sink: &mut WsSink) -> bool {
    let bag = match chat.query_msg().await {
        Ok(bag) => bag,
        Err(e) => {
            warn!(error = %e, "mailbox query failed");
            return true;
        }
    };

    let mut delivered = Vec::with_capacity(bag.len());
    let mut open = true;
    for msg in &bag.messages {
        if send(sink, msg).await.is_err() {
            open = false;
            break;
        }
        delivered.push(msg.envelope.id.clone());
    }

    let count = delivered.len();
    if let Err(e) = chat.clean_msg(delivered).await {
        warn!(error = %e, "mailbox clean failed");
    } else if count > 0 {
        debug!(count, "mailbox backlog delivered");
    }
    open
}

fn notice(method: &str, key: &str, val: &str) -> Message {
    Message::new_sys(None, vec![Attr::new("method", method), Attr::new(key, val)])
}

async fn send(sink: &mut WsSink, msg: &Message) -> Result<(), axum::Error> {
    let text = msg
        .to_json()
        .ok()
        .and_then(|json| String::from_utf8(json).ok())
        .unwrap_or_default();
    sink.send(WsMessage::Text(text)).await
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting JSON-RPC gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
