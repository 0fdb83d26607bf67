//! JSON-RPC plumbing: request/response types, the method registry, token
//! issuance and the dispatcher the HTTP and WebSocket endpoints share.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::NodeError;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Req {
    #[serde(default, deserialize_with = "id_string", skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
}

impl Req {
    /// Positional string parameter.
    pub fn str_param(&self, index: usize) -> Option<&str> {
        self.params.get(index).and_then(Value::as_str)
    }
}

/// Clients send ids as strings or numbers; both are echoed back as strings.
fn id_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RspError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rsp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RspError>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

impl Rsp {
    pub fn ok(id: impl Into<String>, result: impl Into<Value>) -> Self {
        Self {
            result: Some(result.into()),
            error: None,
            id: id.into(),
        }
    }

    pub fn err(id: impl Into<String>, err: &NodeError) -> Self {
        Self {
            result: None,
            error: Some(RspError {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
            id: id.into(),
        }
    }

    /// `Ok` becomes a result, `Err` an error response.
    pub fn from_result(id: impl Into<String>, result: Result<Value, NodeError>) -> Self {
        match result {
            Ok(value) => Self::ok(id, value),
            Err(e) => Self::err(id, &e),
        }
    }
}

/// Decode a parameter that is either an embedded JSON document or a JSON
/// object.
pub fn decode_param<T: DeserializeOwned>(value: &Value) -> serde_json::Result<T> {
    match value {
        Value::String(text) => serde_json::from_str(text),
        other => T::deserialize(other),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// An RPC method implementation.
pub type RpcFn = Arc<dyn Fn(Req) -> BoxFuture<'static, Rsp> + Send + Sync>;

/// Wrap an async closure as an [`RpcFn`].
pub fn rpc_fn<F, Fut>(f: F) -> RpcFn
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Rsp> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// The methods a service exposes under its namespace.
pub struct Api {
    pub namespace: &'static str,
    pub methods: Vec<(&'static str, RpcFn)>,
}

/// A group of RPC methods reachable as `<namespace>_<method>`.
pub trait Service: Send + Sync {
    fn apis(self: Arc<Self>) -> Api;
}

/// Top-level methods plus namespaced services, built once at startup.
#[derive(Default)]
pub struct RpcRegistry {
    methods: HashMap<String, RpcFn>,
    services: HashMap<String, HashMap<String, RpcFn>>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_fn(&mut self, name: &str, f: RpcFn) {
        self.methods.insert(name.to_string(), f);
    }

    pub fn register_service<S: Service + 'static>(&mut self, service: Arc<S>) {
        let api = service.apis();
        let methods = api
            .methods
            .into_iter()
            .map(|(name, f)| (name.to_string(), f))
            .collect();
        self.services.insert(api.namespace.to_string(), methods);
    }

    /// Resolve a top-level name, or `<namespace>_<method>`.
    pub fn lookup(&self, method: &str) -> Option<RpcFn> {
        if let Some(f) = self.methods.get(method) {
            return Some(Arc::clone(f));
        }

        let mut parts = method.split('_');
        let (Some(ns), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        self.services.get(ns)?.get(name).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// Session tokens handed out by `auth`, each valid for a fixed window.
pub struct TokenStore {
    ttl: chrono::Duration,
    issued: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36500)),
            issued: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a fresh random token.
    pub async fn issue(&self) -> String {
        let now = Utc::now();
        let mut entropy = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut entropy);

        let mut hasher = blake3::Hasher::new();
        hasher.update(&entropy);
        hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
        let token = hex::encode(hasher.finalize().as_bytes());

        self.issued.write().await.insert(token.clone(), now);
        token
    }

    pub async fn is_valid(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        self.issued
            .read()
            .await
            .get(token)
            .map(|issued| self.is_fresh(*issued))
            .unwrap_or(false)
    }

    /// Drop expired tokens, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut issued = self.issued.write().await;
        let before = issued.len();
        issued.retain(|_, at| self.is_fresh(*at));
        before - issued.len()
    }

    fn is_fresh(&self, issued: DateTime<Utc>) -> bool {
        match issued.checked_add_signed(self.ttl) {
            Some(expiry) => Utc::now() < expiry,
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Authenticates requests and routes them to registered methods.
pub struct Gateway {
    registry: RpcRegistry,
    tokens: TokenStore,
    password: Option<String>,
}

impl Gateway {
    pub fn new(registry: RpcRegistry, tokens: TokenStore, password: Option<String>) -> Self {
        Self {
            registry,
            tokens,
            password,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub async fn handle(&self, req: Req) -> Rsp {
        debug!(id = %req.id, method = %req.method, "rpc request");

        if req.method == "auth" {
            return self.auth(&req).await;
        }
        if !self.tokens.is_valid(&req.token).await {
            return Rsp::err(req.id, &NodeError::BadToken);
        }

        match self.registry.lookup(&req.method) {
            Some(f) => f(req).await,
            None => {
                debug!(method = %req.method, "unknown rpc method");
                Rsp::err(req.id, &NodeError::MethodNotSupported)
            }
        }
    }

    async fn auth(&self, req: &Req) -> Rsp {
        let accepted = match &self.password {
            None => true,
            Some(pwd) => req.params.len() == 1 && req.str_param(0) == Some(pwd.as_str()),
        };
        if !accepted {
            warn!(id = %req.id, "rpc auth rejected");
            return Rsp::err(req.id.clone(), &NodeError::AuthFailed);
        }

        let token = self.tokens.issue().await;
        info!(id = %req.id, "rpc token issued");
        Rsp::ok(req.id.clone(), token)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn echo() -> RpcFn {
        rpc_fn(|req: Req| async move { Rsp::ok(req.id, req.method) })
    }

    struct Demo;

    impl Service for Demo {
        fn apis(self: Arc<Self>) -> Api {
            Api {
                namespace: "demo",
                methods: vec![("ping", echo())],
            }
        }
    }

    fn gateway(password: Option<&str>) -> Gateway {
        let mut registry = RpcRegistry::new();
        registry.register_fn("myid", echo());
        registry.register_service(Arc::new(Demo));
        Gateway::new(
            registry,
            TokenStore::new(Duration::from_secs(60)),
            password.map(str::to_string),
        )
    }

    fn req(method: &str, token: &str, params: Vec<Value>) -> Req {
        Req {
            id: "1".into(),
            token: token.into(),
            method: method.into(),
            params,
        }
    }

    async fn login(gw: &Gateway, params: Vec<Value>) -> Rsp {
        gw.handle(req("auth", "", params)).await
    }

    #[test]
    fn req_accepts_numeric_ids() {
        let req: Req = serde_json::from_value(json!({"id": 7, "method": "myid"})).unwrap();
        assert_eq!(req.id, "7");
        assert!(req.token.is_empty());
        assert!(req.params.is_empty());
    }

    #[test]
    fn rsp_omits_empty_fields() {
        let ok = serde_json::to_value(Rsp::ok("1", "x")).unwrap();
        assert_eq!(ok, json!({"result": "x", "id": "1"}));

        let err = serde_json::to_value(Rsp::err("", &NodeError::BadToken)).unwrap();
        assert_eq!(err["error"]["code"], "1001");
        assert!(err.get("id").is_none());
    }

    #[test]
    fn lookup_resolves_namespaces() {
        let mut registry = RpcRegistry::new();
        registry.register_fn("myid", echo());
        registry.register_service(Arc::new(Demo));

        assert!(registry.lookup("myid").is_some());
        assert!(registry.lookup("demo_ping").is_some());
        assert!(registry.lookup("demo_pong").is_none());
        assert!(registry.lookup("demo_ping_extra").is_none());
        assert!(registry.lookup("ping").is_none());
    }

    #[test]
    fn decode_param_accepts_text_and_objects() {
        #[derive(Deserialize)]
        struct Named {
            name: String,
        }

        let a: Named = decode_param(&json!({"name": "a"})).unwrap();
        let b: Named = decode_param(&json!("{\"name\":\"b\"}")).unwrap();
        assert_eq!((a.name.as_str(), b.name.as_str()), ("a", "b"));
        assert!(decode_param::<Named>(&json!("not json")).is_err());
    }

    #[tokio::test]
    async fn open_gateway_issues_tokens() {
        let gw = gateway(None);
        let rsp = login(&gw, vec![]).await;
        let token = rsp.result.unwrap().as_str().unwrap().to_string();
        assert_eq!(token.len(), 64);

        let rsp = gw.handle(req("demo_ping", &token, vec![])).await;
        assert_eq!(rsp.result, Some(json!("demo_ping")));
    }

    #[tokio::test]
    async fn password_is_checked() {
        let gw = gateway(Some("pw"));

        let rsp = login(&gw, vec![json!("wrong")]).await;
        assert_eq!(rsp.error.unwrap().code, "1002");
        let rsp = login(&gw, vec![]).await;
        assert_eq!(rsp.error.unwrap().code, "1002");

        let rsp = login(&gw, vec![json!("pw")]).await;
        assert!(rsp.error.is_none());
    }

    #[tokio::test]
    async fn calls_need_a_valid_token() {
        let gw = gateway(None);
        let rsp = gw.handle(req("myid", "forged", vec![])).await;
        assert_eq!(rsp.error.unwrap().code, "1001");

        let token = login(&gw, vec![]).await.result.unwrap();
        let token = token.as_str().unwrap();
        let rsp = gw.handle(req("nope", token, vec![])).await;
        let err = rsp.error.unwrap();
        assert_eq!(err.code, "1003");
        assert_eq!(err.message, "method_not_support");
    }

    #[tokio::test]
    async fn tokens_expire() {
        let tokens = TokenStore::new(Duration::from_millis(20));
        let token = tokens.issue().await;
        assert!(tokens.is_valid(&token).await);
        assert!(!tokens.is_valid("").await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!tokens.is_valid(&token).await);
        assert_eq!(tokens.purge_expired().await, 1);
    }
}
