//! `user_*` methods: a local address book of contacts and groups.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use postbox_shared::{Frame, Gid, Jid};
use postbox_store::{KvStore, StoreError, Table};

use crate::error::NodeError;
use crate::rpc::{decode_param, rpc_fn, Api, Req, Rsp, Service};

/// File name of the address book inside the node's home directory.
pub const USER_DB_FILE: &str = "user.db";

const MAX_USER_FRAME: usize = 1024 * 1024;

/// A contact or, when `gid` is set, a group entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub name: String,
    pub icon: Vec<u8>,
    pub comment: String,
    pub id: Jid,
    pub age: i64,
    pub gender: i64,
    pub gid: Gid,
    pub lastlog: String,
}

impl User {
    /// Contacts are keyed by peer segment, groups by gid.
    fn key(&self) -> Option<&str> {
        if !self.id.is_empty() {
            return Some(match self.id.peer_id() {
                "" => self.id.as_str(),
                peer => peer,
            });
        }
        if !self.gid.is_empty() {
            return Some(self.gid.as_str());
        }
        None
    }
}

impl Frame for User {
    const MAX_FRAME: usize = MAX_USER_FRAME;
}

pub struct UserService {
    kv: Arc<KvStore>,
    users: Table,
}

impl UserService {
    /// Open `<homedir>/user.db`.
    pub fn open(homedir: &Path) -> Result<Self, StoreError> {
        let kv = KvStore::open_at(&homedir.join(USER_DB_FILE))?;
        Ok(Self::from_kv(Arc::new(kv)))
    }

    pub fn from_kv(kv: Arc<KvStore>) -> Self {
        Self {
            users: Table::new(Arc::clone(&kv), "user/"),
            kv,
        }
    }

    /// Close the address book. Idempotent; later calls fail.
    pub fn close(&self) -> Result<(), StoreError> {
        self.kv.close()
    }

    /// Run `f` on the blocking pool; failures carry `code`.
    async fn blocking<T, F>(self: Arc<Self>, code: u32, f: F) -> Result<T, NodeError>
    where
        T: Send + 'static,
        F: FnOnce(&Table) -> Result<T, StoreError> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || f(&self.users))
            .await
            .map_err(|e| NodeError::service(code, e))?
            .map_err(|e| NodeError::service(code, e))
    }

    async fn put(self: Arc<Self>, req: Req) -> Result<Value, NodeError> {
        let param = req
            .params
            .first()
            .ok_or_else(|| NodeError::service(10000, "user not nil"))?;
        let user: User = decode_param(param).map_err(|e| NodeError::service(10001, e))?;
        let key = user
            .key()
            .ok_or_else(|| NodeError::service(10002, "userid / groupid not nil"))?
            .to_string();

        debug!(key = %key, "user put");
        self.blocking(10003, move |users| users.put_frame(&key, &user)).await?;
        Ok(json!("success"))
    }

    async fn get(self: Arc<Self>, req: Req) -> Result<Value, NodeError> {
        let key = req
            .str_param(0)
            .ok_or_else(|| NodeError::service(20001, "userid / groupid not nil"))?
            .to_string();

        let user = self
            .blocking(20002, move |users| users.get_frame::<User>(&key))
            .await?
            .ok_or_else(|| NodeError::service(20002, "not found"))?;
        user.to_json_value().map_err(|e| NodeError::service(20002, e))
    }

    async fn del(self: Arc<Self>, req: Req) -> Result<Value, NodeError> {
        let key = req
            .str_param(0)
            .ok_or_else(|| NodeError::service(30001, "userid / groupid not nil"))?
            .to_string();

        self.blocking(30002, move |users| users.delete(&key)).await?;
        Ok(json!("success"))
    }

    /// Every entry; undecodable records are skipped.
    async fn query(self: Arc<Self>) -> Result<Value, NodeError> {
        let entries = self.blocking(40001, |users| users.entries()).await?;

        let users = entries
            .iter()
            .filter_map(|(_, value)| User::from_frame(value).ok())
            .filter_map(|user| user.to_json_value().ok())
            .collect();
        Ok(Value::Array(users))
    }
}

impl Service for UserService {
    fn apis(self: Arc<Self>) -> Api {
        let put = Arc::clone(&self);
        let get = Arc::clone(&self);
        let del = Arc::clone(&self);
        let query = self;

        Api {
            namespace: "user",
            methods: vec![
                (
                    "put",
                    rpc_fn(move |req: Req| {
                        let svc = Arc::clone(&put);
                        async move {
                            let id = req.id.clone();
                            Rsp::from_result(id, svc.put(req).await)
                        }
                    }),
                ),
                (
                    "get",
                    rpc_fn(move |req: Req| {
                        let svc = Arc::clone(&get);
                        async move {
                            let id = req.id.clone();
                            Rsp::from_result(id, svc.get(req).await)
                        }
                    }),
                ),
                (
                    "del",
                    rpc_fn(move |req: Req| {
                        let svc = Arc::clone(&del);
                        async move {
                            let id = req.id.clone();
                            Rsp::from_result(id, svc.del(req).await)
                        }
                    }),
                ),
                (
                    "query",
                    rpc_fn(move |req: Req| {
                        let svc = Arc::clone(&query);
                        async move { Rsp::from_result(req.id, svc.query().await) }
                    }),
                ),
            ],
        }
    }
}
