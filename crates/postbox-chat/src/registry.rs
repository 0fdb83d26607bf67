//! Message handler registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use uuid::Uuid;

use postbox_shared::Message;

/// Callback invoked once per delivered message.
pub type MsgHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`MsgHandler`].
pub fn msg_handler<F, Fut>(f: F) -> MsgHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(f(msg)))
}

/// Handlers keyed by an opaque registration id.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<String, MsgHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`; the returned id removes it again.
    pub fn append(&self, handler: MsgHandler) -> String {
        let id = Uuid::new_v4().to_string();
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), handler);
        id
    }

    /// Remove a registration. Unknown ids are ignored.
    pub fn drop_handler(&self, id: &str) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    /// Handlers registered right now. The lock is not held by callers
    /// while they run the handlers.
    pub fn snapshot(&self) -> Vec<MsgHandler> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
