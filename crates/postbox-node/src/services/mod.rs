//! RPC services exposed by the gateway.

pub mod chat;
pub mod group;
pub mod user;

use std::sync::Arc;

use postbox_chat::ChatService;

use crate::rpc::RpcRegistry;

use self::user::UserService;

/// Build the method registry: the top-level chat methods plus the `user`
/// and `group` namespaces. The caller keeps `users` to close it on shutdown.
pub fn build_registry(chat: &ChatService, users: Arc<UserService>) -> RpcRegistry {
    let mut registry = RpcRegistry::new();
    chat::register(&mut registry, chat);
    registry.register_service(users);
    registry.register_service(Arc::new(group::GroupService::new(chat.clone())));
    registry
}
