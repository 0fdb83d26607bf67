//! Chat routing on top of a request/response transport: direct delivery
//! with mailbox fallback, the mailbox protocol itself, and group management.

pub mod config;
pub mod mailbox;
pub mod registry;
pub mod service;

mod error;

pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use mailbox::{new_gid, Mailbox};
pub use registry::{msg_handler, HandlerRegistry, MsgHandler};
pub use service::ChatService;
