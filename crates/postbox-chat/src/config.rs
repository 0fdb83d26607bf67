use std::time::Duration;

use postbox_shared::constants::{
    DEFAULT_REQUEST_TIMEOUT_SECS, INBOUND_QUEUE_CAPACITY, MAX_INFLIGHT_HANDLERS,
};

/// Runtime knobs of a [`crate::ChatService`].
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Messages accepted but not yet dispatched.
    pub queue_capacity: usize,
    /// Applied separately to the direct attempt and the mailbox fallback.
    pub request_timeout: Duration,
    /// Handler tasks allowed to run at once across all messages.
    pub max_inflight_handlers: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            queue_capacity: INBOUND_QUEUE_CAPACITY,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_inflight_handlers: MAX_INFLIGHT_HANDLERS,
        }
    }
}
