/// Message format version stamped on every locally created message
pub const PROTOCOL_VSN: &str = "0.0.2";

/// libp2p identify protocol version
pub const IDENTIFY_VERSION: &str = "/postbox/1.0.0";

/// Width of one JID segment (a base58 secp256k1 peer id)
pub const SEGMENT_LEN: usize = 53;

/// Full width of a routable JID (peer segment + mailbox segment)
pub const JID_LEN: usize = SEGMENT_LEN * 2;

/// Envelope `ack` value: the receiver does not need to acknowledge
pub const NO_ACK: u8 = 0;

/// Envelope `ack` value: the receiver must acknowledge
pub const ACK: u8 = 1;

/// Fixed acknowledgment body written by handlers on success
pub const SUCCESS: &[u8] = b"success";

// ---------------------------------------------------------------------------
// Frame size caps (bytes of body, excluding the 4-byte length prefix)
// ---------------------------------------------------------------------------

/// A single chat message
pub const MAX_MESSAGE_FRAME: usize = 2048;

/// A JID sent as a mailbox query key
pub const MAX_JID_FRAME: usize = 128;

/// Group create/update request
pub const MAX_GROUP_FRAME: usize = 10 * MAX_MESSAGE_FRAME;

/// Group membership request
pub const MAX_MEMBER_REQ_FRAME: usize = 4096;

/// Bulk delete instruction
pub const MAX_CLEAN_FRAME: usize = 2 * 1024 * 1024;

/// Responses and persisted records that can grow with the data set
pub const MAX_BULK_FRAME: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Wire protocol ids
// ---------------------------------------------------------------------------

pub const PID_NORMAL: &str = "/chat/normal/0.0.1";
pub const PID_GROUP: &str = "/chat/group/0.0.1";
pub const PID_MAILBOX_PUT: &str = "/chat/mailbox/put/0.0.1";
pub const PID_MAILBOX_QUERY: &str = "/chat/mailbox/query/0.0.1";
pub const PID_MAILBOX_CLEAN: &str = "/chat/mailbox/clean/0.0.1";
pub const PID_MAILBOX_GROUP_UPDATE: &str = "/chat/mailbox/group/update/0.0.1";
pub const PID_MAILBOX_GROUP_MEMBER: &str = "/chat/mailbox/group/member/0.0.1";

/// Reserved, no handler is bound to it
pub const PID_MAILBOX_GROUP_DROP: &str = "/chat/mailbox/group/drop/0.0.1";

/// Reserved, no handler is bound to it
pub const PID_MAILBOX_GROUP_MSG: &str = "/chat/mailbox/group/msg/0.0.1";

// ---------------------------------------------------------------------------
// Runtime defaults
// ---------------------------------------------------------------------------

/// Timeout for each outbound request (direct or mailbox)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Capacity of the inbound message queue
pub const INBOUND_QUEUE_CAPACITY: usize = 128;

/// Upper bound on concurrently running message handler tasks
pub const MAX_INFLIGHT_HANDLERS: usize = 256;

/// Default QUIC listen port
pub const DEFAULT_QUIC_PORT: u16 = 4001;

/// Default JSON-RPC gateway port
pub const DEFAULT_RPC_PORT: u16 = 8080;
