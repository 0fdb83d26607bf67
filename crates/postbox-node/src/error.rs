use thiserror::Error;

/// Errors reported to RPC clients. Each variant carries the numeric code
/// clients match on.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("error token , please relogin .")]
    BadToken,

    #[error("auth_fail")]
    AuthFailed,

    #[error("method_not_support")]
    MethodNotSupported,

    /// `sendmsg` failed, either on its params or on delivery.
    #[error("{0}")]
    Send(String),

    /// A namespaced service method failed.
    #[error("{message}")]
    Service { code: u32, message: String },
}

impl NodeError {
    pub fn service(code: u32, message: impl std::fmt::Display) -> Self {
        NodeError::Service {
            code,
            message: message.to_string(),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            NodeError::BadToken => 1001,
            NodeError::AuthFailed => 1002,
            NodeError::MethodNotSupported | NodeError::Send(_) => 1003,
            NodeError::Service { code, .. } => *code,
        }
    }
}
