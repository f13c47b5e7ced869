//! RPC-specific error taxonomy (spec.md §7, RPC row).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("service {0:?} is not served by this channel")]
    NoSuchService(String),

    #[error("method {0:?} was not found on service {1:?}")]
    NoSuchMethod(String, String),

    #[error("request carried neither a service name nor a method name")]
    EmptyRequest,

    #[error("request's method could not be determined from its payload")]
    MethodUndetermined,

    #[error("frame decode failed: {0}")]
    DecodeFail(String),

    #[error("frame encode failed: {0}")]
    EncodeFail(String),

    #[error("method handler panicked: {0}")]
    ThrowInMethod(String),

    #[error("connection was reset with requests still pending")]
    ConnectionLost,

    #[error("peer refused the connection")]
    ConnectRefused,

    #[error("no endpoint is available for this service")]
    NoAvailableEndpoint,

    #[error("request timed out waiting for a response")]
    Timeout,

    #[error("remote returned error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error(transparent)]
    Core(#[from] crate::error::CoreError),
}

impl RpcError {
    /// Maps a recoverable error to the `{code, message}` pair carried on
    /// the wire in a `Response.error` (spec.md §4.10, "error surface").
    /// Fatal variants never reach this — the caller closes the connection
    /// instead of encoding a response.
    pub(crate) fn wire_code(&self) -> i32 {
        match self {
            RpcError::NoSuchService(_) => 1,
            RpcError::NoSuchMethod(..) => 2,
            RpcError::EmptyRequest => 3,
            RpcError::ThrowInMethod(_) => 4,
            _ => 99,
        }
    }

    /// `true` for errors that keep the connection open (the server
    /// replies with a framed error response); `false` for errors that
    /// close it.
    pub(crate) fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RpcError::NoSuchService(_) | RpcError::NoSuchMethod(..) | RpcError::EmptyRequest | RpcError::ThrowInMethod(_)
        )
    }
}
