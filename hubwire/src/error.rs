use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    InvalidArgument,
    SerializeFailed,
    DeserializeFailed,
    SerdeJsonError,
    /// A hub name is already registered on the router.
    DuplicateName,
    /// A service or interface cannot be registered as declared.
    Configuration,
    NoSuchHub,
    NoSuchMethod,
    ArgumentCountMismatch,
    /// The remote side reported a failure; `msg` carries its message.
    Remote,
    /// The router was disposed while the call was pending.
    RouterDisposed,
    TransportClosed,
    TransportSendFailed,
    TcpConnectFailed,
    TcpBindFailed,
    TcpSendMsgFailed,
    TcpRecvMsgFailed,
    TcpParseMsgFailed,
    WebSocketConnectFailed,
    WebSocketAcceptFailed,
    WebSocketSendFailed,
    WebSocketRecvFailed,
    WebSocketClosed,
    #[serde(untagged)]
    Unknown(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
    /// Stack trace reported by the peer for [`ErrorKind::Remote`] failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_trace: Option<String>,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self {
            kind,
            msg,
            remote_trace: None,
        }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self::new(kind, String::default())
    }

    /// Builds the failure a caller observes when the peer answered with an error.
    #[must_use]
    pub fn remote(msg: String, remote_trace: Option<String>) -> Self {
        Self {
            kind: ErrorKind::Remote,
            msg,
            remote_trace,
        }
    }

    /// The text put on the wire when this error answers a request.
    #[must_use]
    pub fn wire_message(&self) -> String {
        if self.msg.is_empty() {
            format!("{:?}", self.kind)
        } else {
            self.msg.clone()
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self::new(ErrorKind::InvalidArgument, value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::new(ErrorKind::SerdeJsonError, value.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(value: rmp_serde::encode::Error) -> Self {
        Self::new(ErrorKind::SerializeFailed, value.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(value: rmp_serde::decode::Error) -> Self {
        Self::new(ErrorKind::DeserializeFailed, value.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
