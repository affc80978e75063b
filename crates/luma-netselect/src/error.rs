use crate::encoding::EncodingError;
use thiserror::Error;

/// Errors produced by the select fan-out layer.
#[derive(Error, Debug)]
pub enum SelectError {
    #[error("unsupported protocol version for {path}: got {got:?}, want {want:?}")]
    ProtocolMismatch {
        path: &'static str,
        got: String,
        want: &'static str,
    },
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status code {status}; response body: {body:?}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("cannot compress {len} bytes: {source}")]
    Compress {
        len: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decompress {len} bytes: {source}")]
    Decompress {
        len: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode {what} #{index}: {source}")]
    Decode {
        what: &'static str,
        index: usize,
        #[source]
        source: EncodingError,
    },
    #[error("invalid data block: {0}")]
    InvalidBlock(String),
    #[error("bad request parameter {name:?}: {reason}")]
    BadParam { name: &'static str, reason: String },
    #[error("query engine error: {0}")]
    Engine(String),
    #[error("storage node {url}: {source}")]
    Node {
        url: String,
        #[source]
        source: Box<SelectError>,
    },
    #[error("operation canceled")]
    Canceled,
    #[error("client disconnected")]
    ClientDisconnected,
    #[error("coordinator is stopped")]
    Stopped,
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SelectError>;

impl SelectError {
    /// Attaches the storage node URL the error came from.
    pub fn at_node(self, url: &str) -> Self {
        match self {
            err @ SelectError::Node { .. } => err,
            err => SelectError::Node {
                url: url.to_string(),
                source: Box::new(err),
            },
        }
    }

    /// True when the error only reflects a cancellation issued by this layer
    /// or by the caller's stop signal.
    pub fn is_canceled(&self) -> bool {
        match self {
            SelectError::Canceled => true,
            SelectError::Node { source, .. } => source.is_canceled(),
            _ => false,
        }
    }

    /// True for errors that are not worth logging or counting, such as a
    /// client going away mid-response.
    pub fn is_trivial(&self) -> bool {
        match self {
            SelectError::ClientDisconnected => true,
            SelectError::Node { source, .. } => source.is_trivial(),
            _ => false,
        }
    }

    pub(crate) fn bad_param(name: &'static str, reason: impl Into<String>) -> Self {
        SelectError::BadParam {
            name,
            reason: reason.into(),
        }
    }
}
