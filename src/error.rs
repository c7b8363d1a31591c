//! Error taxonomy of the proxy.
//!
//! Protocol faults carry the HTTP status they are rendered with at the
//! connection boundary. Connection faults (`PeerClosed`, `OutputClosed`, `Io`)
//! have no status: they mean the socket itself is gone and the connection is
//! torn down instead of answered.

use thiserror::Error;

use crate::http::status::HttpStatus;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The client sent something that is not a usable proxy request.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    VersionNotSupported(String),

    #[error("{0}")]
    LengthRequired(String),

    /// The origin answered with something that cannot be relayed.
    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    GatewayTimeout(String),

    #[error("{0}")]
    Internal(String),

    /// The source stream ended while more data was expected.
    #[error("peer closed the stream")]
    PeerClosed,

    /// Writing to the sink failed.
    #[error("output stream closed")]
    OutputClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Status used when rendering this fault, `None` for connection faults.
    pub fn status(&self) -> Option<HttpStatus> {
        match self {
            ProxyError::BadRequest(_) => Some(HttpStatus::BadRequest),
            ProxyError::VersionNotSupported(_) => Some(HttpStatus::HttpVersionNotSupported),
            ProxyError::LengthRequired(_) => Some(HttpStatus::LengthRequired),
            ProxyError::BadGateway(_) => Some(HttpStatus::BadGateway),
            ProxyError::GatewayTimeout(_) => Some(HttpStatus::GatewayTimeout),
            ProxyError::Internal(_) => Some(HttpStatus::InternalServerError),
            ProxyError::PeerClosed | ProxyError::OutputClosed | ProxyError::Io(_) => None,
        }
    }

    pub fn is_connection_fault(&self) -> bool {
        self.status().is_none()
    }

    /// Rewrites faults raised while talking to the origin: a vanished or
    /// unreadable origin is a gateway problem, not a client disconnect.
    pub fn into_upstream_fault(self) -> ProxyError {
        match self {
            ProxyError::PeerClosed => {
                ProxyError::BadGateway("the origin server closed the connection prematurely".into())
            }
            ProxyError::OutputClosed => {
                ProxyError::BadGateway("the origin server stopped accepting data".into())
            }
            ProxyError::Io(err) => ProxyError::BadGateway(format!("origin connection failed: {err}")),
            other => other,
        }
    }
}

/// Which side of the proxy a message came from; decides how malformed input
/// is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the client: malformed input is a 400.
    Request,
    /// From the origin: malformed input is a 502.
    Response,
}

impl Direction {
    pub fn fault(self, msg: impl Into<String>) -> ProxyError {
        match self {
            Direction::Request => ProxyError::BadRequest(msg.into()),
            Direction::Response => ProxyError::BadGateway(msg.into()),
        }
    }
}
