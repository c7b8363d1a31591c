use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{Direction, ProxyError};
use crate::http::headers::HeaderFields;

pub mod body;
pub mod date;
pub mod headers;
pub mod reader;
pub mod request;
pub mod response;
pub mod status;

/// All existing HTTP versions.
/// Requests must use one of the 1.x versions; anything else is answered
/// with 505.
#[derive(PartialEq, Eq, PartialOrd, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum HttpVersion {
    V0_9,
    V1_0,
    V1_1,
    V2_0,
    V3_0,
}

impl HttpVersion {
    /// The version numbered `major.minor`, if it exists.
    pub fn from_numbers(major: u8, minor: u8) -> Option<HttpVersion> {
        match (major, minor) {
            (0, 9) => Some(HttpVersion::V0_9),
            (1, 0) => Some(HttpVersion::V1_0),
            (1, 1) => Some(HttpVersion::V1_1),
            (2, 0) => Some(HttpVersion::V2_0),
            (3, 0) => Some(HttpVersion::V3_0),
            _ => None,
        }
    }

    /// Parses a protocol token such as `HTTP/1.1`.
    pub fn parse(token: &str) -> Option<HttpVersion> {
        let (name, version) = token.split_once('/')?;
        if !name.eq_ignore_ascii_case("HTTP") {
            return None;
        }
        let (maj, min) = version.split_once('.')?;
        Self::from_numbers(maj.parse().ok()?, min.parse().ok()?)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::V0_9 => "HTTP/0.9",
            HttpVersion::V1_0 => "HTTP/1.0",
            HttpVersion::V1_1 => "HTTP/1.1",
            HttpVersion::V2_0 => "HTTP/2.0",
            HttpVersion::V3_0 => "HTTP/3.0",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
    /// Any other token; relayed as-is.
    Extension(String),
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Extension(m) => m,
        }
    }
}

pub fn http_method_from_str(method: &str) -> HttpMethod {
    match method.to_ascii_uppercase().as_str() {
        "GET" => HttpMethod::Get,
        "HEAD" => HttpMethod::Head,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        "TRACE" => HttpMethod::Trace,
        "OPTIONS" => HttpMethod::Options,
        "CONNECT" => HttpMethod::Connect,
        "PATCH" => HttpMethod::Patch,
        other => HttpMethod::Extension(other.to_string()),
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What request and response headers have in common: a field set, a
/// protocol version, the instant the header started arriving, and a first
/// line of their own.
pub trait MessageHead {
    fn fields(&self) -> &HeaderFields;
    fn fields_mut(&mut self) -> &mut HeaderFields;
    fn version(&self) -> HttpVersion;
    fn set_version(&mut self, version: HttpVersion);
    fn received_at(&self) -> SystemTime;
    fn direction(&self) -> Direction;

    /// The first line, without its CRLF.
    fn first_line(&self) -> String;

    /// The full header block, ready to be written to a socket.
    fn to_wire(&self) -> String {
        format!("{}\r\n{}\r\n", self.first_line(), self.fields().stringify())
    }

    /// The changes every relayed message needs: hop-by-hop fields dropped,
    /// protocol forced to HTTP/1.1 and this proxy appended to `Via`.
    fn prepare_for_retransmission(&mut self, via_name: &str) {
        self.fields_mut().strip_hop_by_hop();
        self.set_version(HttpVersion::V1_1);
        self.fields_mut().append("Via", &format!("1.1 {via_name}"));
    }
}

/// Parses a protocol token for the given direction: unsupported versions on a
/// request are a 505, anything unreadable from an origin a 502.
pub(crate) fn parse_version(token: &str, direction: Direction) -> Result<HttpVersion, ProxyError> {
    match (HttpVersion::parse(token), direction) {
        (Some(v @ (HttpVersion::V1_0 | HttpVersion::V1_1)), _) => Ok(v),
        (_, Direction::Request) => Err(ProxyError::VersionNotSupported(format!(
            "protocol {token:?} is not HTTP/1.x"
        ))),
        (Some(v), Direction::Response) => Ok(v),
        (None, Direction::Response) => Err(ProxyError::BadGateway(format!(
            "origin answered with unknown protocol {token:?}"
        ))),
    }
}
