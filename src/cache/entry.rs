use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::http::body::MessageBody;
use crate::http::request::RequestHeader;
use crate::http::response::ResponseHeader;

/// Outcome of a revalidation attempt made by the proxy itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Validation {
    /// No conditional request was made.
    #[default]
    Unconditional,
    /// Conditional request answered with 304; the cached body was served.
    Verified,
    /// Conditional request answered with a new copy.
    Replaced,
}

/// A finished response together with the request it answers.
///
/// This is both the value kept in the cache and what an upstream exchange
/// produces. The body is stored next to the serialized header data, not
/// inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerResponse {
    pub request: RequestHeader,
    pub header: ResponseHeader,
    #[serde(skip)]
    pub body: MessageBody,
    /// When the request was handed to the origin.
    pub request_sent: SystemTime,
    /// Set when a possibly-modifying request went to the same URL; the entry
    /// is then never fresh again.
    #[serde(default)]
    pub invalidated: bool,
    /// Address of the origin the response came from.
    #[serde(default)]
    pub upstream: Option<SocketAddr>,
    #[serde(skip)]
    pub validation: Validation,
}

impl ServerResponse {
    pub fn new(
        request: RequestHeader,
        header: ResponseHeader,
        body: MessageBody,
        request_sent: SystemTime,
    ) -> Self {
        Self {
            request,
            header,
            body,
            request_sent,
            invalidated: false,
            upstream: None,
            validation: Validation::Unconditional,
        }
    }

    /// Marks the entry stale regardless of its age.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn was_conditional(&self) -> bool {
        self.validation != Validation::Unconditional
    }

    pub fn verified_conditional(&self) -> bool {
        self.validation == Validation::Verified
    }

    /// Time between sending the request and the response header arriving.
    pub fn latency(&self) -> Duration {
        self.header
            .received_at
            .duration_since(self.request_sent)
            .unwrap_or_default()
    }

    /// Body size as announced by `Content-Length`, which the framing engine
    /// always leaves exact.
    pub fn content_length(&self) -> usize {
        self.header
            .fields
            .get("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.body.len())
    }
}
