//! Message bodies and the framing engine.
//!
//! The engine decides how a body is delimited, streams it from a source to a
//! sink piece by piece, and keeps a complete copy for the cache. The length is
//! determined with this precedence:
//!
//! 1. no body at all (response to `HEAD`, status 1xx, 204 or 304);
//! 2. chunked transfer coding (any `Transfer-Encoding` other than `identity`);
//! 3. `Content-Length`;
//! 4. a response on a non-persistent link ends when the origin closes;
//! 5. a request with none of the above has an empty body;
//! 6. anything else cannot be framed and is a 502.
//!
//! Whatever the wire framing, the stored copy is plain bytes and the header
//! is rewritten to describe it with `Content-Length` only.

use async_std::io::{Read, Write};

use crate::error::{Direction, ProxyError};
use crate::http::headers::HeaderFields;
use crate::http::reader::{HttpReader, write_last_chunk};
use crate::http::request::RequestHeader;
use crate::http::response::ResponseHeader;
use crate::http::{HttpVersion, MessageHead};

/// Upper bound on the trailer section of a chunked body.
const MAX_TRAILER_SIZE: usize = 8192;

/// Upper bound on a chunk-size line, extensions included.
const MAX_CHUNK_LINE: usize = 4096;

/// The complete bytes of a message body. Never changes once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBody(Vec<u8>);

impl MessageBody {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// How the end of a body is found on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    Empty,
    /// Chunked transfer coding. `rechunk` forwards the body as chunks;
    /// otherwise the decoded bytes go out as they are.
    Chunked { rechunk: bool },
    Fixed(usize),
    /// Read until the source closes. `rechunk` re-frames the forwarded bytes
    /// as chunks because the receiving link stays open.
    UntilClose { rechunk: bool },
}

pub(crate) fn is_chunked(fields: &HeaderFields) -> bool {
    fields.contains("Transfer-Encoding") && !fields.contains_value("Transfer-Encoding", "identity")
}

fn content_length(fields: &HeaderFields, direction: Direction) -> Result<Option<usize>, ProxyError> {
    match fields.get("Content-Length") {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| direction.fault(format!("Content-Length {v:?} is not a valid number"))),
    }
}

pub fn request_body_length(request: &RequestHeader) -> Result<BodyLength, ProxyError> {
    if is_chunked(&request.fields) {
        // a coding other than chunked leaves no way to find the end
        if !request.fields.contains_value("Transfer-Encoding", "chunked") {
            return Err(ProxyError::LengthRequired(format!(
                "cannot frame a request body with Transfer-Encoding {:?}",
                request.fields.get("Transfer-Encoding").unwrap_or_default()
            )));
        }
        return Ok(BodyLength::Chunked { rechunk: true });
    }
    Ok(match content_length(&request.fields, Direction::Request)? {
        Some(n) => BodyLength::Fixed(n),
        None => BodyLength::Empty,
    })
}

pub fn response_body_length(
    response: &ResponseHeader,
    request: &RequestHeader,
) -> Result<BodyLength, ProxyError> {
    if !response.may_have_body(request) {
        return Ok(BodyLength::Empty);
    }
    if is_chunked(&response.fields) {
        // a closing client link needs no transfer coding
        return Ok(BodyLength::Chunked {
            rechunk: request.keep_alive(),
        });
    }
    if let Some(n) = content_length(&response.fields, Direction::Response)? {
        return Ok(BodyLength::Fixed(n));
    }

    let closing = response.fields.contains_value("Connection", "close")
        || (!response.fields.contains("Connection") && response.version == HttpVersion::V1_0);
    if closing {
        return Ok(BodyLength::UntilClose {
            rechunk: request.keep_alive(),
        });
    }

    Err(ProxyError::BadGateway(
        "the origin sent too little information to determine the response length".into(),
    ))
}

/// Streams a request body from the client to `sink` (the origin).
pub async fn read_request_body<R, W>(
    source: &mut HttpReader<R>,
    header: &mut RequestHeader,
    sink: &mut W,
) -> Result<MessageBody, ProxyError>
where
    R: Read + Unpin,
    W: Write + Unpin + ?Sized,
{
    let length = request_body_length(header)?;
    transfer(source, header, length, sink).await
}

/// Streams a response body from the origin to `sink` (the client).
pub async fn read_response_body<R, W>(
    source: &mut HttpReader<R>,
    header: &mut ResponseHeader,
    request: &RequestHeader,
    sink: &mut W,
) -> Result<MessageBody, ProxyError>
where
    R: Read + Unpin,
    W: Write + Unpin + ?Sized,
{
    let length = response_body_length(header, request)?;
    transfer(source, header, length, sink).await
}

/// Moves one body from `source` to `sink` and rewrites `header` to describe
/// the stored copy.
pub async fn transfer<R, W, H>(
    source: &mut HttpReader<R>,
    header: &mut H,
    length: BodyLength,
    sink: &mut W,
) -> Result<MessageBody, ProxyError>
where
    R: Read + Unpin,
    W: Write + Unpin + ?Sized,
    H: MessageHead + ?Sized,
{
    let direction = header.direction();

    let bytes = match length {
        BodyLength::Empty => Vec::new(),
        BodyLength::Fixed(n) => source.forward_and_read(Some(n), sink, false).await?,
        BodyLength::UntilClose { rechunk } => {
            let bytes = source.forward_and_read(None, sink, rechunk).await?;
            if rechunk {
                write_last_chunk(sink).await?;
            }
            bytes
        }
        BodyLength::Chunked { rechunk } => {
            let bytes = read_chunks(source, direction, sink, rechunk).await?;
            if rechunk {
                write_last_chunk(sink).await?;
            }

            let mut trailers = HeaderFields::new();
            match trailers.read_from(source, direction, MAX_TRAILER_SIZE).await {
                Ok(()) | Err(ProxyError::PeerClosed) => {}
                Err(e) => return Err(e),
            }
            let fields = header.fields_mut();
            fields.merge(&trailers);
            fields.remove("Trailer").remove("Transfer-Encoding");
            bytes
        }
    };

    header
        .fields_mut()
        .set("Content-Length", &bytes.len().to_string());
    Ok(MessageBody::new(bytes))
}

/// Reads chunks up to the zero-size one, forwarding each as a chunk when
/// `rechunk` is set.
async fn read_chunks<R, W>(
    source: &mut HttpReader<R>,
    direction: Direction,
    sink: &mut W,
    rechunk: bool,
) -> Result<Vec<u8>, ProxyError>
where
    R: Read + Unpin,
    W: Write + Unpin + ?Sized,
{
    let mut body = Vec::new();
    loop {
        let line = source.read_line(MAX_CHUNK_LINE, direction).await?;
        let size_field = line.split(';').next().unwrap_or("").trim();
        if size_field.is_empty() || !size_field.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(direction.fault(format!("chunk size {size_field:?} is not a hex number")));
        }
        let size = usize::from_str_radix(size_field, 16)
            .map_err(|_| direction.fault(format!("chunk size {size_field:?} is too large")))?;
        if size == 0 {
            return Ok(body);
        }

        let chunk = source.forward_and_read(Some(size), sink, rechunk).await?;
        body.extend_from_slice(&chunk);

        // the CRLF closing the chunk's data
        if !source.read_line(MAX_CHUNK_LINE, direction).await?.is_empty() {
            return Err(direction.fault("chunk data does not match its size"));
        }
    }
}
