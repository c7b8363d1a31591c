//! What the proxy does with one parsed request: answer it from the cache
//! or forward it upstream.

pub mod error_page;
pub mod observer;
pub mod upstream;

use async_std::io::Write;
use async_std::io::prelude::*;

use crate::cache::entry::ServerResponse;
use crate::cache::freshness::client_validators_match;
use crate::error::ProxyError;
use crate::http::MessageHead;
use crate::http::request::RequestHeader;
use crate::http::status::HttpStatus;

/// Writes a stored response to the client as the answer to `request`.
pub async fn send_cached<W>(
    out: &mut W,
    entry: &ServerResponse,
    request: &RequestHeader,
    via_name: &str,
) -> Result<(), ProxyError>
where
    W: Write + Unpin + ?Sized,
{
    let header = entry.header.for_retransmission(request, entry.age(), via_name);
    let body = if entry.header.may_have_body(request) {
        entry.body.as_bytes()
    } else {
        &[]
    };
    write_message(out, header.to_wire().as_bytes(), body).await
}

/// Answers `request` from a fresh cache entry: 304 when the client's own
/// validators match the entry, the full entry otherwise. Returns the status
/// sent.
pub async fn serve_fresh<W>(
    out: &mut W,
    entry: &ServerResponse,
    request: &RequestHeader,
    via_name: &str,
) -> Result<u16, ProxyError>
where
    W: Write + Unpin + ?Sized,
{
    if request.is_conditional() && client_validators_match(request, &entry.header) {
        let mut not_modified = entry.header.clone();
        not_modified.status = HttpStatus::NotModified.code();
        not_modified.reason = HttpStatus::NotModified.reason().to_string();
        let header = not_modified.for_retransmission(request, entry.age(), via_name);
        write_message(out, header.to_wire().as_bytes(), &[]).await?;
        return Ok(not_modified.status);
    }

    send_cached(out, entry, request, via_name).await?;
    Ok(entry.header.status)
}

async fn write_message<W>(out: &mut W, head: &[u8], body: &[u8]) -> Result<(), ProxyError>
where
    W: Write + Unpin + ?Sized,
{
    let res = async {
        out.write_all(head).await?;
        out.write_all(body).await?;
        out.flush().await
    }
    .await;
    res.map_err(|_| ProxyError::OutputClosed)
}
