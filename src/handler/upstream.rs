//! One exchange with an origin server.
//!
//! The proxy opens a fresh upstream connection per request and closes it
//! once the response has been relayed. Faults that come from the origin are
//! reported as gateway errors; a client that goes away mid-exchange stays a
//! connection fault.

use std::future::Future;
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, SystemTime};

use async_std::future;
use async_std::io::prelude::*;
use async_std::io::{self, Read, Write};
use async_std::net::{TcpStream, ToSocketAddrs};
use async_std::task;
use tracing::{debug, warn};

use crate::ProxyContext;
use crate::cache::entry::{ServerResponse, Validation};
use crate::cache::freshness::{conditional_request, merge_not_modified};
use crate::error::ProxyError;
use crate::handler::send_cached;
use crate::http::MessageHead;
use crate::http::body::{MessageBody, read_request_body, response_body_length, transfer};
use crate::http::reader::HttpReader;
use crate::http::request::RequestHeader;
use crate::http::response::ResponseHeader;

/// Forwards `request` to its origin and relays the answer to `client_out`.
///
/// `client_in` supplies the request body, if any. When `stale` holds an
/// expired cache entry and the client did not ask conditionally itself, the
/// origin is asked to revalidate it; a 304 then answers the client from the
/// cached body. The finished response is offered to the cache before it is
/// returned.
pub async fn fetch<R, W>(
    ctx: &ProxyContext,
    conn: u64,
    request: &RequestHeader,
    client_in: Option<&mut HttpReader<R>>,
    client_out: Option<&mut W>,
    stale: Option<ServerResponse>,
) -> Result<ServerResponse, ProxyError>
where
    R: Read + Unpin,
    W: Write + Unpin + Send,
{
    let mut discard = io::sink();
    let out: &mut (dyn Write + Unpin + Send) = match client_out {
        Some(w) => w,
        None => &mut discard,
    };

    let conditional = stale.as_ref().and_then(|cached| conditional_request(request, cached));
    let revalidating = stale.filter(|_| conditional.is_some());
    let outgoing = conditional.as_ref().unwrap_or(request);

    let timeout = ctx.config.upstream_timeout;
    let upstream = within(timeout, "connecting to the origin", connect(request)).await?;
    let peer = upstream.peer_addr().ok();
    debug!(conn, url = %request.url(), upstream = ?peer, conditional = revalidating.is_some(), "forwarding");

    let result = exchange(ctx, &upstream, request, outgoing, client_in, out, revalidating).await;
    let _ = upstream.shutdown(Shutdown::Both);

    let mut response = result?;
    response.upstream = peer;

    let cache = ctx.cache.clone();
    let key_request = request.clone();
    let snapshot = response.clone();
    match task::spawn_blocking(move || cache.put(&key_request, &snapshot)).await {
        Ok(stored) => debug!(conn, url = %request.url(), stored, "offered to cache"),
        Err(err) => warn!(conn, url = %request.url(), "cache write failed: {err}"),
    }

    Ok(response)
}

async fn exchange<R>(
    ctx: &ProxyContext,
    upstream: &TcpStream,
    request: &RequestHeader,
    outgoing: &RequestHeader,
    client_in: Option<&mut HttpReader<R>>,
    out: &mut (dyn Write + Unpin + Send),
    revalidating: Option<ServerResponse>,
) -> Result<ServerResponse, ProxyError>
where
    R: Read + Unpin,
{
    let config = &ctx.config;
    let mut upstream_out = upstream.clone();
    let mut upstream_in = HttpReader::with_chunk_size(upstream.clone(), config.buffer_size);

    let mut wire = outgoing.for_retransmission(&config.via_name);
    upstream_out
        .write_all(wire.to_wire().as_bytes())
        .await
        .map_err(|err| ProxyError::from(err).into_upstream_fault())?;
    if let Some(client_in) = client_in {
        read_request_body(client_in, &mut wire, &mut upstream_out)
            .await
            .map_err(|err| match err {
                ProxyError::OutputClosed => err.into_upstream_fault(),
                err => err,
            })?;
    }
    upstream_out
        .flush()
        .await
        .map_err(|err| ProxyError::from(err).into_upstream_fault())?;
    let request_sent = SystemTime::now();

    let header = within(
        config.upstream_timeout,
        "waiting for the origin's response",
        async {
            loop {
                let header = ResponseHeader::read_from(&mut upstream_in, config.max_header_size)
                    .await
                    .map_err(ProxyError::into_upstream_fault)?;
                if !is_interim(header.status) {
                    return Ok::<_, ProxyError>(header);
                }
                debug!(status = header.status, url = %request.url(), "skipping interim response");
            }
        },
    )
    .await?;
    debug!(status = header.status, url = %request.url(), "origin answered");

    if let Some(cached) = revalidating {
        if header.status == 304 {
            let merged = merge_not_modified(cached, &header, request.clone(), request_sent);
            send_cached(out, &merged, request, &config.via_name).await?;
            return Ok(merged);
        }
    }

    let mut response = ServerResponse::new(request.clone(), header, MessageBody::empty(), request_sent);
    if outgoing.is_conditional() && !request.is_conditional() {
        response.validation = Validation::Replaced;
    }

    let length = response_body_length(&response.header, request)?;
    let to_client = response
        .header
        .for_retransmission(request, response.age(), &config.via_name);
    out.write_all(to_client.to_wire().as_bytes())
        .await
        .map_err(|_| ProxyError::OutputClosed)?;

    response.body = transfer(&mut upstream_in, &mut response.header, length, out)
        .await
        .map_err(|err| match err {
            ProxyError::OutputClosed => err,
            err => err.into_upstream_fault(),
        })?;
    out.flush().await.map_err(|_| ProxyError::OutputClosed)?;

    Ok(response)
}

/// 1xx responses announcing a final one still to come.
fn is_interim(status: u16) -> bool {
    (100..200).contains(&status) && status != 101
}

async fn connect(request: &RequestHeader) -> Result<TcpStream, ProxyError> {
    let addrs: Vec<SocketAddr> = (request.host.as_str(), request.port)
        .to_socket_addrs()
        .await
        .map_err(|err| ProxyError::BadRequest(format!("cannot resolve host {}: {err}", request.host)))?
        .collect();
    if addrs.is_empty() {
        return Err(ProxyError::BadRequest(format!(
            "host {} has no addresses",
            request.host
        )));
    }

    TcpStream::connect(&addrs[..]).await.map_err(|err| {
        ProxyError::BadGateway(format!(
            "cannot connect to {}:{}: {err}",
            request.host, request.port
        ))
    })
}

/// Bounds `fut` by `limit` when one is configured.
async fn within<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    match limit {
        Some(limit) => future::timeout(limit, fut).await.map_err(|_| {
            ProxyError::GatewayTimeout(format!("{what} took longer than {}s", limit.as_secs_f64()))
        })?,
        None => fut.await,
    }
}
