//! Client connection loop.
//!
//! Each accepted socket is served by one task that handles requests one
//! after another for as long as the client keeps the connection open:
//!
//! 1. Read a request header (a client closing here ends the connection quietly)
//! 2. Look the request up in the cache
//! 3. Serve a fresh entry directly, or forward the request upstream
//! 4. Render protocol faults as an HTML error page
//!
//! The connection ends when the client asks for it, when it used HTTP/1.0,
//! or when the socket itself fails.

use std::net::Shutdown;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_std::io::prelude::*;
use async_std::io::{self, Read, Write};
use async_std::net::TcpStream;
use async_std::task;
use tracing::{debug, info, warn};

use crate::ProxyContext;
use crate::cache::entry::ServerResponse;
use crate::error::{Direction, ProxyError};
use crate::handler::error_page::ErrorPage;
use crate::handler::{serve_fresh, upstream};
use crate::http::body::read_request_body;
use crate::http::reader::HttpReader;
use crate::http::request::RequestHeader;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Write half of a client connection that remembers whether anything has
/// been sent since the last [`reset`](TrackedWriter::reset).
pub struct TrackedWriter<W> {
    inner: W,
    written: u64,
}

impl<W> TrackedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn reset(&mut self) {
        self.written = 0;
    }

    pub fn has_written(&self) -> bool {
        self.written > 0
    }
}

impl<W: Write + Unpin> Write for TrackedWriter<W> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let poll = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            self.written += n as u64;
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx)
    }
}

/// Serves one client connection until it closes.
pub async fn handle_client(ctx: ProxyContext, stream: TcpStream) {
    let conn = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
    debug!(conn, peer = ?stream.peer_addr().ok(), "connection accepted");

    let mut input = HttpReader::with_chunk_size(stream.clone(), ctx.config.buffer_size);
    let mut output = TrackedWriter::new(stream.clone());
    serve(&ctx, conn, &mut input, &mut output).await;

    let _ = stream.shutdown(Shutdown::Both);
    debug!(conn, "connection closed");
}

/// The request loop, over any pair of client streams.
pub async fn serve<R, W>(ctx: &ProxyContext, conn: u64, input: &mut HttpReader<R>, output: &mut TrackedWriter<W>)
where
    R: Read + Unpin + Send,
    W: Write + Unpin + Send,
{
    while serve_one(ctx, conn, input, output).await {}
}

/// Handles one request and reports whether the connection stays open.
async fn serve_one<R, W>(
    ctx: &ProxyContext,
    conn: u64,
    input: &mut HttpReader<R>,
    output: &mut TrackedWriter<W>,
) -> bool
where
    R: Read + Unpin + Send,
    W: Write + Unpin + Send,
{
    output.reset();
    let max_header_size = ctx.config.max_header_size;

    let request = match RequestHeader::read_from(input, max_header_size).await {
        Ok(request) => request,
        Err(ProxyError::PeerClosed) => return false,
        Err(err) if err.is_connection_fault() => {
            debug!(conn, "client connection failed: {err}");
            return false;
        }
        Err(err) => {
            warn!(conn, "bad request: {err}");
            // the rest of the header block must go before the next request
            let resync = skip_header_block(input, max_header_size).await.is_ok();
            return send_error_page(ctx, conn, output, &err, None, resync).await;
        }
    };
    debug!(conn, method = %request.method, url = %request.url(), "request");

    let keep_alive = request.keep_alive();
    match process(ctx, conn, &request, input, output).await {
        Ok(response) => {
            ctx.observer.on_exchange_complete(conn, &response);
            keep_alive
        }
        Err(err) if err.is_connection_fault() => {
            debug!(conn, url = %request.url(), "connection fault: {err}");
            false
        }
        Err(err) => {
            warn!(conn, url = %request.url(), "exchange failed: {err}");
            if output.has_written() {
                // the client already has part of a response
                return false;
            }
            let stay_open = keep_alive && !request.has_body();
            send_error_page(ctx, conn, output, &err, Some(&request), stay_open).await
        }
    }
}

async fn process<R, W>(
    ctx: &ProxyContext,
    conn: u64,
    request: &RequestHeader,
    input: &mut HttpReader<R>,
    output: &mut TrackedWriter<W>,
) -> Result<ServerResponse, ProxyError>
where
    R: Read + Unpin + Send,
    W: Write + Unpin + Send,
{
    let cache = ctx.cache.clone();
    let lookup = request.clone();
    let cached = match task::spawn_blocking(move || cache.get(&lookup)).await {
        Ok(cached) => cached,
        Err(err) => {
            warn!(conn, url = %request.url(), "cache read failed: {err}");
            None
        }
    };

    match cached {
        Some(entry) if entry.is_fresh() => {
            let mut discarded = request.clone();
            read_request_body(input, &mut discarded, &mut io::sink()).await?;

            let status = serve_fresh(output, &entry, request, &ctx.config.via_name).await?;
            info!(conn, url = %request.url(), status, age = entry.age(), "served from cache");

            let mut served = entry;
            // no origin was contacted for this answer
            served.upstream = None;
            Ok(served)
        }
        stale => upstream::fetch(ctx, conn, request, Some(input), Some(output), stale).await,
    }
}

/// Writes the error page for `err`; returns whether the connection stays
/// open afterwards.
async fn send_error_page<W>(
    ctx: &ProxyContext,
    conn: u64,
    output: &mut TrackedWriter<W>,
    err: &ProxyError,
    request: Option<&RequestHeader>,
    stay_open: bool,
) -> bool
where
    W: Write + Unpin + Send,
{
    let page = ErrorPage::for_error(err, request, None, &ctx.config.server_name, stay_open);
    let sent = async {
        output.write_all(&page.to_bytes()).await?;
        output.flush().await
    }
    .await;
    match sent {
        Ok(()) => {
            debug!(conn, status = page.header.status, "error page sent");
            stay_open
        }
        Err(err) => {
            debug!(conn, "cannot send error page: {err}");
            false
        }
    }
}

/// Discards header lines up to the blank line ending the block.
async fn skip_header_block<R>(input: &mut HttpReader<R>, limit: usize) -> Result<(), ProxyError>
where
    R: Read + Unpin,
{
    let mut remaining = limit;
    loop {
        let line = input.read_line(remaining, Direction::Request).await?;
        if line.is_empty() {
            return Ok(());
        }
        remaining = remaining.saturating_sub(line.len() + 2);
    }
}
