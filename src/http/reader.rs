//! Buffered byte source for HTTP messages.
//!
//! Header lines are read as text while everything after them stays raw
//! bytes, so a single reader can serve the header parser and the body
//! framing engine in turn without losing buffered data between them.

use async_std::io::prelude::*;
use async_std::io::{BufReader, Read, Write};

use crate::error::{Direction, ProxyError};

/// Size of the read buffer used when streaming a body through.
pub const DEFAULT_CHUNK: usize = 4096;

pub struct HttpReader<R> {
    inner: BufReader<R>,
    chunk: usize,
}

impl<R: Read + Unpin> HttpReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, DEFAULT_CHUNK)
    }

    pub fn with_chunk_size(inner: R, chunk: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            chunk: chunk.max(1),
        }
    }

    /// Reads one line terminated by CRLF, returning it without the terminator.
    ///
    /// Only the CR LF pair ends a line; a lone CR or LF is kept as data. A
    /// stream ending mid-line yields what was read so far. A stream that is
    /// already at its end yields [`ProxyError::PeerClosed`]. A line longer
    /// than `limit` bytes, terminator included, is a fault of `direction`;
    /// no more than `limit` bytes of it are ever buffered.
    pub async fn read_line(&mut self, limit: usize, direction: Direction) -> Result<String, ProxyError> {
        let mut line = Vec::new();
        loop {
            let room = limit.saturating_sub(line.len());
            if room == 0 {
                return Err(direction.fault(format!("line longer than {limit} bytes")));
            }
            let n = (&mut self.inner)
                .take(room as u64)
                .read_until(b'\n', &mut line)
                .await?;
            if n == 0 {
                if line.is_empty() {
                    return Err(ProxyError::PeerClosed);
                }
                break;
            }
            if line.ends_with(b"\r\n") {
                line.truncate(line.len() - 2);
                break;
            }
            if !line.ends_with(b"\n") && n < room {
                // EOF inside the line
                break;
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Reads the first line of a message, skipping blank lines before it.
    ///
    /// Every line read is charged against `budget`, the bytes left for the
    /// whole header block.
    pub async fn read_start_line(&mut self, budget: &mut usize, direction: Direction) -> Result<String, ProxyError> {
        loop {
            let line = self.read_line(*budget, direction).await?;
            *budget = budget.saturating_sub(line.len() + 2);
            if !line.is_empty() {
                return Ok(line);
            }
        }
    }

    /// Reads `len` bytes (or everything up to end of stream when `len` is
    /// `None`), writing each piece to `sink` as soon as it arrives.
    ///
    /// With `chunked` set, every piece written to the sink is wrapped as one
    /// chunk of the chunked transfer coding. The returned bytes never contain
    /// chunk framing. A fixed-length read that hits end of stream early fails
    /// with [`ProxyError::PeerClosed`]; a failing sink yields
    /// [`ProxyError::OutputClosed`].
    pub async fn forward_and_read<W>(
        &mut self,
        len: Option<usize>,
        sink: &mut W,
        chunked: bool,
    ) -> Result<Vec<u8>, ProxyError>
    where
        W: Write + Unpin + ?Sized,
    {
        let mut buffer = vec![0; self.chunk];
        let mut store = Vec::with_capacity(len.unwrap_or(0).min(1 << 20));

        loop {
            let limit = match len {
                Some(total) => (total - store.len()).min(buffer.len()),
                None => buffer.len(),
            };
            if limit == 0 {
                break;
            }

            let n = match self.inner.read(&mut buffer[..limit]).await {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                if len.is_some() {
                    return Err(ProxyError::PeerClosed);
                }
                break;
            }

            store.extend_from_slice(&buffer[..n]);
            write_piece(sink, &buffer[..n], chunked).await?;
        }

        Ok(store)
    }
}

/// Writes one piece of body to the sink, framed as a chunk when requested.
pub async fn write_piece<W>(sink: &mut W, piece: &[u8], chunked: bool) -> Result<(), ProxyError>
where
    W: Write + Unpin + ?Sized,
{
    let res = async {
        if chunked {
            sink.write_all(format!("{:x}\r\n", piece.len()).as_bytes()).await?;
            sink.write_all(piece).await?;
            sink.write_all(b"\r\n").await
        } else {
            sink.write_all(piece).await
        }
    }
    .await;
    res.map_err(|_| ProxyError::OutputClosed)
}

/// Writes the zero-size chunk that ends a chunked body.
pub async fn write_last_chunk<W>(sink: &mut W) -> Result<(), ProxyError>
where
    W: Write + Unpin + ?Sized,
{
    sink.write_all(b"0\r\n\r\n")
        .await
        .map_err(|_| ProxyError::OutputClosed)
}
