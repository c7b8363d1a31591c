use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_std::io::{self, prelude::*};
use async_std::net::{TcpListener, TcpStream};
use async_std::task;
use parking_lot::Mutex;

use rustyproxy::ProxyContext;
use rustyproxy::cache::entry::{ServerResponse, Validation};
use rustyproxy::config::ProxyConfig;
use rustyproxy::error::Direction;
use rustyproxy::handler::observer::ExchangeObserver;
use rustyproxy::http::HttpMethod;
use rustyproxy::http::body::read_response_body;
use rustyproxy::http::reader::HttpReader;
use rustyproxy::http::request::RequestHeader;
use rustyproxy::http::response::ResponseHeader;
use rustyproxy::net::server::Server;

#[derive(Default)]
struct Recorder(Mutex<Vec<(u16, Validation, bool)>>);

impl ExchangeObserver for Recorder {
    fn on_exchange_complete(&self, _conn: u64, response: &ServerResponse) {
        self.0
            .lock()
            .push((response.header.status, response.validation, response.upstream.is_some()));
    }
}

/// Origin answering every request with a numbered body, or 304 to
/// requests carrying `If-Match`.
async fn start_origin() -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    task::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            task::spawn(async move {
                let mut reader = HttpReader::new(stream.clone());
                let mut conditional = false;
                let mut body_len = 0;
                loop {
                    let line = reader.read_line(8192, Direction::Request).await.unwrap();
                    if line.is_empty() {
                        break;
                    }
                    if line.starts_with("If-Match:") {
                        conditional = true;
                    }
                    if let Some(len) = line.strip_prefix("Content-Length: ") {
                        body_len = len.parse().unwrap();
                    }
                }
                reader
                    .forward_and_read(Some(body_len), &mut io::sink(), false)
                    .await
                    .unwrap();

                let answer = if conditional {
                    "HTTP/1.1 304 Not Modified\r\nETag: \"v1\"\r\n\r\n".to_string()
                } else {
                    let body = format!("hello {n}");
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nETag: \"v1\"\r\n\
                         Cache-Control: max-age=60\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    )
                };
                let mut out = stream;
                out.write_all(answer.as_bytes()).await.unwrap();
            });
        }
    });

    (port, hits)
}

async fn start_proxy(recorder: Arc<Recorder>) -> u16 {
    let config = ProxyConfig {
        port: 0,
        via_name: "roundtrip".into(),
        ..ProxyConfig::default()
    };
    let ctx = ProxyContext::new(config).unwrap().with_observer(recorder);
    let server = Server::bind(ctx).await.unwrap();
    let port = server.local_addr().unwrap().port();
    task::spawn(server.run());
    port
}

async fn send(
    stream: &TcpStream,
    reader: &mut HttpReader<TcpStream>,
    method: HttpMethod,
    raw: String,
) -> (ResponseHeader, Vec<u8>) {
    let mut writer = stream.clone();
    writer.write_all(raw.as_bytes()).await.unwrap();

    let mut header = ResponseHeader::read_from(reader, 64 * 1024).await.unwrap();
    let request = RequestHeader::new(method, "/", "proxy.test", 80);
    let body = read_response_body(reader, &mut header, &request, &mut io::sink())
        .await
        .unwrap();
    (header, body.as_bytes().to_vec())
}

#[async_std::test]
async fn test_cache_invalidation_and_revalidation_through_the_proxy() {
    let (origin_port, hits) = start_origin().await;
    let recorder = Arc::new(Recorder::default());
    let proxy_port = start_proxy(Arc::clone(&recorder)).await;

    let stream = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    let mut reader = HttpReader::new(stream.clone());
    let url = format!("http://127.0.0.1:{origin_port}/page");

    // miss, then hit
    let get = format!("GET {url} HTTP/1.1\r\nAccept: */*\r\n\r\n");
    let (header, body) = send(&stream, &mut reader, HttpMethod::Get, get.clone()).await;
    assert_eq!(header.status, 200);
    assert_eq!(body, b"hello 1");
    assert_eq!(header.fields.get("Via"), Some("1.1 roundtrip"));
    assert_eq!(header.fields.get("Connection"), Some("Keep-Alive"));

    let (header, body) = send(&stream, &mut reader, HttpMethod::Get, get.clone()).await;
    assert_eq!(header.status, 200);
    assert_eq!(body, b"hello 1");
    assert!(header.fields.contains("Age"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // a POST goes through and invalidates the entry
    let post = format!("POST {url} HTTP/1.1\r\nContent-Length: 4\r\n\r\ndata");
    let (header, body) = send(&stream, &mut reader, HttpMethod::Post, post).await;
    assert_eq!(header.status, 200);
    assert_eq!(body, b"hello 2");
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // the stale entry is revalidated and served from the cache again
    let (header, body) = send(&stream, &mut reader, HttpMethod::Get, get).await;
    assert_eq!(header.status, 200);
    assert_eq!(body, b"hello 1");
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    let seen = recorder.0.lock().clone();
    assert_eq!(
        seen,
        vec![
            (200, Validation::Unconditional, true),
            (200, Validation::Unconditional, false),
            (200, Validation::Unconditional, true),
            (200, Validation::Verified, true),
        ]
    );
}

#[async_std::test]
async fn test_unreachable_origin_renders_bad_gateway() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = closed.local_addr().unwrap().port();
    drop(closed);

    let proxy_port = start_proxy(Arc::new(Recorder::default())).await;
    let stream = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    let mut reader = HttpReader::new(stream.clone());

    let get = format!("GET http://127.0.0.1:{dead_port}/ HTTP/1.1\r\n\r\n");
    let (header, body) = send(&stream, &mut reader, HttpMethod::Get, get).await;
    assert_eq!(header.status, 502);
    assert_eq!(header.fields.get("Connection"), Some("Keep-Alive"));
    assert!(String::from_utf8(body).unwrap().contains("502 Bad Gateway"));

    // the connection is still usable
    let bad = "GET http://127.0.0.1/ HTTP/3.0\r\n\r\n".to_string();
    let (header, _) = send(&stream, &mut reader, HttpMethod::Get, bad).await;
    assert_eq!(header.status, 505);
}
