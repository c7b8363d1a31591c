//! Request headers as received by a forward proxy.
//!
//! A proxy request line carries an absolute URI
//! (`GET http://host[:port]/path HTTP/1.1`); host, port and path are taken
//! from it. Together they form the cache key returned by
//! [`RequestHeader::url`].

use std::time::SystemTime;

use async_std::io::Read;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Direction, ProxyError};
use crate::http::date::HttpDate;
use crate::http::headers::HeaderFields;
use crate::http::reader::HttpReader;
use crate::http::{HttpMethod, HttpVersion, MessageHead, http_method_from_str, parse_version};

/// Request fields that make a request conditional.
pub const CONDITIONAL_FIELDS: [&str; 3] = ["If-Match", "If-None-Match", "If-Modified-Since"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub method: HttpMethod,
    pub path: String,
    pub host: String,
    pub port: u16,
    pub version: HttpVersion,
    pub fields: HeaderFields,
    pub received_at: SystemTime,
}

impl RequestHeader {
    /// A new HTTP/1.1 request with only a `Date` field.
    pub fn new(method: HttpMethod, path: &str, host: &str, port: u16) -> Self {
        let mut fields = HeaderFields::new();
        fields.set("Date", &HttpDate::now().to_string());
        Self {
            method,
            path: path.to_string(),
            host: host.to_ascii_lowercase(),
            port,
            version: HttpVersion::V1_1,
            fields,
            received_at: SystemTime::now(),
        }
    }

    /// Reads one request header block from the client.
    ///
    /// Empty lines before the request line are skipped. A client that closes
    /// the connection before sending anything yields
    /// [`ProxyError::PeerClosed`].
    pub async fn read_from<R: Read + Unpin>(
        reader: &mut HttpReader<R>,
        max_header_size: usize,
    ) -> Result<Self, ProxyError> {
        let mut budget = max_header_size;
        let line = reader.read_start_line(&mut budget, Direction::Request).await?;
        let received_at = SystemTime::now();

        let mut request = Self::parse_request_line(&line, received_at)?;
        request
            .fields
            .read_from(reader, Direction::Request, budget)
            .await?;
        Ok(request)
    }

    /// Parses `METHOD http://host[:port]/path HTTP/1.x`.
    pub fn parse_request_line(line: &str, received_at: SystemTime) -> Result<Self, ProxyError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let [method, uri, protocol] = parts[..] else {
            return Err(ProxyError::BadRequest(format!(
                "request line {line:?} does not look like HTTP"
            )));
        };

        let version = parse_version(protocol, Direction::Request)?;

        let url = Url::parse(uri)
            .map_err(|_| ProxyError::BadRequest(format!("{uri:?} is not a valid absolute URL")))?;
        if url.scheme() != "http" {
            return Err(ProxyError::BadRequest(format!(
                "only http URLs can be proxied, got {}",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::BadRequest(format!("{uri:?} has no host")))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };

        Ok(Self {
            method: http_method_from_str(method),
            path,
            host: host.to_ascii_lowercase(),
            port,
            version,
            fields: HeaderFields::new(),
            received_at,
        })
    }

    /// The cache key: `host[:port]path`, the port omitted when it is 80.
    pub fn url(&self) -> String {
        if self.port == 80 {
            format!("{}{}", self.host, self.path)
        } else {
            format!("{}:{}{}", self.host, self.port, self.path)
        }
    }

    /// Whether the client connection stays open after this exchange:
    /// HTTP/1.1 without `Connection: close`.
    pub fn keep_alive(&self) -> bool {
        self.version == HttpVersion::V1_1 && !self.fields.contains_value("Connection", "close")
    }

    pub fn is_conditional(&self) -> bool {
        CONDITIONAL_FIELDS.iter().any(|f| self.fields.contains(f))
    }

    /// Whether a body follows this header on the wire.
    pub fn has_body(&self) -> bool {
        let chunked = self.fields.contains("Transfer-Encoding")
            && !self.fields.contains_value("Transfer-Encoding", "identity");
        let sized = self
            .fields
            .get("Content-Length")
            .is_some_and(|v| v.trim() != "0");
        chunked || sized
    }

    /// A copy ready to be sent to the origin. The proxy always closes its
    /// upstream connection after one exchange, so `Connection` is `close`.
    pub fn for_retransmission(&self, via_name: &str) -> Self {
        let mut copy = self.clone();
        copy.prepare_for_retransmission(via_name);
        let host = if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        };
        copy.fields.set("Connection", "close").set("Host", &host);
        copy
    }
}

impl MessageHead for RequestHeader {
    fn fields(&self) -> &HeaderFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut HeaderFields {
        &mut self.fields
    }

    fn version(&self) -> HttpVersion {
        self.version
    }

    fn set_version(&mut self, version: HttpVersion) {
        self.version = version;
    }

    fn received_at(&self) -> SystemTime {
        self.received_at
    }

    fn direction(&self) -> Direction {
        Direction::Request
    }

    /// Origin-form first line: the origin sees only the path.
    fn first_line(&self) -> String {
        format!("{} {} {}", self.method, self.path, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::io::Cursor;

    async fn parse(raw: &str) -> Result<RequestHeader, ProxyError> {
        let mut reader = HttpReader::new(Cursor::new(raw.as_bytes().to_vec()));
        RequestHeader::read_from(&mut reader, 8192).await
    }

    #[async_std::test]
    async fn test_parse_absolute_uri() {
        let req = parse("\r\n\r\nget http://Example.COM:8080/a/b?x=1 HTTP/1.1\r\nAccept: */*\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.host, "example.com");
        assert_eq!(req.port, 8080);
        assert_eq!(req.path, "/a/b?x=1");
        assert_eq!(req.url(), "example.com:8080/a/b?x=1");
        assert_eq!(req.fields.get("accept"), Some("*/*"));
    }

    #[async_std::test]
    async fn test_default_port_omitted_from_key() {
        let req = parse("GET http://example.com/ HTTP/1.0\r\n\r\n").await.unwrap();
        assert_eq!(req.port, 80);
        assert_eq!(req.url(), "example.com/");
    }

    #[async_std::test]
    async fn test_rejects_bad_request_lines() {
        assert!(matches!(
            parse("GET /only-a-path HTTP/1.1\r\n\r\n").await,
            Err(ProxyError::BadRequest(_))
        ));
        assert!(matches!(
            parse("GET https://example.com/ HTTP/1.1\r\n\r\n").await,
            Err(ProxyError::BadRequest(_))
        ));
        assert!(matches!(
            parse("GET http://example.com/\r\n\r\n").await,
            Err(ProxyError::BadRequest(_))
        ));
        assert!(matches!(
            parse("GET http://example.com/ HTTP/2.0\r\n\r\n").await,
            Err(ProxyError::VersionNotSupported(_))
        ));
    }

    #[async_std::test]
    async fn test_request_line_counts_toward_header_limit() {
        let raw = format!("GET http://example.com/{} HTTP/1.1\r\n\r\n", "a".repeat(1 << 20));
        let mut reader = HttpReader::new(Cursor::new(raw.into_bytes()));
        assert!(matches!(
            RequestHeader::read_from(&mut reader, 1024).await,
            Err(ProxyError::BadRequest(_))
        ));

        // fits alone, but not together with its fields
        let raw = format!("GET http://example.com/{} HTTP/1.1\r\nHost: example.com\r\n\r\n", "a".repeat(40));
        let mut reader = HttpReader::new(Cursor::new(raw.into_bytes()));
        assert!(matches!(
            RequestHeader::read_from(&mut reader, 80).await,
            Err(ProxyError::BadRequest(_))
        ));
    }

    #[async_std::test]
    async fn test_closed_before_request() {
        assert!(matches!(parse("").await, Err(ProxyError::PeerClosed)));
    }

    #[test]
    fn test_keep_alive() {
        let mut req = RequestHeader::new(HttpMethod::Get, "/", "example.com", 80);
        assert!(req.keep_alive());
        req.fields.set("Connection", "Keep-Alive, Close");
        assert!(!req.keep_alive());

        let mut old = RequestHeader::new(HttpMethod::Get, "/", "example.com", 80);
        old.version = HttpVersion::V1_0;
        assert!(!old.keep_alive());
    }

    #[test]
    fn test_retransmission_copy() {
        let mut req = RequestHeader::new(HttpMethod::Get, "/index.html", "example.com", 81);
        req.version = HttpVersion::V1_0;
        req.fields
            .set("Proxy-Connection", "keep-alive")
            .set("Proxy-Authorization", "Basic Zm9vOmJhcg==")
            .set("Via", "1.0 upstream-proxy");

        let out = req.for_retransmission("gateway");
        assert_eq!(out.version, HttpVersion::V1_1);
        assert_eq!(out.fields.get("Connection"), Some("close"));
        assert_eq!(out.fields.get("Host"), Some("example.com:81"));
        assert_eq!(out.fields.get("Via"), Some("1.0 upstream-proxy, 1.1 gateway"));
        assert!(!out.fields.contains("Proxy-Connection"));
        assert!(!out.fields.contains("Proxy-Authorization"));
        assert!(out.to_wire().starts_with("GET /index.html HTTP/1.1\r\n"));
        assert!(out.to_wire().ends_with("\r\n\r\n"));

        // the source request stays untouched
        assert_eq!(req.version, HttpVersion::V1_0);
        assert!(req.fields.contains("Proxy-Connection"));
    }

    #[test]
    fn test_conditional_and_body_detection() {
        let mut req = RequestHeader::new(HttpMethod::Post, "/", "example.com", 80);
        assert!(!req.is_conditional());
        assert!(!req.has_body());
        req.fields.set("If-Modified-Since", "Sun, 06 Nov 1994 08:49:37 GMT");
        req.fields.set("Content-Length", "3");
        assert!(req.is_conditional());
        assert!(req.has_body());
    }
}
