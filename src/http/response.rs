use std::time::SystemTime;

use async_std::io::Read;
use serde::{Deserialize, Serialize};

use crate::error::{Direction, ProxyError};
use crate::http::body::is_chunked;
use crate::http::date::HttpDate;
use crate::http::headers::HeaderFields;
use crate::http::reader::HttpReader;
use crate::http::request::RequestHeader;
use crate::http::status::{HttpStatus, forbids_body};
use crate::http::{HttpMethod, HttpVersion, MessageHead, parse_version};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub status: u16,
    pub reason: String,
    pub version: HttpVersion,
    pub fields: HeaderFields,
    pub received_at: SystemTime,
}

impl ResponseHeader {
    /// A new HTTP/1.1 response with only a `Date` field.
    pub fn new(status: u16, reason: &str) -> Self {
        let mut fields = HeaderFields::new();
        fields.set("Date", &HttpDate::now().to_string());
        Self {
            status,
            reason: reason.to_string(),
            version: HttpVersion::V1_1,
            fields,
            received_at: SystemTime::now(),
        }
    }

    pub fn from_status(status: HttpStatus) -> Self {
        Self::new(status.code(), status.reason())
    }

    /// Reads one response header block from the origin.
    pub async fn read_from<R: Read + Unpin>(
        reader: &mut HttpReader<R>,
        max_header_size: usize,
    ) -> Result<Self, ProxyError> {
        let mut budget = max_header_size;
        let line = reader.read_start_line(&mut budget, Direction::Response).await?;
        let received_at = SystemTime::now();

        let mut response = Self::parse_status_line(&line, received_at)?;
        response
            .fields
            .read_from(reader, Direction::Response, budget)
            .await?;
        Ok(response)
    }

    /// Parses `HTTP/1.x CODE [REASON]`.
    pub fn parse_status_line(line: &str, received_at: SystemTime) -> Result<Self, ProxyError> {
        let trimmed = line.trim();
        let (protocol, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        let rest = rest.trim_start();
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        if code.is_empty() {
            return Err(ProxyError::BadGateway(format!(
                "status line {line:?} does not look like HTTP"
            )));
        }

        let version = parse_version(protocol, Direction::Response)?;
        let status = code
            .parse::<u16>()
            .ok()
            .filter(|c| (100..1000).contains(c))
            .ok_or_else(|| ProxyError::BadGateway(format!("status {code:?} is not a number")))?;
        let reason = reason.trim().to_string();

        Ok(Self {
            status,
            reason,
            version,
            fields: HeaderFields::new(),
            received_at,
        })
    }

    /// Whether this response, answering `request`, carries a body at all.
    pub fn may_have_body(&self, request: &RequestHeader) -> bool {
        request.method != HttpMethod::Head && !forbids_body(self.status)
    }

    /// A copy ready to be sent to the client.
    ///
    /// `Connection` reflects whether the client link stays open. When the
    /// body length is unknown but the link must stay open, the copy announces
    /// chunked transfer coding, which the framing engine then produces. A
    /// closing link gets a chunked body decoded and delimited by the close.
    pub fn for_retransmission(&self, request: &RequestHeader, age: i64, via_name: &str) -> Self {
        let mut copy = self.clone();
        copy.prepare_for_retransmission(via_name);

        let keep_alive = request.keep_alive();
        copy.fields
            .set("Connection", if keep_alive { "Keep-Alive" } else { "close" });

        if keep_alive && self.may_have_body(request) && !copy.fields.contains("Content-Length") {
            copy.fields.set("Transfer-Encoding", "chunked");
        }
        if !keep_alive && is_chunked(&copy.fields) {
            copy.fields.remove("Transfer-Encoding").remove("Content-Length");
        }

        copy.fields.set("Age", &age.max(0).to_string());
        copy
    }
}

impl MessageHead for ResponseHeader {
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
        Direction::Response
    }

    fn first_line(&self) -> String {
        format!("{} {} {}", self.version, self.status, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::io::Cursor;

    fn get_request(keep_alive: bool) -> RequestHeader {
        let mut req = RequestHeader::new(HttpMethod::Get, "/", "example.com", 80);
        if !keep_alive {
            req.fields.set("Connection", "close");
        }
        req
    }

    #[async_std::test]
    async fn test_parse_status_line() {
        let raw = b"HTTP/1.0 404 Not Found Here\r\nContent-Length: 0\r\n\r\n";
        let mut reader = HttpReader::new(Cursor::new(raw.to_vec()));
        let res = ResponseHeader::read_from(&mut reader, 8192).await.unwrap();
        assert_eq!(res.status, 404);
        assert_eq!(res.reason, "Not Found Here");
        assert_eq!(res.version, HttpVersion::V1_0);
        assert_eq!(res.fields.get("content-length"), Some("0"));
    }

    #[test]
    fn test_reason_is_optional() {
        let res = ResponseHeader::parse_status_line("HTTP/1.1 204", SystemTime::now()).unwrap();
        assert_eq!(res.status, 204);
        assert_eq!(res.reason, "");
    }

    #[test]
    fn test_bad_status_lines_are_gateway_faults() {
        for line in ["HTTP/1.1", "HTTP/1.1 OK fine", "ICY 200 OK", ""] {
            let err = ResponseHeader::parse_status_line(line, SystemTime::now()).unwrap_err();
            assert!(matches!(err, ProxyError::BadGateway(_)), "{line:?}");
        }
    }

    #[test]
    fn test_retransmission_keep_alive_unknown_length() {
        let mut res = ResponseHeader::new(200, "OK");
        res.version = HttpVersion::V1_0;
        res.fields.set("Connection", "close").set("Keep-Alive", "timeout=5");

        let out = res.for_retransmission(&get_request(true), 7, "gateway");
        assert_eq!(out.version, HttpVersion::V1_1);
        assert_eq!(out.fields.get("Connection"), Some("Keep-Alive"));
        assert_eq!(out.fields.get("Transfer-Encoding"), Some("chunked"));
        assert_eq!(out.fields.get("Age"), Some("7"));
        assert_eq!(out.fields.get("Via"), Some("1.1 gateway"));
        assert!(!out.fields.contains("Keep-Alive"));
        assert!(out.to_wire().starts_with("HTTP/1.1 200 OK\r\n"));

        assert_eq!(res.version, HttpVersion::V1_0);
        assert!(!res.fields.contains("Transfer-Encoding"));
    }

    #[test]
    fn test_retransmission_close_or_sized() {
        let mut res = ResponseHeader::new(200, "OK");
        let out = res.for_retransmission(&get_request(false), 0, "gateway");
        assert_eq!(out.fields.get("Connection"), Some("close"));
        assert!(!out.fields.contains("Transfer-Encoding"));

        res.fields.set("Content-Length", "10");
        let out = res.for_retransmission(&get_request(true), 0, "gateway");
        assert!(!out.fields.contains("Transfer-Encoding"));
    }

    #[test]
    fn test_chunked_origin_to_closing_client() {
        let mut res = ResponseHeader::new(200, "OK");
        res.fields.set("Transfer-Encoding", "chunked").set("Content-Length", "3");

        let out = res.for_retransmission(&get_request(false), 0, "gateway");
        assert_eq!(out.fields.get("Connection"), Some("close"));
        assert!(!out.fields.contains("Transfer-Encoding"));
        assert!(!out.fields.contains("Content-Length"));

        let out = res.for_retransmission(&get_request(true), 0, "gateway");
        assert_eq!(out.fields.get("Transfer-Encoding"), Some("chunked"));
    }

    #[test]
    fn test_bodiless_responses_never_chunked() {
        let res = ResponseHeader::new(304, "Not Modified");
        let out = res.for_retransmission(&get_request(true), 0, "gateway");
        assert!(!out.fields.contains("Transfer-Encoding"));

        let res = ResponseHeader::new(200, "OK");
        let mut head = get_request(true);
        head.method = HttpMethod::Head;
        assert!(!res.may_have_body(&head));
        let out = res.for_retransmission(&head, 0, "gateway");
        assert!(!out.fields.contains("Transfer-Encoding"));
    }
}
