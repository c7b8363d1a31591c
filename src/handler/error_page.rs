use crate::error::ProxyError;
use crate::http::MessageHead;
use crate::http::date::HttpDate;
use crate::http::request::RequestHeader;
use crate::http::response::ResponseHeader;
use crate::http::status::HttpStatus;

const TEMPLATE: &str = include_str!("error_template.html");

const NO_REQUEST: &str = "(no request was received)";
const NO_RESPONSE: &str = "(no response was received)";

/// An HTML page explaining a failed exchange, ready to be written to the
/// client.
#[derive(Debug)]
pub struct ErrorPage {
    pub header: ResponseHeader,
    pub body: Vec<u8>,
}

impl ErrorPage {
    /// Page for a protocol fault. Faults without a status of their own are
    /// reported as 500.
    pub fn for_error(
        err: &ProxyError,
        request: Option<&RequestHeader>,
        response: Option<&ResponseHeader>,
        server_name: &str,
        keep_alive: bool,
    ) -> Self {
        let status = err.status().unwrap_or(HttpStatus::InternalServerError);
        Self::render(status, &err.to_string(), request, response, server_name, keep_alive)
    }

    pub fn render(
        status: HttpStatus,
        message: &str,
        request: Option<&RequestHeader>,
        response: Option<&ResponseHeader>,
        server_name: &str,
        keep_alive: bool,
    ) -> Self {
        let request_text = request.map_or_else(|| NO_REQUEST.to_string(), |r| r.to_wire());
        let response_text = response.map_or_else(|| NO_RESPONSE.to_string(), |r| r.to_wire());

        let body = TEMPLATE
            .replace("{{code}}", &status.code().to_string())
            .replace("{{description}}", status.reason())
            .replace("{{message}}", &escape_html(message))
            .replace("{{request}}", &escape_html(request_text.trim_end()))
            .replace("{{response}}", &escape_html(response_text.trim_end()))
            .replace("{{timestamp}}", &HttpDate::now().to_string())
            .into_bytes();

        let mut header = ResponseHeader::from_status(status);
        header
            .fields
            .set("Server", server_name)
            .set("Content-Type", "text/html; charset=utf-8")
            .set("Content-Length", &body.len().to_string())
            .set("Connection", if keep_alive { "Keep-Alive" } else { "close" });

        Self { header, body }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.to_wire().into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
