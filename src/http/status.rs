/// Status codes the proxy emits on its own behalf (cache hits and error pages).
/// Statuses relayed from an origin are kept as raw numbers in
/// [`ResponseHeader`](crate::http::response::ResponseHeader).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok = 200,
    NotModified = 304,

    BadRequest = 400,
    LengthRequired = 411,

    InternalServerError = 500,
    BadGateway = 502,
    GatewayTimeout = 504,
    HttpVersionNotSupported = 505,
}

impl HttpStatus {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn reason(self) -> &'static str {
        match self {
            HttpStatus::Ok => "OK",                                                 // 200
            HttpStatus::NotModified => "Not Modified",                              // 304

            HttpStatus::BadRequest => "Bad Request",                                // 400
            HttpStatus::LengthRequired => "Length Required",                        // 411

            HttpStatus::InternalServerError => "Internal Server Error",             // 500
            HttpStatus::BadGateway => "Bad Gateway",                                // 502
            HttpStatus::GatewayTimeout => "Gateway Timeout",                        // 504
            HttpStatus::HttpVersionNotSupported => "HTTP Version Not Supported",    // 505
        }
    }
}

/// Statuses whose responses never carry a body (1xx, 204, 304).
pub fn forbids_body(code: u16) -> bool {
    code / 100 == 1 || code == 204 || code == 304
}

/// Statuses a shared cache may store for a `GET`.
pub fn is_cacheable(code: u16) -> bool {
    matches!(code, 200 | 203 | 300 | 301 | 410)
}
