//! HTTP date values.
//!
//! Header dates may arrive in any of the three grammars allowed by RFC 2616
//! (RFC 1123, RFC 850 and ANSI C `asctime`); they are always written back in
//! the RFC 1123 form. Freshness arithmetic works on whole seconds.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HttpDate(SystemTime);

impl HttpDate {
    pub fn now() -> Self {
        Self(SystemTime::now())
    }

    /// Parses any of the three RFC 2616 date formats.
    pub fn parse(s: &str) -> Option<Self> {
        httpdate::parse_http_date(s.trim()).ok().map(Self)
    }

    pub fn from_unix_secs(secs: i64) -> Self {
        let t = if secs >= 0 {
            UNIX_EPOCH + Duration::from_secs(secs as u64)
        } else {
            UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
        };
        Self(t)
    }

    /// Whole seconds since the Unix epoch (negative before it).
    pub fn unix_secs(&self) -> i64 {
        match self.0.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        }
    }

    pub fn system_time(&self) -> SystemTime {
        self.0
    }
}

impl From<SystemTime> for HttpDate {
    fn from(t: SystemTime) -> Self {
        Self(t)
    }
}

impl fmt::Display for HttpDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&httpdate::fmt_http_date(self.0))
    }
}
