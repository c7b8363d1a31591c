//! Age, freshness and revalidation of cached responses (RFC 2616 §13).
//!
//! All arithmetic is done in whole seconds. Every computation has an `_at`
//! variant taking the current instant explicitly.

use std::time::SystemTime;

use crate::cache::entry::{ServerResponse, Validation};
use crate::http::date::HttpDate;
use crate::http::request::RequestHeader;
use crate::http::response::ResponseHeader;

/// Max age used when neither side gives one and `Last-Modified` is unknown.
pub const DEFAULT_MAX_AGE: i64 = 600;

/// Fields of a 304 that must not replace the cached ones: they describe the
/// (absent) body of the 304 itself.
const FRAMING_FIELDS: [&str; 3] = ["Content-Length", "Transfer-Encoding", "Trailer"];

fn secs(t: SystemTime) -> i64 {
    HttpDate::from(t).unix_secs()
}

impl ServerResponse {
    pub fn age(&self) -> i64 {
        self.age_at(SystemTime::now())
    }

    /// Current age in seconds, per RFC 2616 §13.2.3.
    pub fn age_at(&self, now: SystemTime) -> i64 {
        let now = secs(now);
        let fields = &self.header.fields;
        let date_value = fields.date("Date").map_or(now, |d| d.unix_secs());
        let age_value = fields
            .get("Age")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let request_time = secs(self.request_sent);
        let response_time = secs(self.header.received_at);

        let apparent_age = (response_time - date_value).max(0);
        let corrected_received_age = apparent_age.max(age_value);
        let response_delay = response_time - request_time;
        let corrected_initial_age = corrected_received_age + response_delay;
        let resident_time = now - response_time;
        corrected_initial_age + resident_time
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(SystemTime::now())
    }

    /// Whether the entry may be served without contacting the origin.
    ///
    /// The limits sent by the origin (`max-age`, else `Expires - Date`) and
    /// by the current request (`max-age`) are combined by taking the smaller.
    /// Without either, the max age is 10% of the time since `Last-Modified`,
    /// or [`DEFAULT_MAX_AGE`]. The entry is fresh while
    /// `max_age + max-stale > age - min-fresh`, both directives taken from
    /// the request the entry is about to answer.
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        if self.invalidated {
            return false;
        }
        let fields = &self.header.fields;
        if fields.contains_value("Cache-Control", "must-revalidate") {
            return false;
        }

        let now_secs = secs(now);
        let server_max_age = fields.cache_control_secs("max-age").or_else(|| {
            let expires = fields.date("Expires")?;
            let date = fields.date("Date").map_or(now_secs, |d| d.unix_secs());
            Some(expires.unix_secs() - date)
        });

        let client = &self.request.fields;
        let client_max_age = client.cache_control_secs("max-age");
        let min_fresh = client.cache_control_secs("min-fresh").unwrap_or(0);
        let max_stale = client.cache_control_secs("max-stale").unwrap_or(0);

        let max_age = match (server_max_age, client_max_age) {
            (Some(server), Some(client)) => server.min(client),
            (Some(server), None) => server,
            (None, Some(client)) => client,
            (None, None) => match fields.date("Last-Modified") {
                Some(modified) => (now_secs - modified.unix_secs()) / 10,
                None => DEFAULT_MAX_AGE,
            },
        };

        max_age + max_stale > self.age_at(now) - min_fresh
    }
}

/// Turns `request` into a conditional one built from the validators of a
/// stale `cached` entry.
///
/// Returns `None` when the client already asked conditionally, or when the
/// entry carries no validator; the request is then sent unchanged.
pub fn conditional_request(request: &RequestHeader, cached: &ServerResponse) -> Option<RequestHeader> {
    if request.is_conditional() {
        return None;
    }

    let mut conditional = request.clone();
    let mut added = false;
    if let Some(etag) = cached.header.fields.get("ETag") {
        conditional.fields.set("If-Match", etag);
        added = true;
    }
    if let Some(modified) = cached.header.fields.get("Last-Modified") {
        conditional.fields.set("If-Modified-Since", modified);
        added = true;
    }
    added.then_some(conditional)
}

/// Folds a 304 answer into the stale entry it confirmed.
///
/// Fields of the 304 replace the cached ones, the receive instant is
/// refreshed and the cached body is kept.
pub fn merge_not_modified(
    mut cached: ServerResponse,
    not_modified: &ResponseHeader,
    request: RequestHeader,
    request_sent: SystemTime,
) -> ServerResponse {
    let mut update = not_modified.fields.clone();
    for name in FRAMING_FIELDS {
        update.remove(name);
    }
    cached.header.fields.merge(&update);
    cached.header.received_at = not_modified.received_at;

    cached.request = request;
    cached.request_sent = request_sent;
    cached.invalidated = false;
    cached.validation = Validation::Verified;
    cached
}

/// Whether the client's own conditional fields all match a cached header:
/// `If-None-Match`/`If-Match` against `ETag`, `If-Modified-Since` against
/// `Last-Modified`. At least one such field must be present.
pub fn client_validators_match(request: &RequestHeader, cached: &ResponseHeader) -> bool {
    let fields = &request.fields;
    let etag = cached.fields.get("ETag");
    let mut checked = false;

    for name in ["If-None-Match", "If-Match"] {
        if fields.contains(name) {
            checked = true;
            let matches = etag.is_some_and(|etag| {
                fields.values(name).iter().any(|v| *v == "*" || v.eq_ignore_ascii_case(etag))
            });
            if !matches {
                return false;
            }
        }
    }

    if fields.contains("If-Modified-Since") {
        checked = true;
        let since = fields.date("If-Modified-Since");
        let modified = cached.fields.date("Last-Modified");
        match (since, modified) {
            (Some(since), Some(modified)) if modified <= since => {}
            _ => return false,
        }
    }

    checked
}
