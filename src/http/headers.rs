//! HTTP header fields shared by [`RequestHeader`](crate::http::request::RequestHeader)
//! and [`ResponseHeader`](crate::http::response::ResponseHeader).
//!
//! Field names are normalized on every access (`content-type`, `CONTENT-TYPE`
//! and `Content-Type` all become `Content-Type`), so lookups are
//! case-insensitive. A field appearing several times is stored once, its
//! values joined with `", "`, and split again by [`HeaderFields::values`].
//!
//! Fields are kept in an ordered map so a relayed message keeps the order the
//! origin used.

use async_std::io::Read;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Direction, ProxyError};
use crate::http::date::HttpDate;
use crate::http::reader::HttpReader;

/// Fields meaningful for a single connection only; never relayed.
pub const HOP_BY_HOP_FIELDS: [&str; 7] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Authenticate",
    "Proxy-Authorization",
    "Te",
    "Upgrade",
    "Proxy-Connection",
];

/// Normalizes the case of a field name: the first letter of every
/// dash-separated part upper case, the rest lower case.
pub fn normalize_field_name(name: &str) -> String {
    let name = name.trim().to_ascii_lowercase();
    let mut result = String::with_capacity(name.len());
    for (i, part) in name.split('-').enumerate() {
        if i > 0 {
            result.push('-');
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            result.push(first.to_ascii_uppercase());
            result.push_str(chars.as_str());
        }
    }
    result
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFields {
    fields: IndexMap<String, String>,
}

impl HeaderFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(&normalize_field_name(name)).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(&normalize_field_name(name))
    }

    /// Replaces any previous value of the field.
    pub fn set(&mut self, name: &str, value: &str) -> &mut Self {
        self.fields
            .insert(normalize_field_name(name), value.trim().to_string());
        self
    }

    /// Adds a value to the field, comma-joined after any existing value.
    pub fn append(&mut self, name: &str, value: &str) -> &mut Self {
        let name = normalize_field_name(name);
        let value = value.trim();
        match self.fields.get_mut(&name) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                self.fields.insert(name, value.to_string());
            }
        }
        self
    }

    pub fn remove(&mut self, name: &str) -> &mut Self {
        self.fields.shift_remove(&normalize_field_name(name));
        self
    }

    /// The comma-separated values of a field, empty when it is absent.
    pub fn values(&self, name: &str) -> Vec<&str> {
        match self.get(name) {
            Some(v) => v.split(',').map(str::trim).filter(|v| !v.is_empty()).collect(),
            None => Vec::new(),
        }
    }

    /// Whether `value` is one of the field's comma-separated values,
    /// compared case-insensitively.
    pub fn contains_value(&self, name: &str, value: &str) -> bool {
        self.values(name)
            .iter()
            .any(|v| v.eq_ignore_ascii_case(value))
    }

    /// Case-insensitive comparison of the whole field value. Two absent
    /// values are equal.
    pub fn equals(&self, name: &str, value: Option<&str>) -> bool {
        match (self.get(name), value) {
            (None, None) => true,
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b.trim()),
            _ => false,
        }
    }

    /// The field parsed as an HTTP date; unparseable dates count as absent.
    pub fn date(&self, name: &str) -> Option<HttpDate> {
        self.get(name).and_then(HttpDate::parse)
    }

    /// The value of a `token=value` directive of `Cache-Control`.
    ///
    /// For `Cache-Control: private, max-age=60`, `max-age` yields `"60"`
    /// while `private` (a bare token) yields `None`.
    pub fn cache_control(&self, directive: &str) -> Option<String> {
        self.values("Cache-Control").into_iter().find_map(|element| {
            let (token, value) = element.split_once('=')?;
            token
                .trim()
                .eq_ignore_ascii_case(directive)
                .then(|| value.trim().trim_matches('"').to_string())
        })
    }

    /// A `Cache-Control` directive value parsed as seconds.
    pub fn cache_control_secs(&self, directive: &str) -> Option<i64> {
        self.cache_control(directive)?.parse().ok()
    }

    /// Copies every field of `other` over this set; `other` wins on conflicts.
    pub fn merge(&mut self, other: &HeaderFields) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    pub fn strip_hop_by_hop(&mut self) {
        for name in HOP_BY_HOP_FIELDS {
            self.remove(name);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `Name: value\r\n` lines, without the terminating empty line.
    pub fn stringify(&self) -> String {
        let mut result = String::new();
        for (name, value) in &self.fields {
            result.push_str(name);
            result.push_str(": ");
            result.push_str(value);
            result.push_str("\r\n");
        }
        result
    }

    /// Reads field lines up to and including the empty line ending a header
    /// block, adding them to this set.
    ///
    /// Lines starting with a space or tab continue the previous field.
    /// `limit` bounds the total number of bytes read.
    pub async fn read_from<R: Read + Unpin>(
        &mut self,
        reader: &mut HttpReader<R>,
        direction: Direction,
        limit: usize,
    ) -> Result<(), ProxyError> {
        let mut last: Option<String> = None;
        let mut remaining = limit;

        loop {
            let line = reader
                .read_line(remaining, direction)
                .await
                .map_err(|err| match err.status() {
                    Some(_) => direction.fault("header block is too large"),
                    None => err,
                })?;
            if line.is_empty() {
                return Ok(());
            }
            remaining = remaining.saturating_sub(line.len() + 2);

            if line.starts_with([' ', '\t']) {
                if let Some(name) = &last {
                    if let Some(value) = self.fields.get_mut(name) {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                }
                continue;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| direction.fault(format!("malformed header line: {line:?}")))?;
            if name.trim().is_empty() {
                return Err(direction.fault(format!("header line without a name: {line:?}")));
            }
            self.append(name, value);
            last = Some(normalize_field_name(name));
        }
    }
}
