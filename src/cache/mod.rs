//! Shared response cache.
//!
//! [`Cache`] applies the storage policy of a shared HTTP/1.1 cache on top of
//! a [`Storage`] backend. Operations on one key are serialized; different
//! keys never wait for each other.

pub mod entry;
pub mod freshness;
pub mod store;

use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::http::HttpMethod;
use crate::http::body::MessageBody;
use crate::http::request::RequestHeader;
use crate::http::response::ResponseHeader;
use crate::http::status::is_cacheable;
use entry::{ServerResponse, Validation};
use store::{DiskStore, MemoryStore, Storage};

pub struct Cache {
    store: Box<dyn Storage>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Cache {
    pub fn new(store: impl Storage + 'static) -> Self {
        Self {
            store: Box::new(store),
            locks: DashMap::new(),
        }
    }

    /// A disk backed cache in `dir`, or an in-memory one when `dir` is `None`.
    pub fn open(dir: Option<&Path>) -> io::Result<Self> {
        match dir {
            Some(dir) => {
                let store = DiskStore::open(dir)?;
                info!(dir = %dir.display(), entries = store.keys().len(), "using disk cache");
                Ok(Self::new(store))
            }
            None => {
                info!("using in-memory cache");
                Ok(Self::new(MemoryStore::new()))
            }
        }
    }

    /// Runs `f` while holding the lock of `key`.
    ///
    /// A key's lock lives only while someone holds or waits for it.
    fn with_key<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Offers the response to `request` for storage and returns whether it
    /// was stored.
    ///
    /// Only GET responses are ever stored. A HEAD response evicts the stored
    /// entry when its validators disagree with it; any other method marks the
    /// stored entry stale.
    pub fn put(&self, request: &RequestHeader, response: &ServerResponse) -> io::Result<bool> {
        let key = request.url();
        self.with_key(&key, || self.store_locked(&key, request, response))
    }

    fn store_locked(&self, key: &str, request: &RequestHeader, response: &ServerResponse) -> io::Result<bool> {
        match request.method {
            HttpMethod::Get => {
                if !may_store(request, &response.header) {
                    debug!(url = %key, status = response.header.status, "not cacheable");
                    return Ok(false);
                }
                let mut entry = response.clone();
                entry.invalidated = false;
                entry.validation = Validation::Unconditional;
                self.store.put(key, &entry)?;
                debug!(url = %key, "stored");
                Ok(true)
            }
            HttpMethod::Head => {
                if let Some(stored) = self.store.get(key)? {
                    if validators_differ(&stored.header, &response.header) {
                        self.store.remove(key)?;
                        debug!(url = %key, "evicted, validators changed");
                    }
                }
                Ok(false)
            }
            _ => {
                if let Some(mut stored) = self.store.get(key)? {
                    if !stored.invalidated {
                        stored.invalidate();
                        self.store.put(key, &stored)?;
                        debug!(url = %key, method = %request.method, "invalidated");
                    }
                }
                Ok(false)
            }
        }
    }

    /// The stored entry that may answer `request`, fresh or not.
    ///
    /// The returned copy carries `request` as the request it answers, so
    /// freshness is judged against the client's current directives. HEAD
    /// requests get the entry without its body.
    pub fn get(&self, request: &RequestHeader) -> io::Result<Option<ServerResponse>> {
        if !matches!(request.method, HttpMethod::Get | HttpMethod::Head) {
            return Ok(None);
        }
        if request.fields.contains_value("Pragma", "no-cache")
            || request.fields.contains_value("Cache-Control", "no-cache")
        {
            return Ok(None);
        }

        let Some(mut entry) = self.get_url(&request.url())? else {
            return Ok(None);
        };
        entry.request = request.clone();
        if request.method == HttpMethod::Head {
            entry.body = MessageBody::empty();
        }
        Ok(Some(entry))
    }

    /// The entry stored under `key` as is.
    pub fn get_url(&self, key: &str) -> io::Result<Option<ServerResponse>> {
        self.with_key(key, || self.store.get(key))
    }

    /// Keys of all stored entries, sorted.
    pub fn cached_urls(&self) -> Vec<String> {
        let mut keys = self.store.keys();
        keys.sort();
        keys
    }

    pub fn clear(&self) -> io::Result<()> {
        self.store.clear()?;
        info!("cache cleared");
        Ok(())
    }
}

fn may_store(request: &RequestHeader, response: &ResponseHeader) -> bool {
    let client = &request.fields;
    let server = &response.fields;
    is_cacheable(response.status)
        && !["no-cache", "no-store"]
            .iter()
            .any(|d| client.contains_value("Cache-Control", d))
        && !["no-cache", "private", "no-store"]
            .iter()
            .any(|d| server.contains_value("Cache-Control", d))
}

/// A validator differs when the new response carries it with another value
/// than the stored one. Validators absent from the new response prove nothing.
fn validators_differ(stored: &ResponseHeader, fresh: &ResponseHeader) -> bool {
    ["ETag", "Last-Modified"].iter().any(|name| {
        fresh
            .fields
            .get(name)
            .is_some_and(|value| !stored.fields.equals(name, Some(value)))
    })
}
