//! A caching forward proxy for HTTP/1.0 and HTTP/1.1.
//!
//! Clients send absolute-URI requests (`GET http://host/path HTTP/1.1`);
//! the proxy answers from its shared cache when it can and forwards the
//! request to the origin otherwise, storing what may be stored.

pub mod cache;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod net;

use std::io;
use std::sync::Arc;

use cache::Cache;
use config::ProxyConfig;
use handler::observer::{ExchangeObserver, LogObserver};

/// Everything a connection task needs, shared by all of them.
#[derive(Clone)]
pub struct ProxyContext {
    pub config: Arc<ProxyConfig>,
    pub cache: Arc<Cache>,
    pub observer: Arc<dyn ExchangeObserver>,
}

impl ProxyContext {
    /// Opens the cache named by `config` and logs every exchange.
    pub fn new(config: ProxyConfig) -> io::Result<Self> {
        let cache = Cache::open(config.cache_dir.as_deref())?;
        Ok(Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            observer: Arc::new(LogObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExchangeObserver>) -> Self {
        self.observer = observer;
        self
    }
}
