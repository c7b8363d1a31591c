use tracing::info;

use crate::cache::entry::{ServerResponse, Validation};

/// Receives every finished exchange, from any connection task.
///
/// Implementations must return quickly and never fail; anything slow
/// (lookups, UI updates) belongs on a task of its own.
pub trait ExchangeObserver: Send + Sync {
    fn on_exchange_complete(&self, conn: u64, response: &ServerResponse);
}

pub struct NoopObserver;

impl ExchangeObserver for NoopObserver {
    fn on_exchange_complete(&self, _conn: u64, _response: &ServerResponse) {}
}

/// Writes one summary line per exchange.
pub struct LogObserver;

impl ExchangeObserver for LogObserver {
    fn on_exchange_complete(&self, conn: u64, response: &ServerResponse) {
        let source = match (response.upstream, response.validation) {
            (None, _) => "cache",
            (Some(_), Validation::Verified) => "revalidated",
            (Some(_), Validation::Replaced) => "replaced",
            (Some(_), Validation::Unconditional) => "origin",
        };
        info!(
            conn,
            method = %response.request.method,
            url = %response.request.url(),
            status = response.header.status,
            bytes = response.content_length(),
            source,
            upstream = ?response.upstream,
            latency_ms = response.latency().as_millis() as u64,
            "exchange complete"
        );
    }
}
