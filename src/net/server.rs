//! Listening socket of the proxy.
//!
//! This module only deals with networking: it accepts TCP connections and
//! hands each one to its own task running
//! [`handle_client`](crate::net::connection::handle_client). Everything HTTP
//! happens there and in the `handler` and `http` modules.
//!
//! The server is fully asynchronous and leverages the `async-std` crate;
//! connections are independent of each other and never wait on one another.

use std::io;
use std::net::SocketAddr;

use async_std::net::TcpListener;
use async_std::task;
use tracing::{info, warn};

use crate::ProxyContext;
use crate::net::connection::handle_client;

pub struct Server {
    ctx: ProxyContext,
    listener: TcpListener,
}

impl Server {
    /// Binds to the configured address and port.
    pub async fn bind(ctx: ProxyContext) -> io::Result<Self> {
        let listener = TcpListener::bind((ctx.config.address, ctx.config.port)).await?;
        Ok(Self { ctx, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, spawning one task per client.
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "proxy listening");

        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    task::spawn(handle_client(self.ctx.clone(), stream));
                }
                Err(err) => warn!("failed to accept connection: {err}"),
            }
        }
    }
}
