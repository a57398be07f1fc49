//! Opening sessions over TCP.

use std::net::SocketAddr;

use pg_codec::Channel;
use pg_io::SharedRegistry;
use tokio::net::TcpStream;

use crate::config::Config;
use crate::connection::ServerConnection;
use crate::error::{Error, Result};

/// Connect to `addr` and open a session on a pool from `registry`.
///
/// Acquires a reference to the configured pool, materializing it if needed,
/// and connects on the event loop the channel will run on. If anything
/// fails, the reference is released again. The startup and authentication
/// exchange is left to the caller.
pub async fn connect_tcp(
    config: Config,
    registry: &SharedRegistry,
    addr: SocketAddr,
) -> Result<ServerConnection> {
    let shared_ref = registry.acquire(config.pool_kind.clone(), config.max_io_threads);
    let pool = shared_ref.pool()?;
    let event_loop = pool.next();

    tracing::debug!(addr = %addr, event_loop = event_loop.name(), "connecting");
    let connecting = event_loop.spawn(async move {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok::<_, std::io::Error>(stream)
    });
    let stream = match tokio::time::timeout(config.connect_timeout, connecting).await {
        Err(_) => return Err(Error::ConnectionTimeout),
        Ok(Err(e)) => return Err(Error::Connection(format!("event loop stopped: {e}"))),
        Ok(Ok(stream)) => stream?,
    };

    let channel = Channel::open(stream, addr, &event_loop);
    Ok(ServerConnection::new(config, channel, shared_ref))
}
