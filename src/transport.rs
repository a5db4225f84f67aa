//! TCP transport.
//!
//! Opens the API connection with:
//! - a hard connect deadline covering resolution and every address tried
//! - `SO_KEEPALIVE` so idle sessions notice dead peers
//! - `TCP_NODELAY`, since every command is one small write followed by a wait

use std::io;

use tokio::net::{lookup_host, TcpSocket, TcpStream};

use crate::config::ClientConfig;
use crate::error::{RouterError, Result};

/// Connect to the router described by `config`.
///
/// # Errors
///
/// - [`RouterError::ConnectTimeout`] if the deadline passes first
/// - [`RouterError::Io`] on refusal, resolution failure, or socket errors
pub async fn connect_tcp(config: &ClientConfig) -> Result<TcpStream> {
    let address = config.address();

    match tokio::time::timeout(config.connect_timeout, open_stream(&address)).await {
        Ok(Ok(stream)) => {
            tracing::debug!(%address, "connected");
            Ok(stream)
        }
        Ok(Err(e)) => {
            tracing::debug!(%address, error = %e, "connect failed");
            Err(RouterError::Io(e))
        }
        Err(_) => {
            tracing::warn!(%address, timeout = ?config.connect_timeout, "connect timed out");
            Err(RouterError::ConnectTimeout(config.connect_timeout))
        }
    }
}

/// Try each resolved address in turn.
async fn open_stream(address: &str) -> io::Result<TcpStream> {
    let mut last_err = None;

    for addr in lookup_host(address).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(true)?;

        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::trace!(%addr, error = %e, "address refused");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {}", address),
        )
    }))
}
