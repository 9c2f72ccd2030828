use std::net::SocketAddr;
use std::time::Duration;
use anyhow::anyhow;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tracing::{debug, trace};
use crate::error::TransportError;

/// This is an abstraction for the datagram socket an endpoint sends and receives on,
///  introduced to facilitate mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoapSocket: Send + Sync + 'static {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> Result<usize, TransportError>;

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError>;

    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

#[async_trait]
impl CoapSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], to: SocketAddr) -> Result<usize, TransportError> {
        trace!("UDP socket: sending {} bytes to {:?}", buf.len(), to);
        Ok(UdpSocket::send_to(self, buf, to).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        Ok(UdpSocket::recv_from(self, buf).await?)
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(UdpSocket::local_addr(self)?)
    }
}

pub async fn send_with_timeout(socket: &dyn CoapSocket, buf: &[u8], to: SocketAddr, timeout: Duration) -> Result<usize, TransportError> {
    match tokio::time::timeout(timeout, socket.send_to(buf, to)).await {
        Ok(result) => result,
        Err(_) => {
            debug!("sending to {:?} timed out after {:?}", to, timeout);
            Err(TransportError::Timeout)
        }
    }
}

/// Receive a single datagram, waiting at most `timeout`. `Ok(None)` means that no datagram
///  arrived in time.
pub async fn recv_with_timeout(socket: &dyn CoapSocket, buf: &mut [u8], timeout: Duration) -> Result<Option<(usize, SocketAddr)>, TransportError> {
    match tokio::time::timeout(timeout, socket.recv_from(buf)).await {
        Ok(Ok(received)) => Ok(Some(received)),
        Ok(Err(TransportError::Timeout)) => Ok(None),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(None),
    }
}

/// Resolve a host name to a socket address, preferring IPv4 addresses
pub async fn resolve(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?
        .collect();

    let result = addrs.iter()
        .find(|a| a.is_ipv4())
        .or(addrs.first())
        .copied()
        .ok_or_else(|| anyhow!("host {} did not resolve to an address", host))?;

    debug!("resolved {} to {:?}", host, result);
    Ok(result)
}
