//! Dialing a destination through a pool member, with failure-driven
//! re-selection.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::pool::{ProxyStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("no proxy available")]
    EmptyPool,
    #[error("http proxy tunneling supports tcp only")]
    UnsupportedNetwork,
    #[error("pool error: {0}")]
    Store(#[from] StoreError),
}

fn other(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg.into())
}

fn record(store: &Arc<dyn ProxyStore>, proxy: &str, success: bool) {
    if let Some(rec) = store.as_recorder() {
        rec.record_result(proxy, success);
    }
}

/// Connect to `address` through a member of the pool.
///
/// Each failing member is reported and evicted before trying the next
/// selection, so the loop terminates: either some member carries the
/// connection or the pool drains to `EmptyPool`.
pub async fn connect_via_pool(
    store: &Arc<dyn ProxyStore>,
    network: &str,
    address: &str,
    timeout_secs: u64,
) -> Result<TcpStream, ForwardError> {
    if network != "tcp" {
        return Err(ForwardError::UnsupportedNetwork);
    }
    let timeout = Duration::from_secs(timeout_secs.max(1));
    loop {
        let proxy = match store.get_next().await {
            Ok(proxy) => proxy,
            Err(StoreError::EmptyPool) => return Err(ForwardError::EmptyPool),
            Err(e) => return Err(e.into()),
        };
        match dial_through(&proxy, address, timeout).await {
            Ok(stream) => {
                record(store, &proxy, true);
                return Ok(stream);
            }
            Err(e) => {
                debug!(%proxy, error = %e, "upstream failed, rotating to the next");
                record(store, &proxy, false);
                let _ = store.mark_invalid(&proxy).await;
            }
        }
    }
}

/// One attempt on one proxy; any error means the caller evicts and retries.
pub async fn dial_through(
    proxy: &str,
    address: &str,
    timeout: Duration,
) -> io::Result<TcpStream> {
    if proxy.starts_with("socks5://") {
        dial_socks5(proxy, address, timeout).await
    } else if proxy.starts_with("http://") || proxy.starts_with("https://") {
        dial_http_connect(proxy, address, timeout).await
    } else {
        Err(other(format!("unknown proxy scheme: {proxy}")))
    }
}

fn parse_proxy(proxy: &str) -> io::Result<Url> {
    Url::parse(proxy).map_err(|e| other(format!("bad proxy url {proxy}: {e}")))
}

async fn connect_host(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
    }
}

async fn dial_socks5(proxy: &str, address: &str, timeout: Duration) -> io::Result<TcpStream> {
    let u = parse_proxy(proxy)?;
    let host = u.host_str().ok_or_else(|| other("proxy url has no host"))?;
    let port = u.port().unwrap_or(1080);
    let mut stream = connect_host(host, port, timeout).await?;

    let username = u.username();
    let creds = if username.is_empty() {
        None
    } else {
        Some((username.to_string(), u.password().unwrap_or("").to_string()))
    };

    // method negotiation
    if creds.is_some() {
        stream.write_all(&[0x05, 0x02, 0x00, 0x02]).await?;
    } else {
        stream.write_all(&[0x05, 0x01, 0x00]).await?;
    }
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != 0x05 {
        return Err(other("upstream is not socks5"));
    }
    match choice[1] {
        0x00 => {}
        0x02 => {
            let (user, pass) = creds
                .as_ref()
                .ok_or_else(|| other("upstream demands auth but none configured"))?;
            if user.len() > 255 || pass.len() > 255 {
                return Err(other("credentials too long"));
            }
            let mut sub = Vec::with_capacity(3 + user.len() + pass.len());
            sub.push(0x01);
            sub.push(user.len() as u8);
            sub.extend_from_slice(user.as_bytes());
            sub.push(pass.len() as u8);
            sub.extend_from_slice(pass.as_bytes());
            stream.write_all(&sub).await?;
            let mut status = [0u8; 2];
            stream.read_exact(&mut status).await?;
            if status[1] != 0x00 {
                return Err(other("upstream rejected credentials"));
            }
        }
        _ => return Err(other("no acceptable auth method")),
    }

    // CONNECT with domain addressing
    let (dst_host, dst_port) = address
        .rsplit_once(':')
        .ok_or_else(|| other(format!("destination {address} has no port")))?;
    let dst_port: u16 = dst_port
        .parse()
        .map_err(|_| other(format!("bad destination port in {address}")))?;
    if dst_host.len() > 255 {
        return Err(other("destination host too long"));
    }
    let mut req = Vec::with_capacity(7 + dst_host.len());
    req.extend_from_slice(&[0x05, 0x01, 0x00, 0x03, dst_host.len() as u8]);
    req.extend_from_slice(dst_host.as_bytes());
    req.extend_from_slice(&dst_port.to_be_bytes());
    stream.write_all(&req).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(other(format!("upstream connect refused: rep={}", head[1])));
    }
    // drain the bound address so the tunnel starts clean
    let addr_len = match head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        atyp => return Err(other(format!("bad atyp in reply: {atyp}"))),
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await?;

    Ok(stream)
}

async fn dial_http_connect(proxy: &str, address: &str, timeout: Duration) -> io::Result<TcpStream> {
    let u = parse_proxy(proxy)?;
    let host = u.host_str().ok_or_else(|| other("proxy url has no host"))?;
    let port = u
        .port_or_known_default()
        .ok_or_else(|| other("proxy url has no port"))?;
    let mut stream = connect_host(host, port, timeout).await?;

    let target = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:80")
    };
    let mut req = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if !u.username().is_empty() {
        let auth = format!("{}:{}", u.username(), u.password().unwrap_or(""));
        req.push_str(&format!(
            "Proxy-Authorization: Basic {}\r\n",
            BASE64.encode(auth)
        ));
    }
    req.push_str("\r\n");
    stream.write_all(req.as_bytes()).await?;

    let mut buf = vec![0u8; 4096];
    let n = match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
        Ok(res) => res?,
        Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "tunnel reply timed out")),
    };
    let reply = String::from_utf8_lossy(&buf[..n]);
    if !reply.contains("200 Connection established") {
        return Err(other("tunnel refused"));
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_scheme_fails_without_dialing() {
        let err = dial_through("ftp://1.2.3.4:21", "example.com:80", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown proxy scheme"));
    }

    #[tokio::test]
    async fn refused_upstream_is_an_error() {
        let err = dial_through(
            "socks5://127.0.0.1:1",
            "example.com:80",
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(err.kind() == io::ErrorKind::ConnectionRefused || err.kind() == io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn non_tcp_network_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.txt").to_str().unwrap().to_string();
        let store: Arc<dyn ProxyStore> = Arc::new(
            crate::pool::FileStore::open(&path, 10).await.unwrap(),
        );
        store.add("http://127.0.0.1:1").await.unwrap();
        let err = connect_via_pool(&store, "udp", "example.com:53", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::UnsupportedNetwork));
        // the pool was never touched
        assert_eq!(store.len().await.unwrap(), 1);
    }
}
