//! SOCKS5 front door (RFC 1928, RFC 1929 when credentials are configured).
//!
//! Every accepted CONNECT is carried through one pool member; the forwarder
//! handles selection and eviction, this module only speaks the wire
//! protocol and bridges bytes.

use std::io;
use std::sync::Arc;

use tokio::io::{copy_bidirectional, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::forward::{self, ForwardError};
use crate::pool::ProxyStore;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REP_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

fn other(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg)
}

/// Accept loop. Runs until the listener errors out.
pub async fn serve(
    store: Arc<dyn ProxyStore>,
    cfg: ListenerConfig,
    timeout_secs: u64,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", cfg.ip, cfg.port);
    let listener = TcpListener::bind(&addr).await?;
    let creds = if !cfg.user_name.is_empty() && !cfg.password.is_empty() {
        info!(user = %cfg.user_name, "socks5 authentication enabled");
        Some((cfg.user_name.clone(), cfg.password.clone()))
    } else {
        None
    };
    let pool = store.len().await.unwrap_or(0);
    info!(%addr, pool, "socks5 listener up");

    loop {
        let (stream, peer) = listener.accept().await?;
        let store = store.clone();
        let creds = creds.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, store, creds, timeout_secs).await {
                debug!(%peer, error = %e, "client session ended with error");
            }
        });
    }
}

async fn handle_client(
    mut client: TcpStream,
    store: Arc<dyn ProxyStore>,
    creds: Option<(String, String)>,
    timeout_secs: u64,
) -> io::Result<()> {
    negotiate_method(&mut client, creds.as_ref()).await?;

    // request: VER CMD RSV ATYP
    let mut head = [0u8; 4];
    client.read_exact(&mut head).await?;
    if head[0] != 0x05 {
        return Err(other("bad request version"));
    }
    if head[1] != 0x01 {
        reply(&mut client, REP_COMMAND_NOT_SUPPORTED).await?;
        return Err(other("only CONNECT is supported"));
    }
    let address = match read_destination(&mut client, head[3]).await {
        Ok(address) => address,
        Err(e) => {
            reply(&mut client, REP_ADDRESS_NOT_SUPPORTED).await?;
            return Err(e);
        }
    };

    match forward::connect_via_pool(&store, "tcp", &address, timeout_secs).await {
        Ok(mut upstream) => {
            reply(&mut client, REP_SUCCESS).await?;
            let _ = copy_bidirectional(&mut client, &mut upstream).await;
            Ok(())
        }
        Err(e) => {
            if matches!(e, ForwardError::EmptyPool) {
                warn!(destination = %address, "no proxy available for client");
            }
            reply(&mut client, REP_GENERAL_FAILURE).await?;
            Err(other("no usable upstream"))
        }
    }
}

async fn negotiate_method(
    client: &mut TcpStream,
    creds: Option<&(String, String)>,
) -> io::Result<()> {
    let mut hello = [0u8; 2];
    client.read_exact(&mut hello).await?;
    if hello[0] != 0x05 {
        return Err(other("bad greeting version"));
    }
    let mut methods = vec![0u8; hello[1] as usize];
    client.read_exact(&mut methods).await?;

    match creds {
        None => {
            if !methods.contains(&0x00) {
                client.write_all(&[0x05, 0xFF]).await?;
                return Err(other("client offered no acceptable method"));
            }
            client.write_all(&[0x05, 0x00]).await?;
            Ok(())
        }
        Some((user, pass)) => {
            if !methods.contains(&0x02) {
                client.write_all(&[0x05, 0xFF]).await?;
                return Err(other("client cannot do username/password auth"));
            }
            client.write_all(&[0x05, 0x02]).await?;
            subnegotiate_userpass(client, user, pass).await
        }
    }
}

async fn subnegotiate_userpass(
    client: &mut TcpStream,
    user: &str,
    pass: &str,
) -> io::Result<()> {
    let mut head = [0u8; 2];
    client.read_exact(&mut head).await?;
    if head[0] != 0x01 {
        return Err(other("bad auth subnegotiation version"));
    }
    let mut uname = vec![0u8; head[1] as usize];
    client.read_exact(&mut uname).await?;
    let mut plen = [0u8; 1];
    client.read_exact(&mut plen).await?;
    let mut passwd = vec![0u8; plen[0] as usize];
    client.read_exact(&mut passwd).await?;

    if uname == user.as_bytes() && passwd == pass.as_bytes() {
        client.write_all(&[0x01, 0x00]).await?;
        Ok(())
    } else {
        client.write_all(&[0x01, 0x01]).await?;
        Err(other("bad credentials"))
    }
}

async fn read_destination(client: &mut TcpStream, atyp: u8) -> io::Result<String> {
    let host = match atyp {
        0x01 => {
            let mut addr = [0u8; 4];
            client.read_exact(&mut addr).await?;
            std::net::Ipv4Addr::from(addr).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            client.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            client.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        0x04 => {
            let mut addr = [0u8; 16];
            client.read_exact(&mut addr).await?;
            std::net::Ipv6Addr::from(addr).to_string()
        }
        atyp => return Err(other(&format!("unsupported atyp {atyp}"))),
    };
    let mut port = [0u8; 2];
    client.read_exact(&mut port).await?;
    Ok(format!("{}:{}", host, u16::from_be_bytes(port)))
}

async fn reply(client: &mut TcpStream, rep: u8) -> io::Result<()> {
    // bound address is not meaningful for a tunneled connect
    client
        .write_all(&[0x05, rep, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await
}
