//! Opens the pool connection, directly or through a SOCKS5 proxy.
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use super::UpstreamTarget;
use crate::error::{ProxyError, ProxyResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Connects to `target`, tunneling through `socks_proxy` (`host:port`) when given.
///
/// The SOCKS handshake is blocking, so it runs on the blocking pool and the resulting socket is
/// handed to tokio afterwards. The target host name is resolved by the proxy.
pub async fn connect(target: &UpstreamTarget, socks_proxy: Option<&str>) -> ProxyResult<TcpStream> {
    let connecting = async {
        match socks_proxy {
            None => Ok::<_, ProxyError>(
                TcpStream::connect((target.host.as_str(), target.port)).await?,
            ),
            Some(proxy) => {
                debug!("Connecting to {target} through SOCKS5 proxy {proxy}");
                let proxy = proxy.to_string();
                let host = target.host.clone();
                let port = target.port;
                let stream = tokio::task::spawn_blocking(move || {
                    socks::Socks5Stream::connect(proxy.as_str(), (host.as_str(), port))
                })
                .await
                .map_err(|e| ProxyError::Io(std::io::Error::other(e)))??
                .into_inner();
                stream.set_nonblocking(true)?;
                Ok(TcpStream::from_std(stream)?)
            }
        }
    };
    tokio::time::timeout(CONNECT_TIMEOUT, connecting).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    #[tokio::test]
    async fn direct_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = UpstreamTarget::new("127.0.0.1", port);
        let (client, server) = tokio::join!(connect(&target, None), listener.accept());
        assert!(client.is_ok());
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn tunnels_through_socks5() {
        // minimal SOCKS5 server: no auth, accepts one CONNECT and echoes afterwards
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            s.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting[0], 5);
            s.write_all(&[5, 0]).await.unwrap();
            let mut head = [0u8; 4];
            s.read_exact(&mut head).await.unwrap();
            assert_eq!(head[1], 1);
            assert_eq!(head[3], 3, "host name should be left to the proxy");
            let mut len = [0u8; 1];
            s.read_exact(&mut len).await.unwrap();
            let mut host = vec![0u8; len[0] as usize + 2];
            s.read_exact(&mut host).await.unwrap();
            assert_eq!(&host[..len[0] as usize], b"pool.example.com");
            s.write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0, 0]).await.unwrap();
            let mut buf = [0u8; 4];
            s.read_exact(&mut buf).await.unwrap();
            s.write_all(&buf).await.unwrap();
        });

        let target = UpstreamTarget::new("pool.example.com", 3333);
        let mut stream = connect(&target, Some(&proxy_addr.to_string()))
            .await
            .unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.await.unwrap();
    }
}
