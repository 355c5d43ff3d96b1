//! Shared helpers: a proxy on an ephemeral port, scripted Aliens and clients

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use alien_core::config::ProxyConfig;
use alien_protocol::Nonce;
use alien_proxy::auth;
use alien_proxy::server::ProxyServer;
use alien_proxy::ProxyState;

/// A proxy serving on 127.0.0.1
pub struct TestProxy {
    pub state: Arc<ProxyState>,
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestProxy {
    pub async fn start(config: ProxyConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ProxyState::new(config, CancellationToken::new()));
        let server = ProxyServer::new(Arc::clone(&state));
        let handle = tokio::spawn(async move {
            let _ = server.run_with_listener(listener).await;
        });
        Self {
            state,
            addr,
            handle,
        }
    }

    pub async fn with_defaults() -> Self {
        Self::start(ProxyConfig::default()).await
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.state.shutdown.cancel();
        self.handle.abort();
    }
}

/// One CRLF-framed CCCP connection, seen from the Alien's side
pub struct CccpConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl CccpConnection {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Send one message with its terminating blank line
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Next message; panics on end of stream
    pub async fn recv(&mut self) -> String {
        self.try_recv().await.expect("connection closed")
    }

    /// Next message, or `None` at end of stream
    pub async fn try_recv(&mut self) -> Option<String> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.read_line())
            .await
            .expect("timed out waiting for a message")?;
        let blank = self.read_line().await;
        assert_eq!(blank.as_deref(), Some(""), "message not followed by a blank line");
        Some(line)
    }

    async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap_or(0);
        if n == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    pub async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await.unwrap();
        buf
    }

    pub async fn shutdown(&mut self) {
        self.writer.shutdown().await.unwrap();
    }

    pub async fn expect_closed(&mut self) {
        assert_eq!(self.try_recv().await, None);
    }
}

/// A scripted Alien holding its control connection
pub struct FakeAlien {
    pub uri: String,
    pub secret: String,
    pub version: String,
    pub control: CccpConnection,
    addr: SocketAddr,
}

/// An INVITE as received by an Alien
#[derive(Debug)]
pub struct Invitation {
    pub key: String,
    pub nonce: Option<Nonce>,
}

impl FakeAlien {
    /// Connect and register, completing the challenge for authenticated
    /// versions
    pub async fn register(addr: SocketAddr, uri: &str, secret: &str, version: &str) -> Self {
        let mut control = CccpConnection::connect(addr).await;
        control
            .send(&format!("REGISTER {} {} {}", uri, secret, version))
            .await;

        if version == "CCCP/0.1" {
            assert_eq!(control.recv().await, "CCCP/0.1 201 Holepunching Failed");
        } else {
            let challenge = control.recv().await;
            let tokens: Vec<&str> = challenge.split_whitespace().collect();
            assert_eq!(tokens[0], "CHALLENGE", "got {}", challenge);
            assert_eq!(tokens[2], version);
            let nonce: Nonce = tokens[1].parse().unwrap();
            control
                .send(&format!("RESPONSE {} {}", auth::challenge(secret, nonce), version))
                .await;
            assert_eq!(control.recv().await, format!("{} 200 OK", version));
        }

        Self {
            uri: uri.to_string(),
            secret: secret.to_string(),
            version: version.to_string(),
            control,
            addr,
        }
    }

    /// Client-visible hostname
    pub fn host(&self) -> String {
        self.uri.replacen('@', ".", 1)
    }

    pub async fn next_invite(&mut self) -> Invitation {
        let line = self.control.recv().await;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(tokens[0], "INVITE", "got {}", line);
        assert_eq!(*tokens.last().unwrap(), self.version);
        let nonce = (tokens.len() == 4).then(|| tokens[2].parse().unwrap());
        Invitation {
            key: tokens[1].to_string(),
            nonce,
        }
    }

    /// Answer an invite with a correctly signed RSVP
    pub async fn rsvp(&self, invitation: &Invitation) -> CccpConnection {
        let digest = invitation
            .nonce
            .map(|nonce| auth::challenge(&self.secret, nonce));
        self.rsvp_with(invitation, digest.as_deref()).await
    }

    /// Answer an invite with an arbitrary digest
    pub async fn rsvp_with(&self, invitation: &Invitation, digest: Option<&str>) -> CccpConnection {
        let mut data = CccpConnection::connect(self.addr).await;
        let line = match digest {
            Some(digest) => format!("RSVP {} {} {} {}", self.uri, invitation.key, digest, self.version),
            None => format!("RSVP {} {} {}", self.uri, invitation.key, self.version),
        };
        data.send(&line).await;
        data
    }
}

/// Start an HTTP request in the background; resolves to the full response
pub fn http_request(addr: SocketAddr, request: String) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    })
}

pub fn get(host: &str, path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: test\r\n\r\n",
        path, host
    )
}

/// Poll `check` until it holds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}
