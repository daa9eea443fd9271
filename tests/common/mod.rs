//! Test utilities and mocks for Hopsocks
//!
//! Hops are modelled by small loopback servers speaking a one-line login
//! protocol: the client sends `user:secret\n` and gets `+` or `-` back. The
//! [`LoopbackConnector`] speaks that protocol through whatever address the
//! chain hands it, so hops after the first really travel through the
//! chain's loopback forwarders.

#![allow(dead_code)]

use async_trait::async_trait;
use hopsocks::chain::{Channel, Credential, HopConnector, HopSession, HopSpec};
use hopsocks::error::{ChainError, ChannelError};
use hopsocks::socks::consts::*;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> u16 {
    let (listener, addr) = create_test_listener().await;
    drop(listener);
    addr.port()
}

/// Spawn an echo server
pub async fn spawn_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Fake hop server accepting one username/secret pair
#[derive(Debug, Clone)]
pub struct FakeHop {
    pub addr: SocketAddr,
    pub username: String,
    pub secret: String,
    live: Arc<AtomicUsize>,
}

impl FakeHop {
    /// Logged-in sessions currently connected
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Hop description with the right credential
    pub fn spec(&self) -> HopSpec {
        HopSpec::with_password("127.0.0.1", self.addr.port(), &*self.username, &*self.secret)
    }

    /// Hop description with a wrong credential
    pub fn spec_with_wrong_secret(&self) -> HopSpec {
        HopSpec::with_password("127.0.0.1", self.addr.port(), &*self.username, "wrong")
    }
}

/// Spawn a fake hop
pub async fn spawn_fake_hop(username: &str, secret: &str) -> FakeHop {
    let (listener, addr) = create_test_listener().await;
    let live = Arc::new(AtomicUsize::new(0));
    let expected = format!("{}:{}", username, secret);

    let server_live = live.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let live = server_live.clone();
            let expected = expected.clone();
            tokio::spawn(serve_login(stream, expected, live));
        }
    });

    FakeHop {
        addr,
        username: username.to_string(),
        secret: secret.to_string(),
        live,
    }
}

async fn serve_login(mut stream: TcpStream, expected: String, live: Arc<AtomicUsize>) {
    let line = match read_line(&mut stream).await {
        Ok(line) => line,
        Err(_) => return,
    };
    if line != expected {
        let _ = stream.write_all(b"-").await;
        return;
    }
    if stream.write_all(b"+").await.is_err() {
        return;
    }

    live.fetch_add(1, Ordering::SeqCst);
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    live.fetch_sub(1, Ordering::SeqCst);
}

async fn read_line(stream: &mut TcpStream) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 512 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
        }
    }
    String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Spawn a hop that accepts connections and never answers
pub async fn spawn_silent_hop() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Lifecycle event seen by the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopEvent {
    /// Hop authenticated
    Authenticated(usize),
    /// Hop session closed
    Closed(usize),
}

#[derive(Debug, Default)]
struct ConnectorState {
    events: Mutex<Vec<HopEvent>>,
    live: AtomicUsize,
    fail_close_at: Mutex<Option<usize>>,
    fail_close_ports: Mutex<Vec<u16>>,
}

/// Connector speaking the fake hop login protocol
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector {
    state: Arc<ConnectorState>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make closing hop `index` report an error
    pub fn fail_close_at(&self, index: usize) {
        *self.state.fail_close_at.lock().unwrap() = Some(index);
    }

    /// Make closing the hop listening on `port` report an error
    pub fn fail_close_for_port(&self, port: u16) {
        self.state.fail_close_ports.lock().unwrap().push(port);
    }

    /// Sessions opened and not yet closed
    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<HopEvent> {
        self.state.events.lock().unwrap().clone()
    }

    /// Indexes of hops in the order they authenticated
    pub fn auth_order(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HopEvent::Authenticated(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    /// Indexes of hops in the order they closed
    pub fn close_order(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HopEvent::Closed(i) => Some(i),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl HopConnector for LoopbackConnector {
    async fn connect(
        &self,
        index: usize,
        hop: &HopSpec,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn HopSession>, ChainError> {
        let mut stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ChainError::Connect { index, source })?;

        let secret = match &hop.credential {
            Credential::Password(password) => password.clone(),
            Credential::PrivateKey { key_data, .. } => key_data.clone(),
        };
        let login = format!("{}:{}\n", hop.username, secret);
        stream
            .write_all(login.as_bytes())
            .await
            .map_err(|source| ChainError::Connect { index, source })?;

        let mut answer = [0u8; 1];
        stream
            .read_exact(&mut answer)
            .await
            .map_err(|e| ChainError::Handshake {
                index,
                cause: e.to_string(),
            })?;
        if answer[0] != b'+' {
            return Err(ChainError::AuthenticationFailed {
                index,
                cause: format!("login rejected for {}", hop.username),
            });
        }

        self.state.live.fetch_add(1, Ordering::SeqCst);
        self.state
            .events
            .lock()
            .unwrap()
            .push(HopEvent::Authenticated(index));

        let fail_close = *self.state.fail_close_at.lock().unwrap() == Some(index)
            || self.state.fail_close_ports.lock().unwrap().contains(&hop.port);
        Ok(Box::new(LoopbackSession {
            index,
            control: Mutex::new(Some(stream)),
            state: self.state.clone(),
            fail_close,
        }))
    }
}

/// Session whose channels are direct TCP connections from this host
#[derive(Debug)]
pub struct LoopbackSession {
    index: usize,
    control: Mutex<Option<TcpStream>>,
    state: Arc<ConnectorState>,
    fail_close: bool,
}

#[async_trait]
impl HopSession for LoopbackSession {
    async fn open_channel(&self, host: &str, port: u16) -> Result<Channel, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Failed {
                target: format!("{}:{}", host, port),
                cause: "session closed".to_string(),
            });
        }
        match TcpStream::connect((host, port)).await {
            Ok(stream) => Ok(Box::new(stream)),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Err(ChannelError::Refused {
                target: format!("{}:{}", host, port),
            }),
            Err(e) => Err(ChannelError::Failed {
                target: format!("{}:{}", host, port),
                cause: e.to_string(),
            }),
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        let control = self.control.lock().unwrap().take();
        if control.is_some() {
            drop(control);
            self.state.live.fetch_sub(1, Ordering::SeqCst);
            self.state
                .events
                .lock()
                .unwrap()
                .push(HopEvent::Closed(self.index));
        }
        if self.fail_close {
            anyhow::bail!("hop {} refused to close", self.index);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.control.lock().unwrap().is_none()
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Assert that the peer closed `stream`
pub async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("peer did not close in time")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

/// SOCKS5 greeting offering only "no authentication"
pub fn socks_greeting() -> Vec<u8> {
    vec![SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE]
}

/// CONNECT request to an IPv4 address
pub fn connect_request_ipv4(addr: SocketAddr) -> Vec<u8> {
    let mut req = vec![
        SOCKS5_VERSION,
        SOCKS5_CMD_TCP_CONNECT,
        SOCKS5_RESERVED,
        SOCKS5_ADDR_TYPE_IPV4,
    ];
    match addr {
        SocketAddr::V4(v4) => req.extend_from_slice(&v4.ip().octets()),
        SocketAddr::V6(_) => panic!("IPv4 address expected"),
    }
    req.extend_from_slice(&addr.port().to_be_bytes());
    req
}

/// CONNECT request to a domain name
pub fn connect_request_domain(host: &str, port: u16) -> Vec<u8> {
    let mut req = vec![
        SOCKS5_VERSION,
        SOCKS5_CMD_TCP_CONNECT,
        SOCKS5_RESERVED,
        SOCKS5_ADDR_TYPE_DOMAIN,
        host.len() as u8,
    ];
    req.extend_from_slice(host.as_bytes());
    req.extend_from_slice(&port.to_be_bytes());
    req
}

/// Request with an arbitrary command and an IPv4 address
pub fn command_request(command: u8) -> Vec<u8> {
    vec![
        SOCKS5_VERSION,
        command,
        SOCKS5_RESERVED,
        SOCKS5_ADDR_TYPE_IPV4,
        127,
        0,
        0,
        1,
        0,
        80,
    ]
}

/// CONNECT request to an IPv6 address
pub fn connect_request_ipv6() -> Vec<u8> {
    let mut req = vec![
        SOCKS5_VERSION,
        SOCKS5_CMD_TCP_CONNECT,
        SOCKS5_RESERVED,
        SOCKS5_ADDR_TYPE_IPV6,
    ];
    req.extend_from_slice(&[0u8; 15]);
    req.push(1);
    req.extend_from_slice(&80u16.to_be_bytes());
    req
}

/// Connect to the proxy and complete method negotiation
pub async fn socks_handshake(proxy_port: u16) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    stream.write_all(&socks_greeting()).await.unwrap();
    let mut resp = [0u8; 2];
    stream.read_exact(&mut resp).await.unwrap();
    assert_eq!(resp, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]);
    stream
}

/// Send `request` and return the reply code
pub async fn send_request(stream: &mut TcpStream, request: &[u8]) -> u8 {
    stream.write_all(request).await.unwrap();
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], SOCKS5_VERSION);
    reply[1]
}

/// Open a relaying SOCKS5 connection to `target` through the proxy
pub async fn socks_connect(proxy_port: u16, target: SocketAddr) -> TcpStream {
    let mut stream = socks_handshake(proxy_port).await;
    let code = send_request(&mut stream, &connect_request_ipv4(target)).await;
    assert_eq!(code, SOCKS5_REPLY_SUCCEEDED);
    stream
}

/// Write `payload` and expect it echoed back
pub async fn assert_echo(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(buf, payload);
}
