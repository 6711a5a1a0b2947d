//! TCP streaming server: pushes frames to every connected client and hands
//! inbound touch messages to a single registered callback.

use crate::error::StreamError;
use crate::protocol::*;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub const DEFAULT_PORT: u16 = 5558;

/// Frames queued per client before older ones are dropped.
const FRAME_QUEUE_DEPTH: usize = 2;

pub type InputCallback = Arc<dyn Fn(TouchEvent) + Send + Sync>;

struct Shared {
    display: Mutex<DisplayConfig>,
    frames: broadcast::Sender<Arc<Vec<u8>>>,
    clients: AtomicUsize,
    input_callback: RwLock<Option<InputCallback>>,
}

impl Shared {
    fn dispatch_input(&self, event: TouchEvent) {
        let callback = match self.input_callback.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

pub struct StreamingServer {
    runtime: Handle,
    address: String,
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl StreamingServer {
    pub fn new(runtime: Handle, host: &str, port: u16) -> Self {
        let (frames, _) = broadcast::channel(FRAME_QUEUE_DEPTH);
        let (shutdown, _) = watch::channel(false);
        Self {
            runtime,
            address: listen_address(host, port),
            shared: Arc::new(Shared {
                display: Mutex::new(DisplayConfig {
                    width: 0,
                    height: 0,
                    dpi: 0,
                }),
                frames,
                clients: AtomicUsize::new(0),
                input_callback: RwLock::new(None),
            }),
            shutdown,
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub fn set_display_config(&self, width: u32, height: u32, dpi: u32) {
        if let Ok(mut display) = self.shared.display.lock() {
            *display = DisplayConfig { width, height, dpi };
        }
    }

    pub fn set_input_callback(&self, callback: Option<InputCallback>) {
        if let Ok(mut slot) = self.shared.input_callback.write() {
            *slot = callback;
        }
    }

    /// Bind the listen socket and start accepting clients. Bind errors are
    /// reported synchronously.
    pub fn start(&self) -> Result<SocketAddr, StreamError> {
        let addr = resolve(&self.address)?;
        let listener = std::net::TcpListener::bind(addr).map_err(|source| StreamError::Bind {
            address: self.address.clone(),
            source,
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let listener = {
            let _guard = self.runtime.enter();
            TcpListener::from_std(listener)?
        };

        let shared = self.shared.clone();
        let shutdown = self.shutdown.subscribe();
        let task = self.runtime.spawn(accept_loop(listener, shared, shutdown));

        if let Ok(mut slot) = self.accept_task.lock() {
            *slot = Some(task);
        }
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = Some(local_addr);
        }

        tracing::info!(address = %local_addr, "Streaming server listening");
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|a| *a)
    }

    pub fn has_clients(&self) -> bool {
        self.client_count() > 0
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.load(Ordering::SeqCst)
    }

    /// Queue a frame for every connected client. Clients that fall behind
    /// skip frames.
    pub fn send_frame(&self, frame: &Frame<'_>) {
        if self.shared.frames.receiver_count() == 0 {
            return;
        }
        let _ = self.shared.frames.send(Arc::new(encode_frame(frame)));
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.accept_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            task.abort();
            tracing::info!("Streaming server stopped");
        }
    }
}

impl Drop for StreamingServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `host:port`, with IPv6 literals bracketed so the port stays separable.
pub(crate) fn listen_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

pub(crate) fn resolve(address: &str) -> Result<SocketAddr, StreamError> {
    address
        .to_socket_addrs()
        .map_err(|e| StreamError::InvalidAddress(format!("{}: {}", address, e)))?
        .next()
        .ok_or_else(|| StreamError::InvalidAddress(address.to_string()))
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(serve_client(stream, peer, shared.clone(), shutdown.clone()));
                }
                Err(e) => tracing::warn!("Streaming accept failed: {}", e),
            },
        }
    }
}

struct ClientGuard<'a>(&'a AtomicUsize);

impl Drop for ClientGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let display = match shared.display.lock() {
        Ok(d) => *d,
        Err(_) => return,
    };
    let mut frames = shared.frames.subscribe();
    let (mut reader, mut writer) = stream.into_split();

    if let Err(e) = writer.write_all(&encode_display_config(&display)).await {
        tracing::debug!(peer = %peer, "Client dropped before handshake: {}", e);
        return;
    }

    shared.clients.fetch_add(1, Ordering::SeqCst);
    let _guard = ClientGuard(&shared.clients);
    tracing::info!(peer = %peer, "Streaming client connected");

    let inbound = async {
        loop {
            match read_message(&mut reader, MAX_CLIENT_PAYLOAD).await {
                Ok(Some((MSG_TOUCH, payload))) => match decode_touch(&payload) {
                    Ok(event) => shared.dispatch_input(event),
                    Err(e) => return Err(e),
                },
                Ok(Some((kind, _))) => tracing::debug!(kind, "Ignoring client message"),
                Ok(None) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    };

    let outbound = async {
        loop {
            match frames.recv().await {
                Ok(message) => {
                    if let Err(e) = writer.write_all(&message).await {
                        return Err(StreamError::from(e));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(peer = %peer, skipped, "Client lagging, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    };

    let result: Result<(), StreamError> = tokio::select! {
        r = inbound => r,
        r = outbound => r,
        _ = shutdown.changed() => Ok(()),
    };

    match result {
        Ok(()) => tracing::info!(peer = %peer, "Streaming client disconnected"),
        Err(e) => tracing::info!(peer = %peer, "Streaming client dropped: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv6Addr};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn test_listen_address_accepts_ipv6_hosts() {
        assert_eq!(listen_address("0.0.0.0", 5558), "0.0.0.0:5558");
        assert_eq!(listen_address("::", 5558), "[::]:5558");
        assert_eq!(listen_address("[::1]", 5558), "[::1]:5558");

        let addr = resolve(&listen_address("::", 5558)).unwrap();
        assert_eq!(addr.ip(), IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        assert_eq!(addr.port(), 5558);
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never met");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_client_handshake_frames_and_input() {
        let server = StreamingServer::new(Handle::current(), "127.0.0.1", 0);
        server.set_display_config(4, 2, 160);

        let (tx, mut rx) = mpsc::unbounded_channel();
        server.set_input_callback(Some(Arc::new(move |event| {
            let _ = tx.send(event);
        })));

        let addr = server.start().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();

        let (kind, payload) = read_message(&mut client, 1024).await.unwrap().unwrap();
        assert_eq!(kind, MSG_DISPLAY_CONFIG);
        assert_eq!(&payload[..4], &4u32.to_le_bytes());

        wait_until(|| server.has_clients()).await;

        let pixels = vec![7u8; 32];
        server.send_frame(&Frame::rgba(&pixels, 4, 2, 16).unwrap());
        let (kind, payload) = read_message(&mut client, 1024).await.unwrap().unwrap();
        assert_eq!(kind, MSG_FRAME);
        assert_eq!(payload.len(), 16 + 32);

        let touch = TouchEvent {
            action: TouchAction::Down,
            finger_id: 2,
            x: 10,
            y: 20,
        };
        client.write_all(&encode_touch(&touch)).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, touch);

        drop(client);
        wait_until(|| !server.has_clients()).await;
        server.stop();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bind_conflict_reported() {
        let first = StreamingServer::new(Handle::current(), "127.0.0.1", 0);
        let addr = first.start().unwrap();

        let second = StreamingServer::new(Handle::current(), "127.0.0.1", addr.port());
        assert!(matches!(second.start(), Err(StreamError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_frame_without_clients_is_dropped() {
        let server = StreamingServer::new(Handle::current(), "127.0.0.1", 0);
        server.send_frame(&Frame::rgba(&[0u8; 16], 2, 2, 8).unwrap());
        assert!(!server.has_clients());
    }
}
