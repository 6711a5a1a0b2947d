//! Remote-debug forwarding: bridges TCP clients to the debug bridge's Unix
//! socket inside the guest rootfs.

use crate::error::StreamError;
use crate::server::{listen_address, resolve};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream, UnixStream};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const DEFAULT_DEBUG_PORT: u16 = 5555;

pub struct DebugForwarder {
    runtime: Handle,
    address: String,
    guest_socket: Arc<PathBuf>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl DebugForwarder {
    pub fn new(runtime: Handle, host: &str, port: u16, guest_socket: impl Into<PathBuf>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            runtime,
            address: listen_address(host, port),
            guest_socket: Arc::new(guest_socket.into()),
            shutdown,
            accept_task: Mutex::new(None),
        }
    }

    pub fn guest_socket(&self) -> &Path {
        &self.guest_socket
    }

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

        let task = self.runtime.spawn(accept_loop(
            listener,
            self.guest_socket.clone(),
            self.shutdown.subscribe(),
        ));
        if let Ok(mut slot) = self.accept_task.lock() {
            *slot = Some(task);
        }

        tracing::info!(
            address = %local_addr,
            guest_socket = %self.guest_socket.display(),
            "Debug forwarder listening"
        );
        Ok(local_addr)
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.accept_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            task.abort();
            tracing::info!("Debug forwarder stopped");
        }
    }
}

impl Drop for DebugForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    guest_socket: Arc<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(bridge(stream, peer, guest_socket.clone(), shutdown.clone()));
                }
                Err(e) => tracing::warn!("Debug forwarder accept failed: {}", e),
            },
        }
    }
}

async fn bridge(
    mut tcp: TcpStream,
    peer: SocketAddr,
    guest_socket: Arc<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut guest = match UnixStream::connect(guest_socket.as_path()).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(
                peer = %peer,
                guest_socket = %guest_socket.display(),
                "Debug bridge unavailable: {}",
                e
            );
            return;
        }
    };

    tracing::debug!(peer = %peer, "Debug session opened");
    tokio::select! {
        result = tokio::io::copy_bidirectional(&mut tcp, &mut guest) => match result {
            Ok((up, down)) => tracing::debug!(peer = %peer, up, down, "Debug session closed"),
            Err(e) => tracing::debug!(peer = %peer, "Debug session failed: {}", e),
        },
        _ = shutdown.changed() => {}
    }
}
