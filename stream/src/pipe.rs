//! Guest pipe connector: a published Unix socket the guest connects to for
//! its graphics, sensor and GPS channels.

use crate::error::StreamError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Receives each guest connection. The message format belongs to the
/// handler.
#[async_trait]
pub trait PipeConnectionHandler: Send + Sync {
    async fn handle(&self, stream: UnixStream);
}

/// Accepts connections and discards their traffic.
#[derive(Debug, Default)]
pub struct DrainingHandler;

#[async_trait]
impl PipeConnectionHandler for DrainingHandler {
    async fn handle(&self, mut stream: UnixStream) {
        let mut buf = [0u8; 4096];
        let mut total = 0usize;
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => {
                    tracing::debug!("Pipe connection error: {}", e);
                    break;
                }
            }
        }
        tracing::debug!(bytes = total, "Pipe connection closed");
    }
}

pub struct PipeConnector {
    socket_path: PathBuf,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl PipeConnector {
    /// Publish the socket at `socket_path`. A file left at that path by a
    /// previous run is removed first.
    pub fn start(
        runtime: &Handle,
        socket_path: impl Into<PathBuf>,
        handler: Arc<dyn PipeConnectionHandler>,
    ) -> Result<Self, StreamError> {
        let socket_path = socket_path.into();
        match std::fs::remove_file(&socket_path) {
            Ok(()) => tracing::debug!(path = %socket_path.display(), "Removed stale pipe socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = std::os::unix::net::UnixListener::bind(&socket_path).map_err(|source| {
            StreamError::Bind {
                address: socket_path.display().to_string(),
                source,
            }
        })?;
        listener.set_nonblocking(true)?;

        let listener = {
            let _guard = runtime.enter();
            UnixListener::from_std(listener)?
        };

        let (shutdown, rx) = watch::channel(false);
        let task = runtime.spawn(accept_loop(listener, handler, rx));

        tracing::info!(path = %socket_path.display(), "Guest pipe connector published");
        Ok(Self {
            socket_path,
            shutdown,
            accept_task: Mutex::new(Some(task)),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.accept_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            task.abort();
            let _ = std::fs::remove_file(&self.socket_path);
            tracing::info!("Guest pipe connector stopped");
        }
    }
}

impl Drop for PipeConnector {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: UnixListener,
    handler: Arc<dyn PipeConnectionHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let handler = handler.clone();
                    let mut shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = handler.handle(stream) => {}
                            _ = shutdown.changed() => {}
                        }
                    });
                }
                Err(e) => tracing::warn!("Pipe accept failed: {}", e),
            },
        }
    }
}
