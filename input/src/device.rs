//! Virtual digitizer exposed to the guest through a Unix socket.
//!
//! A guest connection first receives the device descriptor (u32 LE length
//! followed by JSON), then a stream of `input_event` records.

use crate::error::InputError;
use crate::event::*;
use crate::touch::MAX_SLOTS;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Encoded batches waiting for the writer thread. A full queue drops the
/// newest batch instead of blocking the caller.
const WRITE_QUEUE_DEPTH: usize = 64;

pub const TOUCH_AXIS_MAX: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsAxis {
    pub code: u16,
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub driver_version: u32,
    pub input_id: InputId,
    pub physical_location: String,
    pub abs_axes: Vec<AbsAxis>,
    pub properties: Vec<u16>,
}

impl DeviceDescriptor {
    /// Direct-touch digitizer covering a `width` x `height` display.
    pub fn touchscreen(name: &str, width: u32, height: u32) -> Self {
        let axis = |code, max| AbsAxis { code, min: 0, max };
        let extent = |pixels: u32| i32::try_from(pixels.saturating_sub(1)).unwrap_or(i32::MAX);
        Self {
            name: name.to_string(),
            driver_version: 1,
            input_id: InputId {
                bustype: BUS_VIRTUAL,
                vendor: 4,
                product: 4,
                version: 4,
            },
            physical_location: "none".to_string(),
            abs_axes: vec![
                axis(ABS_MT_SLOT, MAX_SLOTS as i32),
                axis(ABS_MT_TOUCH_MAJOR, TOUCH_AXIS_MAX),
                axis(ABS_MT_TOUCH_MINOR, TOUCH_AXIS_MAX),
                axis(ABS_MT_POSITION_X, extent(width)),
                axis(ABS_MT_POSITION_Y, extent(height)),
                axis(ABS_MT_TRACKING_ID, crate::touch::TRACKING_ID_SPACE),
            ],
            properties: vec![INPUT_PROP_DIRECT],
        }
    }

    pub fn axis(&self, code: u16) -> Option<&AbsAxis> {
        self.abs_axes.iter().find(|a| a.code == code)
    }

    fn handshake(&self) -> Result<Vec<u8>, InputError> {
        let json = serde_json::to_vec(self)?;
        let mut buf = Vec::with_capacity(4 + json.len());
        buf.extend_from_slice(&(json.len() as u32).to_le_bytes());
        buf.extend_from_slice(&json);
        Ok(buf)
    }
}

/// Allocates device sockets (`event0`, `event1`, ...) under one directory.
pub struct InputManager {
    dir: PathBuf,
    next_id: AtomicU32,
}

impl InputManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_id: AtomicU32::new(0),
        }
    }

    pub fn create_device(
        &self,
        descriptor: DeviceDescriptor,
    ) -> Result<VirtualInputDevice, InputError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        VirtualInputDevice::publish(self.dir.join(format!("event{}", id)), descriptor)
    }
}

pub struct VirtualInputDevice {
    socket_path: PathBuf,
    descriptor: DeviceDescriptor,
    clients: Arc<Mutex<Vec<UnixStream>>>,
    shutdown: Arc<AtomicBool>,
    thread_handle: Option<thread::JoinHandle<()>>,
    writes: Option<SyncSender<Vec<u8>>>,
    writer_handle: Option<thread::JoinHandle<()>>,
}

impl VirtualInputDevice {
    pub fn publish(
        socket_path: impl Into<PathBuf>,
        descriptor: DeviceDescriptor,
    ) -> Result<Self, InputError> {
        let socket_path = socket_path.into();
        let parent = socket_path
            .parent()
            .ok_or_else(|| InputError::InvalidPath(socket_path.display().to_string()))?;
        std::fs::create_dir_all(parent)?;
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| InputError::Bind(format!("{}: {}", socket_path.display(), e)))?;
        listener.set_nonblocking(true)?;

        let handshake = descriptor.handshake()?;
        let clients = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_handle = {
            let clients = clients.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || accept_clients(listener, handshake, clients, shutdown))
        };

        let (writes, pending) = mpsc::sync_channel(WRITE_QUEUE_DEPTH);
        let writer_handle = {
            let clients = clients.clone();
            thread::spawn(move || write_events(pending, clients))
        };

        tracing::info!(
            path = %socket_path.display(),
            name = %descriptor.name,
            "Input device published"
        );

        Ok(Self {
            socket_path,
            descriptor,
            clients,
            shutdown,
            thread_handle: Some(thread_handle),
            writes: Some(writes),
            writer_handle: Some(writer_handle),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl EventSink for VirtualInputDevice {
    /// Queues the batch for the writer thread and returns immediately.
    fn send_events(&self, events: &[InputEvent]) {
        if events.is_empty() {
            return;
        }
        let Some(writes) = &self.writes else {
            return;
        };
        match writes.try_send(encode_events(events)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(events = events.len(), "Input write queue full, dropping events");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("Input writer stopped, dropping events");
            }
        }
    }
}

impl Drop for VirtualInputDevice {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Closing the queue ends the writer once it has drained.
        self.writes.take();
        if let Some(h) = self.writer_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.thread_handle.take() {
            let _ = h.join();
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

fn write_events(pending: Receiver<Vec<u8>>, clients: Arc<Mutex<Vec<UnixStream>>>) {
    for buf in pending {
        let Ok(mut clients) = clients.lock() else {
            return;
        };
        clients.retain_mut(|client| match client.write_all(&buf) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Dropping input client: {}", e);
                false
            }
        });
    }
}

fn accept_clients(
    listener: UnixListener,
    handshake: Vec<u8>,
    clients: Arc<Mutex<Vec<UnixStream>>>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((mut stream, _)) => {
                let ready = stream
                    .set_nonblocking(false)
                    .and_then(|_| stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT)))
                    .and_then(|_| stream.write_all(&handshake));
                match ready {
                    Ok(()) => {
                        tracing::debug!("Input client connected");
                        if let Ok(mut clients) = clients.lock() {
                            clients.push(stream);
                        }
                    }
                    Err(e) => tracing::warn!("Failed to set up input client: {}", e),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                tracing::warn!("Input device accept failed: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn wait_for_clients(device: &VirtualInputDevice, n: usize) {
        for _ in 0..100 {
            if device.client_count() >= n {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("client never registered");
    }

    #[test]
    fn test_touchscreen_descriptor_ranges() {
        let d = DeviceDescriptor::touchscreen("touch", 1280, 720);
        assert_eq!(d.axis(ABS_MT_SLOT).unwrap().max, 10);
        assert_eq!(d.axis(ABS_MT_TOUCH_MAJOR).unwrap().max, 127);
        assert_eq!(d.axis(ABS_MT_TOUCH_MINOR).unwrap().max, 127);
        assert_eq!(d.axis(ABS_MT_POSITION_X).unwrap().max, 1279);
        assert_eq!(d.axis(ABS_MT_POSITION_Y).unwrap().max, 719);
        assert_eq!(d.axis(ABS_MT_TRACKING_ID).unwrap().max, 10);
        assert_eq!(d.properties, vec![INPUT_PROP_DIRECT]);
        assert_eq!(d.input_id.bustype, BUS_VIRTUAL);

        let wide = DeviceDescriptor::touchscreen("touch", u32::MAX, 1);
        assert_eq!(wide.axis(ABS_MT_POSITION_X).unwrap().max, i32::MAX);
        assert_eq!(wide.axis(ABS_MT_POSITION_Y).unwrap().max, 0);
    }

    #[test]
    fn test_client_receives_descriptor_and_events() {
        let dir = TempDir::new().unwrap();
        let manager = InputManager::new(dir.path().join("dev/input"));
        let device = manager
            .create_device(DeviceDescriptor::touchscreen("touch", 640, 480))
            .unwrap();
        assert!(device.socket_path().ends_with("event0"));

        let mut client = UnixStream::connect(device.socket_path()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut len = [0u8; 4];
        client.read_exact(&mut len).unwrap();
        let mut json = vec![0u8; u32::from_le_bytes(len) as usize];
        client.read_exact(&mut json).unwrap();
        let received: DeviceDescriptor = serde_json::from_slice(&json).unwrap();
        assert_eq!(&received, device.descriptor());

        wait_for_clients(&device, 1);
        device.send_events(&[InputEvent::abs(ABS_MT_POSITION_X, 33), InputEvent::sync()]);

        let mut records = [0u8; 2 * EVENT_RECORD_SIZE];
        client.read_exact(&mut records).unwrap();
        assert_eq!(
            i32::from_le_bytes([records[20], records[21], records[22], records[23]]),
            33
        );
    }

    #[test]
    fn test_stale_socket_replaced_and_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("event0");
        std::fs::write(&path, b"stale").unwrap();

        let device =
            VirtualInputDevice::publish(&path, DeviceDescriptor::touchscreen("t", 10, 10)).unwrap();
        assert!(UnixStream::connect(&path).is_ok());

        drop(device);
        assert!(!path.exists());
    }

    #[test]
    fn test_disconnected_client_dropped() {
        let dir = TempDir::new().unwrap();
        let device = VirtualInputDevice::publish(
            dir.path().join("event0"),
            DeviceDescriptor::touchscreen("t", 10, 10),
        )
        .unwrap();

        let client = UnixStream::connect(device.socket_path()).unwrap();
        wait_for_clients(&device, 1);
        drop(client);

        // The first write after hangup may still land in the socket buffer.
        for _ in 0..100 {
            device.send_events(&[InputEvent::sync()]);
            if device.client_count() == 0 {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("disconnected client was never dropped");
    }

    #[test]
    fn test_stalled_client_does_not_block_sender() {
        let dir = TempDir::new().unwrap();
        let device = VirtualInputDevice::publish(
            dir.path().join("event0"),
            DeviceDescriptor::touchscreen("t", 10, 10),
        )
        .unwrap();

        // Never reads, so its socket buffer fills and writes start timing out.
        let _stalled = UnixStream::connect(device.socket_path()).unwrap();
        wait_for_clients(&device, 1);

        let batch = vec![InputEvent::abs(ABS_MT_POSITION_X, 1); 64];
        let started = std::time::Instant::now();
        for _ in 0..2000 {
            device.send_events(&batch);
        }
        assert!(started.elapsed() < Duration::from_millis(500));

        let started = std::time::Instant::now();
        drop(device);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
