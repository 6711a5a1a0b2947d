//! Resolved host configuration. The binary builds this from its flags; the
//! embedding API builds it without any network services.

use crate::error::HostError;
use guesthost_supervisor::{LaunchRequest, TMP_DIR_ENV};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ROOTFS_DIR: &str = "rootfs";
pub const STARTUP_SCRIPT: &str = "run.sh";
pub const PIPE_SOCKET_NAME: &str = "qemu_pipe";
pub const DEFAULT_DEBUG_SOCKET: &str = "/dev/socket/adbd";
pub const DIGITIZER_NAME: &str = "guesthost-touchscreen";

/// How long shutdown waits for the guest after signalling it.
pub const GUEST_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest accepted display width or height, in pixels.
pub const MAX_DISPLAY_DIMENSION: u32 = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl DisplayGeometry {
    pub fn new(width: u32, height: u32, dpi: u32) -> Result<Self, HostError> {
        if width == 0 || height == 0 || dpi == 0 {
            return Err(HostError::Configuration(format!(
                "invalid display geometry {}x{} at {} dpi",
                width, height, dpi
            )));
        }
        if width > MAX_DISPLAY_DIMENSION || height > MAX_DISPLAY_DIMENSION {
            return Err(HostError::Configuration(format!(
                "display geometry {}x{} exceeds {} pixels per side",
                width, height, MAX_DISPLAY_DIMENSION
            )));
        }
        let frame_bytes = (width as usize)
            .checked_mul(4)
            .and_then(|stride| stride.checked_mul(height as usize));
        if frame_bytes.is_none() {
            return Err(HostError::Configuration(format!(
                "display geometry {}x{} is too large for a frame buffer",
                width, height
            )));
        }
        Ok(Self { width, height, dpi })
    }

    /// Bytes per row of a tightly packed RGBA frame.
    pub fn rgba_stride(&self) -> u32 {
        self.width * 4
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugForwardConfig {
    pub address: String,
    /// 0 disables the forwarder.
    pub port: u16,
    /// Path of the debug bridge socket as seen from inside the guest.
    pub guest_socket: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub guest_binary: PathBuf,
    pub startup_script: PathBuf,
    pub temp_dir: PathBuf,
    pub loader: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub geometry: DisplayGeometry,
    pub base_path: PathBuf,
    pub stream: Option<StreamConfig>,
    pub debug: Option<DebugForwardConfig>,
    /// Launched once services are up, if its startup script exists.
    pub launch: Option<LaunchSettings>,
    pub guest_shutdown_timeout: Duration,
}

impl HostConfig {
    pub fn new(base_path: impl AsRef<Path>, geometry: DisplayGeometry) -> Self {
        Self {
            geometry,
            base_path: normalize_base_path(base_path.as_ref()),
            stream: None,
            debug: None,
            launch: None,
            guest_shutdown_timeout: GUEST_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_debug(mut self, debug: DebugForwardConfig) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_launch(mut self, launch: LaunchSettings) -> Self {
        self.launch = Some(launch);
        self
    }

    pub fn rootfs_path(&self) -> PathBuf {
        self.base_path.join(ROOTFS_DIR)
    }

    pub fn default_startup_script(&self) -> PathBuf {
        self.rootfs_path().join(STARTUP_SCRIPT)
    }

    pub fn default_temp_dir(&self) -> PathBuf {
        self.base_path.join("tmp")
    }

    pub fn pipe_socket_path(&self) -> PathBuf {
        self.base_path.join(PIPE_SOCKET_NAME)
    }

    pub fn input_dir(&self) -> PathBuf {
        self.rootfs_path().join("dev").join("input")
    }

    /// Host path of a guest-absolute path.
    pub fn guest_path(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.rootfs_path().join(relative)
    }

    /// Launch settings for `guest_binary` with this host's default layout.
    pub fn launch_settings(&self, guest_binary: impl Into<PathBuf>) -> LaunchSettings {
        LaunchSettings {
            guest_binary: guest_binary.into(),
            startup_script: self.default_startup_script(),
            temp_dir: resolve_temp_dir(None, &self.base_path),
            loader: None,
        }
    }

    pub fn launch_request(&self, settings: &LaunchSettings) -> LaunchRequest {
        LaunchRequest::new(&self.base_path, &settings.guest_binary)
            .with_startup_script(&settings.startup_script)
            .with_temp_dir(&settings.temp_dir)
            .with_loader(settings.loader.clone())
    }

    /// Check the base layout and create the temp directories the guest
    /// expects.
    pub fn prepare_layout(&self) -> Result<(), HostError> {
        if !self.base_path.is_dir() {
            return Err(HostError::Configuration(format!(
                "base path {} is not a directory",
                self.base_path.display()
            )));
        }
        let rootfs = self.rootfs_path();
        if !rootfs.is_dir() {
            return Err(HostError::Configuration(format!(
                "no {} directory under {}",
                ROOTFS_DIR,
                self.base_path.display()
            )));
        }

        if let Some(launch) = &self.launch {
            std::fs::create_dir_all(&launch.temp_dir).map_err(|e| {
                HostError::Configuration(format!(
                    "cannot create temp dir {}: {}",
                    launch.temp_dir.display(),
                    e
                ))
            })?;
        }
        if let Err(e) = std::fs::create_dir_all(rootfs.join("tmp")) {
            tracing::warn!("Failed to create guest tmp directory: {}", e);
        }
        Ok(())
    }
}

/// Strip trailing separators, keeping a lone `/`.
pub fn normalize_base_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        if raw.is_empty() {
            PathBuf::new()
        } else {
            PathBuf::from("/")
        }
    } else {
        PathBuf::from(trimmed)
    }
}

/// `explicit` wins, then a non-empty inherited temp dir variable, then
/// `<base>/tmp`.
pub fn resolve_temp_dir(explicit: Option<&Path>, base_path: &Path) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    match std::env::var_os(TMP_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => base_path.join("tmp"),
    }
}
