//! Launch preparation for the guest container.
//!
//! Everything the child needs after `fork` is built here so that the child
//! itself only performs async-signal-safe calls.

use crate::error::SupervisorError;
use std::ffi::{CString, OsStr};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Temp directory handed to the guest loader. Must be writable; it does not
/// need to allow execution.
pub const TMP_DIR_ENV: &str = "PROOT_TMP_DIR";

/// Pre-staged loader binary. Lives next to the guest binary because that
/// directory is executable.
pub const LOADER_ENV: &str = "PROOT_LOADER";

pub const LOADER_FILE_NAME: &str = "libproot-loader.so";

pub const DEFAULT_SHELL: &str = "/bin/sh";

pub const PATH_LIMIT: usize = libc::PATH_MAX as usize;

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub base_dir: PathBuf,
    pub guest_binary: PathBuf,
    pub startup_script: PathBuf,
    pub temp_dir: PathBuf,
    /// Loader forwarded from the parent environment. When unset the loader is
    /// expected next to the guest binary.
    pub loader: Option<PathBuf>,
    pub shell: PathBuf,
}

impl LaunchRequest {
    /// Request using the conventional layout under `base_dir`:
    /// `rootfs/run.sh` as the script and `tmp` as the temp directory.
    pub fn new(base_dir: impl Into<PathBuf>, guest_binary: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            startup_script: base_dir.join("rootfs").join("run.sh"),
            temp_dir: base_dir.join("tmp"),
            base_dir,
            guest_binary: guest_binary.into(),
            loader: None,
            shell: PathBuf::from(DEFAULT_SHELL),
        }
    }

    pub fn with_startup_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.startup_script = script.into();
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_loader(mut self, loader: Option<PathBuf>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }
}

/// A validated launch: `shell script base_dir guest_binary`, run from
/// `base_dir` with the loader variables set.
#[derive(Debug)]
pub struct LaunchPlan {
    pub(crate) shell: CString,
    pub(crate) argv: Vec<CString>,
    pub(crate) envp: Vec<CString>,
    pub(crate) workdir: CString,
    /// Null-terminated pointer arrays into `argv` and `envp`, handed to
    /// `execve` as is. The child must not allocate.
    pub(crate) argv_ptrs: Vec<*const c_char>,
    pub(crate) envp_ptrs: Vec<*const c_char>,
    loader_path: PathBuf,
    temp_dir: PathBuf,
}

impl LaunchPlan {
    pub fn prepare(request: &LaunchRequest) -> Result<Self, SupervisorError> {
        let guest = request.guest_binary.as_os_str();
        if guest.len() >= PATH_LIMIT {
            return Err(SupervisorError::PathTooLong {
                path: request.guest_binary.display().to_string(),
                len: guest.len(),
                limit: PATH_LIMIT,
            });
        }

        let guest_dir = guest_binary_dir(&request.guest_binary)?;
        let loader_path = request
            .loader
            .clone()
            .unwrap_or_else(|| guest_dir.join(LOADER_FILE_NAME));

        let envp = build_env(
            std::env::vars_os(),
            &[
                (TMP_DIR_ENV, request.temp_dir.as_os_str()),
                (LOADER_ENV, loader_path.as_os_str()),
            ],
        );

        let argv = vec![
            c_string(OsStr::new("sh"))?,
            c_string(request.startup_script.as_os_str())?,
            c_string(request.base_dir.as_os_str())?,
            c_string(guest)?,
        ];

        // The CString buffers live on the heap, so these stay valid when the
        // vectors move into the plan.
        let argv_ptrs = exec_array(&argv);
        let envp_ptrs = exec_array(&envp);

        Ok(Self {
            shell: c_string(request.shell.as_os_str())?,
            argv,
            envp,
            workdir: c_string(request.base_dir.as_os_str())?,
            argv_ptrs,
            envp_ptrs,
            loader_path,
            temp_dir: request.temp_dir.clone(),
        })
    }

    pub fn loader_path(&self) -> &Path {
        &self.loader_path
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn args(&self) -> Vec<String> {
        self.argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    pub fn env_value(&self, key: &str) -> Option<String> {
        let prefix = format!("{}=", key);
        self.envp.iter().find_map(|e| {
            e.to_bytes()
                .strip_prefix(prefix.as_bytes())
                .map(|v| String::from_utf8_lossy(v).into_owned())
        })
    }
}

/// Everything before the last `/` of the guest binary path, or `/` when
/// that prefix is empty. A trailing separator is not stripped, so
/// `/a/b/` yields `/a/b`. A path without a separator is rejected.
pub fn guest_binary_dir(guest_binary: &Path) -> Result<PathBuf, SupervisorError> {
    let bytes = guest_binary.as_os_str().as_bytes();
    match bytes.iter().rposition(|&b| b == b'/') {
        Some(0) => Ok(PathBuf::from("/")),
        Some(idx) => Ok(PathBuf::from(OsStr::from_bytes(&bytes[..idx]))),
        None => Err(SupervisorError::InvalidPath(format!(
            "no directory separator in {}",
            guest_binary.display()
        ))),
    }
}

fn exec_array(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn c_string(value: &OsStr) -> Result<CString, SupervisorError> {
    CString::new(value.as_bytes())
        .map_err(|_| SupervisorError::InvalidPath(value.to_string_lossy().into_owned()))
}

fn build_env<I, K, V>(inherited: I, overrides: &[(&str, &OsStr)]) -> Vec<CString>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    let mut env: Vec<CString> = inherited
        .into_iter()
        .filter(|(k, _)| {
            let key: &OsStr = k.as_ref();
            !overrides.iter().any(|(name, _)| key == OsStr::new(name))
        })
        .filter_map(|(k, v)| env_entry(k.as_ref(), v.as_ref()))
        .collect();
    env.extend(
        overrides
            .iter()
            .filter_map(|(k, v)| env_entry(OsStr::new(k), v)),
    );
    env
}

fn env_entry(key: &OsStr, value: &OsStr) -> Option<CString> {
    let mut entry = Vec::with_capacity(key.len() + value.len() + 1);
    entry.extend_from_slice(key.as_bytes());
    entry.push(b'=');
    entry.extend_from_slice(value.as_bytes());
    CString::new(entry).ok()
}
