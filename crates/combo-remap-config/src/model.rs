//! Configuration data model

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that toggles per-event key diagnostics.
pub const DEBUG_KEYS_ENV: &str = "DEBUG_KEYS";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub global: GlobalConfig,
    pub device: DeviceSelector,
}

/// Global settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Log every CapsLock/Ctrl/F13/A event and every remap decision
    pub debug_keys: bool,
    /// File locked for the lifetime of the daemon to keep a single instance
    pub lock_path: PathBuf,
    /// How often the status indicator samples the service state
    pub status_interval: Duration,
    /// Upper bound on how long `stop` waits for the event loop thread
    pub stop_timeout: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            debug_keys: true,
            lock_path: std::env::temp_dir().join("combo-remap.lock"),
            status_interval: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(3),
        }
    }
}

impl GlobalConfig {
    /// Apply `DEBUG_KEYS` from the process environment.
    ///
    /// `"0"` turns diagnostics off, any other value turns them on, and an
    /// unset variable leaves the configured value alone.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(DEBUG_KEYS_ENV) {
            self.debug_keys = value.trim() != "0";
        }
    }
}

/// Which keyboard the engine actively translates.
///
/// Every other device is passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelector {
    /// 1-based keyboard index as numbered by the interception session
    pub index: u32,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self { index: 1 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string usable with `tracing_subscriber::EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Get the control socket path based on environment
///
/// Returns `$XDG_RUNTIME_DIR/combo-remap.sock` if the environment variable is set,
/// otherwise falls back to `/tmp/combo-remap-$UID.sock`.
pub fn control_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("combo-remap.sock")
    } else {
        let uid = unsafe { nix::libc::getuid() };
        PathBuf::from(format!("/tmp/combo-remap-{}.sock", uid))
    }
}
