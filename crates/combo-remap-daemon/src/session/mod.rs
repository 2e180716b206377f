//! Interception driver sessions
//!
//! A [`Session`] is the daemon's only connection to keyboard hardware. The
//! contract mirrors a kernel interception driver:
//!
//! - [`Session::wait`] blocks until some device has a stroke queued and
//!   returns that device.
//! - [`Session::receive`] takes the queued strokes for a device. Received
//!   strokes are withheld from the system until they are sent back.
//! - [`Session::send`] injects strokes as if they came from a device.
//! - [`Session::destroy`] closes the session. It is idempotent, never fails,
//!   and may be called from any thread.
//!
//! # Cancellation
//!
//! `wait` has no timeout. The only way to interrupt it is to destroy the
//! session from another thread, after which `wait` returns
//! [`SessionError::Closed`]. The supervisor relies on this for stop and
//! reload.

pub mod linux;
#[cfg(test)]
pub mod memory;

use std::sync::Arc;

use thiserror::Error;

use crate::scancode::{DeviceId, KeyStroke};

/// Which strokes a session intercepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFilter {
    /// Intercept nothing; devices behave as if no session existed
    None,
    /// Every key down and up, including extended keys
    AllKeys,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("interception driver unavailable: {0}")]
    Unavailable(String),

    #[error("session closed")]
    Closed,

    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// An open connection to the interception driver.
pub trait Session: Send + Sync {
    fn set_filter(&self, filter: KeyFilter);

    /// Block until a device has input; see the module docs on cancellation.
    fn wait(&self) -> SessionResult<DeviceId>;

    /// Move queued strokes for `device` into `buffer`.
    ///
    /// Returns the number of strokes written; `0` means the device produced
    /// nothing.
    fn receive(&self, device: DeviceId, buffer: &mut [KeyStroke]) -> SessionResult<usize>;

    /// Inject `strokes` in order as one batch and return how many were sent.
    fn send(&self, device: DeviceId, strokes: &[KeyStroke]) -> SessionResult<usize>;

    fn is_keyboard(&self, device: DeviceId) -> bool;

    fn destroy(&self);
}

/// Factory for sessions; one driver outlives many sessions across reloads.
pub trait Driver: Send + Sync {
    fn create_session(&self) -> SessionResult<Arc<dyn Session>>;
}
