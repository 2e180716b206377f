//! Session supervisor
//!
//! [`RemapService`] owns the event-loop thread and the one live session.
//!
//! ```text
//!   start() ──► starting ──► running ──► stopped
//!                              │  ▲
//!            request_reload()  ▼  │ new session
//!                            reloading
//! ```
//!
//! Control calls arrive on other threads. None of them touch the loop's
//! state directly: they set a flag and destroy the session, which unblocks
//! the loop's `wait`. The loop then reads the flags to decide whether to
//! exit or to open a fresh session with fresh modifier state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use combo_remap_config::protocol::ServiceState;
use thiserror::Error;

use crate::injector::{send_virtual_key, KeyInjector};
use crate::remapper::{RemapTable, Remapper, Translation};
use crate::scancode::{DeviceId, KeyStroke};
use crate::session::{Driver, KeyFilter, Session, SessionError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to spawn event loop thread: {0}")]
    Spawn(std::io::Error),

    #[error("event loop exited before reporting readiness")]
    LoopDied,

    #[error("service was stopped")]
    Terminated,
}

/// Settings the loop needs that do not change while it runs.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// The one device the policy applies to
    pub device: DeviceId,
    pub debug_keys: bool,
    pub stop_timeout: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            device: DeviceId(1),
            debug_keys: false,
            stop_timeout: Duration::from_secs(3),
        }
    }
}

/// Flags shared between the loop and its controllers.
#[derive(Debug)]
pub struct LoopSignals {
    stop: AtomicBool,
    reload: AtomicBool,
    enabled: AtomicBool,
}

impl Default for LoopSignals {
    fn default() -> Self {
        Self {
            stop: AtomicBool::new(false),
            reload: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }
}

impl LoopSignals {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn reload_requested(&self) -> bool {
        self.reload.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn exit_reason(&self) -> LoopExit {
        if self.stop_requested() {
            LoopExit::Stopped
        } else if self.reload_requested() {
            LoopExit::Reload
        } else {
            LoopExit::SessionClosed
        }
    }
}

/// Why [`run_loop`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    Reload,
    /// The session ended without anyone asking for it
    SessionClosed,
}

/// Everything the loop reads but never mutates.
pub struct LoopContext<'a> {
    pub table: &'a RemapTable,
    pub injector: &'a dyn KeyInjector,
    pub options: &'a ServiceOptions,
    pub signals: &'a LoopSignals,
}

fn passthrough(session: &dyn Session, device: DeviceId, stroke: &KeyStroke) {
    if let Err(e) = session.send(device, std::slice::from_ref(stroke)) {
        tracing::debug!("Passthrough failed on device {}: {}", device, e);
    }
}

/// Pump `session` until it is destroyed or a stop/reload is requested.
///
/// Modifier state lives on this stack frame and is gone when it returns.
pub fn run_loop(session: &dyn Session, ctx: &LoopContext<'_>) -> LoopExit {
    session.set_filter(KeyFilter::AllKeys);

    let mut remapper = Remapper::new(ctx.table, ctx.options.debug_keys);
    let mut buffer = [KeyStroke::up(0); 1];

    tracing::info!(
        "Remap active on keyboard device {} ({} combo keys, debug-keys {})",
        ctx.options.device,
        ctx.table.len(),
        if ctx.options.debug_keys { "on" } else { "off" }
    );

    loop {
        let device = match session.wait() {
            Ok(device) => device,
            Err(SessionError::Closed) => return ctx.signals.exit_reason(),
            Err(e) => {
                tracing::warn!("Session wait failed: {}", e);
                return ctx.signals.exit_reason();
            }
        };

        let count = match session.receive(device, &mut buffer) {
            Ok(count) => count,
            Err(SessionError::Closed) => return ctx.signals.exit_reason(),
            Err(e) => {
                tracing::debug!("Receive failed on device {}: {}", device, e);
                0
            }
        };
        if count == 0 {
            continue;
        }

        // The stroke in hand is dropped on the way out
        if ctx.signals.stop_requested() || ctx.signals.reload_requested() {
            return ctx.signals.exit_reason();
        }

        let stroke = buffer[0];
        if !session.is_keyboard(device) || device != ctx.options.device {
            passthrough(session, device, &stroke);
            continue;
        }
        if !ctx.signals.is_enabled() {
            remapper.observe(&stroke);
            passthrough(session, device, &stroke);
            continue;
        }

        match remapper.process(stroke) {
            Translation::Consumed => {}
            Translation::Passthrough(stroke) => passthrough(session, device, &stroke),
            Translation::Send(strokes) => {
                if let Err(e) = session.send(device, &strokes) {
                    tracing::debug!("Send of {} strokes failed: {}", strokes.len(), e);
                }
            }
            Translation::Inject(key, state) => {
                send_virtual_key(ctx.injector, key, state, ctx.options.debug_keys);
            }
        }
    }
}

struct Shared {
    driver: Arc<dyn Driver>,
    injector: Arc<dyn KeyInjector>,
    table: RemapTable,
    options: ServiceOptions,
    signals: LoopSignals,
    state: Mutex<ServiceState>,
    session: Mutex<Option<Arc<dyn Session>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn set_state(&self, state: ServiceState) {
        let mut current = lock(&self.state);
        if *current != state {
            tracing::info!("Service {} -> {}", *current, state);
            *current = state;
        }
    }

    /// Destroy whatever session is installed; safe to race with the loop.
    fn destroy_session(&self) {
        let session = lock(&self.session).clone();
        if let Some(session) = session {
            session.destroy();
        }
    }
}

/// Uninstalls and destroys the session on every exit path of one iteration.
struct SessionGuard<'a> {
    shared: &'a Shared,
    session: Arc<dyn Session>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        lock(&self.shared.session).take();
        self.session.destroy();
    }
}

fn service_thread(shared: Arc<Shared>, ready: mpsc::Sender<Result<(), SessionError>>) {
    let mut ready = Some(ready);

    loop {
        shared.signals.reload.store(false, Ordering::SeqCst);

        let session = match shared.driver.create_session() {
            Ok(session) => session,
            Err(e) => {
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e));
                    }
                    None => tracing::error!("Failed to reopen session: {}", e),
                }
                break;
            }
        };

        *lock(&shared.session) = Some(session.clone());
        let guard = SessionGuard {
            shared: &shared,
            session,
        };

        // Requests that raced session creation found nothing to destroy
        if shared.signals.stop_requested() {
            break;
        }
        if shared.signals.reload_requested() {
            drop(guard);
            shared.set_state(ServiceState::Reloading);
            continue;
        }

        shared.set_state(ServiceState::Running);
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }

        let ctx = LoopContext {
            table: &shared.table,
            injector: shared.injector.as_ref(),
            options: &shared.options,
            signals: &shared.signals,
        };
        let exit = run_loop(guard.session.as_ref(), &ctx);
        drop(guard);

        match exit {
            LoopExit::Reload => {
                shared.set_state(ServiceState::Reloading);
                tracing::info!("Reloading session");
            }
            LoopExit::Stopped => break,
            LoopExit::SessionClosed => {
                tracing::warn!("Session ended unexpectedly; use reload to restart");
                break;
            }
        }
    }

    shared.set_state(ServiceState::Stopped);
}

/// The event-loop thread and the channel it closes when it returns.
struct LoopThread {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

/// Supervised remap service.
pub struct RemapService {
    shared: Arc<Shared>,
    thread: Mutex<Option<LoopThread>>,
    /// Set by [`RemapService::stop`]; nothing starts again afterwards
    terminated: AtomicBool,
}

impl RemapService {
    pub fn new(
        driver: Arc<dyn Driver>,
        injector: Arc<dyn KeyInjector>,
        table: RemapTable,
        options: ServiceOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                driver,
                injector,
                table,
                options,
                signals: LoopSignals::default(),
                state: Mutex::new(ServiceState::Starting),
                session: Mutex::new(None),
            }),
            thread: Mutex::new(None),
            terminated: AtomicBool::new(false),
        }
    }

    /// Spawn the event loop and wait until its first session is open.
    ///
    /// Does nothing if the loop is already running. A session that cannot
    /// be opened is returned as an error and the service ends up stopped.
    /// After the loop ended on its own (device lost, failed reload) this
    /// starts it again; after [`stop`](Self::stop) it is refused.
    pub fn start(&self) -> Result<(), ServiceError> {
        let mut thread = lock(&self.thread);
        if self.terminated.load(Ordering::SeqCst) {
            return Err(ServiceError::Terminated);
        }
        if let Some(running) = thread.take() {
            // A loop that reported stopped is on its way out
            if !running.handle.is_finished() && self.status() != ServiceState::Stopped {
                *thread = Some(running);
                return Ok(());
            }
            let _ = running.handle.join();
        }

        let signals = &self.shared.signals;
        signals.stop.store(false, Ordering::SeqCst);
        signals.reload.store(false, Ordering::SeqCst);
        self.shared.set_state(ServiceState::Starting);

        let (tx, rx) = mpsc::channel();
        let (done_tx, done) = mpsc::channel();
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("combo-remap-loop".into())
            .spawn(move || {
                service_thread(shared, tx);
                drop(done_tx);
            })
            .map_err(ServiceError::Spawn)?;

        let result = rx.recv();
        match result {
            Ok(Ok(())) => {
                *thread = Some(LoopThread { handle, done });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = handle.join();
                self.shared.set_state(ServiceState::Stopped);
                Err(ServiceError::LoopDied)
            }
        }
    }

    /// Stop the loop for good and wait up to the configured timeout for it
    /// to exit.
    ///
    /// Serialised with [`start`](Self::start) so a start in progress either
    /// finishes first or sees the service terminated.
    pub fn stop(&self) {
        let running = {
            let mut thread = lock(&self.thread);
            self.terminated.store(true, Ordering::SeqCst);
            self.shared.signals.request_stop();
            self.shared.destroy_session();
            thread.take()
        };

        let Some(running) = running else {
            self.shared.set_state(ServiceState::Stopped);
            return;
        };

        let timeout = self.shared.options.stop_timeout;
        match running.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("Event loop did not exit within {:?}", timeout);
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = running.handle.join();
            }
        }
    }

    /// Replace the session with a fresh one; modifier state starts over.
    pub fn request_reload(&self) {
        self.shared.signals.reload.store(true, Ordering::SeqCst);
        self.shared.destroy_session();
    }

    pub fn enable(&self) {
        self.shared.signals.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.shared.signals.enabled.store(false, Ordering::SeqCst);
    }

    /// Flip the enabled flag and return the new value.
    pub fn toggle(&self) -> bool {
        !self.shared.signals.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.signals.is_enabled()
    }

    pub fn status(&self) -> ServiceState {
        *lock(&self.shared.state)
    }

    /// Status indicator key: the state, or `disabled` when running disabled.
    pub fn indicator(&self) -> &'static str {
        match self.status() {
            ServiceState::Running if !self.is_enabled() => "disabled",
            state => state.as_str(),
        }
    }

    pub fn status_label(&self) -> String {
        match self.status() {
            ServiceState::Running if !self.is_enabled() => "running (disabled)".to_string(),
            state => state.as_str().to_string(),
        }
    }
}

impl Drop for RemapService {
    fn drop(&mut self) {
        self.shared.signals.request_stop();
        self.shared.destroy_session();
    }
}
