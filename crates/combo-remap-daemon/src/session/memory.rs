//! Scripted in-process session for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{Driver, KeyFilter, Session, SessionError, SessionResult};
use crate::scancode::{DeviceId, KeyStroke};

#[derive(Default)]
struct Queue {
    /// `None` entries are reads that come back empty
    pending: VecDeque<(DeviceId, Option<KeyStroke>)>,
    closed: bool,
}

pub struct MemorySession {
    queue: Mutex<Queue>,
    ready: Condvar,
    sent: Mutex<Vec<(DeviceId, KeyStroke)>>,
    send_calls: Mutex<Vec<usize>>,
    keyboards: Vec<DeviceId>,
    filter: Mutex<Option<KeyFilter>>,
}

impl MemorySession {
    /// Session where `keyboards` are keyboard-class and any other id is not.
    pub fn new(keyboards: &[u32]) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            sent: Mutex::new(Vec::new()),
            send_calls: Mutex::new(Vec::new()),
            keyboards: keyboards.iter().map(|id| DeviceId(*id)).collect(),
            filter: Mutex::new(None),
        })
    }

    pub fn push(&self, device: u32, stroke: KeyStroke) {
        self.queue
            .lock()
            .unwrap()
            .pending
            .push_back((DeviceId(device), Some(stroke)));
        self.ready.notify_all();
    }

    pub fn push_all(&self, device: u32, strokes: &[KeyStroke]) {
        for stroke in strokes {
            self.push(device, *stroke);
        }
    }

    /// Wake `wait` for `device` but have the following `receive` return 0.
    pub fn push_empty_read(&self, device: u32) {
        self.queue
            .lock()
            .unwrap()
            .pending
            .push_back((DeviceId(device), None));
        self.ready.notify_all();
    }

    pub fn sent(&self) -> Vec<(DeviceId, KeyStroke)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_strokes(&self) -> Vec<KeyStroke> {
        self.sent().into_iter().map(|(_, s)| s).collect()
    }

    /// Batch size of every `send` call, in order.
    pub fn send_calls(&self) -> Vec<usize> {
        self.send_calls.lock().unwrap().clone()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().pending.len()
    }

    pub fn filter(&self) -> Option<KeyFilter> {
        *self.filter.lock().unwrap()
    }

    pub fn is_destroyed(&self) -> bool {
        self.queue.lock().unwrap().closed
    }
}

impl Session for MemorySession {
    fn set_filter(&self, filter: KeyFilter) {
        *self.filter.lock().unwrap() = Some(filter);
    }

    fn wait(&self) -> SessionResult<DeviceId> {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if queue.closed {
                return Err(SessionError::Closed);
            }
            if let Some((id, _)) = queue.pending.front() {
                return Ok(*id);
            }
            queue = self.ready.wait(queue).unwrap();
        }
    }

    fn receive(&self, device: DeviceId, buffer: &mut [KeyStroke]) -> SessionResult<usize> {
        let mut queue = self.queue.lock().unwrap();
        if queue.closed {
            return Err(SessionError::Closed);
        }
        if matches!(queue.pending.front(), Some((id, None)) if *id == device) {
            queue.pending.pop_front();
            return Ok(0);
        }
        let mut count = 0;
        while count < buffer.len() {
            match queue.pending.front() {
                Some((id, Some(stroke))) if *id == device => {
                    buffer[count] = *stroke;
                    count += 1;
                    queue.pending.pop_front();
                }
                _ => break,
            }
        }
        Ok(count)
    }

    fn send(&self, device: DeviceId, strokes: &[KeyStroke]) -> SessionResult<usize> {
        if self.queue.lock().unwrap().closed {
            return Err(SessionError::Closed);
        }
        self.send_calls.lock().unwrap().push(strokes.len());
        let mut sent = self.sent.lock().unwrap();
        sent.extend(strokes.iter().map(|s| (device, *s)));
        Ok(strokes.len())
    }

    fn is_keyboard(&self, device: DeviceId) -> bool {
        self.keyboards.contains(&device)
    }

    fn destroy(&self) {
        self.queue.lock().unwrap().closed = true;
        self.ready.notify_all();
    }
}

/// Hands out scripted sessions in order, then fresh single-keyboard ones.
#[derive(Default)]
pub struct MemoryDriver {
    scripted: Mutex<VecDeque<Arc<MemorySession>>>,
    created: Mutex<Vec<Arc<MemorySession>>>,
    unavailable: AtomicBool,
}

impl MemoryDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, session: Arc<MemorySession>) {
        self.scripted.lock().unwrap().push_back(session);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<Arc<MemorySession>> {
        self.created.lock().unwrap().clone()
    }

    /// Most recently created session, waiting up to one second for it.
    pub fn current(&self) -> Arc<MemorySession> {
        self.wait_for_sessions(1);
        self.created().last().cloned().expect("no session created")
    }

    pub fn wait_for_sessions(&self, count: usize) -> bool {
        wait_until(Duration::from_secs(1), || self.created().len() >= count)
    }
}

impl Driver for MemoryDriver {
    fn create_session(&self) -> SessionResult<Arc<dyn Session>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SessionError::Unavailable("driver not installed".into()));
        }
        let session = self
            .scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MemorySession::new(&[1]));
        self.created.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
