//! evdev/uinput session backend
//!
//! Keyboards are grabbed exclusively and read with `poll(2)`. Strokes are
//! queued in arrival order across all devices, so a session behaves like a
//! single interception context. Output goes to one uinput keyboard.
//!
//! Keys that are not intercepted share the same queue and are written out
//! when they reach its front, so they never overtake an earlier stroke.
//!
//! A socket pair sits next to the device fds in every poll; `destroy` writes
//! to it, which is what makes a blocked `wait` return.

use std::collections::{HashSet, VecDeque};
use std::io::{ErrorKind, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use evdev::{Device, EventType, InputEvent, InputEventKind, Key};
use nix::libc;

use super::{Driver, KeyFilter, Session, SessionError, SessionResult};
use crate::device::open_keyboards;
use crate::injector::{VirtualKeyboard, DEVICE_NAME_PREFIX};
use crate::scancode::{from_evdev_key, to_evdev_key, DeviceId, KeyState, KeyStroke};

const EV_RELEASE: i32 = 0;
const EV_PRESS: i32 = 1;
const EV_REPEAT: i32 = 2;

/// Opens sessions over every physical keyboard.
#[derive(Debug, Default)]
pub struct EvdevDriver;

impl Driver for EvdevDriver {
    fn create_session(&self) -> SessionResult<Arc<dyn Session>> {
        Ok(Arc::new(EvdevSession::open()?))
    }
}

struct Keyboard {
    id: DeviceId,
    path: PathBuf,
    device: Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Queued {
    /// Handed to the caller through `wait`/`receive`
    Stroke(KeyStroke),
    /// Forwarded by the session itself
    Raw(Key, KeyState),
}

/// Arrival-ordered events of every grabbed keyboard.
#[derive(Debug, Default)]
struct EventQueue {
    entries: VecDeque<(DeviceId, Queued)>,
}

impl EventQueue {
    fn push_stroke(&mut self, device: DeviceId, stroke: KeyStroke) {
        self.entries.push_back((device, Queued::Stroke(stroke)));
    }

    fn push_raw(&mut self, device: DeviceId, key: Key, state: KeyState) {
        self.entries.push_back((device, Queued::Raw(key, state)));
    }

    /// Pop the raw keys at the front, up to the first stroke.
    fn take_leading_raw(&mut self) -> Vec<(Key, KeyState)> {
        let mut raw = Vec::new();
        while let Some(&(_, Queued::Raw(key, state))) = self.entries.front() {
            raw.push((key, state));
            self.entries.pop_front();
        }
        raw
    }

    /// Device of the stroke at the front, if a stroke is there.
    fn front_device(&self) -> Option<DeviceId> {
        match self.entries.front() {
            Some(&(device, Queued::Stroke(_))) => Some(device),
            _ => None,
        }
    }

    /// Move consecutive front strokes of `device` into `buffer`.
    fn pop_strokes(&mut self, device: DeviceId, buffer: &mut [KeyStroke]) -> usize {
        let mut count = 0;
        while count < buffer.len() {
            match self.entries.front() {
                Some(&(id, Queued::Stroke(stroke))) if id == device => {
                    buffer[count] = stroke;
                    count += 1;
                    self.entries.pop_front();
                }
                _ => break,
            }
        }
        count
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The uinput side, plus the keys it currently holds down.
struct Output {
    keyboard: VirtualKeyboard,
    held: HashSet<u16>,
}

impl Output {
    fn push(&mut self, key: Key, state: KeyState, events: &mut Vec<InputEvent>) {
        let value = match state {
            KeyState::Up => {
                self.held.remove(&key.code());
                EV_RELEASE
            }
            KeyState::Down if self.held.insert(key.code()) => EV_PRESS,
            KeyState::Down => EV_REPEAT,
        };
        events.push(InputEvent::new(EventType::KEY, key.code(), value));
        events.push(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0));
    }

    fn release_all(&mut self) {
        let mut events = Vec::with_capacity(self.held.len() * 2);
        for code in self.held.drain() {
            events.push(InputEvent::new(EventType::KEY, code, EV_RELEASE));
            events.push(InputEvent::new(EventType::SYNCHRONIZATION, 0, 0));
        }
        if !events.is_empty() {
            // Teardown is best effort
            let _ = self.keyboard.emit(&events);
        }
    }
}

pub struct EvdevSession {
    keyboards: Mutex<Vec<Keyboard>>,
    pending: Mutex<EventQueue>,
    output: Mutex<Output>,
    filter: Mutex<KeyFilter>,
    closed: AtomicBool,
    wake_tx: UnixStream,
    wake_rx: UnixStream,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EvdevSession {
    pub fn open() -> SessionResult<Self> {
        let found = open_keyboards().map_err(|e| SessionError::Unavailable(format!("{:#}", e)))?;

        let mut keyboards = Vec::new();
        for (path, mut device) in found {
            if let Err(e) = device.grab() {
                tracing::warn!("Failed to grab {}: {}", path.display(), e);
                continue;
            }
            let id = DeviceId(keyboards.len() as u32 + 1);
            tracing::info!(
                "Keyboard {}: {} ({})",
                id,
                device.name().unwrap_or("Unknown"),
                path.display()
            );
            keyboards.push(Keyboard { id, path, device });
        }

        if keyboards.is_empty() {
            return Err(SessionError::Unavailable(
                "no keyboard could be grabbed; is the user in the 'input' group?".into(),
            ));
        }

        let name = format!("{} keyboard", DEVICE_NAME_PREFIX);
        let keyboard = match VirtualKeyboard::new(&name, None) {
            Ok(keyboard) => keyboard,
            Err(e) => {
                for kb in &mut keyboards {
                    let _ = kb.device.ungrab();
                }
                return Err(SessionError::Unavailable(format!(
                    "cannot create uinput device: {:#}",
                    e
                )));
            }
        };

        let (wake_tx, wake_rx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;

        Ok(Self {
            keyboards: Mutex::new(keyboards),
            pending: Mutex::new(EventQueue::default()),
            output: Mutex::new(Output {
                keyboard,
                held: HashSet::new(),
            }),
            filter: Mutex::new(KeyFilter::None),
            closed: AtomicBool::new(false),
            wake_tx,
            wake_rx,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write out the raw keys waiting at the front of the queue.
    fn flush_leading_raw(&self) -> SessionResult<()> {
        let raw = lock(&self.pending).take_leading_raw();
        if raw.is_empty() {
            return Ok(());
        }
        let mut output = lock(&self.output);
        let mut events = Vec::with_capacity(raw.len() * 2);
        for (key, state) in raw {
            output.push(key, state, &mut events);
        }
        output.keyboard.emit(&events).map_err(to_io)
    }

    /// Read every device `poll` flagged and queue its keys.
    fn read_ready(&self, ready: &[(DeviceId, libc::c_short)]) -> SessionResult<()> {
        let filter = *lock(&self.filter);
        let mut keyboards = lock(&self.keyboards);

        for &(id, revents) in ready {
            let Some(kb) = keyboards.iter_mut().find(|kb| kb.id == id) else {
                continue;
            };

            if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                tracing::warn!("Keyboard {} ({}) went away", id, kb.path.display());
                return Err(SessionError::Closed);
            }

            let events = match kb.device.fetch_events() {
                Ok(events) => events,
                Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            };

            let mut pending = lock(&self.pending);
            for ev in events {
                let InputEventKind::Key(key) = ev.kind() else {
                    continue;
                };
                let state = if ev.value() == EV_RELEASE {
                    KeyState::Up
                } else {
                    KeyState::Down
                };

                match (filter, from_evdev_key(key)) {
                    (KeyFilter::AllKeys, Some((code, extended))) => {
                        let stroke = KeyStroke {
                            code,
                            state,
                            extended,
                            information: 0,
                        };
                        pending.push_stroke(id, stroke);
                    }
                    // No Set 1 form, or not intercepted
                    _ => pending.push_raw(id, key, state),
                }
            }
        }
        Ok(())
    }
}

fn to_io(e: anyhow::Error) -> SessionError {
    match e.downcast::<std::io::Error>() {
        Ok(io) => SessionError::Io(io),
        Err(other) => SessionError::Io(std::io::Error::new(ErrorKind::Other, format!("{:#}", other))),
    }
}

impl Session for EvdevSession {
    fn set_filter(&self, filter: KeyFilter) {
        *lock(&self.filter) = filter;
    }

    fn wait(&self) -> SessionResult<DeviceId> {
        loop {
            if self.is_closed() {
                return Err(SessionError::Closed);
            }
            self.flush_leading_raw()?;
            if let Some(id) = lock(&self.pending).front_device() {
                return Ok(id);
            }

            let mut ids = Vec::new();
            let mut fds = vec![libc::pollfd {
                fd: self.wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            }];
            for kb in lock(&self.keyboards).iter() {
                ids.push(kb.id);
                fds.push(libc::pollfd {
                    fd: kb.device.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                });
            }

            // Devices are only dropped with the session, so the fds stay valid
            let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if ret < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            if fds[0].revents != 0 {
                continue;
            }

            let ready: Vec<(DeviceId, libc::c_short)> = ids
                .into_iter()
                .zip(&fds[1..])
                .filter(|(_, pfd)| pfd.revents != 0)
                .map(|(id, pfd)| (id, pfd.revents))
                .collect();
            self.read_ready(&ready)?;
        }
    }

    fn receive(&self, device: DeviceId, buffer: &mut [KeyStroke]) -> SessionResult<usize> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        Ok(lock(&self.pending).pop_strokes(device, buffer))
    }

    fn send(&self, device: DeviceId, strokes: &[KeyStroke]) -> SessionResult<usize> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let mut output = lock(&self.output);
        let mut events = Vec::with_capacity(strokes.len() * 2);
        let mut sent = 0;
        for stroke in strokes {
            match to_evdev_key(stroke.code, stroke.extended) {
                Some(key) => {
                    output.push(key, stroke.state, &mut events);
                    sent += 1;
                }
                None => tracing::debug!("No Linux key for {} from device {}", stroke, device),
            }
        }
        if !events.is_empty() {
            output.keyboard.emit(&events).map_err(to_io)?;
        }
        Ok(sent)
    }

    fn is_keyboard(&self, device: DeviceId) -> bool {
        lock(&self.keyboards).iter().any(|kb| kb.id == device)
    }

    fn destroy(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for kb in lock(&self.keyboards).iter_mut() {
            if let Err(e) = kb.device.ungrab() {
                tracing::debug!("Failed to ungrab {}: {}", kb.path.display(), e);
            }
        }
        lock(&self.output).release_all();
        lock(&self.pending).clear();

        let _ = (&self.wake_tx).write_all(&[1]);
        tracing::debug!("Session destroyed");
    }
}

impl Drop for EvdevSession {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scancode::{SC_A, SC_F};

    fn stroke(code: u16) -> KeyStroke {
        KeyStroke::down(code)
    }

    #[test]
    fn test_raw_key_waits_behind_earlier_stroke() {
        let mut queue = EventQueue::default();
        queue.push_stroke(DeviceId(1), stroke(SC_A));
        queue.push_raw(DeviceId(1), Key::KEY_VOLUMEUP, KeyState::Down);

        assert!(queue.take_leading_raw().is_empty());
        assert_eq!(queue.front_device(), Some(DeviceId(1)));

        let mut buffer = [KeyStroke::up(0); 1];
        assert_eq!(queue.pop_strokes(DeviceId(1), &mut buffer), 1);
        assert_eq!(buffer[0], stroke(SC_A));

        assert_eq!(queue.front_device(), None);
        assert_eq!(
            queue.take_leading_raw(),
            vec![(Key::KEY_VOLUMEUP, KeyState::Down)]
        );
        assert!(queue.entries.is_empty());
    }

    #[test]
    fn test_leading_raw_keys_flush_up_to_next_stroke() {
        let mut queue = EventQueue::default();
        queue.push_raw(DeviceId(1), Key::KEY_MUTE, KeyState::Down);
        queue.push_raw(DeviceId(2), Key::KEY_MUTE, KeyState::Up);
        queue.push_stroke(DeviceId(2), stroke(SC_F));
        queue.push_raw(DeviceId(1), Key::KEY_VOLUMEDOWN, KeyState::Down);

        assert_eq!(
            queue.take_leading_raw(),
            vec![(Key::KEY_MUTE, KeyState::Down), (Key::KEY_MUTE, KeyState::Up)]
        );
        assert_eq!(queue.front_device(), Some(DeviceId(2)));
        assert_eq!(queue.entries.len(), 2);
    }

    #[test]
    fn test_pop_strokes_stops_at_other_device_or_raw() {
        let mut queue = EventQueue::default();
        queue.push_stroke(DeviceId(1), stroke(SC_A));
        queue.push_stroke(DeviceId(2), stroke(SC_F));
        queue.push_stroke(DeviceId(1), stroke(SC_A));

        let mut buffer = [KeyStroke::up(0); 4];
        assert_eq!(queue.pop_strokes(DeviceId(2), &mut buffer), 0);
        assert_eq!(queue.pop_strokes(DeviceId(1), &mut buffer), 1);
        assert_eq!(queue.pop_strokes(DeviceId(2), &mut buffer), 1);

        queue.push_raw(DeviceId(1), Key::KEY_MUTE, KeyState::Down);
        assert_eq!(queue.pop_strokes(DeviceId(1), &mut buffer), 1);
        assert_eq!(queue.pop_strokes(DeviceId(1), &mut buffer), 0);
        assert_eq!(queue.front_device(), None);

        queue.clear();
        assert!(queue.entries.is_empty());
    }
}
