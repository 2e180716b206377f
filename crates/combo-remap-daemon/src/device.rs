//! Keyboard discovery under /dev/input

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use evdev::Device;

use crate::injector::DEVICE_NAME_PREFIX;

pub fn is_own_device_name(name: &str) -> bool {
    name.starts_with(DEVICE_NAME_PREFIX)
}

/// Number in an `eventN` file name, used to order devices.
fn event_number(path: &Path) -> Option<u32> {
    path.file_name()?
        .to_str()?
        .strip_prefix("event")?
        .parse()
        .ok()
}

/// `/dev/input/event*` paths in numeric order.
fn event_paths() -> Result<Vec<PathBuf>> {
    let mut paths: Vec<(u32, PathBuf)> = std::fs::read_dir("/dev/input")
        .context("Cannot read /dev/input")?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            event_number(&path).map(|n| (n, path))
        })
        .collect();
    paths.sort_by_key(|(n, _)| *n);
    Ok(paths.into_iter().map(|(_, path)| path).collect())
}

/// Open every physical keyboard, in the order interception numbers them.
pub fn open_keyboards() -> Result<Vec<(PathBuf, Device)>> {
    let mut keyboards = Vec::new();

    for path in event_paths()? {
        let device = match Device::open(&path) {
            Ok(device) => device,
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
                continue;
            }
        };
        if !is_keyboard(&device) {
            continue;
        }
        if is_own_device_name(device.name().unwrap_or("")) {
            tracing::debug!("Skipping own device {}", path.display());
            continue;
        }
        keyboards.push((path, device));
    }

    Ok(keyboards)
}

/// Check if a device is a keyboard
pub fn is_keyboard(device: &Device) -> bool {
    device
        .supported_events()
        .contains(evdev::EventType::KEY)
        && device
            .supported_keys()
            .map(|keys| keys.contains(evdev::Key::KEY_A))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_number() {
        assert_eq!(event_number(Path::new("/dev/input/event0")), Some(0));
        assert_eq!(event_number(Path::new("/dev/input/event12")), Some(12));
        assert_eq!(event_number(Path::new("/dev/input/mouse0")), None);
        assert_eq!(event_number(Path::new("/dev/input/by-id")), None);
    }

    #[test]
    fn test_own_devices_recognised() {
        assert!(is_own_device_name("combo-remap keyboard"));
        assert!(is_own_device_name("combo-remap injector"));
        assert!(!is_own_device_name("AT Translated Set 2 keyboard"));
    }
}
