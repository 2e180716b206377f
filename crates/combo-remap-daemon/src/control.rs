//! Control surface of the remap service
//!
//! [`handle_request`] maps each control socket request onto a
//! [`RemapService`] call. Requests block (`stop` waits for the loop thread),
//! so the daemon runs them on the blocking pool. A `stop` is final; the
//! daemon exits once it has answered it.
//!
//! [`watch_status`] is the status indicator: it samples the service on a
//! fixed interval and logs the label whenever the indicator changes.
//!
//! # Example Usage
//!
//! ```bash
//! echo '{"type":"toggle"}' | socat - UNIX-CONNECT:$XDG_RUNTIME_DIR/combo-remap.sock
//!
//! # Or use the CLI
//! combo-remap toggle
//! ```

use std::sync::Arc;
use std::time::Duration;

use combo_remap_config::protocol::{IpcRequest, IpcResponse, ServiceState};

use crate::supervisor::RemapService;

/// Execute one control request against `service`.
pub fn handle_request(service: &RemapService, request: IpcRequest) -> IpcResponse {
    match request {
        IpcRequest::Status => IpcResponse::Status {
            state: service.status(),
            enabled: service.is_enabled(),
            label: service.status_label(),
        },
        IpcRequest::Start => match service.start() {
            Ok(()) => IpcResponse::success("Service running"),
            Err(e) => IpcResponse::error(format!("Failed to start: {}", e)),
        },
        IpcRequest::Stop => {
            service.stop();
            IpcResponse::success("Service stopped; daemon exiting")
        }
        IpcRequest::Reload => {
            if service.status() == ServiceState::Stopped {
                return IpcResponse::error("Service is stopped; use start");
            }
            service.request_reload();
            IpcResponse::success("Reload requested")
        }
        IpcRequest::Enable => {
            service.enable();
            IpcResponse::success("Mapping enabled")
        }
        IpcRequest::Disable => {
            service.disable();
            IpcResponse::success("Mapping disabled")
        }
        IpcRequest::Toggle => {
            if service.toggle() {
                IpcResponse::success("Mapping enabled")
            } else {
                IpcResponse::success("Mapping disabled")
            }
        }
    }
}

/// Tracks the last indicator key seen.
#[derive(Debug, Default)]
pub struct StatusIndicator {
    last: Option<&'static str>,
}

impl StatusIndicator {
    /// Returns the new label if the indicator changed since the last call.
    pub fn observe(&mut self, service: &RemapService) -> Option<String> {
        let key = service.indicator();
        if self.last == Some(key) {
            return None;
        }
        self.last = Some(key);
        Some(service.status_label())
    }
}

/// Log status changes until the task is aborted.
pub async fn watch_status(service: Arc<RemapService>, interval: Duration) {
    let mut indicator = StatusIndicator::default();
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        if let Some(label) = indicator.observe(&service) {
            tracing::info!("Status: {}", label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::testing::RecordingInjector;
    use crate::remapper::RemapTable;
    use crate::session::memory::{wait_until, MemoryDriver};
    use crate::supervisor::ServiceOptions;

    fn service(driver: &Arc<MemoryDriver>) -> RemapService {
        RemapService::new(
            driver.clone(),
            Arc::new(RecordingInjector::default()),
            RemapTable::combo_layer(),
            ServiceOptions::default(),
        )
    }

    #[test]
    fn test_status_request() {
        let driver = MemoryDriver::new();
        let service = service(&driver);
        service.start().unwrap();
        service.disable();

        let response = handle_request(&service, IpcRequest::Status);
        assert_eq!(
            response,
            IpcResponse::Status {
                state: ServiceState::Running,
                enabled: false,
                label: "running (disabled)".into(),
            }
        );
        service.stop();
    }

    #[test]
    fn test_toggle_reports_new_state() {
        let driver = MemoryDriver::new();
        let service = service(&driver);

        assert_eq!(
            handle_request(&service, IpcRequest::Toggle),
            IpcResponse::success("Mapping disabled")
        );
        assert!(!service.is_enabled());
        assert_eq!(
            handle_request(&service, IpcRequest::Toggle),
            IpcResponse::success("Mapping enabled")
        );
        assert!(service.is_enabled());
    }

    #[test]
    fn test_enable_disable_requests() {
        let driver = MemoryDriver::new();
        let service = service(&driver);

        handle_request(&service, IpcRequest::Disable);
        assert!(!service.is_enabled());
        handle_request(&service, IpcRequest::Enable);
        assert!(service.is_enabled());
    }

    #[test]
    fn test_start_failure_is_error_response() {
        let driver = MemoryDriver::new();
        driver.set_unavailable(true);
        let service = service(&driver);

        let response = handle_request(&service, IpcRequest::Start);
        assert!(
            matches!(response, IpcResponse::Error { ref message } if message.contains("unavailable"))
        );
    }

    #[test]
    fn test_stop_then_reload_is_rejected() {
        let driver = MemoryDriver::new();
        let service = service(&driver);
        service.start().unwrap();

        assert_eq!(
            handle_request(&service, IpcRequest::Stop),
            IpcResponse::success("Service stopped; daemon exiting")
        );
        assert!(matches!(
            handle_request(&service, IpcRequest::Reload),
            IpcResponse::Error { .. }
        ));
        assert!(matches!(
            handle_request(&service, IpcRequest::Start),
            IpcResponse::Error { ref message } if message.contains("stopped")
        ));
        assert_eq!(driver.created().len(), 1);
    }

    #[test]
    fn test_reload_request_opens_new_session() {
        let driver = MemoryDriver::new();
        let service = service(&driver);
        service.start().unwrap();

        handle_request(&service, IpcRequest::Reload);

        assert!(driver.wait_for_sessions(2));
        assert!(wait_until(Duration::from_secs(2), || {
            service.status() == ServiceState::Running
        }));
        service.stop();
    }

    #[test]
    fn test_indicator_reports_changes_only() {
        let driver = MemoryDriver::new();
        let service = service(&driver);
        let mut indicator = StatusIndicator::default();

        assert_eq!(indicator.observe(&service), Some("starting".to_string()));
        assert_eq!(indicator.observe(&service), None);

        service.start().unwrap();
        assert_eq!(indicator.observe(&service), Some("running".to_string()));

        service.disable();
        assert_eq!(
            indicator.observe(&service),
            Some("running (disabled)".to_string())
        );
        assert_eq!(indicator.observe(&service), None);

        service.stop();
        assert_eq!(indicator.observe(&service), Some("stopped".to_string()));
    }
}
