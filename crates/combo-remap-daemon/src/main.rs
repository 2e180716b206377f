//! combo-remap daemon
//!
//! Intercepts the tracked keyboard and applies the combo remap policy.

mod control;
mod device;
mod injector;
mod ipc;
mod lock;
mod macros;
mod modifiers;
mod remapper;
mod scancode;
mod session;
mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use combo_remap_config::protocol::{IpcRequest, IpcResponse};
use combo_remap_config::Config;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use crate::injector::{KeyInjector, UinputInjector};
use crate::ipc::IpcServer;
use crate::lock::InstanceLock;
use crate::remapper::RemapTable;
use crate::scancode::DeviceId;
use crate::session::linux::EvdevDriver;
use crate::session::Driver;
use crate::supervisor::{run_loop, LoopContext, LoopSignals, RemapService, ServiceOptions};

#[derive(Parser, Debug)]
#[command(name = "combo-remapd")]
#[command(about = "Keyboard interception and combo remapping daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/combo-remap/config.kdl")]
    config: String,

    /// Run the translation loop directly, without supervisor or control socket
    #[arg(long)]
    foreground_loop: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();
    let config = combo_remap_config::load_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.global.log_level.as_str())),
        )
        .init();

    tracing::info!("Loaded configuration from {}", config_path.display());

    let Some(instance) = InstanceLock::acquire(&config.global.lock_path)? else {
        tracing::info!(
            "Another instance holds {}; exiting",
            config.global.lock_path.display()
        );
        return Ok(());
    };
    tracing::debug!("Holding instance lock {}", instance.path().display());

    if config.global.debug_keys {
        tracing::info!("debug-keys on: logging CapsLock/Ctrl/F13/A events");
    }

    let options = ServiceOptions {
        device: DeviceId(config.device.index),
        debug_keys: config.global.debug_keys,
        stop_timeout: config.global.stop_timeout,
    };
    let injector: Arc<dyn KeyInjector> =
        Arc::new(UinputInjector::new().context("Failed to create injection device")?);
    let driver: Arc<dyn Driver> = Arc::new(EvdevDriver);

    if args.foreground_loop {
        run_foreground(driver, injector, options).await
    } else {
        run_service(driver, injector, options, &config).await
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

async fn run_service(
    driver: Arc<dyn Driver>,
    injector: Arc<dyn KeyInjector>,
    options: ServiceOptions,
    config: &Config,
) -> Result<()> {
    let service = Arc::new(RemapService::new(
        driver,
        injector,
        RemapTable::combo_layer(),
        options,
    ));

    let starting = service.clone();
    tokio::task::spawn_blocking(move || starting.start())
        .await
        .context("Service start task panicked")?
        .context("Failed to start remap service")?;

    let server = IpcServer::bind(&combo_remap_config::control_socket_path())?;
    let watcher = tokio::spawn(control::watch_status(
        service.clone(),
        config.global.status_interval,
    ));

    let stop_requested = Arc::new(Notify::new());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = server.accept() => match accepted {
                Ok(stream) => {
                    let service = service.clone();
                    let stop_requested = stop_requested.clone();
                    tokio::spawn(async move {
                        let mut is_stop = false;
                        let result = ipc::handle_ipc_connection(stream, |request| {
                            is_stop = request == IpcRequest::Stop;
                            async move {
                                tokio::task::spawn_blocking(move || {
                                    control::handle_request(&service, request)
                                })
                                .await
                                .unwrap_or_else(|e| IpcResponse::error(format!("Request failed: {}", e)))
                            }
                        })
                        .await;
                        if let Err(e) = result {
                            tracing::warn!("IPC connection failed: {:#}", e);
                        }
                        // Only after the response is out
                        if is_stop {
                            stop_requested.notify_one();
                        }
                    });
                }
                Err(e) => tracing::warn!("{:#}", e),
            },
            result = &mut shutdown => {
                result?;
                tracing::info!("Shutting down...");
                break;
            }
            _ = stop_requested.notified() => {
                tracing::info!("Stop requested over the control socket; exiting");
                break;
            }
        }
    }

    watcher.abort();
    let stopping = service.clone();
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("Service stop task panicked")?;

    Ok(())
}

/// Single session on a blocking thread; Ctrl+C ends it.
async fn run_foreground(
    driver: Arc<dyn Driver>,
    injector: Arc<dyn KeyInjector>,
    options: ServiceOptions,
) -> Result<()> {
    let session = driver
        .create_session()
        .context("Failed to open interception session")?;
    let signals = Arc::new(LoopSignals::default());

    let mut handle = {
        let session = session.clone();
        let signals = signals.clone();
        tokio::task::spawn_blocking(move || {
            let table = RemapTable::combo_layer();
            let ctx = LoopContext {
                table: &table,
                injector: injector.as_ref(),
                options: &options,
                signals: &signals,
            };
            run_loop(session.as_ref(), &ctx)
        })
    };

    tokio::select! {
        exit = &mut handle => {
            let exit = exit.context("Event loop panicked")?;
            session.destroy();
            tracing::warn!("Event loop ended: {:?}", exit);
            return Ok(());
        }
        result = shutdown_signal() => {
            result?;
            tracing::info!("Stopping...");
        }
    }

    signals.request_stop();
    session.destroy();
    handle.await.context("Event loop panicked")?;
    Ok(())
}
