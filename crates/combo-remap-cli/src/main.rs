//! combo-remap CLI
//!
//! Control and configuration tool for combo-remap.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use combo_remap_config::protocol::{IpcRequest, IpcResponse};
use miette::{Context, IntoDiagnostic};

/// Name prefix of the daemon's own uinput devices
const OWN_DEVICE_PREFIX: &str = "combo-remap";

#[derive(Parser, Debug)]
#[command(name = "combo-remap")]
#[command(about = "Control tool for the combo-remap daemon")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/combo-remap/config.kdl")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show current daemon status
    Status,
    /// Restart the remap service after it lost its session
    Start,
    /// Stop the remap service and shut the daemon down
    Stop,
    /// Tear down and reopen the interception session
    Reload,
    /// Enable remapping
    Enable,
    /// Pass every key through unchanged
    Disable,
    /// Flip between enabled and disabled
    Toggle,
    /// Validate the configuration file
    Validate,
    /// List available input devices
    Devices,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    match cli.command {
        Commands::Status => cmd_status(),
        Commands::Start => cmd_control(IpcRequest::Start),
        Commands::Stop => cmd_control(IpcRequest::Stop),
        Commands::Reload => cmd_control(IpcRequest::Reload),
        Commands::Enable => cmd_control(IpcRequest::Enable),
        Commands::Disable => cmd_control(IpcRequest::Disable),
        Commands::Toggle => cmd_control(IpcRequest::Toggle),
        Commands::Validate => cmd_validate(&config_path),
        Commands::Devices => cmd_devices(),
    }
}

/// Send one request to the daemon and read its response.
fn send_request(request: IpcRequest) -> miette::Result<IpcResponse> {
    let socket_path = combo_remap_config::control_socket_path();
    let mut stream = UnixStream::connect(&socket_path)
        .into_diagnostic()
        .wrap_err_with(|| {
            format!(
                "Cannot reach the daemon at {}; is combo-remapd running?",
                socket_path.display()
            )
        })?;
    // stop waits for the event loop, so allow more than the daemon's timeout
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .into_diagnostic()?;

    let mut line = serde_json::to_string(&request).into_diagnostic()?;
    line.push('\n');
    stream.write_all(line.as_bytes()).into_diagnostic()?;

    let mut response = String::new();
    BufReader::new(stream)
        .read_line(&mut response)
        .into_diagnostic()
        .wrap_err("Failed to read daemon response")?;

    serde_json::from_str(response.trim())
        .into_diagnostic()
        .wrap_err("Daemon sent an invalid response")
}

fn cmd_status() -> miette::Result<()> {
    match send_request(IpcRequest::Status)? {
        IpcResponse::Status { label, .. } => {
            println!("Status: {}", label);
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("{}", message)),
        other => Err(miette::miette!("Unexpected response: {:?}", other)),
    }
}

fn cmd_control(request: IpcRequest) -> miette::Result<()> {
    match send_request(request)? {
        IpcResponse::Success { message } => {
            println!("{}", message.as_deref().unwrap_or("OK"));
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("{}", message)),
        other => Err(miette::miette!("Unexpected response: {:?}", other)),
    }
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    if !config_path.exists() {
        println!("No configuration file; defaults apply.");
        return Ok(());
    }

    let config = combo_remap_config::parse_config(config_path)?;
    println!("Configuration is valid!");
    println!("  Log level: {}", config.global.log_level.as_str());
    println!("  Debug keys: {}", config.global.debug_keys);
    println!("  Lock file: {}", config.global.lock_path.display());
    println!("  Keyboard device: {}", config.device.index);
    Ok(())
}

fn cmd_devices() -> miette::Result<()> {
    println!("Available input devices:\n");

    let mut paths: Vec<(u32, PathBuf)> = std::fs::read_dir("/dev/input")
        .into_diagnostic()?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let number = path
                .file_name()?
                .to_str()?
                .strip_prefix("event")?
                .parse()
                .ok()?;
            Some((number, path))
        })
        .collect();
    paths.sort_by_key(|(n, _)| *n);

    // Numbered the way the daemon numbers the keyboards it grabs
    let mut keyboard_index = 0;
    for (_, path) in paths {
        let Ok(device) = evdev::Device::open(&path) else {
            continue;
        };
        let name = device.name().unwrap_or("Unknown");
        let id = device.input_id();
        let vendor_product = format!("{:04x}:{:04x}", id.vendor(), id.product());

        let is_keyboard = device.supported_events().contains(evdev::EventType::KEY)
            && device
                .supported_keys()
                .map(|keys| keys.contains(evdev::Key::KEY_A))
                .unwrap_or(false);

        let device_type = if name.starts_with(OWN_DEVICE_PREFIX) {
            "combo-remap output".to_string()
        } else if is_keyboard {
            keyboard_index += 1;
            format!("keyboard {}", keyboard_index)
        } else {
            "other".to_string()
        };

        println!("  {} [{}]", name, device_type);
        println!("    Path: {}", path.display());
        println!("    ID: {}", vendor_product);
        println!();
    }

    Ok(())
}
