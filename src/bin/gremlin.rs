// Gremlin CLI
// Loads a profile, polls its physical devices and drives the virtual outputs

#![cfg_attr(not(feature = "pure-rust"), allow(dead_code))]

use std::path::PathBuf;

#[cfg(feature = "pure-rust")]
use anyhow::{bail, Context, Result};
#[cfg(feature = "pure-rust")]
use clap::Parser;

#[cfg(feature = "pure-rust")]
use gremlin_core::device::filter::matches_device_filter;
#[cfg(feature = "pure-rust")]
use gremlin_core::{
    list_devices, DeviceId, DeviceKind, DeviceMatcher, Engine, EventQueue, JoystickPoller, OutputSink, Profile,
    QueuedEvent, RecordingSink, Settings, UinputSink,
};

/// Joystick input router
#[derive(Parser, Debug)]
#[command(name = "gremlin")]
#[command(version)]
#[command(about = "Routes joystick input through a profile of actions to virtual devices", long_about = None)]
struct Args {
    /// TOML profile to run
    #[arg(short, long, value_name = "PROFILE")]
    profile: Option<PathBuf>,

    /// Settings file (default: ~/.config/gremlin/settings.toml)
    #[arg(short, long, value_name = "SETTINGS")]
    settings: Option<PathBuf>,

    /// Mode to start in, overriding profile and settings
    #[arg(short, long, value_name = "MODE")]
    mode: Option<String>,

    /// Only poll these declared devices (can be used multiple times)
    #[arg(short, long, value_name = "DEVICE")]
    devices: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate the profile and exit
    #[arg(long)]
    check_profile: bool,

    /// List available input devices
    #[arg(long)]
    list_devices: bool,

    /// Log output writes instead of creating virtual devices
    #[arg(long)]
    dry_run: bool,

    /// Do not grab physical devices exclusively
    #[arg(long)]
    no_grab: bool,
}

#[cfg(feature = "pure-rust")]
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

#[cfg(feature = "pure-rust")]
fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.settings {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::load_default().context("Failed to load default settings")?,
    };
    if let Some(mode) = &args.mode {
        settings.start_mode = Some(mode.clone());
    }
    if !args.devices.is_empty() {
        settings.device_filter = args.devices.clone();
    }
    Ok(settings)
}

/// Physical devices the profile declares, narrowed by the device filter
#[cfg(feature = "pure-rust")]
fn physical_devices(profile: &Profile, settings: &Settings) -> Result<Vec<(DeviceId, DeviceMatcher)>> {
    let mut devices = Vec::new();
    for (id, decl) in profile.devices() {
        if profile.device_kind(id) != Some(DeviceKind::Physical) {
            continue;
        }
        if !matches_device_filter(id.as_str(), id.as_str(), &settings.device_filter, &settings.output_device_name) {
            log::debug!("Skipping device '{}' (filtered)", id);
            continue;
        }
        let Some(matcher) = decl.matcher() else {
            continue;
        };
        let matcher = matcher.with_context(|| format!("Invalid pattern for device '{}'", id))?;
        devices.push((id.clone(), matcher));
    }
    Ok(devices)
}

#[cfg(feature = "pure-rust")]
fn print_devices(settings: &Settings) {
    let devices = list_devices(&settings.output_device_name);
    if devices.is_empty() {
        println!("No input devices found (check permissions on /dev/input)");
        return;
    }
    println!("Available input devices:");
    for info in devices {
        println!(
            "  {}  {}  [{} axes, {} buttons, {} hats]",
            info.path, info.name, info.axes, info.buttons, info.hats
        );
    }
}

/// Push a shutdown item onto the queue on SIGINT/SIGTERM
#[cfg(feature = "pure-rust")]
fn spawn_signal_handler(queue: EventQueue) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handler")?;
    std::thread::Builder::new()
        .name("gremlin-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                log::info!("Received signal {}, shutting down", signal);
                queue.push(QueuedEvent::Shutdown);
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

#[cfg(feature = "pure-rust")]
fn run(args: Args) -> Result<()> {
    let settings = load_settings(&args)?;

    if args.list_devices {
        print_devices(&settings);
        return Ok(());
    }

    let Some(path) = args.profile.as_ref() else {
        bail!("--profile is required when not using --list-devices");
    };
    let profile =
        Profile::from_toml_path(path).with_context(|| format!("Failed to load profile {}", path.display()))?;
    profile
        .validate()
        .with_context(|| format!("Profile {} is invalid", path.display()))?;

    if args.check_profile {
        println!(
            "Profile OK: {} action(s), {} binding(s), {} mode(s)",
            profile.library().len(),
            profile.bindings().len(),
            profile.modes().len()
        );
        return Ok(());
    }

    let queue = EventQueue::new();
    spawn_signal_handler(queue.clone())?;

    let devices = physical_devices(&profile, &settings)?;
    if devices.is_empty() {
        log::warn!("Profile declares no physical devices to poll");
    }
    let mut poller = JoystickPoller::spawn(devices, queue.clone(), !args.no_grab, &settings.output_device_name)
        .context("Failed to start device readers")?;

    let sink: Box<dyn OutputSink> = if args.dry_run {
        Box::new(RecordingSink::echoing())
    } else {
        Box::new(UinputSink::new(&settings.output_device_name))
    };

    let mut engine = Engine::new(settings);
    engine.activate(profile, sink).context("Failed to activate profile")?;
    log::info!(
        "Running in mode '{}' with {} device reader(s)",
        engine.current_mode().unwrap_or("?"),
        poller.device_count()
    );

    engine.run(&queue);

    poller.stop();
    engine.deactivate();
    Ok(())
}

#[cfg(feature = "pure-rust")]
fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(args)
}

// Stub for when pure-rust feature is not enabled
#[cfg(not(feature = "pure-rust"))]
fn main() {
    eprintln!("Error: gremlin binary requires the 'pure-rust' feature to be enabled.");
    eprintln!("Please build with: cargo build --release --features pure-rust --bin gremlin");
    std::process::exit(1);
}
