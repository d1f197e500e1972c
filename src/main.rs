//! # Wheel Input
//!
//! Calibrate a racing wheel (or any profiled controller) from the console
//! and print the steering, throttle and brake modifiers it produces.

use anyhow::{Context, Result};
use std::io::BufRead;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use wheel_input::config::{Config, LoggingConfig};
use wheel_input::controller::context::SessionContext;
use wheel_input::controller::evdev_device::{EvdevBackend, EvdevDevice};
use wheel_input::controller::matcher::{DeviceMatcher, SupportedDevices};
use wheel_input::controller::profile::ProfileStore;
use wheel_input::controller::session::ControllerSession;
use wheel_input::error::WheelInputError;
use wheel_input::poller::feed::{DiscreteEvent, ModifierUpdate};
use wheel_input::poller::{SessionHandle, SessionPoller};

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// How often changed modifiers are printed
const DISPLAY_PERIOD_MS: u64 = 100;

const USAGE: &str = "Enter: confirm calibration step, r: restart calibration, \
l: list devices, s <index>: switch device, p: pause, c: continue, q: quit";

/// Main entry point for Wheel Input
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, else `config/default.toml`, else defaults)
///    - Set up logging with tracing subscriber
///    - Select the first connected device that has a loadable profile
///
/// 2. **Main Loop**
///    - Enter confirms the current calibration step, `r` resets, `q` quits
///    - `l` lists the supported devices, `s <index>` switches to one of them
///    - `p` pauses input, `c` continues
///    - Print changed modifiers every 100 ms and every button/hat edge
///    - Handle Ctrl+C; after a disconnection the operator can switch devices
///
/// 3. **Graceful Shutdown**
///    - Release the device exactly once and stop the poller
///
/// # Errors
///
/// Returns error if:
/// - The configuration file is invalid
/// - No connected device has a profile
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);

    info!("Wheel Input v{} starting...", env!("CARGO_PKG_VERSION"));

    let matcher = DeviceMatcher::from_config(&config.matcher);
    let store = ProfileStore::new(&config.profiles.dir, matcher.clone());
    let ctx = SessionContext::from_config(&config.session);
    let mut backend = EvdevBackend::new();

    let supported = matcher
        .select_supported(&mut backend, &store)
        .with_context(|| format!("No connected device has a profile in {}", store.dir().display()))?;
    let session = open_first(&mut backend, &store, &ctx, &supported)?;

    let (handle, mut feed, task) = SessionPoller::spawn(backend, session, store);
    let mut input = spawn_stdin_reader();
    let mut display = interval(Duration::from_millis(DISPLAY_PERIOD_MS));

    println!("{}", USAGE);
    show_prompt(&handle).await?;

    loop {
        tokio::select! {
            line = input.recv() => {
                let Some(line) = line else { break };
                if !handle_input(ConsoleCommand::parse(&line), &handle).await? {
                    break;
                }
            }

            event = feed.next_event() => {
                match event {
                    Some(DiscreteEvent::Disconnected { device }) => {
                        warn!("{} disconnected", device);
                        println!("{} disconnected, l: list devices, s <index>: switch, q: quit", device);
                    }
                    Some(event) => print_event(&event),
                    None => break,
                }
            }

            _ = display.tick() => {
                for update in feed.drain_changed() {
                    print_update(&update);
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    handle.quit().await?;
    task.await?;
    info!("Device released");

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let level = config.level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (file_layer, guard) = if config.log_dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(&config.log_dir, "wheel-input.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Open the lowest-index supported device whose profile loads.
fn open_first(
    backend: &mut EvdevBackend,
    store: &ProfileStore,
    ctx: &SessionContext,
    supported: &SupportedDevices,
) -> Result<ControllerSession<EvdevDevice>> {
    let mut candidates: Vec<(&String, &usize)> = supported.iter().collect();
    candidates.sort_by_key(|(_, index)| **index);

    for (name, index) in candidates {
        match ControllerSession::open(backend, store, ctx, name, *index) {
            Ok(session) => {
                println!("Using {} ({})", name, session.device_type());
                return Ok(session);
            }
            Err(e @ WheelInputError::MissingProfile { .. }) => warn!("Skipping {}: {}", name, e),
            Err(e) => warn!("Could not open {}: {}", name, e),
        }
    }

    Err(WheelInputError::NoSupportedDevice.into())
}

/// Lines typed on stdin.
///
/// A blocking thread keeps an unfinished read from holding up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// A line typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleCommand {
    Commit,
    Reset,
    List,
    Switch(usize),
    Pause,
    Resume,
    Quit,
    Unknown(String),
}

impl ConsoleCommand {
    fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let command = match words.next() {
            None => return ConsoleCommand::Commit,
            Some(word) => word,
        };
        let argument = words.next();
        if words.next().is_some() {
            return ConsoleCommand::Unknown(line.trim().to_string());
        }

        match (command, argument) {
            ("r" | "reset", None) => ConsoleCommand::Reset,
            ("l" | "list", None) => ConsoleCommand::List,
            ("s" | "switch", Some(index)) => match index.parse() {
                Ok(index) => ConsoleCommand::Switch(index),
                Err(_) => ConsoleCommand::Unknown(line.trim().to_string()),
            },
            ("p" | "pause", None) => ConsoleCommand::Pause,
            ("c" | "continue", None) => ConsoleCommand::Resume,
            ("q" | "quit", None) => ConsoleCommand::Quit,
            _ => ConsoleCommand::Unknown(line.trim().to_string()),
        }
    }
}

/// Returns `false` when the operator asked to quit.
async fn handle_input(command: ConsoleCommand, handle: &SessionHandle) -> Result<bool> {
    match command {
        ConsoleCommand::Quit => return Ok(false),
        ConsoleCommand::Reset => {
            handle.reset_calibration().await?;
            println!("Calibration reset");
            show_prompt(handle).await?;
        }
        ConsoleCommand::Commit => match handle.commit_step().await {
            Ok(Some(step)) => {
                if let Some(recorded) = &step.recorded {
                    println!("Recorded {} {:?} = {}", recorded.axis, recorded.kind, recorded.value);
                }
                show_prompt(handle).await?;
            }
            Ok(None) => println!("Already calibrated, press r to start over"),
            // Disconnection is reported through the event feed.
            Err(e) => println!("Calibration step failed: {}", e),
        },
        ConsoleCommand::List => {
            let current = handle.snapshot().await?.device;
            for (name, index) in by_index(&handle.list_devices().await?) {
                let marker = if name == current { "*" } else { " " };
                println!("{} {}: {}", marker, index, name);
            }
        }
        ConsoleCommand::Switch(index) => {
            let roster = handle.list_devices().await?;
            match by_index(&roster).into_iter().find(|(_, i)| *i == index) {
                Some((name, _)) => match handle.switch_to(&name).await {
                    Ok(()) => {
                        println!("Using {}", name);
                        show_prompt(handle).await?;
                    }
                    Err(e) => println!("Could not switch to {}: {}", name, e),
                },
                None => println!("No supported device at index {}, l lists them", index),
            }
        }
        ConsoleCommand::Pause => {
            handle.pause().await?;
            println!("Paused, c to continue");
        }
        ConsoleCommand::Resume => {
            handle.resume().await?;
            println!("Continuing");
        }
        ConsoleCommand::Unknown(other) => println!("Unknown command '{}'\n{}", other, USAGE),
    }
    Ok(true)
}

/// Roster entries ordered by connection index.
fn by_index(roster: &SupportedDevices) -> Vec<(String, usize)> {
    let mut devices: Vec<(String, usize)> = roster.iter().map(|(n, i)| (n.clone(), *i)).collect();
    devices.sort_by_key(|(_, index)| *index);
    devices
}

async fn show_prompt(handle: &SessionHandle) -> Result<()> {
    let snapshot = handle.snapshot().await?;
    match snapshot.prompt {
        Some(prompt) => println!("> {} [Enter]", prompt),
        None if snapshot.calibrated => println!("Calibrated, modifiers follow"),
        None => println!(
            "Calibration finished but {} must be redone, press r",
            snapshot.needs_recalibration.join(", ")
        ),
    }
    Ok(())
}

fn print_update(update: &ModifierUpdate) {
    println!(
        "{} {}[{}] = {}",
        update.device_type, update.function, update.axis_index, update.value
    );
}

fn print_event(event: &DiscreteEvent) {
    match event {
        DiscreteEvent::ButtonDown { device_type, index, name } => {
            println!("{} button {} ({}) down", device_type, index, name.as_deref().unwrap_or("-"));
        }
        DiscreteEvent::ButtonUp { device_type, index, name } => {
            println!("{} button {} ({}) up", device_type, index, name.as_deref().unwrap_or("-"));
        }
        DiscreteEvent::HatMotion { device_type, index, name, x, y } => {
            println!(
                "{} hat {} ({}) = ({}, {})",
                device_type,
                index,
                name.as_deref().unwrap_or("-"),
                x,
                y
            );
        }
        DiscreteEvent::RecalibrationRequested { axis } => {
            println!("Calibration of '{}' is unusable, press r to recalibrate", axis);
        }
        DiscreteEvent::RosterChanged(change) => {
            for (name, index) in &change.added {
                println!("Supported device connected: {} ({})", name, index);
            }
            for name in &change.removed {
                println!("Supported device removed: {}", name);
            }
        }
        DiscreteEvent::Disconnected { device } => println!("{} disconnected", device),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        assert_eq!(DEFAULT_CONFIG_PATH, "config/default.toml");
    }

    #[test]
    fn test_parse_console_commands() {
        assert_eq!(ConsoleCommand::parse(""), ConsoleCommand::Commit);
        assert_eq!(ConsoleCommand::parse("  \n"), ConsoleCommand::Commit);
        assert_eq!(ConsoleCommand::parse("r"), ConsoleCommand::Reset);
        assert_eq!(ConsoleCommand::parse("list"), ConsoleCommand::List);
        assert_eq!(ConsoleCommand::parse("s 2"), ConsoleCommand::Switch(2));
        assert_eq!(ConsoleCommand::parse("switch  0 "), ConsoleCommand::Switch(0));
        assert_eq!(ConsoleCommand::parse("p"), ConsoleCommand::Pause);
        assert_eq!(ConsoleCommand::parse("continue"), ConsoleCommand::Resume);
        assert_eq!(ConsoleCommand::parse("q"), ConsoleCommand::Quit);
    }

    #[test]
    fn test_parse_rejects_malformed_commands() {
        assert_eq!(ConsoleCommand::parse("s"), ConsoleCommand::Unknown("s".to_string()));
        assert_eq!(ConsoleCommand::parse("s two"), ConsoleCommand::Unknown("s two".to_string()));
        assert_eq!(ConsoleCommand::parse("q now"), ConsoleCommand::Unknown("q now".to_string()));
        assert_eq!(ConsoleCommand::parse("s 1 2"), ConsoleCommand::Unknown("s 1 2".to_string()));
        assert_eq!(ConsoleCommand::parse("x"), ConsoleCommand::Unknown("x".to_string()));
    }

    #[test]
    fn test_roster_listed_by_index() {
        let mut roster = SupportedDevices::new();
        roster.insert("Logitech G920".to_string(), 2);
        roster.insert("Logitech Driving Force GT".to_string(), 0);
        assert_eq!(
            by_index(&roster),
            vec![
                ("Logitech Driving Force GT".to_string(), 0),
                ("Logitech G920".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_default_config_file_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.session.poll_period_ms, 10);
        assert_eq!(config.session.precision_digits, 2);
    }

    #[test]
    fn test_bundled_profiles_load() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/profiles");
        let store = ProfileStore::new(dir, DeviceMatcher::default());
        let stems = store.supported_stems().unwrap();
        assert!(stems.contains(&"logitech_g920".to_string()));

        for stem in &stems {
            let profile = store.load_profile(stem).unwrap();
            for function in ["steering", "throttle", "brake"] {
                assert!(profile.function_axis(function).is_some(), "{} lacks {}", stem, function);
            }
        }
    }
}
