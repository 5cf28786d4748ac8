//! mced: the mode control entity daemon.
//!
//! Wires every collaborator owned by `mce-core` together and runs the
//! display state machine for the process lifetime. Logging mirrors the
//! workspace's service binary: `tracing-subscriber` registry with a daily
//! rolling file appender, no ETW layer (Linux has no SCM-tracelog analogue;
//! `journald` captures stdout/stderr for free under systemd).

use clap::Parser;
use mce_core::blanking::{ArmingInputs, BlankingTimers};
use mce_core::brightness::BrightnessEngine;
use mce_core::brightness_curve::SysfsBrightnessCurve;
use mce_core::bus_transport::ZbusTransport;
use mce_core::compositor::CompositorMediator;
use mce_core::config::{ConfigKey, ConfigStore, TomlConfigStore};
use mce_core::dsm::{DisplayStateMachine, DisplayWakeLock};
use mce_core::fb::{FbGate, IoctlBackend, NoopBackend};
use mce_core::flags::FlagWatcher;
use mce_core::led::LoggingLedEngine;
use mce_core::sensors::NullSensorGateway;
use mce_core::shutdown::ShutdownLatch;
use mce_core::socket::{LifecycleSocketClient, SocketEvent};
use mce_core::suspend::{allowed_level, SuspendInputs};
use mce_core::types::{CallActivity, DisplayState, SuspendLevel, UiState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

/// How often the tick loop recomputes the suspend level and blanking
/// arming policy. Events that matter sooner (a proximity change, an
/// incoming compositor reply) are handled as they arrive rather than
/// waiting for the next tick; this interval only bounds the staleness of
/// derived state like the "recent call activity" suspend blocker.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "mced", about = "Mode control entity daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/mce.ini.toml")]
    config: PathBuf,

    /// Frame-buffer device to drive via FBIOBLANK. Omit to run with the
    /// no-op backend (compositor/firmware owns panel power).
    #[arg(long)]
    fb_device: Option<PathBuf>,

    /// Backlight sysfs class directory.
    #[arg(long, default_value = "/sys/class/backlight/wled")]
    backlight_device: PathBuf,

    /// DSME lifecycle socket path.
    #[arg(long, default_value = "/tmp/dsmesock")]
    dsme_socket: PathBuf,

    /// `systemd`'s boot-status directory.
    #[arg(long, default_value = "/run/systemd/boot-status")]
    boot_status_dir: PathBuf,

    /// Flag file whose presence marks an OS update in progress.
    #[arg(long, default_value = "/tmp/os-update-running")]
    update_flag: PathBuf,

    /// Log directory for the daily rolling file appender.
    #[arg(long, default_value = "/var/log/mce")]
    log_dir: PathBuf,
}

fn init_logging(log_dir: &std::path::Path) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "mced.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let fmt_layer = fmt::layer().with_target(false).with_writer(non_blocking);
    let stdout_layer = fmt::layer().with_target(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(LevelFilter::TRACE)
        .with(fmt_layer)
        .with(stdout_layer)
        .init();
    guard
}

fn main() {
    let args = Args::parse();
    let _log_guard = init_logging(&args.log_dir);
    info!("mced starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(run(args));
}

async fn run(args: Args) {
    let config = match TomlConfigStore::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            warn!(?err, "failed to load configuration, continuing with defaults");
            TomlConfigStore::load("/nonexistent").expect("default load never fails")
        }
    };
    let _config_watcher = TomlConfigStore::spawn_watcher(&config).ok();

    let (_flags, mut flags_rx) = FlagWatcher::spawn(&args.boot_status_dir, &args.update_flag);
    let _flag_watchers = FlagWatcher::install_watchers(&_flags);

    // Reserved for wiring a real proximity/ALS/orientation gateway; the
    // suspend oracle and blanking policy only need `SensorGateway` once one
    // is plugged in.
    let _sensors = Arc::new(NullSensorGateway::default());
    let led = Arc::new(LoggingLedEngine::default());

    let connection = match zbus::Connection::session().await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(?err, "failed to connect to session bus, compositor mediation is disabled");
            std::process::exit(1);
        }
    };
    let transport = Arc::new(ZbusTransport::new(connection));
    {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            loop {
                transport.refresh_compositor_pid().await;
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
    }

    let curve = Arc::new(SysfsBrightnessCurve::probe(&args.backlight_device));
    let brightness = BrightnessEngine::new(curve, transport.clone());

    let core_dump_delay = Duration::from_secs(
        config.get(ConfigKey::CompositorCoreDumpDelay).as_int().unwrap_or(30) as u64,
    );
    let compositor = CompositorMediator::new(transport.clone(), led.clone(), core_dump_delay);

    let fb_backend: Arc<dyn mce_core::fb::FbBackend> = match &args.fb_device {
        Some(path) => match IoctlBackend::open(path) {
            Ok(backend) => Arc::new(backend),
            Err(err) => {
                warn!(?err, path = %path.display(), "failed to open frame buffer device, using no-op backend");
                Arc::new(NoopBackend)
            }
        },
        None => Arc::new(NoopBackend),
    };
    let fb = FbGate::new(fb_backend, led.clone(), None, None);
    let fb_raw_fd = fb.raw_fd();

    let shutdown_latch = Arc::new(ShutdownLatch::default());

    let (socket_events_tx, mut socket_events_rx) = mpsc::channel(32);
    let (service_available_tx, service_available_rx) = watch::channel(true);
    let (update_mode_tx, update_mode_rx) = watch::channel(false);
    let (outgoing_tx, outgoing_rx) = mpsc::channel(8);
    let socket_client = LifecycleSocketClient::new(&args.dsme_socket, socket_events_tx);
    tokio::spawn(socket_client.run(service_available_rx, update_mode_rx, outgoing_rx));
    drop(outgoing_tx);

    let (suspend_level_tx, suspend_level_rx) = watch::channel(SuspendLevel::On);
    let (display_state_tx, _display_state_rx) = watch::channel(DisplayState::Undef);
    let (target_tx, target_rx) = watch::channel(DisplayState::Undef);
    let (compositor_available_tx, compositor_available_rx) = watch::channel(false);
    let (reannounce_tx, reannounce_rx) = watch::channel(false);
    let (_touch_lock_tx, touch_lock_rx) = watch::channel(false);
    let (_compositor_replies_tx, compositor_replies_rx) = mpsc::channel(1);

    let wake_lock = Arc::new(DisplayWakeLock::default());

    let dsm = DisplayStateMachine::new(
        target_rx,
        display_state_tx,
        compositor,
        compositor_replies_rx,
        compositor_available_rx,
        fb,
        brightness,
        wake_lock,
        suspend_level_rx,
        reannounce_rx,
        touch_lock_rx,
    );
    tokio::spawn(dsm.run());

    // Swallow system-state / heartbeat events from the lifecycle socket,
    // updating the shutdown latch and, once a shutdown/reboot is seen,
    // marking `service_available` so the socket stops reconnecting.
    tokio::spawn(async move {
        while let Some(event) = socket_events_rx.recv().await {
            match event {
                SocketEvent::SystemState(state) => {
                    if shutdown_latch.on_system_state(state) {
                        if let Some(fb_fd) = fb_raw_fd {
                            // Safety: called exactly once, on the transition
                            // into shutdown, before any fork-unsafe state is
                            // touched by this task.
                            unsafe {
                                mce_core::fb::spawn_holder(fb_fd);
                            }
                        }
                    }
                }
                SocketEvent::Heartbeat => {}
                SocketEvent::Connected => info!("lifecycle socket connected"),
                SocketEvent::Disconnected => {
                    let _ = service_available_tx.send(true);
                }
            }
        }
    });

    let last_call_activity_change = Instant::now();
    let last_call_activity = CallActivity::None;
    // Timer-kind pools for DIM/OFF/LPM_OFF/PAUSE/adaptive; the pools
    // themselves are exercised by `blanking::evaluate`'s callers once a
    // bus-facing request surface (pause clients, touch lock) is wired in.
    let _blanking_timers = BlankingTimers::default();

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    loop {
        ticker.tick().await;
        let flags = *flags_rx.borrow();

        let inputs = SuspendInputs {
            ringing_call: false,
            call_activity: last_call_activity,
            call_activity_changed_at: last_call_activity_change,
            alarm_visible: false,
            non_call_ui_exception: false,
            system_state_is_user: true,
            bootup_incomplete: !flags.bootup_complete,
            shutting_down: false,
            update_in_progress: flags.update_mode,
            module_unloading: false,
            update_mode: flags.update_mode,
            compositor_ui_state: UiState::Disabled,
            autosuspend_policy: config.autosuspend_policy(),
            now: Instant::now(),
        };
        let level = allowed_level(&inputs);
        let _ = suspend_level_tx.send(level);
        let _ = update_mode_tx.send(flags.update_mode);

        let arming = ArmingInputs {
            update_mode: flags.update_mode,
            inhibit: config.inhibit_mode(),
            charger_connected: false,
            call_exception: false,
            ringing: false,
            handset_route: false,
            proximity_covered: false,
            touch_lock: *touch_lock_rx.borrow(),
            blanking_pause_active: false,
        };
        let _armed = mce_core::blanking::evaluate(&arming);

        let desired = if flags.bootup_complete {
            DisplayState::On
        } else {
            DisplayState::Undef
        };
        let _ = target_tx.send(desired);
        let _ = reannounce_tx.send(false);
        let _ = compositor_available_tx.send(false);
    }
}
