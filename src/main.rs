use std::path::Path;
use std::process::ExitCode;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};

use crate::actuators::SystemActuators;
use crate::census::{Census, UdevCensus};
use crate::config::Config;
use crate::error::Result;
use crate::hotplug::{EventDispatcher, HotplugListener};
use crate::instance_lock::InstanceLock;
use crate::power::PowerController;
use crate::protocols::cec_ctl::CecCtl;
use crate::session::SessionOrchestrator;
use crate::shutdown::{ShutdownCoordinator, ShutdownReason, StopSignals};

#[macro_use]
extern crate tracing;

mod actuators;
mod census;
mod config;
mod error;
mod hotplug;
mod instance_lock;
mod permissions;
mod power;
mod protocols;
mod retry;
mod session;
mod shutdown;

fn log_file_writer(path: &Path) -> std::result::Result<(NonBlocking, WorkerGuard), InitError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.log", config::APP_NAME));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

/// stderr + journald (when available) + the configured log file
///
/// The returned guard flushes the file writer on drop.
fn setup_logs(log_path: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "info,{}=debug",
        env!("CARGO_CRATE_NAME")
    )));

    let file = log_path.map(|path| (path, log_file_writer(path)));
    let (file_layer, guard, file_error) = match file {
        Some((_, Ok((writer, guard)))) => (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
            None,
        ),
        Some((path, Err(e))) => (None, None, Some((path, e))),
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(file_layer)
        .with(tracing_journald::layer().ok())
        .init();

    if let Some((path, e)) = file_error {
        warn!("Cannot log to {}: {}", path.display(), e);
    }

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let loaded = Config::discover();
    let _log_guard = setup_logs(loaded.as_ref().ok().map(|(_, config)| config.paths.log.as_path()));

    let (path, config) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Daemon starting, config loaded from {}", path.display());

    match run(config).await {
        Ok(reason) => {
            info!("Exiting ({:?})", reason);
            ExitCode::from(reason.exit_code())
        }
        Err(e) => {
            error!("Quit unexpectedly: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<ShutdownReason> {
    let lock = InstanceLock::acquire()?;
    debug!("Holding instance lock {}", lock.path().display());
    permissions::check_host(&config).log();

    let coordinator = ShutdownCoordinator::new();
    let mut signals = StopSignals::new()?;

    let bus = CecCtl::new(config.cec.device.clone(), config.cec.osd_name.clone());
    let power = PowerController::new(bus, coordinator.signal())
        .with_standby_confirmation(config.cec.confirm_standby);
    // The adapter may only become usable once the TV is connected; commands
    // are retried per event anyway
    match power.claim().await {
        Ok(()) => info!("Initialised CEC session on {}", config.cec.device.display()),
        Err(e) => warn!("{}", e),
    }

    let (listener, events) = HotplugListener::spawn(&config.hotplug.tag, coordinator.listener_flag())?;
    info!(
        "Created hotplug monitor, filtering by '{}' tag (assigned to controllers by udev rules)",
        config.hotplug.tag
    );

    let census = UdevCensus::new(&config.hotplug);
    match census.count() {
        Ok(count) => info!("{} controller(s) attached at startup", count),
        Err(e) => warn!("Initial controller census failed: {}", e),
    }

    let mut orchestrator = SessionOrchestrator::new(
        census,
        power,
        SystemActuators::new(config.client.clone()),
        config.wake_mac()?.to_string(),
    );
    let dispatcher = EventDispatcher::new(events, coordinator.signal());

    let heartbeat_every = config.heartbeat();
    info!(
        "Entering standby phase, heartbeat every {} minute(s)",
        config.heartbeat_minutes
    );

    let reason = {
        let dispatch = dispatcher.run(&mut orchestrator);
        tokio::pin!(dispatch);

        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + heartbeat_every,
            heartbeat_every,
        );

        let reason = loop {
            tokio::select! {
                name = signals.recv() => break ShutdownReason::Signal(name),
                end = &mut dispatch => {
                    debug!("Dispatcher returned {:?}", end);
                    break ShutdownReason::ListenerStopped;
                }
                _ = heartbeat.tick() => debug!("Daemon still running..."),
            }
        };

        match reason {
            ShutdownReason::Signal(name) => {
                info!("Detected stop signal {}, shutting down", name);
                coordinator.trigger();
                // Finishes the in-flight event, or cancels it at its next checkpoint
                dispatch.await;
            }
            ShutdownReason::ListenerStopped => {
                error!("Hotplug listener stopped, shutting down");
            }
        }
        reason
    };

    info!("Session state at shutdown: {:?}", orchestrator.state());
    coordinator
        .teardown(listener, &mut orchestrator, config.client.terminate_on_shutdown)
        .await;
    drop(lock);

    Ok(reason)
}
