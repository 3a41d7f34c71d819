//! lockglow entry point.
//!
//! Loads the configuration, wires the OS adapters into the [`SyncEngine`] and
//! pumps events until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()                 -- %APPDATA%\Lockglow\config.toml
//!  └─ MessageWindow::spawn()        -- raw input target (own thread)
//!  └─ LampArrayWatcher::start()     -- add/remove -> SyncEvent::Device
//!  └─ SyncEngine::run()             -- serial pump
//!       ├─ Device(Added/Removed/Availability) -> lifecycle
//!       ├─ Key(up, monitored)                 -> single-key color update
//!       └─ Shutdown (Ctrl-C)                  -> detach, stop
//! ```

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lockglow_sync::application::lifecycle::SyncStatus;
use lockglow_sync::infrastructure::storage::config::{self, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = config::load_config();

    // RUST_LOG wins; otherwise the configured level.
    let fallback_level = loaded
        .as_ref()
        .map(|cfg| cfg.general.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_level)),
        )
        .init();

    let config = loaded.context("loading configuration")?;
    info!(device = ?config.device.id, "lockglow starting");

    run(config).await?;

    info!("lockglow stopped");
    Ok(())
}

fn log_status(status: &SyncStatus) {
    info!(
        state = ?status.state,
        device = ?status.device_id,
        lamps = status.lamp_count,
        monitored = status.monitored_lamps,
        error = ?status.last_error,
        "status"
    );
}

#[cfg(target_os = "windows")]
async fn run(config: AppConfig) -> anyhow::Result<()> {
    use std::sync::Arc;

    use tokio::sync::mpsc;
    use tracing::warn;

    use lockglow_sync::application::sync_service::{SyncConfig, SyncEngine, SyncEvent, SyncPorts};
    use lockglow_sync::infrastructure::lighting::windows::{LampArrayConnector, LampArrayWatcher};
    use lockglow_sync::infrastructure::lighting::{DeviceEvent, DeviceEventSink};
    use lockglow_sync::infrastructure::raw_input::windows::{
        MessageWindow, Win32HookBackend, Win32KeyboardState,
    };

    let window = MessageWindow::spawn().context("creating raw input window")?;
    let (tx, rx) = mpsc::unbounded_channel();

    let device_tx = tx.clone();
    let device_events: DeviceEventSink = Arc::new(move |event: DeviceEvent| {
        if device_tx.send(SyncEvent::Device(event)).is_err() {
            warn!("sync pump gone; device event dropped");
        }
    });

    let engine = SyncEngine::new(
        SyncConfig {
            target_device: config.device.id.clone(),
            attach_timeout: config.attach_timeout(),
            window: window.handle(),
        },
        config.to_profile(),
        SyncPorts {
            connector: Arc::new(LampArrayConnector::new(Arc::clone(&device_events))),
            hook: Arc::new(Win32HookBackend::new()),
            keyboard: Arc::new(Win32KeyboardState),
        },
        tx.clone(),
    );

    // ── Status log ────────────────────────────────────────────────────────────
    let mut status = engine.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            log_status(&status.borrow_and_update());
        }
    });

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let shutdown_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(SyncEvent::Shutdown);
        }
    });
    drop(tx);

    let watcher = LampArrayWatcher::start(device_events).context("starting device watcher")?;
    info!("lockglow ready.  Press Ctrl-C to exit.");

    let result = engine.run(rx).await;
    drop(watcher);
    drop(window);
    result.context("synchroniser stopped")
}

#[cfg(not(target_os = "windows"))]
async fn run(config: AppConfig) -> anyhow::Result<()> {
    use lockglow_sync::application::lifecycle::LifecycleState;
    use lockglow_sync::infrastructure::raw_input::CaptureError;

    log_status(&SyncStatus {
        state: LifecycleState::NoDevice,
        device_id: config.device.id,
        last_error: Some("unsupported platform".to_string()),
        ..SyncStatus::default()
    });
    Err(CaptureError::UnsupportedPlatform(std::env::consts::OS.to_string()))
        .context("lockglow needs Windows raw input and LampArray lighting")
}
