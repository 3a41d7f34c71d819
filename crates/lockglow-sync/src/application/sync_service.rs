//! SyncEngine: the serial event pump of the synchroniser.
//!
//! Every input to the engine arrives as a [`SyncEvent`] on one unbounded
//! channel and is handled strictly in order:
//!
//! - Raw key transitions, sent by the capture listener straight from the OS
//!   message thread (the listener only enqueues; it never touches a device).
//! - Device watcher notifications.
//! - Profile snapshots and target device changes from configuration.
//! - Shutdown.
//!
//! # Background work
//!
//! Color computation and device calls never run on the pump.  Each full
//! refresh or single-key update is a blocking work item on a [`JoinSet`].
//! Updates for one key are serialised by that key's mutex, so "read OS state,
//! compute, issue" is atomic per key and the last unit to run always reflects
//! the final toggle state.  A full refresh takes every key mutex.  Work items
//! carry the session generation they were queued for and only touch the
//! device through [`SessionSlot::with_live`], so items queued before a detach,
//! re-attach or map rebuild are discarded instead of writing stale colors.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use lockglow_core::{KeyTransition, LightingProfile, ToggleKey};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use super::color_apply::ColorApplyEngine;
use super::key_state::KeyStateRegistry;
use super::lifecycle::{
    DeviceLifecycleManager, DeviceSession, LifecycleOutcome, LifecycleState, SessionSlot, SyncStatus,
};
use crate::infrastructure::lighting::{DeviceConnector, DeviceEvent};
use crate::infrastructure::raw_input::{
    CaptureError, InputHookBackend, RawInputCapture, RawInputListener, ToggleStateReader,
    WindowHandle,
};

/// Input to the serial pump.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A decoded raw keyboard transition.
    Key(KeyTransition),
    /// A device watcher or availability notification.
    Device(DeviceEvent),
    /// A new configuration snapshot.
    ProfileChanged(LightingProfile),
    /// Drive a different device from now on.
    SetTargetDevice(String),
    /// Detach and stop the pump.
    Shutdown,
}

/// Fatal engine error.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("raw keyboard capture failed: {0}")]
    Capture(#[from] CaptureError),
}

/// Static engine settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device id to attach to; `None` adopts the first discovered device.
    pub target_device: Option<String>,
    pub attach_timeout: Duration,
    /// Window that receives raw keyboard input.
    pub window: WindowHandle,
}

/// The OS and driver surfaces the engine runs against.
pub struct SyncPorts {
    pub connector: Arc<dyn DeviceConnector>,
    pub hook: Arc<dyn InputHookBackend>,
    pub keyboard: Arc<dyn ToggleStateReader>,
}

type KeyLocks = [Mutex<()>; ToggleKey::ALL.len()];

/// Everything a background work item needs, cloned per item.
#[derive(Clone)]
struct ColorWorker {
    slot: Arc<SessionSlot>,
    profile: Arc<RwLock<Arc<LightingProfile>>>,
    registry: Arc<KeyStateRegistry>,
    key_locks: Arc<KeyLocks>,
}

impl ColorWorker {
    fn profile(&self) -> Arc<LightingProfile> {
        Arc::clone(&self.profile.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn apply_single(&self, key: ToggleKey, generation: u64) {
        let _key = self.key_locks[key.slot()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let profile = self.profile();
        let result = self.slot.with_live(generation, |session| {
            ColorApplyEngine::apply_single(key, session, &profile, &self.registry)
        });
        match result {
            Some(Ok(lamps)) => trace!(%key, generation, lamps, "key lamps updated"),
            Some(Err(e)) => warn!(%key, generation, error = %e, "key color update failed"),
            None => debug!(%key, generation, "stale key update discarded"),
        }
    }

    fn apply_all(&self, generation: u64) {
        let _keys: Vec<_> = self
            .key_locks
            .iter()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();
        let profile = self.profile();
        let result = self.slot.with_live(generation, |session| {
            ColorApplyEngine::apply_all(session, &profile, &self.registry)
        });
        match result {
            Some(Ok(lamps)) => debug!(generation, lamps, "all lamps refreshed"),
            Some(Err(e)) => warn!(generation, error = %e, "full color refresh failed"),
            None => debug!(generation, "stale full refresh discarded"),
        }
    }
}

/// The synchroniser: lifecycle, key state, and background color work.
pub struct SyncEngine {
    lifecycle: DeviceLifecycleManager,
    slot: Arc<SessionSlot>,
    profile: Arc<RwLock<Arc<LightingProfile>>>,
    registry: Arc<KeyStateRegistry>,
    key_locks: Arc<KeyLocks>,
    tasks: JoinSet<()>,
    status_tx: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    /// Builds an engine.  Key transitions captured once a device is attached
    /// are posted to `events`, the sender side of the channel later passed to
    /// [`run`](Self::run).
    pub fn new(
        config: SyncConfig,
        profile: LightingProfile,
        ports: SyncPorts,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        let listener: Arc<dyn RawInputListener> = Arc::new(move |transition: KeyTransition| {
            if events.send(SyncEvent::Key(transition)).is_err() {
                trace!("sync pump gone; key transition dropped");
            }
        });
        let capture = RawInputCapture::new(ports.hook, listener);
        let lifecycle = DeviceLifecycleManager::new(
            config.target_device,
            ports.connector,
            capture,
            config.window,
            config.attach_timeout,
        );
        let registry = KeyStateRegistry::new(profile.monitored_keys(), ports.keyboard);
        let (status_tx, _) = watch::channel(lifecycle.status());

        Self {
            slot: lifecycle.slot(),
            lifecycle,
            profile: Arc::new(RwLock::new(Arc::new(profile))),
            registry: Arc::new(registry),
            key_locks: Arc::new(std::array::from_fn(|_| Mutex::new(()))),
            tasks: JoinSet::new(),
            status_tx,
        }
    }

    /// Receives a fresh [`SyncStatus`] after every lifecycle change.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.lifecycle.status()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn session(&self) -> Option<Arc<DeviceSession>> {
        self.lifecycle.session()
    }

    pub fn profile(&self) -> Arc<LightingProfile> {
        Arc::clone(&self.profile.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn monitored_keys(&self) -> &[ToggleKey] {
        self.registry.monitored()
    }

    pub fn is_capturing(&self) -> bool {
        self.lifecycle.is_capturing()
    }

    /// Pumps `events` until [`SyncEvent::Shutdown`], channel close, or a
    /// fatal error.  In every case queued color work is allowed to finish
    /// and then the session is torn down.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Capture`] if raw keyboard capture cannot be
    /// installed on attach.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SyncEvent>) -> Result<(), SyncError> {
        info!(target_device = ?self.lifecycle.target_id(), "sync engine running");
        let result = loop {
            let Some(event) = events.recv().await else {
                break Ok(());
            };
            match self.handle_event(event).await {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.shutdown().await;
        info!("sync engine stopped");
        result
    }

    /// Handles one event.  Device work it triggers runs in the background;
    /// use [`settle`](Self::settle) to wait for it.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn handle_event(&mut self, event: SyncEvent) -> Result<ControlFlow<()>, SyncError> {
        self.reap();
        match event {
            SyncEvent::Key(transition) => self.on_key(transition),
            SyncEvent::Device(event) => {
                let keys = self.registry.monitored().to_vec();
                let result = self.lifecycle.handle_device_event(&event, &keys).await;
                self.on_lifecycle(result)?;
            }
            SyncEvent::ProfileChanged(profile) => self.on_profile(profile),
            SyncEvent::SetTargetDevice(id) => {
                let keys = self.registry.monitored().to_vec();
                let result = self.lifecycle.set_target(id, &keys).await;
                self.on_lifecycle(result)?;
            }
            SyncEvent::Shutdown => return Ok(ControlFlow::Break(())),
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Waits for every queued background work item to finish.
    pub async fn settle(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "color worker failed");
            }
        }
    }

    fn on_key(&mut self, transition: KeyTransition) {
        if !transition.is_key_up {
            return;
        }
        let Some(key) = self.registry.monitored_key(transition.virtual_key) else {
            return;
        };
        if self.lifecycle.state() != LifecycleState::Attached {
            debug!(%key, state = ?self.lifecycle.state(), "key release while not attached");
            return;
        }
        if let Some(session) = self.slot.current() {
            let worker = self.worker();
            let generation = session.generation();
            self.tasks
                .spawn_blocking(move || worker.apply_single(key, generation));
        }
    }

    fn on_lifecycle(
        &mut self,
        result: Result<LifecycleOutcome, CaptureError>,
    ) -> Result<(), SyncError> {
        self.publish_status();
        if let LifecycleOutcome::Attached(session) = result? {
            self.dispatch_all(session.generation());
        }
        Ok(())
    }

    fn on_profile(&mut self, profile: LightingProfile) {
        let mut keys: Vec<ToggleKey> = profile.monitored_keys().collect();
        keys.sort_unstable();
        keys.dedup();

        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(profile);

        if keys != self.registry.monitored() {
            info!(?keys, "monitored key set changed");
            self.registry = Arc::new(self.registry.with_monitored(keys.iter().copied()));
            if self.lifecycle.rebuild_map(&keys).is_some() {
                self.publish_status();
            }
        }

        if self.lifecycle.state() == LifecycleState::Attached {
            if let Some(session) = self.slot.current() {
                self.dispatch_all(session.generation());
            }
        }
    }

    fn dispatch_all(&mut self, generation: u64) {
        let worker = self.worker();
        self.tasks.spawn_blocking(move || worker.apply_all(generation));
    }

    fn worker(&self) -> ColorWorker {
        ColorWorker {
            slot: Arc::clone(&self.slot),
            profile: Arc::clone(&self.profile),
            registry: Arc::clone(&self.registry),
            key_locks: Arc::clone(&self.key_locks),
        }
    }

    /// Drops finished work items so the set does not grow without bound.
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "color worker failed");
            }
        }
    }

    /// Lets queued work finish against the live session, then detaches.
    async fn shutdown(&mut self) {
        self.settle().await;
        if matches!(
            self.lifecycle.state(),
            LifecycleState::Attached | LifecycleState::Unavailable
        ) || self.lifecycle.is_capturing()
        {
            self.lifecycle.detach();
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.lifecycle.status());
    }
}

#[cfg(test)]
mod tests {
    use lockglow_core::{Brightness, MonitoredKeyConfig, Rgb};

    use super::*;
    use crate::infrastructure::lighting::mock::{MockDeviceConnector, MockLightingDevice};
    use crate::infrastructure::raw_input::mock::{MockHookBackend, MockKeyboardState};
    use crate::infrastructure::raw_input::test_support::CAPTURE_SLOT;

    const ON: Rgb = Rgb::new(255, 0, 0);
    const OFF: Rgb = Rgb::new(0, 0, 255);

    struct Fixture {
        engine: SyncEngine,
        events: mpsc::UnboundedReceiver<SyncEvent>,
        device: Arc<MockLightingDevice>,
        hook: Arc<MockHookBackend>,
        keyboard: MockKeyboardState,
    }

    fn profile(keys: &[ToggleKey]) -> LightingProfile {
        let keys = keys
            .iter()
            .map(|&key| MonitoredKeyConfig {
                key,
                on_color: ON,
                off_color: OFF,
                on_linked: false,
                off_linked: false,
            })
            .collect();
        LightingProfile::new(keys, Rgb::WHITE, Brightness::MAX)
    }

    fn fixture() -> Fixture {
        let device = Arc::new(
            MockLightingDevice::new("kbd", 20)
                .with_key(0x90, vec![5])
                .with_key(0x14, vec![6])
                .with_key(0x91, vec![7]),
        );
        let connector = Arc::new(MockDeviceConnector::new());
        connector.insert(device.clone());
        let hook = Arc::new(MockHookBackend::new());
        let keyboard = MockKeyboardState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = SyncEngine::new(
            SyncConfig {
                target_device: Some("kbd".to_string()),
                attach_timeout: Duration::from_secs(1),
                window: WindowHandle(1),
            },
            profile(&ToggleKey::ALL),
            SyncPorts {
                connector,
                hook: hook.clone(),
                keyboard: Arc::new(keyboard.clone()),
            },
            tx,
        );
        Fixture {
            engine,
            events: rx,
            device,
            hook,
            keyboard,
        }
    }

    async fn attach(fx: &mut Fixture) {
        fx.engine
            .handle_event(SyncEvent::Device(DeviceEvent::Added {
                id: "kbd".to_string(),
            }))
            .await
            .unwrap();
        fx.engine.settle().await;
    }

    /// Feeds every transition the hook delivered back into the engine.
    async fn pump_keys(fx: &mut Fixture) {
        while let Ok(event) = fx.events.try_recv() {
            fx.engine.handle_event(event).await.unwrap();
        }
        fx.engine.settle().await;
    }

    #[tokio::test]
    async fn test_attach_runs_one_full_refresh() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let mut fx = fixture();

        attach(&mut fx).await;

        assert_eq!(fx.engine.state(), LifecycleState::Attached);
        let commands = fx.device.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].len(), 20);
    }

    #[tokio::test]
    async fn test_key_release_updates_only_that_key() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        // Arrange
        let mut fx = fixture();
        attach(&mut fx).await;
        fx.device.clear_commands();

        // Act: Caps Lock press + release, OS reports it on.
        fx.keyboard.set_toggled(0x14, true);
        fx.hook.press(0x14);
        fx.hook.release(0x14);
        pump_keys(&mut fx).await;

        // Assert
        let commands = fx.device.commands();
        assert_eq!(commands.len(), 1, "key-down must not trigger a command");
        assert_eq!(commands[0].indices, vec![6]);
        assert_eq!(commands[0].colors, vec![ON]);
    }

    #[tokio::test]
    async fn test_unmonitored_keys_are_ignored() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let mut fx = fixture();
        attach(&mut fx).await;
        fx.device.clear_commands();

        fx.hook.release(0x41); // 'A'
        pump_keys(&mut fx).await;

        assert!(fx.device.commands().is_empty());
    }

    #[tokio::test]
    async fn test_profile_change_refreshes_with_new_colors() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let mut fx = fixture();
        attach(&mut fx).await;
        fx.device.clear_commands();

        let mut dim = profile(&ToggleKey::ALL);
        dim.set_brightness(Brightness::new(0));
        fx.engine
            .handle_event(SyncEvent::ProfileChanged(dim))
            .await
            .unwrap();
        fx.engine.settle().await;

        let last = fx.device.last_command().unwrap();
        assert_eq!(last.len(), 20);
        assert!(last.colors.iter().all(|&c| c == Rgb::BLACK));
    }

    #[tokio::test]
    async fn test_profile_dropping_a_key_rebuilds_map() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let mut fx = fixture();
        attach(&mut fx).await;

        fx.engine
            .handle_event(SyncEvent::ProfileChanged(profile(&[ToggleKey::CapsLock])))
            .await
            .unwrap();
        fx.engine.settle().await;
        fx.device.clear_commands();
        fx.hook.release(0x90);
        pump_keys(&mut fx).await;

        assert_eq!(fx.engine.monitored_keys(), &[ToggleKey::CapsLock]);
        assert_eq!(fx.engine.status().monitored_lamps, 1);
        assert!(fx.device.commands().is_empty(), "Num Lock is no longer monitored");
    }

    #[tokio::test]
    async fn test_status_channel_tracks_lifecycle() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let mut fx = fixture();
        let status = fx.engine.subscribe_status();
        assert_eq!(status.borrow().state, LifecycleState::NoDevice);

        attach(&mut fx).await;
        assert_eq!(status.borrow().state, LifecycleState::Attached);
        assert_eq!(status.borrow().lamp_count, 20);

        fx.engine
            .handle_event(SyncEvent::Device(DeviceEvent::Removed {
                id: "kbd".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(status.borrow().state, LifecycleState::Detached);
        assert_eq!(status.borrow().lamp_count, 0);
    }

    #[tokio::test]
    async fn test_shutdown_event_only_breaks() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let mut fx = fixture();
        attach(&mut fx).await;

        let flow = fx.engine.handle_event(SyncEvent::Shutdown).await.unwrap();

        assert!(flow.is_break());
        assert!(fx.engine.session().is_some(), "teardown belongs to run");
        assert!(fx.hook.is_intercepting());
    }

    #[tokio::test]
    async fn test_shutdown_lets_queued_key_update_land() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        // Arrange: attached, with a Scroll Lock update queued but not awaited.
        let mut fx = fixture();
        attach(&mut fx).await;
        fx.device.clear_commands();
        fx.keyboard.set_toggled(0x91, true);
        fx.hook.press(0x91);
        fx.hook.release(0x91);
        while let Ok(event) = fx.events.try_recv() {
            fx.engine.handle_event(event).await.unwrap();
        }

        // Act
        fx.engine.shutdown().await;

        // Assert
        let commands = fx.device.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].indices, vec![7]);
        assert_eq!(commands[0].colors, vec![ON]);
        assert!(fx.engine.session().is_none());
        assert!(!fx.hook.is_intercepting());
        assert_eq!(fx.engine.subscribe_status().borrow().state, LifecycleState::Detached);
    }

    #[tokio::test]
    async fn test_device_unavailable_at_attach_gets_no_refresh() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let mut fx = fixture();
        fx.device.set_available(false);

        attach(&mut fx).await;

        assert_eq!(fx.engine.state(), LifecycleState::Unavailable);
        assert!(fx.device.commands().is_empty());
    }

    #[tokio::test]
    async fn test_capture_failure_is_fatal() {
        let _guard = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let mut fx = fixture();
        fx.hook.fail_install(true);

        let result = fx
            .engine
            .handle_event(SyncEvent::Device(DeviceEvent::Added {
                id: "kbd".to_string(),
            }))
            .await;

        assert!(matches!(result, Err(SyncError::Capture(CaptureError::SubclassFailed(_)))));
        assert!(fx.device.commands().is_empty());
    }
}
