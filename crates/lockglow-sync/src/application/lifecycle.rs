//! DeviceLifecycleManager: attach, detach and availability of the one
//! lighting device the synchroniser drives.
//!
//! # State machine
//!
//! ```text
//!             discovered(target)                 success
//!  NoDevice ─────────────────────► Attaching ─────────────► Attached
//!     ▲                               │                      │    ▲
//!     └───────── failure ─────────────┘    availability(false)│    │
//!                                                           ▼    │
//!  Detached ◄──── removed(target) ──────────────────── Unavailable
//!     │                                   availability(true) ─┘ (full attach)
//!     └── discovered(target) ──► Attaching
//!
//!  Attaching ── success, device already unavailable ──► Unavailable
//! ```
//!
//! # Sessions
//!
//! A successful attach produces a [`DeviceSession`]: the device handle and its
//! [`LampIndexMap`], tagged with a generation number.  The session lives in a
//! [`SessionSlot`] shared with the background color workers.  Workers only
//! reach the device through [`SessionSlot::with_live`], which holds the slot's
//! read lock for the whole "read state, compute, issue" unit and refuses to
//! run for a superseded generation or a suspended session.  Replacing or
//! clearing the session takes the write lock, so teardown waits for a unit
//! that is already issuing and nothing ever sees a half-built map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use lockglow_core::{LampIndexMap, ToggleKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::index_mapper::IndexMapper;
use crate::infrastructure::lighting::{DeviceConnector, DeviceError, DeviceEvent, LightingDevice};
use crate::infrastructure::raw_input::{CaptureError, RawInputCapture, WindowHandle};

/// Lifecycle of the device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    NoDevice,
    Attaching,
    Attached,
    Unavailable,
    Detached,
}

/// An attached device together with its lamp index map.
pub struct DeviceSession {
    generation: u64,
    device: Arc<dyn LightingDevice>,
    lamp_map: LampIndexMap,
    cancel: CancellationToken,
    suspended: AtomicBool,
}

impl DeviceSession {
    pub fn new(generation: u64, device: Arc<dyn LightingDevice>, lamp_map: LampIndexMap) -> Self {
        Self {
            generation,
            device,
            lamp_map,
            cancel: CancellationToken::new(),
            suspended: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        self.device.id()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device(&self) -> &dyn LightingDevice {
        self.device.as_ref()
    }

    pub fn lamp_map(&self) -> &LampIndexMap {
        &self.lamp_map
    }

    pub fn lamp_count(&self) -> u32 {
        self.lamp_map.lamp_count()
    }

    pub fn is_available(&self) -> bool {
        self.device.is_available()
    }

    /// Cancelled when the session is torn down or replaced.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// `true` while the device is unavailable; color commands are suppressed.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn suspend(&self) {
        self.suspended.store(true, Ordering::SeqCst);
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && !self.is_suspended() && !self.cancel.is_cancelled()
    }
}

/// Holder of the current [`DeviceSession`], shared with background workers.
#[derive(Default)]
pub struct SessionSlot {
    current: RwLock<Option<Arc<DeviceSession>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session, if any.
    pub fn current(&self) -> Option<Arc<DeviceSession>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs `f` against the session if it is still generation `generation`
    /// and not suspended.  The slot cannot be replaced while `f` runs.
    ///
    /// Returns `None` (without calling `f`) for a stale or suspended session.
    pub fn with_live<R>(&self, generation: u64, f: impl FnOnce(&DeviceSession) -> R) -> Option<R> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_deref() {
            Some(session) if session.is_live(generation) => Some(f(session)),
            _ => None,
        }
    }

    /// Swaps in `next`, waiting for any unit running under [`with_live`].
    /// The outgoing session's token is cancelled.
    ///
    /// [`with_live`]: SessionSlot::with_live
    fn replace(&self, next: Option<Arc<DeviceSession>>) -> Option<Arc<DeviceSession>> {
        let previous = {
            let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, next)
        };
        if let Some(old) = &previous {
            old.cancel.cancel();
        }
        previous
    }
}

/// Snapshot of the lifecycle published to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: LifecycleState,
    pub device_id: Option<String>,
    pub lamp_count: u32,
    pub monitored_lamps: usize,
    pub non_monitored_lamps: usize,
    /// Most recent recoverable problem (attach failure, unavailability).
    pub last_error: Option<String>,
}

/// What a lifecycle step did.
#[derive(Clone)]
pub enum LifecycleOutcome {
    /// Nothing changed.
    Unchanged,
    /// A session is now active; the caller should run a full refresh.
    Attached(Arc<DeviceSession>),
    /// The active session was suspended.
    Suspended,
    /// The active session was torn down.
    Detached,
    /// An attach attempt failed; the manager is back in `NoDevice`.
    AttachFailed(DeviceError),
}

impl std::fmt::Debug for LifecycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => f.write_str("Unchanged"),
            Self::Attached(s) => write!(f, "Attached({}, gen {})", s.id(), s.generation()),
            Self::Suspended => f.write_str("Suspended"),
            Self::Detached => f.write_str("Detached"),
            Self::AttachFailed(e) => write!(f, "AttachFailed({e})"),
        }
    }
}

/// Sole owner and mutator of the device session.
pub struct DeviceLifecycleManager {
    state: LifecycleState,
    target_id: Option<String>,
    connector: Arc<dyn DeviceConnector>,
    slot: Arc<SessionSlot>,
    capture: RawInputCapture,
    window: WindowHandle,
    attach_timeout: Duration,
    next_generation: u64,
    last_error: Option<String>,
}

impl DeviceLifecycleManager {
    pub fn new(
        target_id: Option<String>,
        connector: Arc<dyn DeviceConnector>,
        capture: RawInputCapture,
        window: WindowHandle,
        attach_timeout: Duration,
    ) -> Self {
        Self {
            state: LifecycleState::NoDevice,
            target_id,
            connector,
            slot: Arc::new(SessionSlot::new()),
            capture,
            window,
            attach_timeout,
            next_generation: 1,
            last_error: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn session(&self) -> Option<Arc<DeviceSession>> {
        self.slot.current()
    }

    /// The slot shared with background workers.
    pub fn slot(&self) -> Arc<SessionSlot> {
        Arc::clone(&self.slot)
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_installed()
    }

    pub fn status(&self) -> SyncStatus {
        let session = self.slot.current();
        SyncStatus {
            state: self.state,
            device_id: session
                .as_ref()
                .map(|s| s.id().to_string())
                .or_else(|| self.target_id.clone()),
            lamp_count: session.as_ref().map_or(0, |s| s.lamp_count()),
            monitored_lamps: session.as_ref().map_or(0, |s| s.lamp_map().monitored_count()),
            non_monitored_lamps: session
                .as_ref()
                .map_or(0, |s| s.lamp_map().non_monitored().len()),
            last_error: self.last_error.clone(),
        }
    }

    /// Applies a watcher or device notification.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] when a resulting attach cannot install the raw
    /// input capture.  That failure is fatal.
    pub async fn handle_device_event(
        &mut self,
        event: &DeviceEvent,
        keys: &[ToggleKey],
    ) -> Result<LifecycleOutcome, CaptureError> {
        let id = event.device_id();

        if self.target_id.is_none() {
            if let DeviceEvent::Added { .. } = event {
                info!(device = id, "no saved device; adopting first discovered");
                self.target_id = Some(id.to_string());
            }
        }
        if self.target_id.as_deref() != Some(id) {
            debug!(device = id, ?event, "event for non-target device ignored");
            return Ok(LifecycleOutcome::Unchanged);
        }

        match (event, self.state) {
            (
                DeviceEvent::Added { .. },
                LifecycleState::NoDevice | LifecycleState::Detached | LifecycleState::Unavailable,
            ) => self.attach(keys).await,
            (DeviceEvent::Added { .. }, _) => Ok(LifecycleOutcome::Unchanged),

            (DeviceEvent::AvailabilityChanged { available: false, .. }, LifecycleState::Attached) => {
                Ok(self.suspend())
            }
            (DeviceEvent::AvailabilityChanged { available: true, .. }, LifecycleState::Unavailable) => {
                info!(device = id, "device available again; re-attaching");
                self.attach(keys).await
            }
            (DeviceEvent::AvailabilityChanged { .. }, _) => Ok(LifecycleOutcome::Unchanged),

            (
                DeviceEvent::Removed { .. },
                LifecycleState::Attached | LifecycleState::Unavailable,
            ) => {
                info!(device = id, "device removed");
                self.detach();
                Ok(LifecycleOutcome::Detached)
            }
            (DeviceEvent::Removed { .. }, _) => Ok(LifecycleOutcome::Unchanged),
        }
    }

    /// Changes the device to drive and tries to attach to it right away.
    /// A session for a different device is detached first.
    ///
    /// # Errors
    ///
    /// See [`handle_device_event`](Self::handle_device_event).
    pub async fn set_target(
        &mut self,
        id: String,
        keys: &[ToggleKey],
    ) -> Result<LifecycleOutcome, CaptureError> {
        let same = self.slot.current().is_some_and(|s| s.id() == id);
        if same && self.state == LifecycleState::Attached {
            self.target_id = Some(id);
            return Ok(LifecycleOutcome::Unchanged);
        }
        info!(device = %id, "target device changed");
        self.target_id = Some(id);
        self.attach(keys).await
    }

    /// Runs the full attach sequence for the target device.
    ///
    /// Any active session is torn down first.  On success the index map is
    /// built, the capture is installed and the new session is returned so the
    /// caller can refresh every lamp.  A device that is already unavailable
    /// is kept suspended in `Unavailable` until it reports availability.
    /// Attach failures, including a handle that is not connected, return the
    /// manager to `NoDevice`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] if the raw input capture cannot be installed;
    /// the freshly attached session is discarded.
    pub async fn attach(&mut self, keys: &[ToggleKey]) -> Result<LifecycleOutcome, CaptureError> {
        let Some(id) = self.target_id.clone() else {
            return Ok(LifecycleOutcome::Unchanged);
        };

        if self.slot.current().is_some() {
            self.teardown();
        }
        self.state = LifecycleState::Attaching;
        info!(device = %id, timeout_ms = self.attach_timeout.as_millis() as u64, "attaching");

        let attached = match tokio::time::timeout(self.attach_timeout, self.connector.attach(&id)).await
        {
            Ok(result) => result,
            Err(_) => Err(DeviceError::AttachTimeout {
                id: id.clone(),
                timeout_ms: self.attach_timeout.as_millis() as u64,
            }),
        };
        let device = match attached {
            Ok(device) if device.is_connected() => device,
            Ok(_) => return Ok(self.attach_failed(&id, DeviceError::NotFound(id.clone()))),
            Err(e) => return Ok(self.attach_failed(&id, e)),
        };

        let lamp_map = IndexMapper::build_from_device(device.as_ref(), keys.iter().copied());
        let session = Arc::new(DeviceSession::new(self.bump_generation(), device, lamp_map));
        let available = session.is_available();
        if !available {
            session.suspend();
        }
        self.slot.replace(Some(Arc::clone(&session)));

        if let Err(e) = self.capture.initialize(self.window) {
            self.slot.replace(None);
            self.state = LifecycleState::NoDevice;
            self.last_error = Some(e.to_string());
            return Err(e);
        }

        if !available {
            info!(
                device = %id,
                generation = session.generation(),
                "device attached but unavailable; waiting for availability"
            );
            self.state = LifecycleState::Unavailable;
            self.last_error = Some("device unavailable".to_string());
            return Ok(LifecycleOutcome::Suspended);
        }

        self.state = LifecycleState::Attached;
        self.last_error = None;
        info!(
            device = %id,
            generation = session.generation(),
            lamp_count = session.lamp_count(),
            "device attached"
        );
        Ok(LifecycleOutcome::Attached(session))
    }

    /// Rebuilds the index map of the active device for a new monitored key
    /// set.  The rebuilt map is published as a new session generation, so
    /// work queued against the old map is discarded.
    ///
    /// Returns the new session, or `None` when nothing is attached.
    pub fn rebuild_map(&mut self, keys: &[ToggleKey]) -> Option<Arc<DeviceSession>> {
        let current = self.slot.current()?;
        let lamp_map = IndexMapper::build_from_device(current.device(), keys.iter().copied());
        let session = Arc::new(DeviceSession::new(
            self.bump_generation(),
            Arc::clone(&current.device),
            lamp_map,
        ));
        if current.is_suspended() {
            session.suspend();
        }
        self.slot.replace(Some(Arc::clone(&session)));
        debug!(device = session.id(), generation = session.generation(), "lamp map rebuilt");
        Some(session)
    }

    /// Tears the session down and uninstalls the capture.  Ends in `Detached`.
    pub fn detach(&mut self) {
        self.teardown();
        self.state = LifecycleState::Detached;
    }

    fn attach_failed(&mut self, id: &str, error: DeviceError) -> LifecycleOutcome {
        warn!(device = id, error = %error, "attach failed; waiting for next discovery");
        self.state = LifecycleState::NoDevice;
        self.last_error = Some(error.to_string());
        LifecycleOutcome::AttachFailed(error)
    }

    fn suspend(&mut self) -> LifecycleOutcome {
        if let Some(session) = self.slot.current() {
            session.suspend();
            info!(device = session.id(), "device unavailable; color updates suspended");
        }
        self.state = LifecycleState::Unavailable;
        self.last_error = Some("device unavailable".to_string());
        LifecycleOutcome::Suspended
    }

    fn teardown(&mut self) {
        if let Some(old) = self.slot.replace(None) {
            debug!(device = old.id(), generation = old.generation(), "session torn down");
        }
        self.capture.cleanup();
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}
