//! Raw keyboard input capture for the synchroniser.
//!
//! On Windows the process registers for raw keyboard input (`WM_INPUT`) on a
//! message-only window and subclasses that window's procedure.  Every message
//! that reaches the window passes through the interception point, which
//! decodes raw keyboard payloads into [`KeyTransition`]s and then forwards the
//! message, unchanged, to the previous window procedure.
//!
//! # Pass-through contract
//!
//! The interception point is a transparent proxy.  Messages that are not
//! `WM_INPUT`, or whose payload cannot be read, decode to `None` and are
//! forwarded exactly like the ones that decode successfully.  Decode failures
//! are not errors and are not logged above `trace`.
//!
//! # One capture per process
//!
//! A window procedure can only be subclassed by one owner at a time, so
//! [`RawInputCapture`] claims a process-wide slot in [`initialize`] and
//! releases it in [`cleanup`] (also run on drop).  A second capture fails
//! with [`CaptureError::AlreadyActive`] until the first is cleaned up.
//!
//! # Testability
//!
//! The OS calls sit behind [`InputHookBackend`] and [`ToggleStateReader`];
//! tests use the implementations in [`mock`].
//!
//! [`initialize`]: RawInputCapture::initialize
//! [`cleanup`]: RawInputCapture::cleanup

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lockglow_core::KeyTransition;
use tracing::{debug, info, trace};

pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

/// `WM_INPUT`.
pub const WM_INPUT: u32 = 0x00FF;
/// `RI_KEY_BREAK`: the raw keyboard flag marking a key release.
pub const RI_KEY_BREAK: u16 = 0x0001;

/// Set while a [`RawInputCapture`] owns the process-wide interception point.
static CAPTURE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Opaque native window handle (`HWND` on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// A window message as seen by the interception point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMessage {
    pub id: u32,
    pub wparam: usize,
    /// For `WM_INPUT`, the raw input data handle.
    pub lparam: isize,
}

/// The keyboard portion of a raw input payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyboardPayload {
    /// `RAWKEYBOARD::VKey`.
    pub virtual_key: u16,
    /// `RAWKEYBOARD::Flags` (`RI_KEY_*`).
    pub flags: u16,
}

/// Error type for raw input capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("raw input registration failed: {0}")]
    HookRegistrationFailed(String),
    #[error("failed to subclass window procedure: {0}")]
    SubclassFailed(String),
    #[error("another raw input capture is already active in this process")]
    AlreadyActive,
    #[error("failed to create message window: {0}")]
    WindowCreationFailed(String),
    #[error("platform not supported: {0}")]
    UnsupportedPlatform(String),
}

/// Callback invoked by the interception point for every window message.
pub type MessageSink = Arc<dyn Fn(&WindowMessage) + Send + Sync>;

/// OS surface for raw keyboard registration and window subclassing.
pub trait InputHookBackend: Send + Sync {
    /// Registers the process for raw keyboard input delivered to `window`.
    fn register_keyboard(&self, window: WindowHandle) -> Result<(), CaptureError>;

    /// Removes the raw keyboard registration. Must tolerate being called when
    /// nothing is registered.
    fn unregister_keyboard(&self);

    /// Replaces `window`'s procedure with one that calls `sink` for every
    /// message and then forwards it to the previous procedure.
    fn install_interceptor(&self, window: WindowHandle, sink: MessageSink)
        -> Result<(), CaptureError>;

    /// Restores the previous window procedure. Must tolerate being called when
    /// nothing is installed.
    fn remove_interceptor(&self, window: WindowHandle);

    /// Reads the keyboard payload behind a `WM_INPUT` data handle.
    ///
    /// Returns `None` when the payload cannot be read or is not keyboard data.
    fn read_keyboard_payload(&self, data_handle: isize) -> Option<RawKeyboardPayload>;
}

/// OS surface for the current toggle state of a key.
#[cfg_attr(test, mockall::automock)]
pub trait ToggleStateReader: Send + Sync {
    /// Returns the OS key state word for `virtual_key` (as `GetKeyState`).
    /// The low bit is the toggle bit.
    fn key_state(&self, virtual_key: u16) -> i16;
}

/// Receives decoded key transitions from the interception point.
///
/// Runs on the OS message thread; implementations must not block.
pub trait RawInputListener: Send + Sync {
    fn on_key_transition(&self, transition: KeyTransition);
}

impl<F> RawInputListener for F
where
    F: Fn(KeyTransition) + Send + Sync,
{
    fn on_key_transition(&self, transition: KeyTransition) {
        self(transition)
    }
}

/// Decodes a window message into a key transition.
///
/// Returns `None` for anything that is not a readable raw keyboard message.
pub fn decode(backend: &dyn InputHookBackend, message: &WindowMessage) -> Option<KeyTransition> {
    if message.id != WM_INPUT {
        return None;
    }
    let Some(payload) = backend.read_keyboard_payload(message.lparam) else {
        trace!(handle = message.lparam, "WM_INPUT without keyboard payload");
        return None;
    };
    Some(KeyTransition {
        virtual_key: payload.virtual_key,
        is_key_up: payload.flags & RI_KEY_BREAK != 0,
    })
}

#[derive(Debug, Clone, Copy)]
struct Installed {
    window: WindowHandle,
    registered: bool,
    intercepting: bool,
}

/// Scoped owner of the process-wide raw keyboard hook.
pub struct RawInputCapture {
    backend: Arc<dyn InputHookBackend>,
    listener: Arc<dyn RawInputListener>,
    installed: Option<Installed>,
}

impl RawInputCapture {
    /// Creates an uninstalled capture that will report transitions to `listener`.
    pub fn new(backend: Arc<dyn InputHookBackend>, listener: Arc<dyn RawInputListener>) -> Self {
        Self {
            backend,
            listener,
            installed: None,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed.is_some()
    }

    /// Registers for raw keyboard input on `window` and installs the
    /// interception point.  A no-op when already installed.
    ///
    /// On failure every step that did succeed is rolled back and the
    /// process-wide slot is released.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::AlreadyActive`] if another capture owns the slot.
    /// - [`CaptureError::HookRegistrationFailed`] if the OS refuses the raw
    ///   input registration.
    /// - [`CaptureError::SubclassFailed`] if the window cannot be subclassed.
    pub fn initialize(&mut self, window: WindowHandle) -> Result<(), CaptureError> {
        if self.installed.is_some() {
            return Ok(());
        }

        CAPTURE_ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CaptureError::AlreadyActive)?;

        // Partial progress is recorded so cleanup() can undo exactly what ran.
        self.installed = Some(Installed {
            window,
            registered: false,
            intercepting: false,
        });

        if let Err(e) = self.backend.register_keyboard(window) {
            self.cleanup();
            return Err(e);
        }
        if let Some(inst) = self.installed.as_mut() {
            inst.registered = true;
        }

        let backend = Arc::clone(&self.backend);
        let listener = Arc::clone(&self.listener);
        let sink: MessageSink = Arc::new(move |message: &WindowMessage| {
            if let Some(transition) = decode(backend.as_ref(), message) {
                listener.on_key_transition(transition);
            }
        });

        if let Err(e) = self.backend.install_interceptor(window, sink) {
            self.cleanup();
            return Err(e);
        }
        if let Some(inst) = self.installed.as_mut() {
            inst.intercepting = true;
        }

        info!(window = window.0, "raw keyboard capture installed");
        Ok(())
    }

    /// Decodes a message using this capture's backend.
    pub fn decode(&self, message: &WindowMessage) -> Option<KeyTransition> {
        decode(self.backend.as_ref(), message)
    }

    /// Restores the window procedure, unregisters raw input and releases the
    /// process-wide slot.  Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        let Some(inst) = self.installed.take() else {
            return;
        };
        if inst.intercepting {
            self.backend.remove_interceptor(inst.window);
        }
        if inst.registered {
            self.backend.unregister_keyboard();
        }
        CAPTURE_ACTIVE.store(false, Ordering::SeqCst);
        debug!(window = inst.window.0, "raw keyboard capture removed");
    }
}

impl Drop for RawInputCapture {
    fn drop(&mut self) {
        self.cleanup();
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::mock::MockHookBackend;
    use super::test_support::CAPTURE_SLOT;
    use super::*;

    const WINDOW: WindowHandle = WindowHandle(0x1234);

    fn recording_listener() -> (Arc<dyn RawInputListener>, Arc<Mutex<Vec<KeyTransition>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn RawInputListener> =
            Arc::new(move |t: KeyTransition| sink.lock().unwrap().push(t));
        (listener, seen)
    }

    #[test]
    fn test_decode_ignores_non_input_messages() {
        let backend = MockHookBackend::new();
        // WM_PAINT
        let msg = WindowMessage { id: 0x000F, wparam: 0, lparam: 0 };
        assert_eq!(decode(&backend, &msg), None);
    }

    #[test]
    fn test_decode_returns_none_for_unreadable_payload() {
        let backend = MockHookBackend::new();
        let msg = WindowMessage { id: WM_INPUT, wparam: 0, lparam: 77 };
        assert_eq!(decode(&backend, &msg), None);
    }

    #[test]
    fn test_decode_reads_break_flag() {
        // Arrange
        let backend = MockHookBackend::new();
        backend.stage_payload(1, RawKeyboardPayload { virtual_key: 0x14, flags: 0 });
        backend.stage_payload(2, RawKeyboardPayload { virtual_key: 0x14, flags: RI_KEY_BREAK });

        // Act
        let down = decode(&backend, &WindowMessage { id: WM_INPUT, wparam: 0, lparam: 1 });
        let up = decode(&backend, &WindowMessage { id: WM_INPUT, wparam: 0, lparam: 2 });

        // Assert
        assert_eq!(down, Some(KeyTransition::down(0x14)));
        assert_eq!(up, Some(KeyTransition::up(0x14)));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let _slot = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let backend = Arc::new(MockHookBackend::new());
        let (listener, _) = recording_listener();
        let mut capture = RawInputCapture::new(backend.clone(), listener);

        capture.initialize(WINDOW).expect("first initialize");
        capture.initialize(WINDOW).expect("second initialize");

        assert_eq!(backend.register_calls(), 1);
        assert!(capture.is_installed());
    }

    #[test]
    fn test_registration_failure_is_reported_and_rolled_back() {
        let _slot = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let backend = Arc::new(MockHookBackend::new());
        backend.fail_register(true);
        let (listener, _) = recording_listener();
        let mut capture = RawInputCapture::new(backend.clone(), listener);

        let err = capture.initialize(WINDOW).unwrap_err();

        assert!(matches!(err, CaptureError::HookRegistrationFailed(_)));
        assert!(!capture.is_installed());
        assert!(!backend.is_intercepting());
        // The slot was released, so a fresh capture may try again.
        backend.fail_register(false);
        let (listener, _) = recording_listener();
        let mut retry = RawInputCapture::new(backend.clone(), listener);
        retry.initialize(WINDOW).expect("slot must be free after failure");
    }

    #[test]
    fn test_subclass_failure_unregisters_raw_input() {
        let _slot = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let backend = Arc::new(MockHookBackend::new());
        backend.fail_install(true);
        let (listener, _) = recording_listener();
        let mut capture = RawInputCapture::new(backend.clone(), listener);

        let err = capture.initialize(WINDOW).unwrap_err();

        assert!(matches!(err, CaptureError::SubclassFailed(_)));
        assert!(!backend.is_registered());
        assert_eq!(backend.unregister_calls(), 1);
    }

    #[test]
    fn test_only_one_capture_per_process() {
        let _slot = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let backend = Arc::new(MockHookBackend::new());
        let (l1, _) = recording_listener();
        let (l2, _) = recording_listener();
        let mut first = RawInputCapture::new(backend.clone(), l1);
        let mut second = RawInputCapture::new(backend.clone(), l2);

        first.initialize(WINDOW).expect("first capture");
        assert!(matches!(second.initialize(WINDOW), Err(CaptureError::AlreadyActive)));

        first.cleanup();
        second.initialize(WINDOW).expect("slot released by cleanup");
    }

    #[test]
    fn test_cleanup_is_repeatable_and_restores_window() {
        let _slot = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let backend = Arc::new(MockHookBackend::new());
        let (listener, _) = recording_listener();
        let mut capture = RawInputCapture::new(backend.clone(), listener);
        capture.initialize(WINDOW).unwrap();

        capture.cleanup();
        capture.cleanup();

        assert!(!backend.is_intercepting());
        assert!(!backend.is_registered());
        assert_eq!(backend.unregister_calls(), 1);
    }

    #[test]
    fn test_drop_releases_hook() {
        let _slot = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        let backend = Arc::new(MockHookBackend::new());
        {
            let (listener, _) = recording_listener();
            let mut capture = RawInputCapture::new(backend.clone(), listener);
            capture.initialize(WINDOW).unwrap();
        }
        assert!(!backend.is_intercepting());
    }

    #[test]
    fn test_intercepted_messages_reach_listener_and_are_forwarded() {
        let _slot = CAPTURE_SLOT.lock().unwrap_or_else(|e| e.into_inner());
        // Arrange
        let backend = Arc::new(MockHookBackend::new());
        let (listener, seen) = recording_listener();
        let mut capture = RawInputCapture::new(backend.clone(), listener);
        capture.initialize(WINDOW).unwrap();

        // Act
        backend.press(0x90);
        backend.release(0x90);
        backend.deliver(WindowMessage { id: 0x0007, wparam: 0, lparam: 0 }); // WM_SETFOCUS
        backend.deliver(WindowMessage { id: WM_INPUT, wparam: 0, lparam: 999 }); // unreadable

        // Assert
        assert_eq!(
            *seen.lock().unwrap(),
            vec![KeyTransition::down(0x90), KeyTransition::up(0x90)]
        );
        assert_eq!(backend.forwarded_count(), 4, "every message must be forwarded");
    }
}
