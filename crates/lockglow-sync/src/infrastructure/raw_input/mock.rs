//! Mock OS input surface for unit and integration testing.
//!
//! [`MockHookBackend`] stands in for raw input registration and window
//! subclassing: tests stage keyboard payloads and deliver window messages as
//! if the OS had dispatched them.  [`MockKeyboardState`] stands in for the
//! OS toggle-state query.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    CaptureError, InputHookBackend, MessageSink, RawKeyboardPayload, ToggleStateReader,
    WindowHandle, WindowMessage, RI_KEY_BREAK, WM_INPUT,
};

#[derive(Default)]
struct HookState {
    registered: Option<WindowHandle>,
    sink: Option<MessageSink>,
    payloads: HashMap<isize, RawKeyboardPayload>,
    next_handle: isize,
    fail_register: bool,
    fail_install: bool,
    register_calls: u32,
    unregister_calls: u32,
    forwarded: u32,
}

/// A mock implementation of [`InputHookBackend`].
#[derive(Default)]
pub struct MockHookBackend {
    state: Mutex<HookState>,
}

impl MockHookBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `register_keyboard` calls fail (or succeed again).
    pub fn fail_register(&self, fail: bool) {
        self.state.lock().expect("lock poisoned").fail_register = fail;
    }

    /// Makes the next `install_interceptor` calls fail (or succeed again).
    pub fn fail_install(&self, fail: bool) {
        self.state.lock().expect("lock poisoned").fail_install = fail;
    }

    /// Associates a keyboard payload with a `WM_INPUT` data handle.
    pub fn stage_payload(&self, handle: isize, payload: RawKeyboardPayload) {
        self.state
            .lock()
            .expect("lock poisoned")
            .payloads
            .insert(handle, payload);
    }

    /// Dispatches a message through the installed interceptor (if any) and
    /// counts it as forwarded to the previous window procedure.
    ///
    /// Returns `true` if an interceptor saw the message.
    pub fn deliver(&self, message: WindowMessage) -> bool {
        // Clone the sink out so the listener never runs under our lock.
        let sink = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.forwarded += 1;
            state.sink.clone()
        };
        match sink {
            Some(sink) => {
                sink(&message);
                true
            }
            None => false,
        }
    }

    /// Delivers a raw key-down for `vk`.
    pub fn press(&self, vk: u16) -> bool {
        self.deliver_key(vk, 0)
    }

    /// Delivers a raw key-up for `vk`.
    pub fn release(&self, vk: u16) -> bool {
        self.deliver_key(vk, RI_KEY_BREAK)
    }

    fn deliver_key(&self, vk: u16, flags: u16) -> bool {
        let handle = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.next_handle += 1;
            let handle = state.next_handle;
            state.payloads.insert(
                handle,
                RawKeyboardPayload {
                    virtual_key: vk,
                    flags,
                },
            );
            handle
        };
        self.deliver(WindowMessage {
            id: WM_INPUT,
            wparam: 0,
            lparam: handle,
        })
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().expect("lock poisoned").registered.is_some()
    }

    pub fn is_intercepting(&self) -> bool {
        self.state.lock().expect("lock poisoned").sink.is_some()
    }

    pub fn register_calls(&self) -> u32 {
        self.state.lock().expect("lock poisoned").register_calls
    }

    pub fn unregister_calls(&self) -> u32 {
        self.state.lock().expect("lock poisoned").unregister_calls
    }

    /// Number of messages passed on to the previous window procedure.
    pub fn forwarded_count(&self) -> u32 {
        self.state.lock().expect("lock poisoned").forwarded
    }
}

impl InputHookBackend for MockHookBackend {
    fn register_keyboard(&self, window: WindowHandle) -> Result<(), CaptureError> {
        let mut state = self.state.lock().expect("lock poisoned");
        state.register_calls += 1;
        if state.fail_register {
            return Err(CaptureError::HookRegistrationFailed(
                "mock registration failure".to_string(),
            ));
        }
        state.registered = Some(window);
        Ok(())
    }

    fn unregister_keyboard(&self) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.unregister_calls += 1;
        state.registered = None;
    }

    fn install_interceptor(
        &self,
        _window: WindowHandle,
        sink: MessageSink,
    ) -> Result<(), CaptureError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.fail_install {
            return Err(CaptureError::SubclassFailed("mock subclass failure".to_string()));
        }
        state.sink = Some(sink);
        Ok(())
    }

    fn remove_interceptor(&self, _window: WindowHandle) {
        self.state.lock().expect("lock poisoned").sink = None;
    }

    fn read_keyboard_payload(&self, data_handle: isize) -> Option<RawKeyboardPayload> {
        self.state
            .lock()
            .expect("lock poisoned")
            .payloads
            .get(&data_handle)
            .copied()
    }
}

/// A mock OS toggle-state source.  Keys default to "off".
#[derive(Default, Clone)]
pub struct MockKeyboardState {
    states: Arc<Mutex<HashMap<u16, i16>>>,
}

impl MockKeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the toggle bit of `vk`.
    pub fn set_toggled(&self, vk: u16, on: bool) {
        self.set_raw(vk, i16::from(on));
    }

    /// Sets the full key state word of `vk`, e.g. `0x8001` = held and toggled.
    pub fn set_raw(&self, vk: u16, state: i16) {
        self.states.lock().expect("lock poisoned").insert(vk, state);
    }
}

impl ToggleStateReader for MockKeyboardState {
    fn key_state(&self, virtual_key: u16) -> i16 {
        self.states
            .lock()
            .expect("lock poisoned")
            .get(&virtual_key)
            .copied()
            .unwrap_or(0)
    }
}
