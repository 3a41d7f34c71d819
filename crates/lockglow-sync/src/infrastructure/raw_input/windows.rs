//! Win32 raw keyboard input: registration, window subclassing and the
//! message-only window the hook is attached to.
//!
//! The message window lives on a dedicated thread that runs a standard
//! `GetMessageW` / `DispatchMessageW` loop.  `WM_INPUT` messages are
//! dispatched on that thread into [`intercept_proc`], which must return
//! quickly: it only reads the raw input payload and hands the decoded
//! transition to the listener (a non-blocking channel send).
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Windows API FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::ffi::c_void;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};
use windows::core::w;
use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Input::KeyboardAndMouse::GetKeyState;
use windows::Win32::UI::Input::{
    GetRawInputData, RegisterRawInputDevices, HRAWINPUT, RAWINPUT, RAWINPUTDEVICE,
    RAWINPUTHEADER, RIDEV_INPUTSINK, RIDEV_REMOVE, RID_INPUT,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CallWindowProcW, CreateWindowExW, DefWindowProcW, DispatchMessageW, GetMessageW,
    PostMessageW, PostQuitMessage, RegisterClassW, SetWindowLongPtrW, GWLP_WNDPROC,
    HWND_MESSAGE, MSG, WINDOW_EX_STYLE, WINDOW_STYLE, WM_CLOSE, WM_DESTROY, WNDCLASSW, WNDPROC,
};

use super::{
    CaptureError, InputHookBackend, MessageSink, RawKeyboardPayload, ToggleStateReader,
    WindowHandle, WindowMessage,
};

/// HID usage page "Generic Desktop".
const HID_USAGE_PAGE_GENERIC: u16 = 0x01;
/// HID usage "Keyboard".
const HID_USAGE_GENERIC_KEYBOARD: u16 = 0x06;
/// `RIM_TYPEKEYBOARD` (local constant; the export type varies across crate versions).
const RIM_TYPEKEYBOARD: u32 = 1;

/// The active subclass: the window, its previous procedure and the sink.
struct Interceptor {
    window: isize,
    previous: isize,
    sink: MessageSink,
}

/// Process-wide interception target.  [`intercept_proc`] has no user data
/// pointer, so the sink and previous procedure are looked up here.
static INTERCEPTOR: Mutex<Option<Interceptor>> = Mutex::new(None);

fn hwnd(window: WindowHandle) -> HWND {
    HWND(window.0 as *mut c_void)
}

/// Win32 implementation of [`InputHookBackend`].
#[derive(Debug, Default)]
pub struct Win32HookBackend;

impl Win32HookBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InputHookBackend for Win32HookBackend {
    fn register_keyboard(&self, window: WindowHandle) -> Result<(), CaptureError> {
        let device = RAWINPUTDEVICE {
            usUsagePage: HID_USAGE_PAGE_GENERIC,
            usUsage: HID_USAGE_GENERIC_KEYBOARD,
            // Receive input even while the (invisible) window is not focused.
            dwFlags: RIDEV_INPUTSINK,
            hwndTarget: hwnd(window),
        };
        // SAFETY: `device` is a valid, fully initialised RAWINPUTDEVICE and the
        // size argument matches its layout.
        unsafe {
            RegisterRawInputDevices(&[device], std::mem::size_of::<RAWINPUTDEVICE>() as u32)
        }
        .map_err(|e| CaptureError::HookRegistrationFailed(e.to_string()))
    }

    fn unregister_keyboard(&self) {
        let device = RAWINPUTDEVICE {
            usUsagePage: HID_USAGE_PAGE_GENERIC,
            usUsage: HID_USAGE_GENERIC_KEYBOARD,
            dwFlags: RIDEV_REMOVE,
            hwndTarget: HWND::default(),
        };
        // SAFETY: as above; RIDEV_REMOVE requires a null target window.
        let result = unsafe {
            RegisterRawInputDevices(&[device], std::mem::size_of::<RAWINPUTDEVICE>() as u32)
        };
        if let Err(e) = result {
            debug!("raw keyboard unregistration failed: {e}");
        }
    }

    fn install_interceptor(
        &self,
        window: WindowHandle,
        sink: MessageSink,
    ) -> Result<(), CaptureError> {
        let mut slot = INTERCEPTOR
            .lock()
            .map_err(|_| CaptureError::SubclassFailed("interceptor lock poisoned".to_string()))?;
        if slot.is_some() {
            return Err(CaptureError::AlreadyActive);
        }

        // SAFETY: `window` was created by this process; `intercept_proc` has the
        // WNDPROC signature and stays valid for the life of the process.
        let previous = unsafe {
            SetWindowLongPtrW(hwnd(window), GWLP_WNDPROC, intercept_proc as usize as isize)
        };
        if previous == 0 {
            return Err(CaptureError::SubclassFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }

        *slot = Some(Interceptor {
            window: window.0,
            previous,
            sink,
        });
        Ok(())
    }

    fn remove_interceptor(&self, window: WindowHandle) {
        let Ok(mut slot) = INTERCEPTOR.lock() else {
            error!("interceptor lock poisoned; window procedure not restored");
            return;
        };
        if slot.as_ref().map_or(true, |i| i.window != window.0) {
            return;
        }
        let Some(interceptor) = slot.take() else {
            return;
        };
        // SAFETY: restores the procedure pointer we replaced in install_interceptor.
        unsafe {
            SetWindowLongPtrW(hwnd(window), GWLP_WNDPROC, interceptor.previous);
        }
    }

    fn read_keyboard_payload(&self, data_handle: isize) -> Option<RawKeyboardPayload> {
        // SAFETY: RAWINPUT is plain data; an all-zero value is valid.
        let mut raw: RAWINPUT = unsafe { std::mem::zeroed() };
        let mut size = std::mem::size_of::<RAWINPUT>() as u32;
        // SAFETY: `raw` is large enough for a keyboard payload and `size`
        // reports its capacity.  The handle comes from the WM_INPUT lparam.
        let copied = unsafe {
            GetRawInputData(
                HRAWINPUT(data_handle as *mut c_void),
                RID_INPUT,
                Some(&mut raw as *mut RAWINPUT as *mut c_void),
                &mut size,
                std::mem::size_of::<RAWINPUTHEADER>() as u32,
            )
        };
        if copied == u32::MAX || copied == 0 || raw.header.dwType != RIM_TYPEKEYBOARD {
            return None;
        }
        // SAFETY: dwType == RIM_TYPEKEYBOARD selects the keyboard union member.
        let keyboard = unsafe { raw.data.keyboard };
        Some(RawKeyboardPayload {
            virtual_key: keyboard.VKey,
            flags: keyboard.Flags,
        })
    }
}

/// Replacement window procedure installed by the subclass.
///
/// Every message is offered to the sink and then forwarded to the previous
/// procedure, whether or not it decoded.
unsafe extern "system" fn intercept_proc(
    window: HWND,
    msg: u32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    // Copy out of the lock: CallWindowProcW may re-enter this procedure.
    let (previous, sink) = match INTERCEPTOR.lock() {
        Ok(slot) => match slot.as_ref() {
            Some(i) => (i.previous, Some(i.sink.clone())),
            None => (0, None),
        },
        Err(_) => (0, None),
    };

    if let Some(sink) = sink {
        sink(&WindowMessage {
            id: msg,
            wparam: w_param.0,
            lparam: l_param.0,
        });
    }

    if previous == 0 {
        return DefWindowProcW(window, msg, w_param, l_param);
    }
    // SAFETY: `previous` is the procedure pointer returned by SetWindowLongPtrW.
    let previous: WNDPROC = std::mem::transmute::<isize, WNDPROC>(previous);
    CallWindowProcW(previous, window, msg, w_param, l_param)
}

/// Win32 implementation of [`ToggleStateReader`] backed by `GetKeyState`.
#[derive(Debug, Default)]
pub struct Win32KeyboardState;

impl ToggleStateReader for Win32KeyboardState {
    fn key_state(&self, virtual_key: u16) -> i16 {
        // SAFETY: GetKeyState has no preconditions.
        unsafe { GetKeyState(i32::from(virtual_key)) }
    }
}

/// A hidden message-only window running its own message loop thread.
///
/// Dropping it closes the window and joins the thread.
pub struct MessageWindow {
    handle: WindowHandle,
    thread: Option<JoinHandle<()>>,
}

impl MessageWindow {
    /// Creates the window on a new `lockglow-input` thread.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::WindowCreationFailed`] if the thread or window
    /// cannot be created.
    pub fn spawn() -> Result<Self, CaptureError> {
        let (tx, rx) = mpsc::channel::<Result<WindowHandle, CaptureError>>();

        let thread = thread::Builder::new()
            .name("lockglow-input".to_string())
            .spawn(move || run_message_window(tx))
            .map_err(|e| CaptureError::WindowCreationFailed(e.to_string()))?;

        let handle = rx
            .recv()
            .map_err(|e| CaptureError::WindowCreationFailed(e.to_string()))??;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> WindowHandle {
        self.handle
    }
}

impl Drop for MessageWindow {
    fn drop(&mut self) {
        // SAFETY: posting to a window owned by this process; a stale handle
        // only makes the call fail.
        if let Err(e) = unsafe { PostMessageW(Some(hwnd(self.handle)), WM_CLOSE, WPARAM(0), LPARAM(0)) } {
            warn!("failed to close message window: {e}");
            return;
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("message window thread panicked");
            }
        }
    }
}

/// Entry point of the message window thread.
fn run_message_window(ready: mpsc::Sender<Result<WindowHandle, CaptureError>>) {
    let created = create_message_window();
    let ok = created.is_ok();
    // The receiver only disappears if spawn() itself was abandoned.
    let _ = ready.send(created);
    if !ok {
        return;
    }

    let mut msg = MSG::default();
    // SAFETY: Standard Win32 GetMessage/DispatchMessage loop on the thread
    // that owns the window.
    unsafe {
        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            DispatchMessageW(&msg);
        }
    }
    debug!("message window loop exited");
}

fn create_message_window() -> Result<WindowHandle, CaptureError> {
    let class_name = w!("LockglowRawInputSink");

    // SAFETY: module handle of the current executable; the class struct
    // references a static class name and a valid window procedure.
    unsafe {
        let instance = GetModuleHandleW(None)
            .map_err(|e| CaptureError::WindowCreationFailed(e.to_string()))?;
        let class = WNDCLASSW {
            lpfnWndProc: Some(message_window_proc),
            hInstance: instance.into(),
            lpszClassName: class_name,
            ..Default::default()
        };
        if RegisterClassW(&class) == 0 {
            return Err(CaptureError::WindowCreationFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }

        let window = CreateWindowExW(
            WINDOW_EX_STYLE(0),
            class_name,
            w!("lockglow"),
            WINDOW_STYLE(0),
            0,
            0,
            0,
            0,
            Some(HWND_MESSAGE),
            None,
            Some(instance.into()),
            None,
        )
        .map_err(|e| CaptureError::WindowCreationFailed(e.to_string()))?;

        Ok(WindowHandle(window.0 as isize))
    }
}

/// Base procedure of the message window (the one the subclass forwards to).
unsafe extern "system" fn message_window_proc(
    window: HWND,
    msg: u32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if msg == WM_DESTROY {
        PostQuitMessage(0);
        return LRESULT(0);
    }
    DefWindowProcW(window, msg, w_param, l_param)
}
