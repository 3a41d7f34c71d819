//! Lighting device infrastructure.
//!
//! The synchroniser talks to an addressable lighting device through two
//! traits:
//!
//! - [`DeviceConnector`] takes control of a device by its stable id
//!   (asynchronous; may fail if the device is gone or owned elsewhere).
//! - [`LightingDevice`] is the attached device: lamp count, connectivity,
//!   key-to-lamp lookup and the batched color command.
//!
//! Add/remove/availability notifications arrive as [`DeviceEvent`]s through a
//! [`DeviceEventSink`].  On Windows the `windows` module adapts the WinRT
//! `LampArray` API and `DeviceWatcher`; tests use [`mock`].

use std::sync::Arc;

use async_trait::async_trait;
use lockglow_core::{LampIndex, Rgb};
use thiserror::Error;

pub mod mock;

#[cfg(target_os = "windows")]
pub mod windows;

/// Notification from the device watcher or an attached device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A lighting-capable device appeared.
    Added { id: String },
    /// A lighting-capable device disappeared.
    Removed { id: String },
    /// An attached device gained or lost availability (e.g. another
    /// application took over its lighting, or a wireless link dropped).
    AvailabilityChanged { id: String, available: bool },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::Added { id }
            | DeviceEvent::Removed { id }
            | DeviceEvent::AvailabilityChanged { id, .. } => id,
        }
    }
}

/// Callback through which watchers and devices publish [`DeviceEvent`]s.
pub type DeviceEventSink = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Error type for lighting device operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device {0} not found")]
    NotFound(String),
    #[error("device {0} is controlled by another application")]
    AlreadyControlled(String),
    #[error("attaching to {id} timed out after {timeout_ms} ms")]
    AttachTimeout { id: String, timeout_ms: u64 },
    #[error("color command has {colors} colors for {indices} indices")]
    LengthMismatch { colors: usize, indices: usize },
    #[error("lamp index {index} is outside 0..{lamp_count}")]
    IndexOutOfRange { index: LampIndex, lamp_count: u32 },
    #[error("device I/O failed: {0}")]
    Io(String),
}

/// An attached addressable lighting device.
pub trait LightingDevice: Send + Sync {
    /// Stable device id, as reported by the watcher.
    fn id(&self) -> &str;

    fn lamp_count(&self) -> u32;

    fn is_connected(&self) -> bool;

    fn is_available(&self) -> bool;

    /// Lamps that sit under the key with Virtual Key code `virtual_key`.
    /// Empty when the device has no lamp for that key.
    fn indices_for_key(&self, virtual_key: u16) -> Vec<LampIndex>;

    /// Sets `colors[i]` on lamp `indices[i]` in one batched device call.
    ///
    /// # Errors
    ///
    /// [`DeviceError::LengthMismatch`] / [`DeviceError::IndexOutOfRange`] for
    /// malformed commands, [`DeviceError::Io`] when the device rejects it.
    fn set_colors_for_indices(&self, colors: &[Rgb], indices: &[LampIndex])
        -> Result<(), DeviceError>;
}

/// Takes control of lighting devices by id.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn attach(&self, id: &str) -> Result<Arc<dyn LightingDevice>, DeviceError>;
}

/// Checks a batched color command against a device's lamp count.
///
/// # Errors
///
/// Returns the first problem found: length mismatch, then the first
/// out-of-range index.
pub fn validate_command(
    lamp_count: u32,
    colors: &[Rgb],
    indices: &[LampIndex],
) -> Result<(), DeviceError> {
    if colors.len() != indices.len() {
        return Err(DeviceError::LengthMismatch {
            colors: colors.len(),
            indices: indices.len(),
        });
    }
    if let Some(&index) = indices.iter().find(|&&i| i >= lamp_count) {
        return Err(DeviceError::IndexOutOfRange { index, lamp_count });
    }
    Ok(())
}
