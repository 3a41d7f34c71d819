//! Windows Dynamic Lighting adapter (`Windows.Devices.Lights.LampArray`).
//!
//! - [`LampArrayConnector`] attaches to a device id via `LampArray::FromIdAsync`
//!   and forwards the array's `AvailabilityChanged` notifications.
//! - [`LampArrayWatcher`] wraps a `DeviceWatcher` filtered on the LampArray
//!   device selector and publishes add/remove notifications.
//! - [`WinLampArray`] is the attached device; colors are converted to
//!   `Windows.UI.Color` only here.
//!
//! WinRT blocking waits (`.get()`) run on Tokio's blocking pool so they never
//! stall the event pump.

#![cfg(target_os = "windows")]

use std::sync::Arc;

use async_trait::async_trait;
use lockglow_core::{LampIndex, Rgb};
use tracing::{debug, warn};
use windows::core::{IInspectable, Ref, HSTRING};
use windows::Devices::Enumeration::{DeviceInformation, DeviceInformationUpdate, DeviceWatcher};
use windows::Devices::Lights::LampArray;
use windows::Foundation::TypedEventHandler;
use windows::System::VirtualKey;
use windows::UI::Color;

use super::{
    validate_command, DeviceConnector, DeviceError, DeviceEvent, DeviceEventSink, LightingDevice,
};

fn to_winrt_color(color: Rgb) -> Color {
    Color {
        A: 255,
        R: color.r,
        G: color.g,
        B: color.b,
    }
}

/// An attached `LampArray`.
pub struct WinLampArray {
    id: String,
    array: LampArray,
    lamp_count: u32,
    availability_token: Option<i64>,
}

impl LightingDevice for WinLampArray {
    fn id(&self) -> &str {
        &self.id
    }

    fn lamp_count(&self) -> u32 {
        self.lamp_count
    }

    fn is_connected(&self) -> bool {
        self.array.IsConnected().unwrap_or(false)
    }

    fn is_available(&self) -> bool {
        self.array.IsAvailable().unwrap_or(false)
    }

    fn indices_for_key(&self, virtual_key: u16) -> Vec<LampIndex> {
        match self.array.GetIndicesForKey(VirtualKey(i32::from(virtual_key))) {
            Ok(indices) => indices
                .iter()
                .filter_map(|&i| LampIndex::try_from(i).ok())
                .collect(),
            Err(e) => {
                debug!(device = %self.id, virtual_key, "GetIndicesForKey failed: {e}");
                Vec::new()
            }
        }
    }

    fn set_colors_for_indices(
        &self,
        colors: &[Rgb],
        indices: &[LampIndex],
    ) -> Result<(), DeviceError> {
        validate_command(self.lamp_count, colors, indices)?;
        let colors: Vec<Color> = colors.iter().copied().map(to_winrt_color).collect();
        // validate_command bounds every index by an i32 lamp count.
        let indices: Vec<i32> = indices.iter().map(|&i| i as i32).collect();
        self.array
            .SetColorsForIndices(&colors, &indices)
            .map_err(|e| DeviceError::Io(e.to_string()))
    }
}

impl Drop for WinLampArray {
    fn drop(&mut self) {
        if let Some(token) = self.availability_token.take() {
            if let Err(e) = self.array.RemoveAvailabilityChanged(token) {
                debug!(device = %self.id, "failed to remove availability handler: {e}");
            }
        }
    }
}

/// Attaches `LampArray` devices by id.
pub struct LampArrayConnector {
    events: DeviceEventSink,
}

impl LampArrayConnector {
    /// `events` receives `AvailabilityChanged` notifications of attached arrays.
    pub fn new(events: DeviceEventSink) -> Self {
        Self { events }
    }
}

#[async_trait]
impl DeviceConnector for LampArrayConnector {
    async fn attach(&self, id: &str) -> Result<Arc<dyn LightingDevice>, DeviceError> {
        let hid = HSTRING::from(id);
        let array = tokio::task::spawn_blocking(move || LampArray::FromIdAsync(&hid)?.get())
            .await
            .map_err(|e| DeviceError::Io(e.to_string()))?
            .map_err(|e| {
                warn!(device = %id, "LampArray::FromIdAsync failed: {e}");
                DeviceError::NotFound(id.to_string())
            })?;

        let lamp_count = array
            .LampCount()
            .map_err(|e| DeviceError::Io(e.to_string()))?;
        let lamp_count = u32::try_from(lamp_count).unwrap_or(0);

        let sink = Arc::clone(&self.events);
        let device_id = id.to_string();
        let handler = TypedEventHandler::<LampArray, IInspectable>::new(
            move |sender: Ref<LampArray>, _args: Ref<IInspectable>| {
                if let Some(array) = sender.as_ref() {
                    let available = array.IsAvailable().unwrap_or(false);
                    sink(DeviceEvent::AvailabilityChanged {
                        id: device_id.clone(),
                        available,
                    });
                }
                Ok(())
            },
        );
        let availability_token = match array.AvailabilityChanged(&handler) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(device = %id, "availability notifications unavailable: {e}");
                None
            }
        };

        Ok(Arc::new(WinLampArray {
            id: id.to_string(),
            array,
            lamp_count,
            availability_token,
        }))
    }
}

/// Watches for lighting-capable devices.  Stops the watcher on drop.
pub struct LampArrayWatcher {
    watcher: DeviceWatcher,
}

impl LampArrayWatcher {
    /// Starts watching; every add/remove is published to `events`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Io`] if the watcher cannot be created or started.
    pub fn start(events: DeviceEventSink) -> Result<Self, DeviceError> {
        let io = |e: windows::core::Error| DeviceError::Io(e.to_string());

        let selector = LampArray::GetDeviceSelector().map_err(io)?;
        let watcher = DeviceInformation::CreateWatcherAqsFilter(&selector).map_err(io)?;

        let added_sink = Arc::clone(&events);
        watcher
            .Added(&TypedEventHandler::<DeviceWatcher, DeviceInformation>::new(
                move |_, info: Ref<DeviceInformation>| {
                    if let Some(info) = info.as_ref() {
                        added_sink(DeviceEvent::Added {
                            id: info.Id()?.to_string(),
                        });
                    }
                    Ok(())
                },
            ))
            .map_err(io)?;

        let removed_sink = Arc::clone(&events);
        watcher
            .Removed(&TypedEventHandler::<DeviceWatcher, DeviceInformationUpdate>::new(
                move |_, update: Ref<DeviceInformationUpdate>| {
                    if let Some(update) = update.as_ref() {
                        removed_sink(DeviceEvent::Removed {
                            id: update.Id()?.to_string(),
                        });
                    }
                    Ok(())
                },
            ))
            .map_err(io)?;

        watcher.Start().map_err(io)?;
        debug!("LampArray device watcher started");
        Ok(Self { watcher })
    }
}

impl Drop for LampArrayWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.watcher.Stop() {
            debug!("device watcher stop failed: {e}");
        }
    }
}
