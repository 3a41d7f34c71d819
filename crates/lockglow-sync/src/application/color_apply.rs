//! ColorApplyEngine: turns key state and profile colors into device commands.
//!
//! Two paths, both issuing exactly one batched `set_colors_for_indices` call:
//!
//! - **Full refresh** ([`ColorApplyEngine::apply_all`]) – every lamp on the
//!   device.  Monitored lamps get their key's on/off color, everything else
//!   gets the standard color.  Used after attach and after profile changes.
//! - **Single key** ([`ColorApplyEngine::apply_single`]) – only the lamps of
//!   one key.  Used on every monitored key release so unrelated lamps are
//!   never rewritten (no flicker) and the command stays as small as possible.
//!
//! Key state is resolved from the OS once per key per command, at the moment
//! the command is built.  All colors are brightness-scaled by the profile.

use lockglow_core::{LampIndex, LampIndexMap, LightingProfile, Rgb, ToggleKey};

use super::key_state::KeyStateRegistry;
use super::lifecycle::DeviceSession;
use crate::infrastructure::lighting::DeviceError;

/// Parallel color/index arrays for one device command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorBatch {
    pub colors: Vec<Rgb>,
    pub indices: Vec<LampIndex>,
}

impl ColorBatch {
    fn with_capacity(n: usize) -> Self {
        Self {
            colors: Vec::with_capacity(n),
            indices: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, index: LampIndex, color: Rgb) {
        self.indices.push(index);
        self.colors.push(color);
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Color computation and batched application.
pub struct ColorApplyEngine;

impl ColorApplyEngine {
    /// Colors for every lamp in `map`.
    pub fn plan_all(
        map: &LampIndexMap,
        profile: &LightingProfile,
        keys: &KeyStateRegistry,
    ) -> ColorBatch {
        let standard = profile.standard_lamp_color();
        let mut batch = ColorBatch::with_capacity(map.lamp_count() as usize);

        for key in map.mapped_keys() {
            let color = key_color(key, profile, keys).unwrap_or(standard);
            for &index in map.indices_for(key) {
                batch.push(index, color);
            }
        }
        for &index in map.non_monitored() {
            batch.push(index, standard);
        }
        batch
    }

    /// Colors for the lamps of `key` only.
    ///
    /// Returns `None` when the key owns no lamp on this device or is not part
    /// of the profile.
    pub fn plan_single(
        key: ToggleKey,
        map: &LampIndexMap,
        profile: &LightingProfile,
        keys: &KeyStateRegistry,
    ) -> Option<ColorBatch> {
        let indices = map.indices_for(key);
        if indices.is_empty() {
            return None;
        }
        let color = key_color(key, profile, keys)?;
        Some(ColorBatch {
            colors: vec![color; indices.len()],
            indices: indices.to_vec(),
        })
    }

    /// Refreshes every lamp of `session`'s device in one command.
    ///
    /// Returns the number of lamps written.
    ///
    /// # Errors
    ///
    /// Propagates the device's [`DeviceError`].
    pub fn apply_all(
        session: &DeviceSession,
        profile: &LightingProfile,
        keys: &KeyStateRegistry,
    ) -> Result<usize, DeviceError> {
        let batch = Self::plan_all(session.lamp_map(), profile, keys);
        issue(session, batch)
    }

    /// Rewrites the lamps of `key` in one command.
    ///
    /// Returns the number of lamps written (0 when the key has none).
    ///
    /// # Errors
    ///
    /// Propagates the device's [`DeviceError`].
    pub fn apply_single(
        key: ToggleKey,
        session: &DeviceSession,
        profile: &LightingProfile,
        keys: &KeyStateRegistry,
    ) -> Result<usize, DeviceError> {
        match Self::plan_single(key, session.lamp_map(), profile, keys) {
            Some(batch) => issue(session, batch),
            None => Ok(0),
        }
    }
}

fn key_color(key: ToggleKey, profile: &LightingProfile, keys: &KeyStateRegistry) -> Option<Rgb> {
    let is_on = keys.resolve_current_state(key);
    profile.lamp_color_for_key(key, is_on)
}

fn issue(session: &DeviceSession, batch: ColorBatch) -> Result<usize, DeviceError> {
    if batch.is_empty() {
        return Ok(0);
    }
    session
        .device()
        .set_colors_for_indices(&batch.colors, &batch.indices)?;
    Ok(batch.len())
}
