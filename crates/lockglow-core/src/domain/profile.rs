//! Lighting profile: which keys are monitored and what colors they use.
//!
//! A [`LightingProfile`] is a snapshot handed to the synchronisation engine by
//! whatever owns the user's settings.  The engine never edits it except
//! through [`LightingProfile::set_standard_color`], which keeps "linked"
//! on/off colors equal to the standard color.
//!
//! # Linked colors
//!
//! Each monitored key can link its on and/or off color to the standard color
//! of the device.  A linked color is not an independent setting: whenever the
//! standard color changes, every linked color changes with it.

use serde::{Deserialize, Serialize};

use super::color::{scale_brightness, Brightness, Rgb};
use super::toggle_key::ToggleKey;

/// Colors for one monitored toggle key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredKeyConfig {
    pub key: ToggleKey,
    pub on_color: Rgb,
    pub off_color: Rgb,
    /// When `true`, `on_color` follows the standard color.
    #[serde(default)]
    pub on_linked: bool,
    /// When `true`, `off_color` follows the standard color.
    #[serde(default)]
    pub off_linked: bool,
}

impl MonitoredKeyConfig {
    /// Creates an entry lit white when on and showing the standard color when off.
    pub fn with_defaults(key: ToggleKey, standard_color: Rgb) -> Self {
        Self {
            key,
            on_color: Rgb::WHITE,
            off_color: standard_color,
            on_linked: false,
            off_linked: true,
        }
    }

    /// Unscaled color for the given runtime state.
    pub fn color_for(&self, is_on: bool) -> Rgb {
        if is_on {
            self.on_color
        } else {
            self.off_color
        }
    }

    fn follow_standard(&mut self, standard_color: Rgb) {
        if self.on_linked {
            self.on_color = standard_color;
        }
        if self.off_linked {
            self.off_color = standard_color;
        }
    }
}

/// Snapshot of every color setting the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightingProfile {
    keys: Vec<MonitoredKeyConfig>,
    standard_color: Rgb,
    brightness: Brightness,
}

impl LightingProfile {
    /// Builds a profile, dropping duplicate key entries (the first one wins)
    /// and syncing linked colors with `standard_color`.
    pub fn new(keys: Vec<MonitoredKeyConfig>, standard_color: Rgb, brightness: Brightness) -> Self {
        let mut unique: Vec<MonitoredKeyConfig> = Vec::with_capacity(keys.len());
        for entry in keys {
            if unique.iter().any(|e| e.key == entry.key) {
                tracing::warn!(key = %entry.key, "duplicate monitored key entry ignored");
                continue;
            }
            unique.push(entry);
        }

        let mut profile = Self {
            keys: unique,
            standard_color,
            brightness,
        };
        profile.set_standard_color(standard_color);
        profile
    }

    pub fn keys(&self) -> &[MonitoredKeyConfig] {
        &self.keys
    }

    /// Iterates the monitored toggle keys in configuration order.
    pub fn monitored_keys(&self) -> impl Iterator<Item = ToggleKey> + '_ {
        self.keys.iter().map(|k| k.key)
    }

    pub fn config_for(&self, key: ToggleKey) -> Option<&MonitoredKeyConfig> {
        self.keys.iter().find(|k| k.key == key)
    }

    pub fn standard_color(&self) -> Rgb {
        self.standard_color
    }

    pub fn brightness(&self) -> Brightness {
        self.brightness
    }

    /// Changes the standard color and every color linked to it.
    pub fn set_standard_color(&mut self, color: Rgb) {
        self.standard_color = color;
        for entry in &mut self.keys {
            entry.follow_standard(color);
        }
    }

    pub fn set_brightness(&mut self, brightness: Brightness) {
        self.brightness = brightness;
    }

    /// Brightness-scaled color for a monitored key, or `None` if `key` is not
    /// part of this profile.
    pub fn lamp_color_for_key(&self, key: ToggleKey, is_on: bool) -> Option<Rgb> {
        self.config_for(key)
            .map(|cfg| scale_brightness(cfg.color_for(is_on), self.brightness))
    }

    /// Brightness-scaled standard color used for non-monitored lamps.
    pub fn standard_lamp_color(&self) -> Rgb {
        scale_brightness(self.standard_color, self.brightness)
    }
}

impl Default for LightingProfile {
    /// All three toggle keys, white when on, standard color (white) when off,
    /// full brightness.
    fn default() -> Self {
        let standard = Rgb::WHITE;
        let keys = ToggleKey::ALL
            .iter()
            .map(|&k| MonitoredKeyConfig::with_defaults(k, standard))
            .collect();
        Self::new(keys, standard, Brightness::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(on: Rgb, off: Rgb, on_linked: bool, off_linked: bool) -> MonitoredKeyConfig {
        MonitoredKeyConfig {
            key: ToggleKey::CapsLock,
            on_color: on,
            off_color: off,
            on_linked,
            off_linked,
        }
    }

    #[test]
    fn test_default_profile_monitors_all_three_keys() {
        let profile = LightingProfile::default();
        let keys: Vec<_> = profile.monitored_keys().collect();
        assert_eq!(keys, ToggleKey::ALL.to_vec());
        assert_eq!(profile.brightness(), Brightness::MAX);
    }

    #[test]
    fn test_set_standard_color_updates_only_linked_colors() {
        // Arrange
        let red = Rgb::new(255, 0, 0);
        let blue = Rgb::new(0, 0, 255);
        let mut profile =
            LightingProfile::new(vec![caps(red, Rgb::WHITE, false, true)], Rgb::WHITE, Brightness::MAX);

        // Act
        profile.set_standard_color(blue);

        // Assert
        let cfg = profile.config_for(ToggleKey::CapsLock).unwrap();
        assert_eq!(cfg.on_color, red);
        assert_eq!(cfg.off_color, blue);
        assert_eq!(profile.standard_color(), blue);
    }

    #[test]
    fn test_new_syncs_linked_colors_with_standard() {
        let green = Rgb::new(0, 255, 0);
        let profile = LightingProfile::new(
            vec![caps(Rgb::BLACK, Rgb::BLACK, true, true)],
            green,
            Brightness::MAX,
        );
        let cfg = profile.config_for(ToggleKey::CapsLock).unwrap();
        assert_eq!(cfg.on_color, green);
        assert_eq!(cfg.off_color, green);
    }

    #[test]
    fn test_duplicate_key_entries_keep_first() {
        let first = caps(Rgb::new(1, 2, 3), Rgb::BLACK, false, false);
        let second = caps(Rgb::new(9, 9, 9), Rgb::BLACK, false, false);
        let profile = LightingProfile::new(vec![first, second], Rgb::WHITE, Brightness::MAX);
        assert_eq!(profile.keys().len(), 1);
        assert_eq!(profile.config_for(ToggleKey::CapsLock).unwrap().on_color, Rgb::new(1, 2, 3));
    }

    #[test]
    fn test_lamp_colors_are_brightness_scaled() {
        let profile = LightingProfile::new(
            vec![caps(Rgb::new(255, 0, 0), Rgb::new(0, 0, 255), false, false)],
            Rgb::WHITE,
            Brightness::new(50),
        );
        assert_eq!(
            profile.lamp_color_for_key(ToggleKey::CapsLock, true),
            Some(Rgb::new(128, 0, 0))
        );
        assert_eq!(
            profile.lamp_color_for_key(ToggleKey::CapsLock, false),
            Some(Rgb::new(0, 0, 128))
        );
        assert_eq!(profile.standard_lamp_color(), Rgb::new(128, 128, 128));
    }

    #[test]
    fn test_lamp_color_for_unmonitored_key_is_none() {
        let profile = LightingProfile::new(
            vec![caps(Rgb::WHITE, Rgb::BLACK, false, false)],
            Rgb::WHITE,
            Brightness::MAX,
        );
        assert_eq!(profile.lamp_color_for_key(ToggleKey::NumLock, true), None);
    }
}
