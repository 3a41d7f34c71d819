//! Domain entities for lockglow.
//!
//! Pure data and rules: nothing in here talks to Windows, a device driver, or
//! the file system, so every type can be unit-tested on any platform.

/// RGB color value type and the brightness transform.
pub mod color;

/// Partition of a device's lamps into monitored and non-monitored indices.
pub mod lamp_map;

/// Per-key on/off colors, the standard color and the brightness percentage.
pub mod profile;

/// The closed set of toggle keys being mirrored onto the lighting device.
pub mod toggle_key;
