//! # lockglow-core
//!
//! Shared domain library for lockglow, the toggle-key lighting synchroniser.
//!
//! This crate has zero dependencies on OS APIs or device drivers.  It defines:
//!
//! - **`domain`** – the toggle keys being watched, the validated RGB color type
//!   with its brightness transform, the lighting profile supplied by
//!   configuration, and the lamp index map that partitions a device's lamps
//!   into monitored and non-monitored sets.
//!
//! - **`input`** – the decoded key transition produced by the raw input layer.
//!
//! The synchronisation engine itself (device lifecycle, background color
//! application, the Win32 hook) lives in the `lockglow-sync` crate.

pub mod domain;
pub mod input;

// Re-export the most-used types at the crate root so callers can write
// `lockglow_core::Rgb` instead of `lockglow_core::domain::color::Rgb`.
pub use domain::color::{scale_brightness, Brightness, ColorError, Rgb};
pub use domain::lamp_map::{LampIndex, LampIndexMap};
pub use domain::profile::{LightingProfile, MonitoredKeyConfig};
pub use domain::toggle_key::ToggleKey;
pub use input::KeyTransition;
