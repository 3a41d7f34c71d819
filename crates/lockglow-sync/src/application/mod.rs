//! Application layer of the synchroniser.
//!
//! Use cases in this layer orchestrate the domain types from `lockglow_core`
//! and depend on the infrastructure only through its traits
//! (`LightingDevice`, `DeviceConnector`, `ToggleStateReader`,
//! `InputHookBackend`), so every piece runs against mocks in tests.
//!
//! # Sub-modules
//!
//! - **`key_state`**     – Which keys are monitored, and their authoritative
//!   current state read from the OS.
//! - **`index_mapper`**  – Builds the lamp index map for a freshly attached
//!   device.
//! - **`color_apply`**   – Computes per-lamp colors and issues the batched
//!   device commands (full refresh and single-key fast path).
//! - **`lifecycle`**     – The attach/detach/availability state machine and
//!   the versioned device session it owns.
//! - **`sync_service`**  – The serial event pump tying it all together and
//!   the background work that talks to the device.

pub mod color_apply;
pub mod index_mapper;
pub mod key_state;
pub mod lifecycle;
pub mod sync_service;
