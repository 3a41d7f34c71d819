//! Infrastructure layer for the synchroniser.
//!
//! Contains OS-facing adapters: the raw keyboard input hook and toggle-state
//! query, the lighting device driver and watcher, and file-system
//! configuration storage.
//!
//! Each adapter is reached through a trait so the application layer can be
//! driven by the `mock` implementations in tests.

pub mod lighting;
pub mod raw_input;
pub mod storage;
