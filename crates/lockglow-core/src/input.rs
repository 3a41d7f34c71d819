//! Decoded keyboard transitions.

use crate::domain::toggle_key::ToggleKey;

/// One key going down or up, as decoded from a raw keyboard message.
///
/// The transition direction says nothing reliable about a toggle key's
/// resulting state; consumers query the OS toggle bit instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    /// Windows Virtual Key code.
    pub virtual_key: u16,
    /// `true` for a release (break), `false` for a press (make).
    pub is_key_up: bool,
}

impl KeyTransition {
    pub const fn down(virtual_key: u16) -> Self {
        Self {
            virtual_key,
            is_key_up: false,
        }
    }

    pub const fn up(virtual_key: u16) -> Self {
        Self {
            virtual_key,
            is_key_up: true,
        }
    }

    /// The toggle key this transition belongs to, if any.
    pub fn toggle_key(&self) -> Option<ToggleKey> {
        ToggleKey::from_vk(self.virtual_key)
    }
}
