//! The toggle keys mirrored onto the lighting device.
//!
//! Each key is identified by its Windows Virtual Key code, which is the code
//! carried by raw keyboard input, accepted by the OS toggle-state query, and
//! passed to the lighting device's key-to-lamp lookup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// `VK_NUMLOCK`.
pub const VK_NUMLOCK: u16 = 0x90;
/// `VK_CAPITAL`.
pub const VK_CAPITAL: u16 = 0x14;
/// `VK_SCROLL`.
pub const VK_SCROLL: u16 = 0x91;

/// A keyboard key whose on/off state is maintained by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ToggleKey {
    NumLock,
    CapsLock,
    ScrollLock,
}

impl ToggleKey {
    /// Every toggle key, in a fixed order.
    ///
    /// Code that takes more than one per-key lock acquires them in this order.
    pub const ALL: [ToggleKey; 3] = [ToggleKey::NumLock, ToggleKey::CapsLock, ToggleKey::ScrollLock];

    /// Returns the Windows Virtual Key code for this key.
    pub const fn vk_code(self) -> u16 {
        match self {
            ToggleKey::NumLock => VK_NUMLOCK,
            ToggleKey::CapsLock => VK_CAPITAL,
            ToggleKey::ScrollLock => VK_SCROLL,
        }
    }

    /// Maps a Virtual Key code back to a toggle key.
    pub const fn from_vk(vk: u16) -> Option<ToggleKey> {
        match vk {
            VK_NUMLOCK => Some(ToggleKey::NumLock),
            VK_CAPITAL => Some(ToggleKey::CapsLock),
            VK_SCROLL => Some(ToggleKey::ScrollLock),
            _ => None,
        }
    }

    /// Dense index in `0..3`, used for per-key arrays.
    pub const fn slot(self) -> usize {
        match self {
            ToggleKey::NumLock => 0,
            ToggleKey::CapsLock => 1,
            ToggleKey::ScrollLock => 2,
        }
    }
}

impl fmt::Display for ToggleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToggleKey::NumLock => "NumLock",
            ToggleKey::CapsLock => "CapsLock",
            ToggleKey::ScrollLock => "ScrollLock",
        };
        f.write_str(name)
    }
}

impl FromStr for ToggleKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "numlock" | "num_lock" | "num" => Ok(ToggleKey::NumLock),
            "capslock" | "caps_lock" | "caps" | "capital" => Ok(ToggleKey::CapsLock),
            "scrolllock" | "scroll_lock" | "scroll" => Ok(ToggleKey::ScrollLock),
            other => Err(format!("unknown toggle key {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_codes_match_winuser_constants() {
        assert_eq!(ToggleKey::NumLock.vk_code(), 0x90);
        assert_eq!(ToggleKey::CapsLock.vk_code(), 0x14);
        assert_eq!(ToggleKey::ScrollLock.vk_code(), 0x91);
    }

    #[test]
    fn test_from_vk_inverts_vk_code() {
        for key in ToggleKey::ALL {
            assert_eq!(ToggleKey::from_vk(key.vk_code()), Some(key));
        }
    }

    #[test]
    fn test_from_vk_rejects_ordinary_keys() {
        // VK_A, VK_SHIFT, VK_RETURN
        for vk in [0x41, 0x10, 0x0D] {
            assert_eq!(ToggleKey::from_vk(vk), None);
        }
    }

    #[test]
    fn test_slots_are_dense_and_follow_all_order() {
        for (i, key) in ToggleKey::ALL.iter().enumerate() {
            assert_eq!(key.slot(), i);
        }
    }

    #[test]
    fn test_parse_accepts_common_spellings() {
        assert_eq!("CapsLock".parse::<ToggleKey>(), Ok(ToggleKey::CapsLock));
        assert_eq!("scroll_lock".parse::<ToggleKey>(), Ok(ToggleKey::ScrollLock));
        assert_eq!("NUM".parse::<ToggleKey>(), Ok(ToggleKey::NumLock));
        assert!("Insert".parse::<ToggleKey>().is_err());
    }
}
