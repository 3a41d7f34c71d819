//! KeyStateRegistry: the monitored toggle keys and their current state.
//!
//! The registry never remembers whether a key is on.  Raw input transitions
//! can be coalesced or reordered by the OS message queue, so "the key went up,
//! therefore Caps Lock is now on" is not trustworthy.  Instead every consumer
//! calls [`KeyStateRegistry::resolve_current_state`] at the moment it needs
//! the answer, which reads the OS toggle bit directly.

use std::sync::Arc;

use lockglow_core::ToggleKey;

use crate::infrastructure::raw_input::ToggleStateReader;

/// The set of monitored toggle keys plus the OS state query.
pub struct KeyStateRegistry {
    monitored: Vec<ToggleKey>,
    os: Arc<dyn ToggleStateReader>,
}

impl KeyStateRegistry {
    pub fn new(monitored: impl IntoIterator<Item = ToggleKey>, os: Arc<dyn ToggleStateReader>) -> Self {
        let mut keys: Vec<ToggleKey> = monitored.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        Self { monitored: keys, os }
    }

    /// A registry over the same OS state with a different monitored set
    /// (e.g. after a profile change).
    pub fn with_monitored(&self, monitored: impl IntoIterator<Item = ToggleKey>) -> Self {
        Self::new(monitored, Arc::clone(&self.os))
    }

    pub fn monitored(&self) -> &[ToggleKey] {
        &self.monitored
    }

    pub fn is_monitored(&self, virtual_key: u16) -> bool {
        self.monitored_key(virtual_key).is_some()
    }

    /// The monitored toggle key with Virtual Key code `virtual_key`, if any.
    pub fn monitored_key(&self, virtual_key: u16) -> Option<ToggleKey> {
        ToggleKey::from_vk(virtual_key).filter(|k| self.monitored.contains(k))
    }

    /// `true` when the OS reports `key` toggled on (low bit of its key state).
    pub fn resolve_current_state(&self, key: ToggleKey) -> bool {
        self.os.key_state(key.vk_code()) & 1 == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::raw_input::MockToggleStateReader;
    use mockall::predicate::eq;

    #[test]
    fn test_is_monitored_only_for_configured_keys() {
        let os = MockToggleStateReader::new();
        let registry = KeyStateRegistry::new([ToggleKey::CapsLock], Arc::new(os));

        assert!(registry.is_monitored(0x14));
        assert!(!registry.is_monitored(0x90)); // NumLock exists but is not monitored
        assert!(!registry.is_monitored(0x41)); // 'A'
    }

    #[test]
    fn test_resolve_reads_low_bit_of_os_state() {
        // Arrange
        let mut os = MockToggleStateReader::new();
        os.expect_key_state().with(eq(0x14)).return_const(1i16);
        os.expect_key_state().with(eq(0x90)).return_const(0i16);
        // Held down (high bit) but not toggled.
        os.expect_key_state().with(eq(0x91)).return_const(i16::MIN);
        let registry = KeyStateRegistry::new(ToggleKey::ALL, Arc::new(os));

        // Act / Assert
        assert!(registry.resolve_current_state(ToggleKey::CapsLock));
        assert!(!registry.resolve_current_state(ToggleKey::NumLock));
        assert!(!registry.resolve_current_state(ToggleKey::ScrollLock));
    }

    #[test]
    fn test_resolve_held_and_toggled_is_on() {
        let mut os = MockToggleStateReader::new();
        // 0xFF81 as returned by GetKeyState for a held, toggled key.
        os.expect_key_state().return_const(-127i16);
        let registry = KeyStateRegistry::new([ToggleKey::NumLock], Arc::new(os));
        assert!(registry.resolve_current_state(ToggleKey::NumLock));
    }

    #[test]
    fn test_resolve_queries_os_every_time() {
        let mut os = MockToggleStateReader::new();
        let mut seq = mockall::Sequence::new();
        os.expect_key_state().times(1).in_sequence(&mut seq).return_const(1i16);
        os.expect_key_state().times(1).in_sequence(&mut seq).return_const(0i16);
        let registry = KeyStateRegistry::new([ToggleKey::CapsLock], Arc::new(os));

        assert!(registry.resolve_current_state(ToggleKey::CapsLock));
        assert!(!registry.resolve_current_state(ToggleKey::CapsLock));
    }

    #[test]
    fn test_with_monitored_replaces_set() {
        let os = Arc::new(MockToggleStateReader::new());
        let registry = KeyStateRegistry::new([ToggleKey::CapsLock], os);
        let updated = registry.with_monitored([ToggleKey::NumLock, ToggleKey::NumLock]);
        assert_eq!(updated.monitored(), &[ToggleKey::NumLock]);
        assert_eq!(registry.monitored(), &[ToggleKey::CapsLock]);
    }
}
