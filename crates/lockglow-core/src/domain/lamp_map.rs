//! Lamp index map: which lamps belong to which toggle key.
//!
//! A lighting device exposes `lamp_count` lamps addressed by `0..lamp_count`.
//! A [`LampIndexMap`] splits that range into two disjoint parts:
//!
//! ```text
//! lamp_count = 20, NumLock -> [5], CapsLock -> [6], ScrollLock -> [7]
//!
//!   monitored      {5, 6, 7}
//!   non-monitored  {0..5, 8..20}      (17 lamps)
//! ```
//!
//! A key may own zero, one or several lamps.  A key that owns zero lamps is
//! not present in the map at all.
//!
//! # Invariant
//!
//! `monitored ∩ non_monitored = ∅` and `monitored ∪ non_monitored = 0..lamp_count`.
//! [`LampIndexMap::build`] enforces this by dropping indices that are out of
//! range or already claimed by an earlier key.

use std::collections::BTreeMap;

use tracing::warn;

use super::toggle_key::ToggleKey;

/// A 0-based lamp index on a lighting device.
pub type LampIndex = u32;

/// Partition of a device's lamps into per-key monitored sets and the rest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LampIndexMap {
    lamp_count: u32,
    monitored: BTreeMap<ToggleKey, Vec<LampIndex>>,
    non_monitored: Vec<LampIndex>,
}

impl LampIndexMap {
    /// Builds the map from the indices a device reported for each key.
    ///
    /// Keys are processed in iteration order; an index already claimed by an
    /// earlier key, or outside `0..lamp_count`, is dropped with a warning.
    /// A key left with no indices is omitted.
    pub fn build<I>(lamp_count: u32, key_indices: I) -> Self
    where
        I: IntoIterator<Item = (ToggleKey, Vec<LampIndex>)>,
    {
        let mut claimed = vec![false; lamp_count as usize];
        let mut monitored = BTreeMap::new();

        for (key, mut indices) in key_indices {
            indices.sort_unstable();
            indices.dedup();

            let mut owned = Vec::with_capacity(indices.len());
            for index in indices {
                match claimed.get_mut(index as usize) {
                    None => warn!(%key, index, lamp_count, "lamp index out of range; ignored"),
                    Some(true) => warn!(%key, index, "lamp index already claimed by another key; ignored"),
                    Some(slot) => {
                        *slot = true;
                        owned.push(index);
                    }
                }
            }

            if !owned.is_empty() {
                monitored.insert(key, owned);
            }
        }

        let non_monitored = (0..lamp_count)
            .filter(|&i| !claimed[i as usize])
            .collect();

        Self {
            lamp_count,
            monitored,
            non_monitored,
        }
    }

    pub fn lamp_count(&self) -> u32 {
        self.lamp_count
    }

    /// Lamps owned by `key`; empty when the key has none on this device.
    pub fn indices_for(&self, key: ToggleKey) -> &[LampIndex] {
        self.monitored.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Keys that own at least one lamp.
    pub fn mapped_keys(&self) -> impl Iterator<Item = ToggleKey> + '_ {
        self.monitored.keys().copied()
    }

    /// Every monitored lamp paired with its key.
    pub fn monitored(&self) -> impl Iterator<Item = (ToggleKey, LampIndex)> + '_ {
        self.monitored
            .iter()
            .flat_map(|(&key, indices)| indices.iter().map(move |&i| (key, i)))
    }

    pub fn monitored_count(&self) -> usize {
        self.monitored.values().map(Vec::len).sum()
    }

    pub fn non_monitored(&self) -> &[LampIndex] {
        &self.non_monitored
    }

    /// Checks the partition invariant.
    pub fn is_partition(&self) -> bool {
        let mut seen = vec![false; self.lamp_count as usize];
        let all = self
            .monitored
            .values()
            .flatten()
            .chain(self.non_monitored.iter());
        for &index in all {
            match seen.get_mut(index as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        seen.into_iter().all(|s| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_map() -> LampIndexMap {
        LampIndexMap::build(
            20,
            vec![
                (ToggleKey::NumLock, vec![5]),
                (ToggleKey::CapsLock, vec![6]),
                (ToggleKey::ScrollLock, vec![7]),
            ],
        )
    }

    #[test]
    fn test_build_partitions_all_lamps() {
        let map = scenario_map();
        assert!(map.is_partition());
        assert_eq!(map.monitored_count(), 3);
        assert_eq!(map.non_monitored().len(), 17);
        assert!(!map.non_monitored().contains(&6));
    }

    #[test]
    fn test_key_with_several_lamps() {
        let map = LampIndexMap::build(10, vec![(ToggleKey::CapsLock, vec![4, 2, 3])]);
        assert_eq!(map.indices_for(ToggleKey::CapsLock), &[2, 3, 4]);
        assert_eq!(map.non_monitored(), &[0, 1, 5, 6, 7, 8, 9]);
        assert!(map.is_partition());
    }

    #[test]
    fn test_key_without_lamps_is_absent() {
        let map = LampIndexMap::build(
            8,
            vec![(ToggleKey::NumLock, vec![]), (ToggleKey::CapsLock, vec![1])],
        );
        assert!(map.indices_for(ToggleKey::NumLock).is_empty());
        assert_eq!(map.mapped_keys().collect::<Vec<_>>(), vec![ToggleKey::CapsLock]);
        assert!(map.is_partition());
    }

    #[test]
    fn test_out_of_range_and_duplicate_indices_are_dropped() {
        let map = LampIndexMap::build(
            4,
            vec![
                (ToggleKey::NumLock, vec![1, 1, 9]),
                (ToggleKey::CapsLock, vec![1, 2]),
            ],
        );
        assert_eq!(map.indices_for(ToggleKey::NumLock), &[1]);
        assert_eq!(map.indices_for(ToggleKey::CapsLock), &[2]);
        assert_eq!(map.non_monitored(), &[0, 3]);
        assert!(map.is_partition());
    }

    #[test]
    fn test_empty_device() {
        let map = LampIndexMap::build(0, vec![(ToggleKey::CapsLock, vec![0])]);
        assert_eq!(map.monitored_count(), 0);
        assert!(map.non_monitored().is_empty());
        assert!(map.is_partition());
    }

    #[test]
    fn test_monitored_iterates_key_index_pairs() {
        let map = scenario_map();
        let pairs: Vec<_> = map.monitored().collect();
        assert_eq!(
            pairs,
            vec![
                (ToggleKey::NumLock, 5),
                (ToggleKey::CapsLock, 6),
                (ToggleKey::ScrollLock, 7)
            ]
        );
    }

    #[test]
    fn test_is_partition_detects_missing_index() {
        let mut map = scenario_map();
        map.non_monitored.pop();
        assert!(!map.is_partition());
    }
}
