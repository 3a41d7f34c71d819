//! IndexMapper: builds the lamp index map of a freshly attached device.
//!
//! For each monitored key the device is asked which lamps sit under that key
//! (a key may have several).  Everything no key claims becomes a
//! non-monitored lamp.  A key the device has no lamp for is skipped with a
//! warning; the rest of the map is built as usual.

use lockglow_core::{LampIndexMap, ToggleKey};
use tracing::{info, warn};

use crate::infrastructure::lighting::LightingDevice;

/// Stateless builder for [`LampIndexMap`]s.
pub struct IndexMapper;

impl IndexMapper {
    /// Queries `device` once per key in `keys` and partitions its lamps.
    pub fn build_from_device(
        device: &dyn LightingDevice,
        keys: impl IntoIterator<Item = ToggleKey>,
    ) -> LampIndexMap {
        let lamp_count = device.lamp_count();

        let key_indices: Vec<_> = keys
            .into_iter()
            .filter_map(|key| {
                let indices = device.indices_for_key(key.vk_code());
                if indices.is_empty() {
                    warn!(device = device.id(), %key, "device has no lamp for key; skipped");
                    None
                } else {
                    Some((key, indices))
                }
            })
            .collect();

        let map = LampIndexMap::build(lamp_count, key_indices);
        info!(
            device = device.id(),
            lamp_count,
            monitored = map.monitored_count(),
            non_monitored = map.non_monitored().len(),
            "lamp index map built"
        );
        map
    }
}
