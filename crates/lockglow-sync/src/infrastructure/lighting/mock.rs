//! Mock lighting devices for unit and integration testing.
//!
//! [`MockLightingDevice`] records every batched color command it receives;
//! [`MockDeviceConnector`] hands out registered mock devices by id and can be
//! told to fail or stall the next attach.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lockglow_core::{LampIndex, Rgb};

use super::{validate_command, DeviceConnector, DeviceError, LightingDevice};

/// One recorded `set_colors_for_indices` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorCommand {
    pub colors: Vec<Rgb>,
    pub indices: Vec<LampIndex>,
}

impl ColorCommand {
    /// Color this command assigned to `index`, if it touched it.
    pub fn color_of(&self, index: LampIndex) -> Option<Rgb> {
        self.indices
            .iter()
            .position(|&i| i == index)
            .map(|pos| self.colors[pos])
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// A mock implementation of [`LightingDevice`].
pub struct MockLightingDevice {
    id: String,
    lamp_count: u32,
    keys: HashMap<u16, Vec<LampIndex>>,
    connected: AtomicBool,
    available: AtomicBool,
    fail_commands: AtomicBool,
    commands: Mutex<Vec<ColorCommand>>,
}

impl MockLightingDevice {
    pub fn new(id: &str, lamp_count: u32) -> Self {
        Self {
            id: id.to_string(),
            lamp_count,
            keys: HashMap::new(),
            connected: AtomicBool::new(true),
            available: AtomicBool::new(true),
            fail_commands: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Declares the lamps under the key with Virtual Key code `vk`.
    pub fn with_key(mut self, vk: u16, indices: Vec<LampIndex>) -> Self {
        self.keys.insert(vk, indices);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes subsequent color commands fail with [`DeviceError::Io`].
    pub fn fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// Every accepted command, oldest first.
    pub fn commands(&self) -> Vec<ColorCommand> {
        self.commands.lock().expect("lock poisoned").clone()
    }

    pub fn last_command(&self) -> Option<ColorCommand> {
        self.commands.lock().expect("lock poisoned").last().cloned()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().expect("lock poisoned").clear();
    }
}

impl LightingDevice for MockLightingDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn lamp_count(&self) -> u32 {
        self.lamp_count
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn indices_for_key(&self, virtual_key: u16) -> Vec<LampIndex> {
        self.keys.get(&virtual_key).cloned().unwrap_or_default()
    }

    fn set_colors_for_indices(
        &self,
        colors: &[Rgb],
        indices: &[LampIndex],
    ) -> Result<(), DeviceError> {
        validate_command(self.lamp_count, colors, indices)?;
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(DeviceError::Io("mock command failure".to_string()));
        }
        self.commands.lock().expect("lock poisoned").push(ColorCommand {
            colors: colors.to_vec(),
            indices: indices.to_vec(),
        });
        Ok(())
    }
}

/// Scripted outcome for the next attach of an id.
#[derive(Debug, Clone)]
enum AttachScript {
    Fail(DeviceError),
    Stall(Duration),
}

/// A mock implementation of [`DeviceConnector`].
#[derive(Default)]
pub struct MockDeviceConnector {
    devices: Mutex<HashMap<String, Arc<MockLightingDevice>>>,
    scripts: Mutex<HashMap<String, VecDeque<AttachScript>>>,
    attach_calls: AtomicU32,
}

impl MockDeviceConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `device` attachable under its id, replacing any previous one.
    pub fn insert(&self, device: Arc<MockLightingDevice>) {
        self.devices
            .lock()
            .expect("lock poisoned")
            .insert(device.id().to_string(), device);
    }

    /// The next attach of `id` fails with `error`.
    pub fn fail_next_attach(&self, id: &str, error: DeviceError) {
        self.push_script(id, AttachScript::Fail(error));
    }

    /// The next attach of `id` sleeps for `delay` before succeeding.
    pub fn stall_next_attach(&self, id: &str, delay: Duration) {
        self.push_script(id, AttachScript::Stall(delay));
    }

    pub fn attach_calls(&self) -> u32 {
        self.attach_calls.load(Ordering::SeqCst)
    }

    fn push_script(&self, id: &str, script: AttachScript) {
        self.scripts
            .lock()
            .expect("lock poisoned")
            .entry(id.to_string())
            .or_default()
            .push_back(script);
    }
}

#[async_trait]
impl DeviceConnector for MockDeviceConnector {
    async fn attach(&self, id: &str) -> Result<Arc<dyn LightingDevice>, DeviceError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .expect("lock poisoned")
            .get_mut(id)
            .and_then(VecDeque::pop_front);
        match script {
            Some(AttachScript::Fail(e)) => return Err(e),
            Some(AttachScript::Stall(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        let device = self
            .devices
            .lock()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;
        Ok(device as Arc<dyn LightingDevice>)
    }
}
