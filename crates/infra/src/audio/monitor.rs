//! Device monitors and the registry event pump
//!
//! [`CpalMonitor`] adapts CPAL's device enumeration to the core's
//! [`DeviceMonitor`] interface. CPAL has no hotplug notification, so this
//! monitor contributes the initial synchronous enumeration only; platforms
//! with native hotplug buses plug in their own monitor implementation.
//! [`MockMonitor`] is the scriptable stand-in used by tests to simulate
//! hotplug traffic.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait};
use crossbeam::channel::{unbounded, Sender};
use tracing::{debug, info, warn};

use jongleur_core::domain::{
    audio_structure, Caps, Device, DeviceClass, DeviceError, DeviceEvent, DeviceMonitor,
    DeviceRegistry, DeviceResult, Structure, Value,
};
use jongleur_core::domain::device::PROP_BUS_PATH;

/// CPAL-backed OS device monitor.
pub struct CpalMonitor {
    host: cpal::Host,
}

impl Default for CpalMonitor {
    fn default() -> Self {
        info!("Initializing CPAL device monitor");
        Self::new()
    }
}

impl CpalMonitor {
    pub fn new() -> Self {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());
        Self { host }
    }
}

impl DeviceMonitor for CpalMonitor {
    fn start(&mut self, _events: Sender<DeviceEvent>) -> DeviceResult<Vec<Device>> {
        let mut devices = Vec::new();

        let default_input = self
            .host
            .default_input_device()
            .and_then(|d| d.name().ok());
        let default_output = self
            .host
            .default_output_device()
            .and_then(|d| d.name().ok());

        let inputs = self
            .host
            .input_devices()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        for device in inputs {
            match describe(&device, DeviceClass::AudioSource, default_input.as_deref()) {
                Some(record) => devices.push(record),
                None => warn!("Skipping unusable input device"),
            }
        }

        let outputs = self
            .host
            .output_devices()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;
        for device in outputs {
            match describe(&device, DeviceClass::AudioSink, default_output.as_deref()) {
                Some(record) => devices.push(record),
                None => warn!("Skipping unusable output device"),
            }
        }

        info!("Enumerated {} audio devices", devices.len());
        Ok(devices)
    }
}

/// Build a device record from a CPAL device, tolerating devices that
/// refuse to report their configuration.
fn describe(
    device: &cpal::Device,
    class: DeviceClass,
    default_name: Option<&str>,
) -> Option<Device> {
    let name = device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string());
    let is_default = default_name == Some(name.as_str());

    let mut structures = Vec::new();
    let configs: Vec<_> = match class {
        DeviceClass::AudioSource => device
            .supported_input_configs()
            .ok()?
            .collect(),
        DeviceClass::AudioSink => device
            .supported_output_configs()
            .ok()?
            .collect(),
        DeviceClass::VideoSource => return None,
    };
    for config in configs {
        let min = config.min_sample_rate() as i32;
        let max = config.max_sample_rate() as i32;
        let rate = if min == max {
            Value::Int(min)
        } else {
            Value::IntRange { min, max }
        };
        let format = match config.sample_format() {
            cpal::SampleFormat::I16 => "S16",
            cpal::SampleFormat::I32 => "S32",
            cpal::SampleFormat::F32 => "F32",
            cpal::SampleFormat::F64 => "F64",
            _ => "F32",
        };
        structures.push(audio_structure(
            format,
            rate,
            Value::Int(config.channels() as i32),
        ));
    }

    let properties = Structure::new("properties")
        .field(PROP_BUS_PATH, Value::Str(format!("cpal/{name}")))
        .field("device.api", Value::Str("cpal".to_string()));

    debug!(device = %name, ?class, is_default, "described device");
    Some(Device::new(
        class,
        name,
        is_default,
        properties,
        Caps::from_structures(structures),
    ))
}

/// Scriptable monitor for tests: a fixed initial enumeration plus a
/// [`MockHotplug`] controller that injects add/remove events afterwards.
pub struct MockMonitor {
    initial: Vec<Device>,
    events: Arc<Mutex<Option<Sender<DeviceEvent>>>>,
}

/// Control handle that simulates hotplug traffic on a [`MockMonitor`].
#[derive(Clone)]
pub struct MockHotplug {
    events: Arc<Mutex<Option<Sender<DeviceEvent>>>>,
}

impl MockMonitor {
    pub fn new(initial: Vec<Device>) -> (MockMonitor, MockHotplug) {
        let events = Arc::new(Mutex::new(None));
        (
            MockMonitor {
                initial,
                events: events.clone(),
            },
            MockHotplug { events },
        )
    }
}

impl DeviceMonitor for MockMonitor {
    fn start(&mut self, events: Sender<DeviceEvent>) -> DeviceResult<Vec<Device>> {
        *self.events.lock().unwrap() = Some(events);
        Ok(self.initial.clone())
    }

    fn stop(&mut self) {
        *self.events.lock().unwrap() = None;
    }
}

impl MockHotplug {
    pub fn plug(&self, device: Device) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(DeviceEvent::Added(device));
        }
    }

    pub fn unplug(&self, device: Device) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(DeviceEvent::Removed(device));
        }
    }
}

/// Owns a monitor and pumps its events into a registry.
///
/// The pump thread is the registry's single writer; listing queries read
/// concurrently from any thread. Dropping the watcher stops the pump.
pub struct DeviceWatcher {
    registry: Arc<DeviceRegistry>,
    shutdown: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    /// Run the monitor's initial enumeration into `registry`, then keep
    /// applying hotplug events on a dedicated thread.
    pub fn start(
        mut monitor: impl DeviceMonitor + 'static,
        registry: Arc<DeviceRegistry>,
    ) -> DeviceResult<DeviceWatcher> {
        let (event_tx, event_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        let initial = monitor.start(event_tx)?;
        for device in initial {
            registry.add_device(device);
        }

        let pump_registry = registry.clone();
        let thread = std::thread::Builder::new()
            .name("device-watch".to_string())
            .spawn(move || {
                loop {
                    crossbeam::channel::select! {
                        recv(event_rx) -> event => match event {
                            Ok(DeviceEvent::Added(device)) => pump_registry.add_device(device),
                            Ok(DeviceEvent::Removed(device)) => {
                                pump_registry.remove_device(&device)
                            }
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                monitor.stop();
                debug!("device watcher exiting");
            })
            .expect("spawn device watcher thread");

        Ok(DeviceWatcher {
            registry,
            shutdown: shutdown_tx,
            thread: Some(thread),
        })
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jongleur_core::domain::AudioMode;

    fn sink(name: &str, default: bool) -> Device {
        Device::new(
            DeviceClass::AudioSink,
            name,
            default,
            Structure::new("properties")
                .field(PROP_BUS_PATH, Value::Str(format!("mock/{name}"))),
            Caps::any(),
        )
    }

    #[test]
    fn watcher_applies_initial_enumeration_and_hotplug() {
        let (monitor, hotplug) = MockMonitor::new(vec![sink("builtin", true)]);
        let registry = Arc::new(DeviceRegistry::new());
        let watcher = DeviceWatcher::start(monitor, registry.clone()).unwrap();

        assert_eq!(registry.audio_outputs().len(), 1);

        let usb = sink("usb", false);
        hotplug.plug(usb.clone());
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while registry.audio_outputs().len() != 2 {
            assert!(std::time::Instant::now() < deadline, "hotplug add not applied");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        hotplug.unplug(usb);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while registry.audio_outputs().len() != 1 {
            assert!(std::time::Instant::now() < deadline, "hotplug remove not applied");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        assert!(registry
            .audio_device("mock/builtin", AudioMode::Output)
            .is_some());
        drop(watcher);
    }

    #[test]
    fn cpal_monitor_enumerates_or_reports_cleanly() {
        let mut monitor = CpalMonitor::default();
        let (tx, _rx) = unbounded();
        match monitor.start(tx) {
            Ok(devices) => {
                for device in &devices {
                    assert!(!device.description().is_empty());
                    assert!(device.bus_path().unwrap_or_default().starts_with("cpal/"));
                }
            }
            Err(e) => {
                // On CI or headless systems there may be no audio stack.
                eprintln!("Skipping test: {e}");
            }
        }
    }
}
