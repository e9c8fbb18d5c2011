//! Device records, the device registry, and the monitor interface
//!
//! Discovery is push-driven: a platform monitor performs one synchronous
//! enumeration at startup and then emits add/remove events as hardware
//! comes and goes. The registry is the single place those events land;
//! listing queries may run concurrently from any thread.

use std::sync::{Mutex, RwLock};

use crossbeam::channel::Sender;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::caps::{Caps, Structure};
use crate::domain::element::Element;
use crate::domain::object::Handle;

/// Property key carrying the stable identifier of a device.
pub const PROP_BUS_PATH: &str = "device.bus_path";
/// Property key carrying the platform device class; "monitor" entries are
/// loopbacks of an output and are hidden from input listings.
pub const PROP_DEVICE_CLASS: &str = "device.class";

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device backend unavailable: {0}")]
    Unavailable(String),

    #[error("device backend error: {0}")]
    Backend(String),
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// What a discovered device does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    VideoSource,
    AudioSource,
    AudioSink,
}

/// Listing categories exposed to the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCategory {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// Lookup direction for [`DeviceRegistry::audio_device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Input,
    Output,
}

/// Native payload of a discovered device. Immutable once published.
pub(crate) struct DeviceObject {
    display_name: String,
    class: DeviceClass,
    is_default: bool,
    properties: Structure,
    caps: Caps,
}

/// A discovered device. Cheap to clone, with identity equality: the registry
/// deduplicates by the underlying native object, not by value.
#[derive(Clone, PartialEq)]
pub struct Device {
    handle: Handle<DeviceObject>,
}

impl Device {
    pub fn new(
        class: DeviceClass,
        display_name: impl Into<String>,
        is_default: bool,
        properties: Structure,
        caps: Caps,
    ) -> Device {
        Device {
            handle: Handle::alloc(DeviceObject {
                display_name: display_name.into(),
                class,
                is_default,
                properties,
                caps,
            }),
        }
    }

    fn object(&self) -> &DeviceObject {
        self.handle.get().expect("device wrapper holds a live object")
    }

    pub fn class(&self) -> DeviceClass {
        self.object().class
    }

    pub fn description(&self) -> &str {
        &self.object().display_name
    }

    pub fn is_default(&self) -> bool {
        self.object().is_default
    }

    pub fn properties(&self) -> &Structure {
        &self.object().properties
    }

    pub fn caps(&self) -> &Caps {
        &self.object().caps
    }

    /// The stable identifier used for lookup, when the platform provides
    /// one.
    pub fn bus_path(&self) -> Option<&str> {
        self.object().properties.get_str(PROP_BUS_PATH)
    }

    /// Construct a graph element backed by this device; `None` when the
    /// device class has no element factory (the caller falls back to a
    /// generic auto element).
    pub fn create_element(&self, name: &str) -> Option<Element> {
        Element::from_device(self, name)
    }

    pub fn ref_count(&self) -> usize {
        self.handle.ref_count()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Device({:?} \"{}\"{})",
            self.class(),
            self.description(),
            if self.is_default() { ", default" } else { "" }
        )
    }
}

/// A video capture entry: the device plus its synthetic registry id.
///
/// Native video device identifiers are not stable across runs, so the
/// registry assigns a monotonically increasing id at discovery time.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInput {
    pub id: String,
    pub device: Device,
}

/// Hotplug notifications pushed by a [`DeviceMonitor`].
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Added(Device),
    Removed(Device),
}

/// Platform discovery interface.
///
/// `start` performs the initial synchronous enumeration and returns it;
/// asynchronous add/remove notifications are pushed into `events` from
/// then on. Implementations adapt each OS notification mechanism to this
/// shape.
pub trait DeviceMonitor: Send {
    fn start(&mut self, events: Sender<DeviceEvent>) -> DeviceResult<Vec<Device>>;

    fn stop(&mut self) {}
}

struct RegistryInner {
    video_sources: Vec<VideoInput>,
    audio_sources: Vec<Device>,
    audio_sinks: Vec<Device>,
    next_video_id: u64,
}

type ChangeListener = Box<dyn Fn(DeviceCategory) + Send + Sync>;

/// The set of currently known devices, one writer (the discovery-event
/// handler), many concurrent readers.
pub struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
    listeners: Mutex<Vec<ChangeListener>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        DeviceRegistry::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry {
            inner: RwLock::new(RegistryInner {
                video_sources: Vec::new(),
                audio_sources: Vec::new(),
                audio_sinks: Vec::new(),
                next_video_id: 0,
            }),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener invoked (on the writer's thread) whenever a
    /// category's device list changes.
    pub fn on_change(&self, listener: impl Fn(DeviceCategory) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    fn notify(&self, category: DeviceCategory) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(category);
        }
    }

    /// Classify and record a discovered device.
    ///
    /// Audio entries are deduplicated by native identity; video sources
    /// are kept in discovery order under a fresh synthetic id.
    pub fn add_device(&self, device: Device) {
        let category = {
            let mut inner = self.inner.write().unwrap();
            match device.class() {
                DeviceClass::VideoSource => {
                    let id = inner.next_video_id.to_string();
                    inner.next_video_id += 1;
                    inner.video_sources.push(VideoInput { id, device: device.clone() });
                    DeviceCategory::VideoInput
                }
                DeviceClass::AudioSource => {
                    if inner.audio_sources.contains(&device) {
                        return;
                    }
                    inner.audio_sources.push(device.clone());
                    DeviceCategory::AudioInput
                }
                DeviceClass::AudioSink => {
                    if inner.audio_sinks.contains(&device) {
                        return;
                    }
                    inner.audio_sinks.push(device.clone());
                    DeviceCategory::AudioOutput
                }
            }
        };
        info!(device = device.description(), ?category, "device added");
        self.notify(category);
    }

    /// Remove a device by native identity. A removal event for an unknown
    /// device is ignored.
    pub fn remove_device(&self, device: &Device) {
        let category = {
            let mut inner = self.inner.write().unwrap();
            if let Some(pos) = inner
                .video_sources
                .iter()
                .position(|v| v.device == *device)
            {
                inner.video_sources.remove(pos);
                Some(DeviceCategory::VideoInput)
            } else if let Some(pos) =
                inner.audio_sources.iter().position(|d| d == device)
            {
                inner.audio_sources.remove(pos);
                Some(DeviceCategory::AudioInput)
            } else if let Some(pos) = inner.audio_sinks.iter().position(|d| d == device) {
                inner.audio_sinks.remove(pos);
                Some(DeviceCategory::AudioOutput)
            } else {
                debug!(device = device.description(), "removal of unknown device ignored");
                None
            }
        };
        if let Some(category) = category {
            info!(device = device.description(), ?category, "device removed");
            self.notify(category);
        }
    }

    /// Audio capture devices, default first, remainder in discovery
    /// order. Monitor loopbacks are hidden.
    pub fn audio_inputs(&self) -> Vec<Device> {
        let inner = self.inner.read().unwrap();
        default_first(&inner.audio_sources)
    }

    /// Audio playback devices, default first, remainder in discovery
    /// order.
    pub fn audio_outputs(&self) -> Vec<Device> {
        let inner = self.inner.read().unwrap();
        default_first(&inner.audio_sinks)
    }

    /// Video capture devices with their synthetic ids, default first.
    pub fn video_inputs(&self) -> Vec<VideoInput> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::with_capacity(inner.video_sources.len());
        for entry in &inner.video_sources {
            if entry.device.is_default() {
                out.insert(0, entry.clone());
            } else {
                out.push(entry.clone());
            }
        }
        out
    }

    /// Find an audio device by its stable bus-path key. Absence is an
    /// empty result, not a failure.
    pub fn audio_device(&self, id: &str, mode: AudioMode) -> Option<Device> {
        let inner = self.inner.read().unwrap();
        let set = match mode {
            AudioMode::Input => &inner.audio_sources,
            AudioMode::Output => &inner.audio_sinks,
        };
        set.iter().find(|d| d.bus_path() == Some(id)).cloned()
    }

    /// Find a video device by its synthetic registry id.
    pub fn video_device(&self, id: &str) -> Option<Device> {
        let inner = self.inner.read().unwrap();
        inner
            .video_sources
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.device.clone())
    }
}

/// Default-first presentation order: callers rely on index 0 being the
/// system default when one is present.
fn default_first(devices: &[Device]) -> Vec<Device> {
    let mut out = Vec::with_capacity(devices.len());
    for device in devices {
        if device
            .properties()
            .get_str(PROP_DEVICE_CLASS)
            .map(|class| class == "monitor")
            .unwrap_or(false)
        {
            continue;
        }
        if device.is_default() {
            out.insert(0, device.clone());
        } else {
            out.push(device.clone());
        }
    }
    out
}
