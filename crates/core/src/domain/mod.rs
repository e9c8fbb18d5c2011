//! Domain entities and graph model

pub mod bin;
pub mod caps;
pub mod config;
pub mod device;
pub mod element;
pub mod object;
pub mod pad;

// Re-export specific items to avoid ambiguous glob imports
pub use bin::{Bin, Bus, Message, Pipeline};
pub use caps::{audio_structure, Caps, Structure, Value};
pub use config::{AudioDefaults, ConfigError, DevicePreferences, EngineConfig};
pub use device::{
    AudioMode, Device, DeviceCategory, DeviceClass, DeviceError, DeviceEvent, DeviceMonitor,
    DeviceRegistry, DeviceResult, VideoInput,
};
pub use element::{
    Element, GraphError, GraphResult, State, StateChange, DEFAULT_STATE_TIMEOUT, STOP_TIMEOUT,
};
pub use object::{Handle, RefMode, WeakHandle};
pub use pad::{
    link_many, Buffer, Event, Pad, PadDirection, ProbeInfo, ProbeReturn, ProbeType, StreamItem,
};
