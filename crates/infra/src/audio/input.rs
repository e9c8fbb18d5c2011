//! Audio input graph: `source → volume`, exposed through a ghost src pad
//!
//! The source element is swappable while the graph is live: the unlink
//! happens inside an idle probe on the streaming thread, so no buffer is
//! ever pushed into a half-unlinked topology.

use tracing::{debug, warn};

use jongleur_core::domain::{
    Bin, Device, Element, GraphError, GraphResult, State, DEFAULT_STATE_TIMEOUT,
};

type VolumeListener = Box<dyn Fn(f32) + Send>;
type MuteListener = Box<dyn Fn(bool) + Send>;

/// Fixed-topology capture sub-graph presenting a single src pad.
pub struct AudioInput {
    bin: Bin,
    source: Element,
    volume_element: Element,
    device: Option<Device>,
    volume: f32,
    muted: bool,
    volume_listeners: Vec<VolumeListener>,
    mute_listeners: Vec<MuteListener>,
}

fn factory(name: &str, instance: &str) -> GraphResult<Element> {
    Element::from_factory(name, instance).ok_or_else(|| GraphError::UnknownFactory(name.to_string()))
}

impl AudioInput {
    pub fn new(name: &str) -> GraphResult<AudioInput> {
        let bin = Bin::new(name);
        let source = factory("auto-source", "audiosrc")?;
        let volume_element = factory("volume", "volume")?;

        bin.add_many(&[&source, &volume_element])?;
        if !source.link(&volume_element) {
            return Err(GraphError::LinkFailed {
                src: source.name().to_string(),
                sink: volume_element.name().to_string(),
            });
        }
        bin.add_ghost_pad(&volume_element, "src")?;

        Ok(AudioInput {
            bin,
            source,
            volume_element,
            device: None,
            volume: 1.0,
            muted: false,
            volume_listeners: Vec::new(),
            mute_listeners: Vec::new(),
        })
    }

    /// The sub-graph, ready to be added to a pipeline and linked via its
    /// ghost src pad.
    pub fn bin(&self) -> &Bin {
        &self.bin
    }

    pub fn element(&self) -> &Element {
        self.bin.element()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Register a change listener; fired only on actual value changes.
    pub fn on_volume_changed(&mut self, listener: impl Fn(f32) + Send + 'static) {
        self.volume_listeners.push(Box::new(listener));
    }

    pub fn on_muted_changed(&mut self, listener: impl Fn(bool) + Send + 'static) {
        self.mute_listeners.push(Box::new(listener));
    }

    /// Forwarded to the graph's volume element. Setting the cached value
    /// again is a no-op: no property churn, no notification.
    pub fn set_volume(&mut self, volume: f32) {
        if volume == self.volume {
            return;
        }
        self.volume = volume;
        self.volume_element.set_double("volume", volume as f64);
        for listener in &self.volume_listeners {
            listener(volume);
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        if muted == self.muted {
            return;
        }
        self.muted = muted;
        self.volume_element.set_bool("mute", muted);
        for listener in &self.mute_listeners {
            listener(muted);
        }
    }

    /// Swap the capture device without tearing the graph down.
    ///
    /// Sequence: quiesce the source's src pad via an idle probe and unlink
    /// there, stop the old source, remove it, then add/link the
    /// replacement and sync it with the container's state. A device that
    /// cannot produce an element falls back to the generic auto source.
    pub fn set_device(&mut self, device: Option<&Device>) {
        if self.device.as_ref() == device {
            return;
        }
        debug!(
            device = ?device.map(Device::description),
            "setting audio input device"
        );
        self.device = device.cloned();

        let mut new_source = match device {
            Some(device) => device.create_element("audiosrc"),
            None => {
                warn!("Invalid audio device");
                None
            }
        };
        if new_source.is_none() {
            warn!("Failed to create an element for the audio device, using a default audio source");
            new_source = Element::from_factory("auto-source", "audiosrc");
        }
        let new_source = new_source.expect("auto-source factory is built in");

        let old_source = self.source.clone();
        let volume = self.volume_element.clone();
        if let Some(pad) = old_source.src_pad() {
            let unlink_source = old_source.clone();
            let unlink_volume = volume.clone();
            pad.do_in_idle_probe(move || {
                unlink_source.unlink(&unlink_volume);
            });
        }
        if !old_source.set_state_sync(State::Null, DEFAULT_STATE_TIMEOUT) {
            warn!(source = old_source.name(), "old source did not reach Null");
        }
        self.bin.remove(&old_source);

        if let Err(e) = self.bin.add(&new_source) {
            warn!(error = %e, "could not add replacement source");
            self.bin
                .element()
                .post_error(format!("could not add replacement source: {e}"));
            return;
        }
        if !new_source.link(&volume) {
            warn!(source = new_source.name(), "could not link replacement source");
            self.bin.element().post_error("could not link replacement source");
        }
        new_source.sync_state_with_parent();
        self.source = new_source;
    }

    /// The active source element (primarily for diagnostics and tests).
    pub fn source(&self) -> &Element {
        &self.source
    }

    pub fn volume_element(&self) -> &Element {
        &self.volume_element
    }
}

impl Drop for AudioInput {
    fn drop(&mut self) {
        self.bin
            .set_state_sync(State::Null, jongleur_core::domain::STOP_TIMEOUT);
    }
}
