//! Audio output graph: `queue → convert → resample → volume → sink`,
//! exposed through a ghost sink pad
//!
//! Swapping a *sink* while Playing cannot rely on an idle probe alone;
//! downstream of the blocking point there are still in-flight buffers. If
//! the pipeline is not Playing the swap happens immediately; otherwise a
//! blocking probe on the volume element's src pad pauses the whole
//! pipeline, replaces the sink, prerolls it, and resumes to the last
//! explicitly requested pipeline state.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use jongleur_core::domain::{
    Bin, Device, Element, GraphError, GraphResult, Pipeline, ProbeReturn, ProbeType, State,
    DEFAULT_STATE_TIMEOUT,
};

type VolumeListener = Box<dyn Fn(f32) + Send>;
type MuteListener = Box<dyn Fn(bool) + Send>;

/// The swappable tail of the output graph; shared with the blocking-probe
/// callback that performs the live replacement on the streaming thread.
struct SinkSlot {
    sink: Element,
    device: Option<Device>,
}

/// Fixed-topology playback sub-graph presenting a single sink pad.
pub struct AudioOutput {
    bin: Bin,
    volume_element: Element,
    slot: Arc<Mutex<SinkSlot>>,
    pipeline: Option<Pipeline>,
    volume: f32,
    muted: bool,
    volume_listeners: Vec<VolumeListener>,
    mute_listeners: Vec<MuteListener>,
}

fn factory(name: &str, instance: &str) -> GraphResult<Element> {
    Element::from_factory(name, instance).ok_or_else(|| GraphError::UnknownFactory(name.to_string()))
}

impl AudioOutput {
    pub fn new(name: &str) -> GraphResult<AudioOutput> {
        let bin = Bin::new(name);
        let queue = factory("queue", "audioQueue")?;
        let convert = factory("convert", "audioConvert")?;
        let resample = factory("resample", "audioResample")?;
        let volume_element = factory("volume", "volume")?;
        let sink = factory("auto-sink", "autoAudioSink")?;

        bin.add_many(&[&queue, &convert, &resample, &volume_element, &sink])?;
        if !jongleur_core::domain::link_many(&[&queue, &convert, &resample, &volume_element, &sink])
        {
            return Err(GraphError::LinkFailed {
                src: queue.name().to_string(),
                sink: sink.name().to_string(),
            });
        }
        bin.add_ghost_pad(&queue, "sink")?;

        Ok(AudioOutput {
            bin,
            volume_element,
            slot: Arc::new(Mutex::new(SinkSlot { sink, device: None })),
            pipeline: None,
            volume: 1.0,
            muted: false,
            volume_listeners: Vec::new(),
            mute_listeners: Vec::new(),
        })
    }

    /// The sub-graph, ready to be added to a pipeline and linked via its
    /// ghost sink pad.
    pub fn bin(&self) -> &Bin {
        &self.bin
    }

    pub fn element(&self) -> &Element {
        self.bin.element()
    }

    /// The enclosing pipeline; required for the Playing-time sink swap to
    /// know what to pause and what state to restore.
    pub fn set_pipeline(&mut self, pipeline: &Pipeline) {
        self.pipeline = Some(pipeline.clone());
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn device(&self) -> Option<Device> {
        self.slot.lock().unwrap().device.clone()
    }

    pub fn on_volume_changed(&mut self, listener: impl Fn(f32) + Send + 'static) {
        self.volume_listeners.push(Box::new(listener));
    }

    pub fn on_muted_changed(&mut self, listener: impl Fn(bool) + Send + 'static) {
        self.mute_listeners.push(Box::new(listener));
    }

    /// Forwarded to the graph's volume element; notifications only fire
    /// when the value actually changes.
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

    /// Swap the playback device.
    ///
    /// Not Playing: replace immediately. Playing: install a blocking probe
    /// on volume's src pad; when it fires on the streaming thread, pause
    /// the pipeline synchronously, stop and replace the sink, preroll the
    /// replacement, and restore the last explicitly requested state.
    ///
    /// A Playing-time swap completes asynchronously on the streaming
    /// thread. Wait for the pipeline to return to its requested state
    /// before issuing further pipeline state changes.
    pub fn set_device(&mut self, device: Option<&Device>) -> bool {
        {
            let mut slot = self.slot.lock().unwrap();
            if slot.device.as_ref() == device {
                return true;
            }
            slot.device = device.cloned();
        }
        debug!(
            device = ?device.map(Device::description),
            "setting audio output device"
        );

        let playing = matches!(&self.pipeline, Some(p) if p.state() == State::Playing);
        if !playing {
            change_output(&self.bin, &self.volume_element, &self.slot);
            return true;
        }

        let pipeline = self.pipeline.clone().expect("playing implies a pipeline");
        let bin = self.bin.clone();
        let volume = self.volume_element.clone();
        let slot = self.slot.clone();
        let pad = match volume.src_pad() {
            Some(pad) => pad,
            None => return false,
        };
        pad.add_probe(ProbeType::BLOCK_DOWNSTREAM, move |_info| {
            prepare_output_change(&pipeline, &bin, &volume, &slot);
            ProbeReturn::Remove
        });
        true
    }

    /// The active sink element (primarily for diagnostics and tests).
    pub fn sink(&self) -> Element {
        self.slot.lock().unwrap().sink.clone()
    }

    pub fn volume_element(&self) -> &Element {
        &self.volume_element
    }
}

/// Remove the old sink and add/link a replacement built from the slot's
/// device, falling back through the generic factories.
fn change_output(bin: &Bin, volume: &Element, slot: &Arc<Mutex<SinkSlot>>) {
    debug!("changing audio output");
    let (old_sink, device) = {
        let slot = slot.lock().unwrap();
        (slot.sink.clone(), slot.device.clone())
    };
    bin.remove(&old_sink);

    let new_sink = match &device {
        None => Element::from_factory("null-sink", "fakeaudiosink"),
        Some(device) => device.create_element("audiosink"),
    }
    .or_else(|| Element::from_factory("auto-sink", "audiosink"))
    .expect("auto-sink factory is built in");

    if let Err(e) = bin.add(&new_sink) {
        warn!(error = %e, "could not add replacement sink");
        bin.element().post_error(format!("could not add replacement sink: {e}"));
        return;
    }
    if !volume.link(&new_sink) {
        warn!(sink = new_sink.name(), "could not link replacement sink");
        bin.element().post_error("could not link replacement sink");
    }
    slot.lock().unwrap().sink = new_sink;
}

/// Playing-time sink replacement, executed on the streaming thread from
/// the blocking probe.
fn prepare_output_change(
    pipeline: &Pipeline,
    bin: &Bin,
    volume: &Element,
    slot: &Arc<Mutex<SinkSlot>>,
) {
    debug!("reconfiguring audio output");
    let restore = pipeline.last_requested_state();

    if pipeline.state() == State::Playing
        && !pipeline.set_state_sync(State::Paused, DEFAULT_STATE_TIMEOUT)
    {
        warn!("could not pause pipeline for sink replacement");
    }

    let old_sink = slot.lock().unwrap().sink.clone();
    if !old_sink.set_state_sync(State::Null, DEFAULT_STATE_TIMEOUT) {
        warn!(sink = old_sink.name(), "old sink did not reach Null");
    }

    change_output(bin, volume, slot);

    let new_sink = slot.lock().unwrap().sink.clone();
    new_sink.set_state_sync(State::Paused, DEFAULT_STATE_TIMEOUT);

    if restore == State::Playing {
        pipeline.set_state_sync(restore, DEFAULT_STATE_TIMEOUT);
    }
}
