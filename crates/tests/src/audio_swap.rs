//! Live device-swap scenarios against Playing pipelines
//!
//! These are the end-to-end checks for the two reconfiguration idioms:
//! the idle-probe source swap on the input graph and the blocking-probe
//! pause/swap/resume sink replacement on the output graph.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jongleur_core::domain::{
    Caps, Device, DeviceClass, Element, Pad, Pipeline, State, Structure,
};
use jongleur_infra::audio::{AudioInput, AudioOutput, DeviceWatcher, MockMonitor};

fn mic(name: &str) -> Device {
    Device::new(
        DeviceClass::AudioSource,
        name,
        false,
        Structure::new("properties"),
        Caps::any(),
    )
}

fn speakers(name: &str) -> Device {
    Device::new(
        DeviceClass::AudioSink,
        name,
        false,
        Structure::new("properties"),
        Caps::any(),
    )
}

fn wait_until(deadline_in: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + deadline_in;
    while !check() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

fn wait_for_buffers(sink: &Element, beyond: u64) -> bool {
    wait_until(Duration::from_secs(2), || sink.get_uint64("received") > beyond)
}

#[test]
fn input_source_swap_while_playing_never_double_links() {
    let pipeline = Pipeline::new("p");
    let mut input = AudioInput::new("audioInput").unwrap();
    let capture = Element::from_factory("null-sink", "capture").unwrap();

    pipeline.add(input.bin().element()).unwrap();
    pipeline.add(&capture).unwrap();
    assert!(input
        .element()
        .static_pad("src")
        .unwrap()
        .link(&capture.static_pad("sink").unwrap()));

    assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));
    assert!(wait_for_buffers(&capture, 0), "no initial flow");

    let old_pad = input.source().src_pad().unwrap();
    let volume_sink = input.volume_element().sink_pad().unwrap();

    // Sample volume's peer concurrently with the swap.
    let observations: Arc<Mutex<Vec<Option<Pad>>>> = Arc::new(Mutex::new(Vec::new()));
    let stop = Arc::new(AtomicBool::new(false));
    let sampler = {
        let observations = observations.clone();
        let stop = stop.clone();
        let volume_sink = volume_sink.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                observations.lock().unwrap().push(volume_sink.peer());
                std::thread::sleep(Duration::from_micros(200));
            }
        })
    };

    let device = mic("usb-mic");
    input.set_device(Some(&device));

    stop.store(true, Ordering::SeqCst);
    sampler.join().unwrap();

    let new_pad = input.source().src_pad().unwrap();
    assert_ne!(old_pad, new_pad);
    assert_eq!(input.source().factory_name(), "device-source");
    assert!(old_pad.peer().is_none());
    assert_eq!(volume_sink.peer().unwrap(), new_pad);

    // Every observed peer is the old source, the new source, or the
    // transient unlinked window, never anything else, and never the old
    // source again once the new one has been seen.
    let mut seen_new = false;
    for observed in observations.lock().unwrap().iter() {
        match observed {
            None => (),
            Some(pad) if *pad == old_pad => {
                assert!(!seen_new, "old source relinked after replacement");
            }
            Some(pad) if *pad == new_pad => seen_new = true,
            Some(pad) => panic!("unexpected peer {pad:?} during swap"),
        }
    }

    // Flow resumes through the replacement source.
    let settled = capture.get_uint64("received");
    assert!(wait_for_buffers(&capture, settled), "flow did not resume");

    assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
}

#[test]
fn output_sink_swap_while_playing_pauses_and_resumes() {
    let pipeline = Pipeline::new("p");
    let tone = Element::from_factory("tone-source", "tone").unwrap();
    let mut output = AudioOutput::new("audioOutput").unwrap();
    output.set_pipeline(&pipeline);

    pipeline.add(&tone).unwrap();
    pipeline.add(output.element()).unwrap();
    assert!(tone.link(output.element()));

    assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));
    let old_sink = output.sink();
    assert!(wait_for_buffers(&old_sink, 0), "no initial flow");

    let device = speakers("dock");
    assert!(output.set_device(Some(&device)));

    // The blocking probe fires on the next buffer through volume's src
    // pad and performs the replacement on the streaming thread.
    assert!(
        wait_until(Duration::from_secs(2), || output.sink() != old_sink),
        "sink was not replaced"
    );
    let new_sink = output.sink();
    assert_eq!(new_sink.factory_name(), "device-sink");
    assert_eq!(old_sink.state(), State::Null);

    // The pipeline comes back to the last explicitly requested state.
    assert!(
        wait_until(Duration::from_secs(2), || pipeline.state() == State::Playing),
        "pipeline did not resume"
    );
    assert!(wait_for_buffers(&new_sink, 0), "flow did not reach the new sink");

    assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
}

#[test]
fn output_sink_swap_while_paused_is_immediate() {
    let pipeline = Pipeline::new("p");
    let tone = Element::from_factory("tone-source", "tone").unwrap();
    let mut output = AudioOutput::new("audioOutput").unwrap();
    output.set_pipeline(&pipeline);

    pipeline.add(&tone).unwrap();
    pipeline.add(output.element()).unwrap();
    assert!(tone.link(output.element()));
    assert!(pipeline.set_state_sync(State::Paused, Duration::from_secs(2)));

    let old_sink = output.sink();
    assert!(output.set_device(Some(&speakers("dock"))));

    // No probe involved: replaced synchronously, pipeline stays Paused.
    assert_ne!(output.sink(), old_sink);
    assert_eq!(pipeline.state(), State::Paused);

    assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
}

#[test]
fn hotplugged_device_can_be_adopted_mid_playback() {
    use jongleur_core::domain::DeviceRegistry;

    let builtin = speakers("builtin");
    let (monitor, hotplug) = MockMonitor::new(vec![builtin.clone()]);
    let registry = Arc::new(DeviceRegistry::new());
    let _watcher = DeviceWatcher::start(monitor, registry.clone()).unwrap();

    let pipeline = Pipeline::new("p");
    let tone = Element::from_factory("tone-source", "tone").unwrap();
    let mut output = AudioOutput::new("audioOutput").unwrap();
    output.set_pipeline(&pipeline);
    pipeline.add(&tone).unwrap();
    pipeline.add(output.element()).unwrap();
    assert!(tone.link(output.element()));

    output.set_device(registry.audio_outputs().first());
    assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));
    assert!(wait_for_buffers(&output.sink(), 0));

    let headset = speakers("headset");
    hotplug.plug(headset.clone());
    assert!(wait_until(Duration::from_secs(2), || {
        registry.audio_outputs().len() == 2
    }));

    let before = output.sink();
    assert!(output.set_device(Some(&headset)));
    assert!(
        wait_until(Duration::from_secs(2), || output.sink() != before),
        "hotplugged sink was not adopted"
    );
    // Let the swap's pause/resume settle before tearing down.
    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.state() == State::Playing
    }));
    assert_eq!(
        output.device().map(|d| d.description().to_string()),
        Some("headset".to_string())
    );

    assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
}
