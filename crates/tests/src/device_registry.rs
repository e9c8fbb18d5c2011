//! Integration tests for discovery: monitor → watcher → registry → lookup

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jongleur_core::domain::device::PROP_BUS_PATH;
use jongleur_core::domain::{
    AudioMode, Caps, Device, DeviceCategory, DeviceClass, DeviceRegistry, Structure, Value,
};
use jongleur_infra::audio::{DeviceWatcher, MockMonitor};

fn sink(name: &str, default: bool) -> Device {
    Device::new(
        DeviceClass::AudioSink,
        name,
        default,
        Structure::new("properties").field(PROP_BUS_PATH, Value::Str(format!("mock/{name}"))),
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

#[test]
fn default_first_ordering_survives_the_full_discovery_path() {
    let a = sink("a", false);
    let b = sink("b", true);
    let c = sink("c", false);
    let (monitor, _hotplug) = MockMonitor::new(vec![a.clone(), b.clone(), c.clone()]);

    let registry = Arc::new(DeviceRegistry::new());
    let _watcher = DeviceWatcher::start(monitor, registry.clone()).unwrap();

    assert_eq!(registry.audio_outputs(), vec![b, a, c]);
}

#[test]
fn hotplug_round_trip_restores_the_initial_registry() {
    let builtin = sink("builtin", true);
    let (monitor, hotplug) = MockMonitor::new(vec![builtin.clone()]);
    let registry = Arc::new(DeviceRegistry::new());
    let _watcher = DeviceWatcher::start(monitor, registry.clone()).unwrap();

    let headset = sink("headset", false);
    let dock = sink("dock", false);
    hotplug.plug(headset.clone());
    hotplug.plug(dock.clone());
    assert!(wait_until(Duration::from_secs(2), || {
        registry.audio_outputs().len() == 3
    }));

    hotplug.unplug(dock);
    hotplug.unplug(headset);
    assert!(wait_until(Duration::from_secs(2), || {
        registry.audio_outputs() == vec![builtin.clone()]
    }));
}

#[test]
fn change_notifications_report_the_mutated_category() {
    let (monitor, hotplug) = MockMonitor::new(Vec::new());
    let registry = Arc::new(DeviceRegistry::new());

    let output_changes = Arc::new(AtomicU32::new(0));
    let counter = output_changes.clone();
    registry.on_change(move |category| {
        if category == DeviceCategory::AudioOutput {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let _watcher = DeviceWatcher::start(monitor, registry.clone()).unwrap();

    let headset = sink("headset", false);
    hotplug.plug(headset.clone());
    assert!(wait_until(Duration::from_secs(2), || {
        output_changes.load(Ordering::SeqCst) == 1
    }));

    hotplug.unplug(headset);
    assert!(wait_until(Duration::from_secs(2), || {
        output_changes.load(Ordering::SeqCst) == 2
    }));
}

#[test]
fn lookup_by_stable_key_across_modes() {
    let mic = Device::new(
        DeviceClass::AudioSource,
        "mic",
        false,
        Structure::new("properties").field(PROP_BUS_PATH, Value::Str("mock/mic".into())),
        Caps::any(),
    );
    let speakers = sink("speakers", true);
    let (monitor, _hotplug) = MockMonitor::new(vec![mic.clone(), speakers.clone()]);
    let registry = Arc::new(DeviceRegistry::new());
    let _watcher = DeviceWatcher::start(monitor, registry.clone()).unwrap();

    assert_eq!(registry.audio_device("mock/mic", AudioMode::Input), Some(mic));
    assert_eq!(
        registry.audio_device("mock/speakers", AudioMode::Output),
        Some(speakers)
    );
    // Absence is an empty result, not an error.
    assert_eq!(registry.audio_device("mock/mic", AudioMode::Output), None);
    assert_eq!(registry.audio_device("mock/ghost", AudioMode::Input), None);
}
