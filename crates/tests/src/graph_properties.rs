//! Integration tests for the graph core's structural properties
//!
//! These cover the container bookkeeping, handle lifetime, and teardown
//! guarantees that the audio builders rely on.

use std::time::Duration;

use jongleur_core::domain::{Bin, Element, GraphError, Pipeline, State, StateChange};
use proptest::prelude::*;

fn pool() -> Vec<Element> {
    (0..8)
        .map(|i| Element::from_factory("queue", &format!("e{i}")).unwrap())
        .collect()
}

// ============================================================================
// CONTAINER BOOKKEEPING
// ============================================================================

proptest! {
    /// For any sequence of add/remove operations, the container's child
    /// set equals the net effect of the sequence applied in order.
    #[test]
    fn add_remove_sequences_track_net_effect(
        ops in proptest::collection::vec((any::<bool>(), 0usize..8), 0..64)
    ) {
        let bin = Bin::new("b");
        let elements = pool();
        let mut model: Vec<usize> = Vec::new();

        for (is_add, index) in ops {
            if is_add {
                let expected_new = !model.contains(&index);
                let result = bin.add(&elements[index]);
                if expected_new {
                    prop_assert!(result.is_ok());
                    model.push(index);
                } else {
                    prop_assert!(matches!(result, Err(GraphError::AlreadyOwned(_))));
                }
            } else {
                let expected_present = model.contains(&index);
                prop_assert_eq!(bin.remove(&elements[index]), expected_present);
                model.retain(|&i| i != index);
            }
        }

        let names: Vec<String> =
            bin.children().iter().map(|c| c.name().to_string()).collect();
        let expected: Vec<String> = model.iter().map(|i| format!("e{i}")).collect();
        prop_assert_eq!(names, expected);
    }
}

#[test]
fn handle_refcount_round_trips_through_n_copies() {
    let element = Element::from_factory("volume", "v").unwrap();
    let before = element.ref_count();

    let copies: Vec<Element> = (0..7).map(|_| element.clone()).collect();
    assert_eq!(element.ref_count(), before + 7);

    drop(copies);
    assert_eq!(element.ref_count(), before);
}

#[test]
fn stop_and_remove_postcondition_holds_on_a_live_pipeline() {
    let pipeline = Pipeline::new("p");
    let src = Element::from_factory("tone-source", "src").unwrap();
    let sink = Element::from_factory("null-sink", "sink").unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();
    assert!(src.link(&sink));
    assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));

    pipeline.stop_and_remove(&[&src]);
    assert_eq!(src.state(), State::Null);
    assert!(src.parent().is_none());
    assert!(!pipeline.children().iter().any(|c| *c == src));

    assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
}

#[test]
fn link_unlink_round_trip_inside_a_container() {
    let bin = Bin::new("b");
    let src = Element::from_factory("tone-source", "src").unwrap();
    let volume = Element::from_factory("volume", "vol").unwrap();
    bin.add_many(&[&src, &volume]).unwrap();

    assert!(src.link(&volume));
    assert!(src.unlink(&volume));
    assert!(src.src_pad().unwrap().peer().is_none());
    assert!(volume.sink_pad().unwrap().peer().is_none());

    // The pair can be relinked after teardown.
    assert!(src.link(&volume));
}

#[test]
fn async_preroll_can_be_waited_out_explicitly() {
    let pipeline = Pipeline::new("p");
    let src = Element::from_factory("tone-source", "src").unwrap();
    let sink = Element::from_factory("null-sink", "sink").unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();
    assert!(src.link(&sink));

    let result = pipeline.set_state(State::Playing);
    assert_ne!(result, StateChange::Failure);
    if result == StateChange::Async {
        assert!(pipeline.finish_state_change(Duration::from_secs(2)));
    }
    assert_eq!(pipeline.state(), State::Playing);
    assert!(pipeline.pending_state().is_none());

    assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
}

#[test]
fn state_cascade_reaches_nested_bins() {
    let pipeline = Pipeline::new("p");
    let inner = Bin::new("inner");
    let src = Element::from_factory("silence-source", "src").unwrap();
    let volume = Element::from_factory("volume", "vol").unwrap();
    inner.add_many(&[&src, &volume]).unwrap();
    assert!(src.link(&volume));
    inner.add_ghost_pad(&volume, "src").unwrap();

    let sink = Element::from_factory("null-sink", "sink").unwrap();
    pipeline.add(inner.element()).unwrap();
    pipeline.add(&sink).unwrap();
    assert!(inner
        .static_pad("src")
        .unwrap()
        .link(&sink.static_pad("sink").unwrap()));

    assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));
    assert_eq!(src.state(), State::Playing);
    assert_eq!(volume.state(), State::Playing);

    assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
    assert_eq!(src.state(), State::Null);
    assert_eq!(volume.state(), State::Null);
}
