//! Build a small pipeline, run it briefly, and dump its topology.
//!
//! Run with: cargo run --example graph_demo

use std::time::Duration;

use jongleur_core::domain::{Element, Message, Pipeline, State};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let pipeline = Pipeline::new("demo");
    let tone = Element::from_factory("tone-source", "tone").expect("built-in factory");
    tone.set_int("num-buffers", 50);
    let volume = Element::from_factory("volume", "vol").expect("built-in factory");
    volume.set_double("volume", 0.5);
    let sink = Element::from_factory("null-sink", "sink").expect("built-in factory");

    pipeline.add_many(&[&tone, &volume, &sink]).expect("fresh elements");
    assert!(tone.link(&volume));
    assert!(volume.link(&sink));

    print!("{}", pipeline.dump_topology());

    let bus = pipeline.bus();
    assert!(pipeline.set_state_sync(State::Playing, Duration::from_secs(2)));

    let eos = bus.wait_for(Duration::from_secs(5), |m| matches!(m, Message::Eos { .. }));
    println!("end of stream: {eos:?}");
    println!("sink consumed {} buffers", sink.get_uint64("received"));

    assert!(pipeline.set_state_sync(State::Null, Duration::from_secs(5)));
    print!("{}", pipeline.dump_topology());
}
