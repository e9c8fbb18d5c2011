//! Jongleur core: the media-graph object model and device registry
//!
//! This crate holds the platform-independent heart of the engine: the
//! reference-counted native object layer, elements and containers with
//! their cascading state machines, pads with capability negotiation and
//! probes, the device registry, and the engine configuration. Platform
//! device monitors and the audio graph builders live in `jongleur-infra`.

pub mod domain;
