//! Jongleur infra: platform device monitors and audio graph builders
//!
//! Adapts OS audio enumeration (via CPAL) to the core's device-monitor
//! interface and assembles the fixed-topology audio input/output graphs
//! with live device swap.

pub mod audio;
