//! Cross-crate integration tests for the graph core, the device registry,
//! and the audio graph builders.

#[cfg(test)]
mod audio_swap;
#[cfg(test)]
mod device_registry;
#[cfg(test)]
mod graph_properties;
