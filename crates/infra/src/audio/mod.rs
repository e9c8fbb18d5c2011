//! Platform audio support
//!
//! CPAL abstracts the platform device APIs:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

pub mod input;
pub mod monitor;
pub mod output;

pub use input::*;
pub use monitor::*;
pub use output::*;
