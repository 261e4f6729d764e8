//! # Audio Pipeline
//!
//! The live-session audio path: microphone capture, PCM frame codec, gapless
//! playback scheduling, and the output-device mixer.

pub mod capture;
pub mod codec;
pub mod output;
pub mod playback;
