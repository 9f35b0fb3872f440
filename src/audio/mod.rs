//! Audio elements behind the pipeline stages.
//!
//! # Chain
//!
//! ```text
//! cpal input → CaptureElement (s16le bytes) → PcmParser → EqualizerElement
//!           → ChannelConverter → RateConverter → PlaybackElement → cpal output
//! ```
//!
//! The cpal streams are not `Send`, so capture and playback each keep theirs
//! on a [`StreamThread`] and exchange data with the streaming thread over a
//! channel (capture) or a lock-free `rtrb` queue (playback).

pub mod capture;
pub mod filter;
pub mod pcm;
pub mod playback;
pub mod resample;
pub mod stream;

pub use capture::CaptureElement;
pub use filter::{Biquad, EqualizerElement};
pub use pcm::{decode_pcm, PcmFormat, PcmParser};
pub use playback::PlaybackElement;
pub use resample::{remix_channels, ChannelConverter, RateConverter};
pub use stream::StreamThread;
