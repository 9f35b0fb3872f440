//! Live audio equalizer with a TCP control plane.
//!
//! Audio flows from a capture device through a linear chain of stages
//! (PCM parser, 10-band equalizer, channel converter, resampler) to a
//! playback device.  One client at a time can connect over TCP to change
//! equalizer gains or nudge mixer levels while audio plays.
//!
//! | Module         | Role                                                  |
//! |----------------|-------------------------------------------------------|
//! | [`pipeline`]   | graph assembly, lifecycle, streaming thread, events   |
//! | [`audio`]      | the elements behind each stage (cpal, biquads, rubato)|
//! | [`control`]    | request decoding and the sequential TCP server        |
//! | [`system`]     | device setup and mixer shell commands                 |
//! | [`config`]     | `settings.toml`                                       |
//! | [`supervisor`] | startup, event loop and shutdown ordering             |

pub mod audio;
pub mod config;
pub mod control;
pub mod pipeline;
pub mod supervisor;
pub mod system;
