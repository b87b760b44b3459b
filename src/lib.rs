//! Internet-radio playback core.
//!
//! A URL is decoded to PCM by an external decoder process, streamed to the
//! output device on a dedicated thread, and sampled by a spectrum monitor
//! for display. [`PlaybackController`] is the entry point for control.

pub mod analysis;
pub mod audio_io;
pub mod console;
pub mod dsp;
pub mod error;
pub mod player;
pub mod settings;
pub mod traits;
pub mod types;

pub use analysis::{SpectrumFeed, SpectrumMonitor};
pub use audio_io::decoder::DecodeProcess;
pub use audio_io::engine::StreamingEngine;
pub use audio_io::output::{CpalSinkFactory, output_device_names};
pub use dsp::spectrum::SpectrumAnalyzer;
pub use error::{AudioStreamingError, PlaybackError, StreamError};
pub use player::PlaybackController;
pub use settings::{DecoderCommand, EngineSettings, PlayerSettings, SpectrumSettings};
pub use traits::{AudioSink, SinkFactory, Worker};
pub use types::{AudioChunk, AudioSpec, ErrorRecord, SpectrumSnapshot};
