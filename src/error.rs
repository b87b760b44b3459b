//! Error types for the streaming engine and the playback controller.
//!
//! Failures on the audio thread are captured as [`StreamError`] and wrapped
//! into an [`AudioStreamingError`] tagged with the URL that was playing. That
//! umbrella is the only error that ever leaves the engine.

use std::io;

/// Low-level failure of one streaming session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The decoder process could not be started.
    #[error("failed to launch decoder `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The decoder exited abnormally while streaming.
    #[error("decoder exited with {status}: {diagnostics}")]
    StreamEnded { status: String, diagnostics: String },

    /// The output device failed or stalled.
    #[error("output device error: {0}")]
    Device(String),

    /// Reading decoder output failed at the OS level.
    #[error("I/O error reading decoder output: {0}")]
    Io(#[from] io::Error),

    /// The decoder finished before producing a single chunk.
    #[error("decoder ended without producing audio")]
    NoAudio,

    #[error("audio thread panicked")]
    Panicked,
}

/// Umbrella error surfaced by `play`, `check_health` and `start_playback`.
#[derive(Debug, thiserror::Error)]
#[error("audio streaming failed for {}: {source}", .url.as_deref().unwrap_or("<no url>"))]
pub struct AudioStreamingError {
    url: Option<String>,
    #[source]
    source: StreamError,
}

impl AudioStreamingError {
    pub fn new(url: Option<String>, source: StreamError) -> Self {
        Self { url, source }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn kind(&self) -> &StreamError {
        &self.source
    }

    pub fn into_inner(self) -> StreamError {
        self.source
    }
}

/// Failure of a controller-level operation.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// Neither the call nor an earlier one supplied a URL.
    #[error("no station selected")]
    NoStation,

    #[error(transparent)]
    Streaming(#[from] AudioStreamingError),
}
