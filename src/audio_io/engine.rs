//! Background streaming: decoder stdout -> gain -> output device.
//!
//! Each `play` starts a session: a fresh decoder process plus one
//! `audio-stream` thread. The thread is paced by the blocking sink write and
//! publishes every block it writes into the shared [`ChunkSlot`]. Failures on
//! the thread are parked in a single-slot channel owned by the session and
//! picked up by [`StreamingEngine::check_health`].

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::decoder::DecodeProcess;
use super::output::CpalSinkFactory;
use super::{ChunkSlot, GainCell, OutputLease};
use crate::error::{AudioStreamingError, StreamError};
use crate::settings::EngineSettings;
use crate::traits::SinkFactory;
use crate::types::{AudioChunk, AudioSpec, Sample};

pub struct StreamingEngine {
    settings: EngineSettings,
    sinks: Arc<dyn SinkFactory>,
    gain: Arc<GainCell>,
    chunks: Arc<ChunkSlot>,
    lease: OutputLease,
    sequence: Arc<AtomicU64>,
    session: Option<Session>,
}

/// Everything the control side keeps about one running stream.
struct Session {
    url: String,
    decoder: Arc<DecodeProcess>,
    stop: Arc<AtomicBool>,
    errors: Receiver<StreamError>,
    /// Disconnects when the audio thread exits.
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

impl Session {
    fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl StreamingEngine {
    pub fn new(settings: EngineSettings, sinks: Arc<dyn SinkFactory>) -> Self {
        Self {
            settings,
            sinks,
            gain: GainCell::new(1.0),
            chunks: ChunkSlot::new(),
            lease: OutputLease::new(),
            sequence: Arc::new(AtomicU64::new(0)),
            session: None,
        }
    }

    /// Engine writing to a cpal output device.
    pub fn with_cpal(settings: EngineSettings) -> Self {
        let sinks = Arc::new(CpalSinkFactory::new(&settings));
        Self::new(settings, sinks)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Start streaming `url`, replacing any current session.
    ///
    /// Returns once the first block has reached the device, the session has
    /// failed, or `startup_grace` has elapsed (the stream is then still
    /// connecting and later failures surface through `check_health`).
    pub fn play(&mut self, url: &str) -> Result<(), AudioStreamingError> {
        self.stop();
        let fail = |source| AudioStreamingError::new(Some(url.to_string()), source);

        let decoder = Arc::new(
            DecodeProcess::spawn(&self.settings.decoder, url, self.settings.terminate_timeout)
                .map_err(fail)?,
        );

        let (error_tx, errors) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);
        let (done_tx, done) = bounded::<()>(0);
        let stop = Arc::new(AtomicBool::new(false));

        let stream = AudioThread {
            decoder: decoder.clone(),
            sinks: self.sinks.clone(),
            gain: self.gain.clone(),
            chunks: self.chunks.clone(),
            lease: self.lease.clone(),
            sequence: self.sequence.clone(),
            stop: stop.clone(),
            spec: self.settings.spec,
            chunk_bytes: self.settings.chunk_bytes(),
            lease_timeout: self.settings.lease_timeout,
            error_tx,
            ready_tx,
            _done: done_tx,
        };
        let handle = thread::Builder::new()
            .name("audio-stream".into())
            .spawn(move || stream.run())
            .map_err(|e| fail(StreamError::Io(e)))?;

        log::info!("streaming {url}");
        self.session = Some(Session {
            url: url.to_string(),
            decoder,
            stop,
            errors,
            done,
            handle,
        });

        match ready_rx.recv_timeout(self.settings.startup_grace) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => {
                log::info!("no audio from {url} yet, still connecting");
                Ok(())
            }
            Err(RecvTimeoutError::Disconnected) => {
                // thread is gone without writing anything
                let Some(session) = self.session.take() else {
                    return Err(fail(StreamError::NoAudio));
                };
                let reported = session.errors.try_recv().ok();
                let panicked = self.end_session(session);
                let failure = match reported {
                    Some(err) => err,
                    None if panicked => StreamError::Panicked,
                    None => StreamError::NoAudio,
                };
                Err(fail(failure))
            }
        }
    }

    /// Stop the current session, if any. Never fails.
    ///
    /// The decoder is terminated first so a blocked read returns; the audio
    /// thread is then given `join_timeout` to exit and is detached if it
    /// does not.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            self.end_session(session);
        }
    }

    /// Non-blocking poll of the current session.
    ///
    /// `Ok(true)` while streaming, `Ok(false)` once the stream ended cleanly or
    /// when nothing is playing. A failure is returned exactly once and tears
    /// the session down.
    pub fn check_health(&mut self) -> Result<bool, AudioStreamingError> {
        let Some(session) = self.session.as_ref() else {
            return Ok(false);
        };
        // an error is always sent before the thread finishes
        let finished = session.is_finished();
        let failure = session.errors.try_recv().ok();
        let url = session.url.clone();

        if let Some(err) = failure {
            self.stop();
            log::warn!("stream {url} failed: {err}");
            return Err(AudioStreamingError::new(Some(url), err));
        }
        if !finished {
            return Ok(true);
        }

        let panicked = self.session.take().is_some_and(|s| self.end_session(s));
        if panicked {
            return Err(AudioStreamingError::new(Some(url), StreamError::Panicked));
        }
        log::info!("stream {url} ended");
        Ok(false)
    }

    /// Stop and make sure no decoder process is left behind. Idempotent.
    pub fn cleanup(&mut self) {
        self.stop();
        self.chunks.clear();
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
    }

    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_finished())
    }

    pub fn current_url(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.url.as_str())
    }

    /// Pid of the live decoder process, if there is one.
    pub fn decoder_pid(&self) -> Option<u32> {
        self.session
            .as_ref()
            .filter(|s| s.decoder.is_alive())
            .map(|s| s.decoder.pid())
    }

    pub fn latest_chunk(&self) -> Option<Arc<AudioChunk>> {
        self.chunks.latest()
    }

    pub fn chunk_slot(&self) -> Arc<ChunkSlot> {
        self.chunks.clone()
    }

    /// Returns `true` if the audio thread panicked.
    fn end_session(&self, session: Session) -> bool {
        let Session {
            url,
            decoder,
            stop,
            done,
            handle,
            ..
        } = session;

        stop.store(true, Ordering::Release);
        decoder.terminate();

        match done.recv_timeout(self.settings.join_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "audio thread for {url} still running after {:?}; detaching",
                    self.settings.join_timeout
                );
                false
            }
            _ => match handle.join() {
                Ok(()) => {
                    log::debug!("audio thread for {url} joined");
                    false
                }
                Err(_) => {
                    log::error!("audio thread for {url} panicked");
                    true
                }
            },
        }
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// State moved onto the `audio-stream` thread.
struct AudioThread {
    decoder: Arc<DecodeProcess>,
    sinks: Arc<dyn SinkFactory>,
    gain: Arc<GainCell>,
    chunks: Arc<ChunkSlot>,
    lease: OutputLease,
    sequence: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    spec: AudioSpec,
    chunk_bytes: usize,
    lease_timeout: Duration,
    error_tx: Sender<StreamError>,
    ready_tx: Sender<()>,
    _done: Sender<()>,
}

impl AudioThread {
    fn run(self) {
        let Some(lease) = self.lease.acquire(self.lease_timeout) else {
            self.report(StreamError::Device(
                "output is still held by a previous stream".into(),
            ));
            return;
        };

        let result = self.pump();
        // clear while still holding the output so a successor's chunks survive
        self.chunks.clear();
        drop(lease);

        match result {
            Ok(blocks) => log::debug!("audio thread done after {blocks} blocks"),
            Err(err) => self.report(err),
        }
    }

    fn pump(&self) -> Result<u64, StreamError> {
        let mut sink = self.sinks.open(self.spec)?;
        let channels = self.spec.channels.max(1) as usize;
        let mut raw = vec![0u8; self.chunk_bytes];
        let mut blocks = 0u64;

        while !self.stop.load(Ordering::Acquire) {
            let n = self.decoder.read_chunk(&mut raw)?;
            if n == 0 {
                break;
            }
            let samples = pcm_to_f32(&raw[..n], channels, self.gain.get());
            if samples.is_empty() {
                continue;
            }
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            sink.write(&samples)?;

            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
            self.chunks
                .publish(AudioChunk::new(samples, self.spec, sequence));
            blocks += 1;
            if blocks == 1 {
                let _ = self.ready_tx.try_send(());
            }
        }
        Ok(blocks)
    }

    fn report(&self, err: StreamError) {
        if self.stop.load(Ordering::Acquire) {
            log::debug!("audio thread stopped: {err}");
            return;
        }
        log::error!("audio thread failed: {err}");
        let _ = self.error_tx.try_send(err);
    }
}

/// Interleaved s16le to scaled f32, dropping any incomplete trailing frame.
fn pcm_to_f32(raw: &[u8], channels: usize, gain: f32) -> Vec<Sample> {
    let frame_bytes = channels * 2;
    let usable = raw.len() - raw.len() % frame_bytes;
    raw[..usable]
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0 * gain)
        .collect()
}
