use crate::audio_io::engine::StreamingEngine;
use crate::error::{AudioStreamingError, PlaybackError};
use crate::settings::PlayerSettings;
use crate::types::ErrorRecord;

/// Play/stop, volume and mute on top of one [`StreamingEngine`].
///
/// `volume` is the level the user asked for and survives muting; the gain
/// pushed to the engine is `volume / 100`, or zero while muted.
pub struct PlaybackController {
    engine: StreamingEngine,
    url: Option<String>,
    playing: bool,
    muted: bool,
    volume: u8,
    pre_mute_volume: u8,
    last_error: Option<ErrorRecord>,
}

impl PlaybackController {
    pub fn new(engine: StreamingEngine, settings: PlayerSettings) -> Self {
        let volume = settings.initial_volume.min(100);
        let controller = Self {
            engine,
            url: None,
            playing: false,
            muted: false,
            volume,
            pre_mute_volume: volume,
            last_error: None,
        };
        controller.apply_gain();
        controller
    }

    /// Play `url`, or the remembered station when `None`.
    pub fn start_playback(&mut self, url: Option<&str>) -> Result<(), PlaybackError> {
        if let Some(url) = url {
            self.url = Some(url.to_string());
        }
        if self.playing {
            self.stop_playback();
        }
        let Some(url) = self.url.clone() else {
            return Err(PlaybackError::NoStation);
        };

        self.apply_gain();
        match self.engine.play(&url) {
            Ok(()) => {
                self.playing = true;
                log::info!("now playing {url}");
                Ok(())
            }
            Err(err) => {
                self.playing = false;
                self.record(&err);
                Err(err.into())
            }
        }
    }

    pub fn stop_playback(&mut self) {
        if !self.playing {
            return;
        }
        self.engine.stop();
        self.playing = false;
        log::info!("playback stopped");
    }

    /// Nudge the volume by `delta`, clamped to 0..=100. Raising the volume
    /// while muted unmutes. Returns the effective volume.
    pub fn change_volume(&mut self, delta: i32) -> u8 {
        let level = (self.volume as i32).saturating_add(delta).clamp(0, 100) as u8;
        let unmuted = self.muted && delta > 0;
        if unmuted {
            self.muted = false;
        }
        let changed = level != self.volume;
        self.volume = level;

        if self.muted {
            self.pre_mute_volume = level;
        } else if changed || unmuted {
            self.apply_gain();
        }
        self.volume()
    }

    /// Set an absolute volume, clamped to 0..=100. Does not change mute.
    pub fn set_volume(&mut self, level: i32) -> u8 {
        self.volume = level.clamp(0, 100) as u8;
        if self.muted {
            self.pre_mute_volume = self.volume;
        } else {
            self.apply_gain();
        }
        self.volume()
    }

    /// Returns the new mute state.
    pub fn toggle_mute(&mut self) -> bool {
        if self.muted {
            self.volume = self.pre_mute_volume;
            self.muted = false;
        } else {
            self.pre_mute_volume = self.volume;
            self.muted = true;
        }
        self.apply_gain();
        self.muted
    }

    /// Poll the engine. A failed or finished stream moves to stopped.
    pub fn check_health(&mut self) -> Result<bool, AudioStreamingError> {
        match self.engine.check_health() {
            Ok(true) => Ok(true),
            Ok(false) => {
                if self.playing {
                    log::info!("stream ended");
                }
                self.playing = false;
                Ok(false)
            }
            Err(err) => {
                self.playing = false;
                self.record(&err);
                Err(err)
            }
        }
    }

    pub fn cleanup(&mut self) {
        self.stop_playback();
        self.engine.cleanup();
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Effective volume: 0 while muted.
    pub fn volume(&self) -> u8 {
        if self.muted { 0 } else { self.volume }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn current_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.last_error.as_ref()
    }

    pub fn engine(&self) -> &StreamingEngine {
        &self.engine
    }

    fn apply_gain(&self) {
        self.engine.set_gain(self.volume() as f32 / 100.0);
    }

    fn record(&mut self, err: &AudioStreamingError) {
        log::warn!("{err}");
        self.last_error = Some(ErrorRecord::from(err));
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_io::engine::fakes::FakeSinks;
    use crate::settings::EngineSettings;

    fn controller() -> PlaybackController {
        let engine = StreamingEngine::new(EngineSettings::default(), FakeSinks::new());
        PlaybackController::new(engine, PlayerSettings::default())
    }

    fn gain(c: &PlaybackController) -> f32 {
        c.engine().gain()
    }

    #[test]
    fn mute_then_volume_up_unmutes() {
        let mut c = controller();
        assert_eq!(c.volume(), 50);
        assert_eq!(gain(&c), 0.5);

        assert!(c.toggle_mute());
        assert_eq!(gain(&c), 0.0);
        assert_eq!(c.volume(), 0);

        assert_eq!(c.change_volume(5), 55);
        assert!(!c.is_muted());
        assert!((gain(&c) - 0.55).abs() < 1e-6);
    }

    #[test]
    fn volume_down_while_muted_stays_muted() {
        let mut c = controller();
        c.toggle_mute();
        assert_eq!(c.change_volume(-10), 0);
        assert!(c.is_muted());
        assert_eq!(gain(&c), 0.0);
        assert!(!c.toggle_mute());
        assert_eq!(c.volume(), 40);
        assert_eq!(gain(&c), 0.4);
    }

    #[test]
    fn volume_is_clamped() {
        let mut c = controller();
        assert_eq!(c.change_volume(500), 100);
        assert_eq!(gain(&c), 1.0);
        assert_eq!(c.change_volume(-1000), 0);
        assert_eq!(gain(&c), 0.0);
        assert_eq!(c.change_volume(i32::MIN), 0);
        assert_eq!(c.set_volume(140), 100);
        assert_eq!(c.set_volume(-3), 0);
    }

    #[test]
    fn double_toggle_restores_volume() {
        for level in [0, 1, 37, 50, 100] {
            let mut c = controller();
            c.set_volume(level);
            c.toggle_mute();
            c.toggle_mute();
            assert!(!c.is_muted());
            assert_eq!(c.volume(), level as u8);
            assert!((gain(&c) - level as f32 / 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn unmute_via_volume_at_ceiling_still_restores_gain() {
        let mut c = controller();
        c.set_volume(100);
        c.toggle_mute();
        assert_eq!(c.change_volume(5), 100);
        assert!(!c.is_muted());
        assert_eq!(gain(&c), 1.0);
    }

    #[test]
    fn no_station_is_an_error() {
        let mut c = controller();
        assert!(matches!(c.start_playback(None), Err(PlaybackError::NoStation)));
        assert!(!c.is_playing());
    }

    #[test]
    fn stop_and_cleanup_when_idle_are_noops() {
        let mut c = controller();
        c.stop_playback();
        c.cleanup();
        c.cleanup();
        assert!(!c.check_health().unwrap());
        assert!(c.last_error().is_none());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::settings::DecoderCommand;
        use crate::types::AudioChunk;
        use std::sync::Arc;
        use std::thread;
        use std::time::{Duration, Instant};

        fn playing_controller(decoder: DecoderCommand, sinks: Arc<FakeSinks>) -> PlaybackController {
            let settings = EngineSettings::default()
                .with_decoder(decoder)
                .with_chunk_frames(1024)
                .with_startup_grace(Duration::from_secs(3));
            PlaybackController::new(StreamingEngine::new(settings, sinks), PlayerSettings::default())
        }

        #[test]
        fn switching_stations_never_overlaps() {
            let sinks = FakeSinks::new();
            let mut c = playing_controller(DecoderCommand::new("yes"), sinks.clone());
            c.start_playback(Some("http://a")).unwrap();
            c.start_playback(Some("http://b")).unwrap();
            assert!(c.is_playing());
            assert_eq!(c.current_url(), Some("http://b"));
            assert_eq!(c.engine().current_url(), Some("http://b"));

            // replays the remembered station
            c.stop_playback();
            c.start_playback(None).unwrap();
            assert_eq!(c.engine().current_url(), Some("http://b"));

            c.cleanup();
            assert_eq!(sinks.opened(), 3);
            assert_eq!(sinks.max_active(), 1);
            assert!(c.engine().decoder_pid().is_none());
        }

        #[test]
        fn muted_start_plays_silence() {
            let mut c = playing_controller(DecoderCommand::new("yes"), FakeSinks::new());
            c.toggle_mute();
            c.start_playback(Some("http://a")).unwrap();
            let chunk = c.engine().latest_chunk().unwrap();
            assert!(chunk.samples.iter().all(|&s| s == 0.0));
        }

        fn wait_for_chunk(
            c: &PlaybackController,
            accept: impl Fn(&AudioChunk) -> bool,
        ) -> Arc<AudioChunk> {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                if let Some(chunk) = c.engine().latest_chunk().filter(|ch| accept(ch)) {
                    return chunk;
                }
                assert!(Instant::now() < deadline, "no matching chunk");
                thread::sleep(Duration::from_millis(10));
            }
        }

        #[test]
        fn mute_while_playing_silences_later_chunks() {
            let sinks = FakeSinks::new();
            let mut c = playing_controller(DecoderCommand::new("yes"), sinks.clone());
            c.start_playback(Some("http://a")).unwrap();
            let loud = wait_for_chunk(&c, |ch| ch.samples[0] > 0.0);

            assert!(c.toggle_mute());
            let silent = wait_for_chunk(&c, |ch| ch.sequence > loud.sequence && ch.samples[0] == 0.0);
            let later = wait_for_chunk(&c, |ch| ch.sequence > silent.sequence);
            assert!(later.samples.iter().all(|&s| s == 0.0));
            assert!(c.is_playing());
            assert_eq!(sinks.opened(), 1);

            assert!(!c.toggle_mute());
            let restored = wait_for_chunk(&c, |ch| ch.sequence > later.sequence && ch.samples[0] > 0.0);
            assert!(restored.samples.iter().all(|&s| s > 0.0));
            c.cleanup();
        }

        #[test]
        fn stream_failure_stops_and_is_recorded() {
            let decoder = DecoderCommand::new("sh")
                .args(["-c", "head -c 65536 /dev/zero; echo 'stream lost' >&2; exit 3"]);
            let mut c = playing_controller(decoder, FakeSinks::new());
            c.start_playback(Some("http://radio.local/x")).unwrap();

            let deadline = Instant::now() + Duration::from_secs(5);
            let err = loop {
                if let Err(e) = c.check_health() {
                    break e;
                }
                assert!(Instant::now() < deadline, "failure never surfaced");
                thread::sleep(Duration::from_millis(10));
            };
            assert!(err.to_string().contains("stream lost"));
            assert!(!c.is_playing());
            let record = c.last_error().unwrap();
            assert_eq!(record.url.as_deref(), Some("http://radio.local/x"));
            assert!(!c.check_health().unwrap());
        }

        #[test]
        fn failed_start_stays_stopped() {
            let mut c = playing_controller(DecoderCommand::new("/nonexistent/decoder"), FakeSinks::new());
            let err = c.start_playback(Some("http://x")).unwrap_err();
            assert!(matches!(err, PlaybackError::Streaming(_)));
            assert!(!c.is_playing());
            assert!(c.last_error().is_some());
        }
    }
}
