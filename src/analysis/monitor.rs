use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, tick};
use std::sync::atomic::{AtomicBool, AtomicI8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio_io::ChunkSlot;
use crate::dsp::spectrum::SpectrumAnalyzer;
use crate::settings::SpectrumSettings;
use crate::traits::Worker;
use crate::types::SpectrumSnapshot;

const STOPPED: i8 = -1;
const PAUSED: i8 = 0;
const RUNNING: i8 = 1;

type Subscribers = Arc<Mutex<Vec<Subscriber>>>;

struct Subscriber {
    tx: Sender<Arc<SpectrumSnapshot>>,
    // lets the monitor evict a stale value nobody has read
    rx: Receiver<Arc<SpectrumSnapshot>>,
    alive: Arc<AtomicBool>,
}

/// Recomputes the spectrum of the newest published chunk on a fixed cadence.
pub struct SpectrumMonitor {
    state: Arc<AtomicI8>,
    snapshot: Arc<ArcSwap<SpectrumSnapshot>>,
    subscribers: Subscribers,
    handle: Option<JoinHandle<()>>,
}

impl Worker for SpectrumMonitor {
    fn stop(&mut self) {
        self.state.store(STOPPED, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("spectrum thread panicked");
            }
        }
    }
    fn pause(&mut self) {
        self.state.store(PAUSED, Ordering::Relaxed);
    }
    fn start(&mut self) {
        if self.handle.is_some() {
            self.state.store(RUNNING, Ordering::Relaxed);
        }
    }
}

impl SpectrumMonitor {
    /// Start analysing `chunks` every `settings.interval`. The monitor starts running.
    pub fn spawn(chunks: Arc<ChunkSlot>, settings: SpectrumSettings) -> std::io::Result<Self> {
        let state = Arc::new(AtomicI8::new(RUNNING));
        let snapshot = Arc::new(ArcSwap::from_pointee(SpectrumSnapshot::silent(settings.bands)));
        let subscribers: Subscribers = Arc::default();

        let handle = {
            let state = state.clone();
            let snapshot = snapshot.clone();
            let subscribers = subscribers.clone();
            thread::Builder::new()
                .name("spectrum".into())
                .spawn(move || run(chunks, settings, state, snapshot, subscribers))?
        };

        Ok(Self {
            state,
            snapshot,
            subscribers,
            handle: Some(handle),
        })
    }

    /// Most recent snapshot. Kept after playback stops.
    pub fn snapshot(&self) -> Arc<SpectrumSnapshot> {
        self.snapshot.load_full()
    }

    /// Feed of fresh snapshots. Holds at most one; an unread value is
    /// replaced by the next.
    pub fn subscribe(&self) -> SpectrumFeed {
        let (tx, rx) = bounded(1);
        let alive = Arc::new(AtomicBool::new(true));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                tx,
                rx: rx.clone(),
                alive: alive.clone(),
            });
        SpectrumFeed { rx, alive }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Relaxed) == RUNNING
    }
}

impl Drop for SpectrumMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    chunks: Arc<ChunkSlot>,
    settings: SpectrumSettings,
    state: Arc<AtomicI8>,
    snapshot: Arc<ArcSwap<SpectrumSnapshot>>,
    subscribers: Subscribers,
) {
    let ticker = tick(settings.interval);
    let mut analyzer = SpectrumAnalyzer::new(settings);
    let mut last_sequence = None;

    while ticker.recv().is_ok() {
        match state.load(Ordering::Relaxed) {
            STOPPED => break,
            PAUSED => continue,
            _ => {}
        }
        let Some(chunk) = chunks.latest() else {
            continue;
        };
        if last_sequence == Some(chunk.sequence) {
            continue;
        }
        last_sequence = Some(chunk.sequence);

        let fresh = Arc::new(analyzer.analyze(&chunk));
        broadcast(&subscribers, fresh.clone());
        snapshot.store(fresh);
    }
    log::debug!("spectrum thread exiting");
}

fn broadcast(subscribers: &Subscribers, snapshot: Arc<SpectrumSnapshot>) {
    let mut subs = subscribers.lock().unwrap_or_else(PoisonError::into_inner);
    subs.retain(|s| s.alive.load(Ordering::Relaxed));
    for sub in subs.iter() {
        if let Err(TrySendError::Full(value)) = sub.tx.try_send(snapshot.clone()) {
            let _ = sub.rx.try_recv();
            let _ = sub.tx.try_send(value);
        }
    }
}

/// Receiving end of [`SpectrumMonitor::subscribe`].
pub struct SpectrumFeed {
    rx: Receiver<Arc<SpectrumSnapshot>>,
    alive: Arc<AtomicBool>,
}

impl SpectrumFeed {
    pub fn try_recv(&self) -> Option<Arc<SpectrumSnapshot>> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<SpectrumSnapshot>> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn receiver(&self) -> &Receiver<Arc<SpectrumSnapshot>> {
        &self.rx
    }
}

impl Drop for SpectrumFeed {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AudioChunk, AudioSpec};
    use std::time::Instant;

    fn settings() -> SpectrumSettings {
        SpectrumSettings::default().with_interval(Duration::from_millis(5))
    }

    fn noise_chunk(sequence: u64) -> AudioChunk {
        let samples = (0..2048).map(|i| ((i * 7919) % 200) as f32 / 100.0 - 1.0).collect();
        AudioChunk::new(samples, AudioSpec::default(), sequence)
    }

    fn wait_for_sequence(monitor: &SpectrumMonitor, sequence: u64) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while monitor.snapshot().sequence != sequence {
            assert!(Instant::now() < deadline, "snapshot never reached {sequence}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn starts_silent_and_tracks_newest_chunk() {
        let slot = ChunkSlot::new();
        let mut monitor = SpectrumMonitor::spawn(slot.clone(), settings()).unwrap();
        assert_eq!(*monitor.snapshot(), SpectrumSnapshot::silent(9));

        slot.publish(noise_chunk(3));
        wait_for_sequence(&monitor, 3);
        assert_eq!(monitor.snapshot().peak(), 1.0);

        // stale snapshot survives the stream going away
        slot.clear();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(monitor.snapshot().sequence, 3);
        monitor.stop();
    }

    #[test]
    fn pause_freezes_snapshot() {
        let slot = ChunkSlot::new();
        let mut monitor = SpectrumMonitor::spawn(slot.clone(), settings()).unwrap();
        slot.publish(noise_chunk(1));
        wait_for_sequence(&monitor, 1);

        monitor.pause();
        assert!(!monitor.is_running());
        thread::sleep(Duration::from_millis(20));
        slot.publish(noise_chunk(2));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(monitor.snapshot().sequence, 1);

        monitor.start();
        wait_for_sequence(&monitor, 2);
        monitor.stop();
        monitor.stop();
    }

    #[test]
    fn subscribers_get_the_newest_snapshot() {
        let slot = ChunkSlot::new();
        let monitor = SpectrumMonitor::spawn(slot.clone(), settings()).unwrap();
        let feed = monitor.subscribe();
        let dropped = monitor.subscribe();
        drop(dropped);

        slot.publish(noise_chunk(1));
        wait_for_sequence(&monitor, 1);
        slot.publish(noise_chunk(2));
        wait_for_sequence(&monitor, 2);

        // the unread first value was replaced
        let got = feed.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(got.sequence, 2);
        assert!(feed.try_recv().is_none());
    }
}
