pub mod decoder;
pub mod engine;
pub mod output;

use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::types::AudioChunk;

/// Linear gain shared between the control path and the audio thread.
///
/// Stored as raw `f32` bits so reads and writes are single atomic words.
pub struct GainCell {
    bits: AtomicU32,
}

impl GainCell {
    pub fn new(gain: f32) -> Arc<Self> {
        Arc::new(Self {
            bits: AtomicU32::new(gain.clamp(0.0, 1.0).to_bits()),
        })
    }

    pub fn set(&self, gain: f32) {
        let gain = if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) };
        self.bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Single-slot, overwrite-on-write holder of the newest published chunk.
///
/// Readers never block the writer and never observe a half-written chunk.
#[derive(Default)]
pub struct ChunkSlot {
    latest: ArcSwapOption<AudioChunk>,
}

impl ChunkSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, chunk: AudioChunk) {
        self.latest.store(Some(Arc::new(chunk)));
    }

    pub fn latest(&self) -> Option<Arc<AudioChunk>> {
        self.latest.load_full()
    }

    pub fn clear(&self) {
        self.latest.store(None);
    }
}

/// Exclusive right to write to the output device.
///
/// One token circulates through a bounded channel; a session holds it for
/// as long as it owns a sink, so two audio threads can never write at once.
#[derive(Clone)]
pub struct OutputLease {
    give: Sender<()>,
    take: Receiver<()>,
}

impl OutputLease {
    pub fn new() -> Self {
        let (give, take) = bounded(1);
        let _ = give.send(());
        Self { give, take }
    }

    /// Wait up to `timeout` for the token.
    pub fn acquire(&self, timeout: Duration) -> Option<LeaseGuard> {
        self.take.recv_timeout(timeout).ok().map(|_| LeaseGuard {
            give: self.give.clone(),
        })
    }
}

impl Default for OutputLease {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the token when dropped.
pub struct LeaseGuard {
    give: Sender<()>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let _ = self.give.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioSpec;

    #[test]
    fn gain_is_clamped() {
        let gain = GainCell::new(0.5);
        assert_eq!(gain.get(), 0.5);
        gain.set(1.7);
        assert_eq!(gain.get(), 1.0);
        gain.set(-0.2);
        assert_eq!(gain.get(), 0.0);
        gain.set(f32::NAN);
        assert_eq!(gain.get(), 0.0);
    }

    #[test]
    fn chunk_slot_keeps_only_newest() {
        let slot = ChunkSlot::new();
        assert!(slot.latest().is_none());
        slot.publish(AudioChunk::new(vec![0.1; 4], AudioSpec::default(), 1));
        let first = slot.latest().unwrap();
        slot.publish(AudioChunk::new(vec![0.2; 4], AudioSpec::default(), 2));
        // a reader holding the old snapshot keeps seeing it unchanged
        assert_eq!(first.sequence, 1);
        assert_eq!(first.samples, vec![0.1; 4]);
        assert_eq!(slot.latest().unwrap().sequence, 2);
        slot.clear();
        assert!(slot.latest().is_none());
    }

    #[test]
    fn lease_is_exclusive_until_dropped() {
        let lease = OutputLease::new();
        let guard = lease.acquire(Duration::from_millis(10)).unwrap();
        assert!(lease.acquire(Duration::from_millis(10)).is_none());
        drop(guard);
        assert!(lease.acquire(Duration::from_millis(10)).is_some());
    }
}
