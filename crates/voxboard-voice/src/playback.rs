//! Ordered playback of decoded PCM16 chunks.
//!
//! Chunks are played strictly in enqueue order by a single drain worker: it
//! pops one chunk, plays it to completion, then pops the next. Back-pressure
//! is the queue itself; nothing is dropped or reordered when chunks arrive
//! faster than real time. `stop()` is a hard cut used for interruption.

use crate::codec;
use crate::error::{VoiceError, VoiceResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Playback lifecycle signals, one pair per chunk, in drain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The chunk with this sequence number started rendering.
    ChunkStarted(u64),
    /// The chunk with this sequence number finished (or was cut).
    ChunkFinished(u64),
}

/// Output device seam. `play` blocks until the buffer has finished
/// rendering; `halt` cuts the current buffer immediately.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<()>;
    fn halt(&self);
}

/// Production sink backed by a rodio `Sink`. The rodio `OutputStream` is not
/// `Send`, so it is owned by a parked thread for the lifetime of the sink.
pub struct RodioSink {
    sink: Arc<rodio::Sink>,
    shutdown_tx: Mutex<Option<std::sync::mpsc::Sender<()>>>,
}

impl RodioSink {
    pub fn new() -> VoiceResult<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        thread::spawn(move || {
            let (stream, handle) = match rodio::OutputStream::try_default() {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                    return;
                }
            };
            let sink = match rodio::Sink::try_new(&handle) {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(sink));
            // Keep the output stream alive until shutdown.
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        let sink = ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("output thread exited".to_string()))??;
        info!("Audio playback sink ready");
        Ok(Self {
            sink,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        })
    }
}

impl PlaybackSink for RodioSink {
    fn play(&self, samples: &[f32], sample_rate: u32) -> VoiceResult<()> {
        let buffer = rodio::buffer::SamplesBuffer::new(1, sample_rate, samples.to_vec());
        self.sink.append(buffer);
        self.sink.sleep_until_end();
        Ok(())
    }

    fn halt(&self) {
        self.sink.stop();
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        self.halt();
        if let Ok(mut guard) = self.shutdown_tx.lock() {
            guard.take();
        }
    }
}

struct PlayerShared {
    queue: Mutex<VecDeque<(u64, Vec<f32>)>>,
    available: Condvar,
    shutdown: AtomicBool,
    sink: Arc<dyn PlaybackSink>,
    sample_rate: u32,
    next_seq: AtomicU64,
    events_tx: mpsc::UnboundedSender<PlaybackEvent>,
    last_error: Mutex<Option<String>>,
}

/// Decodes base64 PCM16 chunks and plays them back through an ordered queue.
pub struct AudioPlayer {
    shared: Arc<PlayerShared>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PlaybackEvent>>>,
    drain: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AudioPlayer {
    pub fn new(sink: Arc<dyn PlaybackSink>, sample_rate: u32) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PlayerShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            sink,
            sample_rate,
            next_seq: AtomicU64::new(0),
            events_tx,
            last_error: Mutex::new(None),
        });

        let worker = Arc::clone(&shared);
        let drain = thread::spawn(move || drain_loop(worker));

        Self {
            shared,
            events_rx: Mutex::new(Some(events_rx)),
            drain: Mutex::new(Some(drain)),
        }
    }

    /// Decode a base64 PCM16 chunk and append it to the playback queue.
    pub fn enqueue(&self, base64_chunk: &str) -> VoiceResult<()> {
        let samples = codec::decode_base64(base64_chunk)?;
        let seq = self.shared.next_seq.fetch_add(1, Ordering::SeqCst);
        {
            let mut queue = self
                .shared
                .queue
                .lock()
                .map_err(|_| VoiceError::Playback("playback queue poisoned".to_string()))?;
            queue.push_back((seq, samples));
        }
        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of chunks waiting to be played (excludes the one rendering).
    pub fn queued_chunks(&self) -> usize {
        self.shared.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Most recent sink failure reported by the drain worker, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().ok().and_then(|g| g.clone())
    }

    /// Hard cut: halt the current buffer and discard everything queued.
    /// Used for interruption; no fade.
    pub fn stop(&self) {
        if let Ok(mut queue) = self.shared.queue.lock() {
            if !queue.is_empty() {
                debug!("Discarding {} queued playback chunks", queue.len());
            }
            queue.clear();
        }
        self.shared.sink.halt();
    }

    /// Session teardown; equivalent to `stop()`.
    pub fn cleanup(&self) {
        self.stop();
    }

    /// Take the playback event receiver (started/finished signals per chunk).
    /// Returns `None` after the first call.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<PlaybackEvent>> {
        self.events_rx.lock().ok().and_then(|mut g| g.take())
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.stop();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.available.notify_all();
        if let Ok(mut guard) = self.drain.lock() {
            if let Some(join) = guard.take() {
                let _ = join.join();
            }
        }
    }
}

fn drain_loop(shared: Arc<PlayerShared>) {
    loop {
        let item = {
            let mut queue = match shared.queue.lock() {
                Ok(q) => q,
                Err(_) => return,
            };
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(item) = queue.pop_front() {
                    break item;
                }
                queue = match shared.available.wait(queue) {
                    Ok(q) => q,
                    Err(_) => return,
                };
            }
        };

        let (seq, samples) = item;
        let _ = shared.events_tx.send(PlaybackEvent::ChunkStarted(seq));
        if let Err(e) = shared.sink.play(&samples, shared.sample_rate) {
            warn!("Playback failed for chunk {}: {}", seq, e);
            if let Ok(mut guard) = shared.last_error.lock() {
                *guard = Some(e.to_string());
            }
        }
        let _ = shared.events_tx.send(PlaybackEvent::ChunkFinished(seq));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Sink that records play calls and simulates render time.
    struct RecordingSink {
        played: Mutex<Vec<usize>>,
        delay: Duration,
    }

    impl RecordingSink {
        fn new(delay: Duration) -> Self {
            Self {
                played: Mutex::new(Vec::new()),
                delay,
            }
        }
    }

    impl PlaybackSink for RecordingSink {
        fn play(&self, samples: &[f32], _sample_rate: u32) -> VoiceResult<()> {
            self.played.lock().unwrap().push(samples.len());
            thread::sleep(self.delay);
            Ok(())
        }

        fn halt(&self) {}
    }

    fn chunk_of(len: usize, value: f32) -> String {
        codec::encode_base64(&vec![value; len])
    }

    #[tokio::test]
    async fn chunks_play_in_enqueue_order_without_overlap() {
        let sink = Arc::new(RecordingSink::new(Duration::from_millis(5)));
        let player = AudioPlayer::new(sink.clone(), 24_000);
        let mut events = player.take_event_receiver().unwrap();

        for len in [10usize, 20, 30, 40] {
            player.enqueue(&chunk_of(len, 0.1)).unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 8 {
            let ev = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("playback stalled")
                .expect("event channel closed");
            seen.push(ev);
        }

        // Strict alternation: started(n), finished(n), started(n+1), ...
        for (i, pair) in seen.chunks(2).enumerate() {
            assert_eq!(pair[0], PlaybackEvent::ChunkStarted(i as u64));
            assert_eq!(pair[1], PlaybackEvent::ChunkFinished(i as u64));
        }

        let played = sink.played.lock().unwrap().clone();
        assert_eq!(played, vec![10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn stop_discards_queued_chunks() {
        // Long render time so queued chunks are still pending when we stop.
        let sink = Arc::new(RecordingSink::new(Duration::from_millis(200)));
        let player = AudioPlayer::new(sink.clone(), 24_000);

        player.enqueue(&chunk_of(8, 0.1)).unwrap();
        player.enqueue(&chunk_of(8, 0.2)).unwrap();
        player.enqueue(&chunk_of(8, 0.3)).unwrap();
        thread::sleep(Duration::from_millis(50));

        player.stop();
        assert_eq!(player.queued_chunks(), 0);

        // Only the chunk that was already rendering reached the sink.
        thread::sleep(Duration::from_millis(250));
        assert_eq!(sink.played.lock().unwrap().len(), 1);
    }

    struct FailingSink;

    impl PlaybackSink for FailingSink {
        fn play(&self, _samples: &[f32], _sample_rate: u32) -> VoiceResult<()> {
            Err(VoiceError::Playback("output device gone".to_string()))
        }

        fn halt(&self) {}
    }

    #[test]
    fn sink_failure_is_recorded_as_last_error() {
        let player = AudioPlayer::new(Arc::new(FailingSink), 24_000);
        assert!(player.last_error().is_none());

        player.enqueue(&chunk_of(8, 0.1)).unwrap();
        for _ in 0..50 {
            if player.last_error().is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        let err = player.last_error().expect("drain worker never reported");
        assert!(err.contains("output device gone"));
    }

    #[test]
    fn enqueue_rejects_invalid_base64() {
        let sink = Arc::new(RecordingSink::new(Duration::ZERO));
        let player = AudioPlayer::new(sink, 24_000);
        let err = player.enqueue("not base64!!!").unwrap_err();
        assert!(matches!(err, VoiceError::Codec(_)));
    }

    #[test]
    fn event_receiver_can_only_be_taken_once() {
        let sink = Arc::new(RecordingSink::new(Duration::ZERO));
        let player = AudioPlayer::new(sink, 24_000);
        assert!(player.take_event_receiver().is_some());
        assert!(player.take_event_receiver().is_none());
    }
}
