//! Per-speaker playback engine
//!
//! Each remote speaker gets its own `PlayerAudioStream`: a float ring
//! buffer fed from the WebRTC track and a worker thread that writes 20 ms
//! frames to the audio sink on an absolute schedule, so timing never
//! drifts no matter how individual sleeps land. Proximity volume is applied
//! at playback time through a live callback, keeping attenuation
//! responsive to movement even while audio sits buffered.
//!
//! The OS sink is behind [`AudioSink`]; a front-end supplies the factory
//! (PulseAudio, cpal, ...). The default [`NullSinkFactory`] discards
//! samples, which keeps bots and tests silent but timing-accurate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use gridvoice_core::constants::audio::{FRAME_DURATION, FRAME_SIZE};
use gridvoice_core::spatial;
use gridvoice_protocol::PlayerSnapshot;

/// Samples buffered before playback starts (20 ms).
pub const MIN_BUFFER: usize = FRAME_SIZE;
/// Maximum buffered samples (100 ms); overflow discards the oldest.
pub const MAX_BUFFER: usize = FRAME_SIZE * 5;
/// Falling this far behind the schedule resets the clock.
const RECOVER_BEHIND: Duration = Duration::from_millis(100);

const LOG_EVERY_FRAMES: u64 = 500;

/// A blocking PCM sink; one per speaker stream.
pub trait AudioSink: Send {
    /// Write one 20 ms mono frame at 48 kHz. Blocking is fine; each stream
    /// owns a thread.
    fn write(&mut self, frame: &[f32]);
}

/// Creates sinks; supplied by the front-end.
pub trait AudioSinkFactory: Send + Sync {
    fn create(&self, stream_name: &str) -> Box<dyn AudioSink>;
}

/// Discards all audio. Default for headless clients and tests.
pub struct NullSinkFactory;

struct NullSink;

impl AudioSink for NullSink {
    fn write(&mut self, _frame: &[f32]) {}
}

impl AudioSinkFactory for NullSinkFactory {
    fn create(&self, _stream_name: &str) -> Box<dyn AudioSink> {
        Box::new(NullSink)
    }
}

/// Fixed-capacity float ring buffer with drop-oldest overflow.
struct RingBuffer {
    data: Vec<f32>,
    read: usize,
    write: usize,
    /// Latched once MIN_BUFFER is reached; an empty buffer afterwards
    /// plays silence without re-arming (re-arming caused audible gaps)
    started: bool,
}

impl RingBuffer {
    fn new() -> Self {
        Self {
            // One slot is sacrificed to distinguish full from empty
            data: vec![0.0; MAX_BUFFER + 1],
            read: 0,
            write: 0,
            started: false,
        }
    }

    fn occupied(&self) -> usize {
        (self.write + self.data.len() - self.read) % self.data.len()
    }

    /// Write samples, discarding the oldest buffered audio on overflow.
    /// Returns true when an overflow happened.
    fn push(&mut self, samples: &[f32]) -> bool {
        let capacity = self.data.len() - 1;
        let mut overflow = false;
        let available = capacity - self.occupied();
        if samples.len() > available {
            let discard = samples.len() - available;
            self.read = (self.read + discard) % self.data.len();
            overflow = true;
        }
        for &sample in samples {
            self.data[self.write] = sample;
            self.write = (self.write + 1) % self.data.len();
        }
        overflow
    }

    /// Take one frame; `None` means silence should be played (buffering or
    /// underrun).
    fn pop_frame(&mut self) -> Option<Vec<f32>> {
        let occupied = self.occupied();
        if !self.started {
            if occupied < MIN_BUFFER {
                return None;
            }
            self.started = true;
        }
        if occupied < FRAME_SIZE {
            return None;
        }
        let mut frame = Vec::with_capacity(FRAME_SIZE);
        for _ in 0..FRAME_SIZE {
            frame.push(self.data[self.read]);
            self.read = (self.read + 1) % self.data.len();
        }
        Some(frame)
    }

    fn is_started(&self) -> bool {
        self.started
    }
}

struct StreamShared {
    player_id: u32,
    buffer: Mutex<RingBuffer>,
    running: AtomicBool,
    frames: AtomicU64,
    underruns: AtomicU64,
    overflows: AtomicU64,
}

/// Audio output stream for a single speaker.
pub struct PlayerAudioStream {
    shared: Arc<StreamShared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PlayerAudioStream {
    /// Start the stream: the worker thread owns the sink and applies
    /// `volume()` to every frame at playback time.
    pub fn start(
        player_id: u32,
        stream_name: &str,
        sink_factory: &dyn AudioSinkFactory,
        volume: Box<dyn Fn() -> f32 + Send>,
    ) -> Self {
        let shared = Arc::new(StreamShared {
            player_id,
            buffer: Mutex::new(RingBuffer::new()),
            running: AtomicBool::new(true),
            frames: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
        });
        let sink = sink_factory.create(stream_name);
        let worker = {
            let shared = shared.clone();
            thread::spawn(move || playback_loop(shared, sink, volume))
        };
        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Feed decoded PCM (thread-safe). Volume is applied later, at
    /// playback time.
    pub fn feed(&self, samples: &[f32]) {
        let overflow = self.shared.buffer.lock().push(samples);
        if overflow {
            let overflows = self.shared.overflows.fetch_add(1, Ordering::Relaxed) + 1;
            if overflows % 50 == 1 {
                tracing::debug!(
                    player_id = self.shared.player_id,
                    overflows,
                    "playback buffer overflow"
                );
            }
        }
    }

    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    pub fn overflows(&self) -> u64 {
        self.shared.overflows.load(Ordering::Relaxed)
    }
}

impl Drop for PlayerAudioStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn playback_loop(
    shared: Arc<StreamShared>,
    mut sink: Box<dyn AudioSink>,
    volume: Box<dyn Fn() -> f32 + Send>,
) {
    let mut next_frame_time = Instant::now();
    let silence = vec![0.0f32; FRAME_SIZE];

    while shared.running.load(Ordering::Acquire) {
        let (mut frame, started) = {
            let mut buffer = shared.buffer.lock();
            (buffer.pop_frame(), buffer.is_started())
        };
        if frame.is_none() && started {
            shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
        let frame = match frame.as_mut() {
            Some(frame) => {
                let volume = volume();
                if volume != 1.0 {
                    for sample in frame.iter_mut() {
                        *sample *= volume;
                    }
                }
                frame.as_slice()
            }
            None => silence.as_slice(),
        };
        sink.write(frame);

        let frames = shared.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if frames % LOG_EVERY_FRAMES == 1 {
            tracing::debug!(
                player_id = shared.player_id,
                frames,
                underruns = shared.underruns.load(Ordering::Relaxed),
                overflows = shared.overflows.load(Ordering::Relaxed),
                "playback stats"
            );
        }

        // Absolute schedule: sleep to the target instant, never "20 ms
        // from now", so per-iteration oversleep cannot accumulate
        next_frame_time += FRAME_DURATION;
        let now = Instant::now();
        match next_frame_time.checked_duration_since(now) {
            Some(wait) => thread::sleep(wait),
            None => {
                if now.duration_since(next_frame_time) > RECOVER_BEHIND {
                    next_frame_time = now;
                }
            }
        }
    }
}

/// Positions the volume callbacks read; updated from every `WORLD_STATE`.
#[derive(Default)]
pub struct ProximityView {
    pub my_position: (u16, u16),
    /// Same-level speakers only
    pub positions: HashMap<u32, (u16, u16)>,
    /// Every known player, for lazy stream creation
    pub names: HashMap<u32, String>,
}

/// Manages one `PlayerAudioStream` per audible speaker; the OS mixer sums
/// them.
pub struct AudioPlayback {
    streams: Mutex<HashMap<u32, PlayerAudioStream>>,
    view: Arc<RwLock<ProximityView>>,
    sink_factory: Arc<dyn AudioSinkFactory>,
}

impl AudioPlayback {
    pub fn new(sink_factory: Arc<dyn AudioSinkFactory>) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            view: Arc::new(RwLock::new(ProximityView::default())),
            sink_factory,
        }
    }

    /// Apply a `WORLD_STATE`: refresh positions and tear down streams for
    /// speakers now beyond audio range (or on another level).
    pub fn update_positions(
        &self,
        my_id: u32,
        my_position: (u16, u16),
        my_level: &str,
        players: &[PlayerSnapshot],
    ) {
        {
            let mut view = self.view.write();
            view.my_position = my_position;
            view.positions = players
                .iter()
                .filter(|p| p.player_id != my_id && p.level == my_level)
                .map(|p| (p.player_id, (p.x, p.y)))
                .collect();
            view.names = players
                .iter()
                .map(|p| (p.player_id, p.name.clone()))
                .collect();
        }

        let out_of_range: Vec<u32> = {
            let view = self.view.read();
            self.streams
                .lock()
                .keys()
                .filter(|id| match view.positions.get(id) {
                    Some(&(x, y)) => !spatial::in_range(
                        x as i32 - my_position.0 as i32,
                        y as i32 - my_position.1 as i32,
                    ),
                    // Other level (or gone): nothing audible from there
                    None => true,
                })
                .copied()
                .collect()
        };
        for id in out_of_range {
            if let Some(mut stream) = self.streams.lock().remove(&id) {
                stream.stop();
                tracing::debug!(player_id = id, "stopped out-of-range stream");
            }
        }
    }

    /// Route one decoded frame from a speaker into its stream. Frames for
    /// unknown speakers (no `WORLD_STATE` seen yet) are discarded; streams
    /// are created lazily for known, in-range speakers.
    pub fn feed(&self, source_id: u32, samples: &[f32]) {
        if let Some(stream) = self.streams.lock().get(&source_id) {
            stream.feed(samples);
            return;
        }

        // Lock discipline: decide eligibility from the view without holding
        // the streams lock (update_positions takes them in view -> streams
        // order).
        let stream_name = {
            let view = self.view.read();
            let Some(name) = view.names.get(&source_id) else {
                // Speaker not yet announced; drop the frame
                return;
            };
            if let Some(&(x, y)) = view.positions.get(&source_id) {
                let in_range = spatial::in_range(
                    x as i32 - view.my_position.0 as i32,
                    y as i32 - view.my_position.1 as i32,
                );
                if !in_range {
                    return;
                }
            }
            format!("player:{name}")
        };

        let view = self.view.clone();
        let volume = Box::new(move || {
            let view = view.read();
            match view.positions.get(&source_id) {
                Some(&(x, y)) => spatial::volume(
                    x as i32 - view.my_position.0 as i32,
                    y as i32 - view.my_position.1 as i32,
                ),
                // Position unknown (first frames before a WORLD_STATE
                // refresh): play at full volume rather than hard-muting
                None => 1.0,
            }
        });
        let stream =
            PlayerAudioStream::start(source_id, &stream_name, &*self.sink_factory, volume);
        let mut streams = self.streams.lock();
        // A concurrent feed may have won the race; keep the existing stream
        let stream = streams.entry(source_id).or_insert(stream);
        stream.feed(samples);
        tracing::debug!(player_id = source_id, "created playback stream");
    }

    pub fn remove_player(&self, player_id: u32) {
        if let Some(mut stream) = self.streams.lock().remove(&player_id) {
            stream.stop();
        }
        let mut view = self.view.write();
        view.positions.remove(&player_id);
        view.names.remove(&player_id);
    }

    pub fn stop_all(&self) {
        let mut streams = self.streams.lock();
        for (_, mut stream) in streams.drain() {
            stream.stop();
        }
    }

    pub fn active_streams(&self) -> usize {
        self.streams.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: u32, name: &str, level: &str, x: u16, y: u16) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: id,
            x,
            y,
            is_muted: false,
            name: name.into(),
            level: level.into(),
        }
    }

    #[test]
    fn ring_buffer_waits_for_min_buffer() {
        let mut buffer = RingBuffer::new();
        buffer.push(&vec![0.1; MIN_BUFFER - 1]);
        assert!(buffer.pop_frame().is_none());
        assert!(!buffer.is_started());

        buffer.push(&[0.1; 1]);
        assert!(buffer.pop_frame().is_some());
        assert!(buffer.is_started());
    }

    #[test]
    fn ring_buffer_does_not_rearm_after_underrun() {
        let mut buffer = RingBuffer::new();
        buffer.push(&vec![0.1; MIN_BUFFER]);
        assert!(buffer.pop_frame().is_some());
        // Empty now, but still started: silence, not a re-buffer
        assert!(buffer.pop_frame().is_none());
        assert!(buffer.is_started());
        // A single new frame plays immediately, no MIN_BUFFER wait
        buffer.push(&vec![0.2; FRAME_SIZE]);
        assert!(buffer.pop_frame().is_some());
    }

    #[test]
    fn ring_buffer_overflow_discards_oldest() {
        let mut buffer = RingBuffer::new();
        let mut overflowed = false;
        for i in 0..7 {
            let frame = vec![i as f32; FRAME_SIZE];
            overflowed |= buffer.push(&frame);
        }
        assert!(overflowed);
        assert_eq!(buffer.occupied(), MAX_BUFFER);
        // The oldest surviving sample is from frame 2 (frames 0 and 1 fell out)
        let frame = buffer.pop_frame().unwrap();
        assert_eq!(frame[0], 2.0);
    }

    #[test]
    fn ring_buffer_preserves_sample_order_across_wrap() {
        let mut buffer = RingBuffer::new();
        // Drive the positions around the ring a few times
        for round in 0..20 {
            buffer.push(&vec![round as f32; FRAME_SIZE]);
            let frame = buffer.pop_frame();
            if let Some(frame) = frame {
                assert!(frame.iter().all(|&s| s == frame[0]));
            }
        }
    }

    #[test]
    fn playback_timing_stays_on_schedule() {
        let stream = PlayerAudioStream::start(1, "test", &NullSinkFactory, Box::new(|| 1.0));
        let start = Instant::now();
        let target_frames = 10u64;
        while stream.shared.frames.load(Ordering::Relaxed) < target_frames {
            thread::sleep(Duration::from_millis(2));
        }
        let elapsed = start.elapsed();
        let expected = FRAME_DURATION * target_frames as u32;
        // Absolute scheduling keeps total drift under one frame
        assert!(
            elapsed < expected + FRAME_DURATION * 2,
            "took {elapsed:?} for {target_frames} frames"
        );
        drop(stream);
    }

    struct CountingSink(Arc<AtomicU64>);
    impl AudioSink for CountingSink {
        fn write(&mut self, _frame: &[f32]) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }
    struct CountingFactory(Arc<AtomicU64>);
    impl AudioSinkFactory for CountingFactory {
        fn create(&self, _name: &str) -> Box<dyn AudioSink> {
            Box::new(CountingSink(self.0.clone()))
        }
    }

    #[test]
    fn frames_for_unknown_speakers_are_discarded() {
        let playback = AudioPlayback::new(Arc::new(NullSinkFactory));
        playback.feed(7, &[0.0; FRAME_SIZE]);
        assert_eq!(playback.active_streams(), 0);
    }

    #[test]
    fn stream_created_lazily_for_known_speaker() {
        let created = Arc::new(AtomicU64::new(0));
        let playback = AudioPlayback::new(Arc::new(CountingFactory(created.clone())));
        playback.update_positions(
            1,
            (5, 5),
            "main",
            &[
                snapshot(1, "me", "main", 5, 5),
                snapshot(2, "bob", "main", 6, 5),
            ],
        );
        playback.feed(2, &[0.0; FRAME_SIZE]);
        assert_eq!(playback.active_streams(), 1);
    }

    #[test]
    fn out_of_range_speaker_gets_no_stream() {
        let playback = AudioPlayback::new(Arc::new(NullSinkFactory));
        playback.update_positions(
            1,
            (5, 5),
            "main",
            &[
                snapshot(1, "me", "main", 5, 5),
                snapshot(2, "bob", "main", 40, 40),
            ],
        );
        playback.feed(2, &[0.0; FRAME_SIZE]);
        assert_eq!(playback.active_streams(), 0);
    }

    #[test]
    fn stream_torn_down_when_speaker_walks_away() {
        let playback = AudioPlayback::new(Arc::new(NullSinkFactory));
        let me = snapshot(1, "me", "main", 5, 5);
        playback.update_positions(
            1,
            (5, 5),
            "main",
            &[me.clone(), snapshot(2, "bob", "main", 6, 5)],
        );
        playback.feed(2, &[0.0; FRAME_SIZE]);
        assert_eq!(playback.active_streams(), 1);

        playback.update_positions(
            1,
            (5, 5),
            "main",
            &[me.clone(), snapshot(2, "bob", "main", 40, 40)],
        );
        assert_eq!(playback.active_streams(), 0);

        // Level change tears down too
        playback.update_positions(
            1,
            (5, 5),
            "main",
            &[me.clone(), snapshot(2, "bob", "main", 6, 5)],
        );
        playback.feed(2, &[0.0; FRAME_SIZE]);
        assert_eq!(playback.active_streams(), 1);
        playback.update_positions(
            1,
            (5, 5),
            "main",
            &[me, snapshot(2, "bob", "dungeon", 6, 5)],
        );
        assert_eq!(playback.active_streams(), 0);
    }

    #[test]
    fn remove_player_stops_stream_and_forgets_name() {
        let playback = AudioPlayback::new(Arc::new(NullSinkFactory));
        playback.update_positions(
            1,
            (5, 5),
            "main",
            &[snapshot(2, "bob", "main", 6, 5)],
        );
        playback.feed(2, &[0.0; FRAME_SIZE]);
        playback.remove_player(2);
        assert_eq!(playback.active_streams(), 0);
        // Later frames from the departed speaker are discarded
        playback.feed(2, &[0.0; FRAME_SIZE]);
        assert_eq!(playback.active_streams(), 0);
    }
}
