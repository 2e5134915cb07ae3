//! Queue-backed audio track wrappers
//!
//! `OutboundAudioTrack` carries one source speaker's voice to one recipient.
//! The routing loop queues scaled PCM frames; a per-track writer task
//! encodes and ships them on a 20 ms cadence, filling gaps with silence so
//! the encoder state stays continuous. Audio is only queued once the track
//! has been attached to the peer connection (`activate`).
//!
//! `InboundAudioRelay` is the opposite direction: it drains a remote track,
//! decodes Opus to PCM, and buffers a bounded number of frames for the
//! routing loop.
//!
//! Queue policy: outbound drops the oldest frame on overflow, inbound drops
//! the newest. A stalled queue must never stall the caller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use gridvoice_core::constants::audio::{FRAME_DURATION, FRAME_SIZE, QUEUE_FRAMES};

use crate::codec::{OpusDecoder, OpusEncoder};
use crate::engine::opus_codec_capability;
use crate::error::TransportError;

const LOG_EVERY_FRAMES: u64 = 500;

/// Track id prefix used to recover the source player from a transceiver.
const TRACK_ID_PREFIX: &str = "voice-";

/// Server-side track that carries one source player's audio to a client.
pub struct OutboundAudioTrack {
    source_id: u32,
    track: Arc<TrackLocalStaticSample>,
    queue: Mutex<VecDeque<Vec<f32>>>,
    active: AtomicBool,
    frames: AtomicU64,
    dropped: AtomicU64,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl OutboundAudioTrack {
    /// Create the track and start its writer task.
    pub fn spawn(source_id: u32) -> Result<Arc<Self>, TransportError> {
        let encoder = OpusEncoder::new()?;
        let track = Arc::new(TrackLocalStaticSample::new(
            opus_codec_capability(),
            format!("{TRACK_ID_PREFIX}{source_id}"),
            "gridvoice".to_string(),
        ));
        let this = Arc::new(Self {
            source_id,
            track,
            queue: Mutex::new(VecDeque::with_capacity(QUEUE_FRAMES)),
            active: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            writer: Mutex::new(None),
        });
        let handle = tokio::spawn(Self::writer_loop(Arc::downgrade(&this), encoder));
        *this.writer.lock() = Some(handle);
        Ok(this)
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    /// The underlying local track, for `add_track`.
    pub fn local(&self) -> Arc<TrackLocalStaticSample> {
        self.track.clone()
    }

    /// Recover the source player id from a sender's track id.
    pub fn source_id_from_track_id(track_id: &str) -> Option<u32> {
        track_id.strip_prefix(TRACK_ID_PREFIX)?.parse().ok()
    }

    /// Mark the track as attached to the peer connection; audio queued
    /// before activation is discarded.
    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Queue one PCM frame for sending. The caller hands over ownership;
    /// scaled copies are made per recipient upstream, so no frame aliases
    /// another recipient's.
    pub fn queue_frame(&self, pcm: Vec<f32>) {
        if !self.is_active() {
            return;
        }
        {
            let mut queue = self.queue.lock();
            if queue.len() >= QUEUE_FRAMES {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(pcm);
        }
        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if frames % LOG_EVERY_FRAMES == 0 {
            tracing::debug!(
                source_id = self.source_id,
                frames,
                dropped = self.dropped.load(Ordering::Relaxed),
                "outbound track stats"
            );
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the writer task. The track object stays valid for removal from
    /// the peer connection.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(handle) = self.writer.lock().take() {
            handle.abort();
        }
    }

    async fn writer_loop(track: Weak<OutboundAudioTrack>, encoder: OpusEncoder) {
        let mut ticker = tokio::time::interval(FRAME_DURATION);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(track) = track.upgrade() else {
                break;
            };
            if !track.is_active() {
                continue;
            }
            let pcm = track
                .queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| vec![0.0; FRAME_SIZE]);
            let packet = match encoder.encode(&pcm) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::warn!(source_id = track.source_id, error = %e, "opus encode failed");
                    continue;
                }
            };
            let sample = Sample {
                data: packet.into(),
                duration: FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.track.write_sample(&sample).await {
                tracing::debug!(source_id = track.source_id, error = %e, "write_sample failed");
            }
        }
    }
}

impl Drop for OutboundAudioTrack {
    fn drop(&mut self) {
        if let Some(handle) = self.writer.lock().take() {
            handle.abort();
        }
    }
}

/// Receives one client's microphone track and buffers decoded PCM frames
/// for the routing loop.
pub struct InboundAudioRelay {
    player_id: u32,
    queue: Mutex<VecDeque<Vec<f32>>>,
    running: AtomicBool,
    frames: AtomicU64,
    dropped: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl InboundAudioRelay {
    pub fn new(player_id: u32) -> Arc<Self> {
        Arc::new(Self {
            player_id,
            queue: Mutex::new(VecDeque::with_capacity(QUEUE_FRAMES)),
            running: AtomicBool::new(false),
            frames: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            reader: Mutex::new(None),
        })
    }

    /// Start draining a remote track into the frame queue.
    pub fn attach(self: &Arc<Self>, track: Arc<TrackRemote>) {
        self.running.store(true, Ordering::Release);
        let relay = self.clone();
        let handle = tokio::spawn(async move {
            let decoder = match OpusDecoder::new() {
                Ok(decoder) => decoder,
                Err(e) => {
                    tracing::error!(player_id = relay.player_id, error = %e, "opus decoder init failed");
                    return;
                }
            };
            while relay.running.load(Ordering::Acquire) {
                match track.read_rtp().await {
                    Ok((packet, _)) => {
                        if packet.payload.is_empty() {
                            continue;
                        }
                        let pcm = match decoder.decode(&packet.payload) {
                            Ok(pcm) => pcm,
                            // Conceal the loss; give up on the frame if even
                            // PLC fails
                            Err(_) => match decoder.decode_plc() {
                                Ok(pcm) => pcm,
                                Err(_) => continue,
                            },
                        };
                        relay.push_frame(pcm);
                    }
                    Err(e) => {
                        tracing::debug!(player_id = relay.player_id, error = %e, "inbound track ended");
                        break;
                    }
                }
            }
        });
        *self.reader.lock() = Some(handle);
    }

    fn push_frame(&self, pcm: Vec<f32>) {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= QUEUE_FRAMES {
                // Inbound policy: drop the newest
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            queue.push_back(pcm);
        }
        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if frames % LOG_EVERY_FRAMES == 0 {
            tracing::debug!(
                player_id = self.player_id,
                frames,
                dropped = self.dropped.load(Ordering::Relaxed),
                "inbound relay stats"
            );
        }
    }

    /// Take the next buffered frame, if any.
    pub fn pop_frame(&self) -> Option<Vec<f32>> {
        self.queue.lock().pop_front()
    }

    /// Discard everything buffered; returns the number of frames dropped.
    /// Used for muted sources so their queues do not build up.
    pub fn drain(&self) -> usize {
        let mut queue = self.queue.lock();
        let count = queue.len();
        queue.clear();
        count
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the reader task.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for InboundAudioRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outbound_queue_drops_oldest_when_full() {
        let track = OutboundAudioTrack::spawn(1).unwrap();
        track.activate();
        for i in 0..(QUEUE_FRAMES + 3) {
            track.queue_frame(vec![i as f32; FRAME_SIZE]);
        }
        assert_eq!(track.dropped_frames(), 3);
        let queue = track.queue.lock();
        assert_eq!(queue.len(), QUEUE_FRAMES);
        // Oldest remaining frame is the fourth one queued
        assert_eq!(queue.front().unwrap()[0], 3.0);
    }

    #[tokio::test]
    async fn outbound_ignores_frames_until_activated() {
        let track = OutboundAudioTrack::spawn(2).unwrap();
        track.queue_frame(vec![0.5; FRAME_SIZE]);
        assert!(track.queue.lock().is_empty());
        track.activate();
        track.queue_frame(vec![0.5; FRAME_SIZE]);
        assert_eq!(track.queue.lock().len(), 1);
    }

    #[tokio::test]
    async fn track_id_encodes_source() {
        let track = OutboundAudioTrack::spawn(17).unwrap();
        use webrtc::track::track_local::TrackLocal;
        assert_eq!(
            OutboundAudioTrack::source_id_from_track_id(track.local().id()),
            Some(17)
        );
        assert_eq!(OutboundAudioTrack::source_id_from_track_id("mic"), None);
    }

    #[tokio::test]
    async fn inbound_relay_drops_newest_when_full() {
        let relay = InboundAudioRelay::new(1);
        for i in 0..(QUEUE_FRAMES + 2) {
            relay.push_frame(vec![i as f32; FRAME_SIZE]);
        }
        assert_eq!(relay.dropped_frames(), 2);
        // The first queued frame survives; the overflowing ones were dropped
        assert_eq!(relay.pop_frame().unwrap()[0], 0.0);
    }

    #[tokio::test]
    async fn inbound_drain_empties_queue() {
        let relay = InboundAudioRelay::new(1);
        relay.push_frame(vec![0.0; FRAME_SIZE]);
        relay.push_frame(vec![0.0; FRAME_SIZE]);
        assert_eq!(relay.drain(), 2);
        assert!(relay.pop_frame().is_none());
    }
}
