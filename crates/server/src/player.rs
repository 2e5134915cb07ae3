//! Per-connection player state
//!
//! A `Player` is created after a successful authentication and lives until
//! its peer connection closes. Transport handles are filled in as the
//! session advances through signalling; the routing loop and renegotiation
//! engine only touch players whose `webrtc_connected` flag is set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

use gridvoice_protocol::{Message, PlayerSnapshot};
use gridvoice_transport::{InboundAudioRelay, OutboundAudioTrack};

/// Where a player stands in the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub level: String,
    pub x: u16,
    pub y: u16,
}

/// One outbound track on this player's connection, keyed by source player.
pub struct OutboundEntry {
    pub track: Arc<OutboundAudioTrack>,
    /// Set once the track has been attached to the peer connection
    pub sender: Option<Arc<RTCRtpSender>>,
}

struct Liveness {
    last_pong: Instant,
    ping_sent: Option<Instant>,
    ping_ms: Option<u32>,
}

pub struct Player {
    pub id: u32,
    pub name: String,
    pub public_key: [u8; 32],
    position: RwLock<Position>,
    muted: AtomicBool,
    outbox: mpsc::UnboundedSender<Message>,
    liveness: Mutex<Liveness>,
    webrtc_connected: AtomicBool,
    needs_renegotiation: AtomicBool,
    closed: AtomicBool,
    peer_connection: RwLock<Option<Arc<RTCPeerConnection>>>,
    data_channel: RwLock<Option<Arc<RTCDataChannel>>>,
    dc_open: AtomicBool,
    relay: RwLock<Option<Arc<InboundAudioRelay>>>,
    outbound: Mutex<HashMap<u32, OutboundEntry>>,
}

impl Player {
    pub fn new(
        id: u32,
        name: String,
        public_key: [u8; 32],
        position: Position,
        outbox: mpsc::UnboundedSender<Message>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            public_key,
            position: RwLock::new(position),
            muted: AtomicBool::new(false),
            outbox,
            liveness: Mutex::new(Liveness {
                last_pong: Instant::now(),
                ping_sent: None,
                ping_ms: None,
            }),
            webrtc_connected: AtomicBool::new(false),
            needs_renegotiation: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            peer_connection: RwLock::new(None),
            data_channel: RwLock::new(None),
            dc_open: AtomicBool::new(false),
            relay: RwLock::new(None),
            outbound: Mutex::new(HashMap::new()),
        })
    }

    // --- position / presence ---

    pub fn position(&self) -> Position {
        self.position.read().clone()
    }

    pub fn set_position(&self, x: u16, y: u16) {
        let mut pos = self.position.write();
        pos.x = x;
        pos.y = y;
    }

    pub fn set_level(&self, level: String, x: u16, y: u16) {
        *self.position.write() = Position { level, x, y };
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let pos = self.position();
        PlayerSnapshot {
            player_id: self.id,
            x: pos.x,
            y: pos.y,
            is_muted: self.is_muted(),
            name: self.name.clone(),
            level: pos.level,
        }
    }

    // --- messaging ---

    /// Queue a message for this player's writer task. Sends to a closing
    /// session are silently dropped.
    pub fn send(&self, message: Message) {
        let _ = self.outbox.send(message);
    }

    // --- liveness ---

    pub fn record_pong(&self) {
        let mut liveness = self.liveness.lock();
        liveness.last_pong = Instant::now();
        if let Some(sent) = liveness.ping_sent.take() {
            let rtt = sent.elapsed().as_millis() as u32;
            liveness.ping_ms = Some(rtt);
            tracing::trace!(player_id = self.id, rtt_ms = rtt, "pong");
        }
    }

    pub fn record_ping_sent(&self) {
        self.liveness.lock().ping_sent = Some(Instant::now());
    }

    pub fn pong_age(&self) -> std::time::Duration {
        self.liveness.lock().last_pong.elapsed()
    }

    pub fn ping_ms(&self) -> Option<u32> {
        self.liveness.lock().ping_ms
    }

    // --- flags ---

    pub fn is_webrtc_connected(&self) -> bool {
        self.webrtc_connected.load(Ordering::Acquire)
    }

    pub fn set_webrtc_connected(&self, connected: bool) {
        self.webrtc_connected.store(connected, Ordering::Release);
    }

    pub fn mark_needs_renegotiation(&self) {
        self.needs_renegotiation.store(true, Ordering::Release);
    }

    /// Consume the renegotiation flag; true at most once per set.
    pub fn take_needs_renegotiation(&self) -> bool {
        self.needs_renegotiation.swap(false, Ordering::AcqRel)
    }

    /// First caller wins; later calls see true and skip cleanup.
    pub fn mark_closed(&self) -> bool {
        self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // --- transport handles ---

    pub fn set_peer_connection(&self, pc: Arc<RTCPeerConnection>) {
        *self.peer_connection.write() = Some(pc);
    }

    pub fn peer_connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.peer_connection.read().clone()
    }

    pub fn set_data_channel(&self, dc: Arc<RTCDataChannel>) {
        *self.data_channel.write() = Some(dc);
    }

    pub fn data_channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.data_channel.read().clone()
    }

    pub fn set_dc_open(&self, open: bool) {
        self.dc_open.store(open, Ordering::Release);
    }

    pub fn is_dc_open(&self) -> bool {
        self.dc_open.load(Ordering::Acquire)
    }

    pub fn set_relay(&self, relay: Arc<InboundAudioRelay>) {
        *self.relay.write() = Some(relay);
    }

    pub fn relay(&self) -> Option<Arc<InboundAudioRelay>> {
        self.relay.read().clone()
    }

    // --- outbound tracks (written by the routing loop, read here and by
    //     the renegotiation engine) ---

    /// The outbound track carrying `source_id`'s audio, if present.
    pub fn outbound_track(&self, source_id: u32) -> Option<Arc<OutboundAudioTrack>> {
        self.outbound.lock().get(&source_id).map(|e| e.track.clone())
    }

    /// Insert a track for a source if none exists yet. Returns true when a
    /// new entry was created.
    pub fn ensure_outbound_track(&self, track: Arc<OutboundAudioTrack>) -> bool {
        let mut outbound = self.outbound.lock();
        match outbound.entry(track.source_id()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(OutboundEntry {
                    track,
                    sender: None,
                });
                true
            }
        }
    }

    /// Tracks not yet attached to the peer connection.
    pub fn unattached_tracks(&self) -> Vec<Arc<OutboundAudioTrack>> {
        self.outbound
            .lock()
            .values()
            .filter(|e| e.sender.is_none())
            .map(|e| e.track.clone())
            .collect()
    }

    pub fn set_track_sender(&self, source_id: u32, sender: Arc<RTCRtpSender>) {
        if let Some(entry) = self.outbound.lock().get_mut(&source_id) {
            entry.sender = Some(sender);
        }
    }

    /// Source ids with a live outbound track.
    pub fn outbound_sources(&self) -> Vec<u32> {
        self.outbound.lock().keys().copied().collect()
    }

    /// Remove the track for a source, returning its entry for detachment.
    pub fn remove_outbound_track(&self, source_id: u32) -> Option<OutboundEntry> {
        self.outbound.lock().remove(&source_id)
    }

    /// Drain all outbound entries on teardown.
    pub fn take_outbound_tracks(&self) -> Vec<OutboundEntry> {
        self.outbound.lock().drain().map(|(_, e)| e).collect()
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pos = self.position();
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("level", &pos.level)
            .field("x", &pos.x)
            .field("y", &pos.y)
            .field("muted", &self.is_muted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_player(id: u32, name: &str, level: &str, x: u16, y: u16) -> Arc<Player> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Player::new(
            id,
            name.to_string(),
            [id as u8; 32],
            Position {
                level: level.to_string(),
                x,
                y,
            },
            tx,
        )
    }

    #[test]
    fn renegotiation_flag_is_consumed_once() {
        let player = test_player(1, "alice", "main", 5, 5);
        assert!(!player.take_needs_renegotiation());
        player.mark_needs_renegotiation();
        assert!(player.take_needs_renegotiation());
        assert!(!player.take_needs_renegotiation());
    }

    #[test]
    fn close_is_idempotent() {
        let player = test_player(1, "alice", "main", 5, 5);
        assert!(!player.mark_closed());
        assert!(player.mark_closed());
        assert!(player.is_closed());
    }

    #[tokio::test]
    async fn outbound_track_management() {
        let player = test_player(1, "alice", "main", 5, 5);
        let track = OutboundAudioTrack::spawn(2).unwrap();
        assert!(player.ensure_outbound_track(track.clone()));
        assert!(!player.ensure_outbound_track(track));
        assert_eq!(player.outbound_sources(), vec![2]);
        assert_eq!(player.unattached_tracks().len(), 1);

        assert!(player.remove_outbound_track(2).is_some());
        assert!(player.outbound_track(2).is_none());
    }

    #[test]
    fn snapshot_reflects_state() {
        let player = test_player(3, "carol", "dungeon", 7, 9);
        player.set_muted(true);
        let snap = player.snapshot();
        assert_eq!(snap.player_id, 3);
        assert_eq!(snap.level, "dungeon");
        assert_eq!((snap.x, snap.y), (7, 9));
        assert!(snap.is_muted);
    }
}
