//! The audio routing loop
//!
//! One task per process, ticking every 20 ms in step with the audio frame.
//! Each tick reconciles the in-range track sets, drains every speaking
//! session's inbound queue, and fans frames out to recipients' outbound
//! tracks with per-recipient volume applied. Frames never alias: every
//! recipient gets its own scaled copy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use gridvoice_core::constants::timing::ROUTING_TICK;
use gridvoice_core::spatial;
use gridvoice_transport::OutboundAudioTrack;

use crate::player::Player;
use crate::state::ServerState;

/// The in-range source set per recipient: `in_range[r] = { s }`.
fn compute_in_range(players: &[Arc<Player>]) -> HashMap<u32, HashSet<u32>> {
    let mut in_range: HashMap<u32, HashSet<u32>> = HashMap::new();
    for recipient in players {
        if !recipient.is_webrtc_connected() {
            continue;
        }
        let r_pos = recipient.position();
        let sources = players
            .iter()
            .filter(|source| {
                if source.id == recipient.id || !source.is_webrtc_connected() {
                    return false;
                }
                let s_pos = source.position();
                s_pos.level == r_pos.level
                    && spatial::in_range(
                        s_pos.x as i32 - r_pos.x as i32,
                        s_pos.y as i32 - r_pos.y as i32,
                    )
            })
            .map(|source| source.id)
            .collect();
        in_range.insert(recipient.id, sources);
    }
    in_range
}

/// Create the outbound track for `(source, recipient)` if it is missing.
/// The track only starts carrying audio after renegotiation attaches it.
fn ensure_track(recipient: &Arc<Player>, source_id: u32) {
    if recipient.outbound_track(source_id).is_some() {
        return;
    }
    match OutboundAudioTrack::spawn(source_id) {
        Ok(track) => {
            if recipient.ensure_outbound_track(track) {
                recipient.mark_needs_renegotiation();
            }
        }
        Err(e) => {
            tracing::error!(
                recipient = recipient.id,
                source = source_id,
                error = %e,
                "failed to create outbound track"
            );
        }
    }
}

/// One routing tick over a snapshot of the player set.
pub async fn route_once(state: &Arc<ServerState>) {
    let players = state.registry.snapshot();
    let in_range = compute_in_range(&players);

    // 1. Proactively create tracks for every in-range pair.
    for recipient in &players {
        let Some(sources) = in_range.get(&recipient.id) else {
            continue;
        };
        for &source_id in sources {
            ensure_track(recipient, source_id);
        }
    }

    // 2. Fan out every pending inbound frame.
    for source in &players {
        if !source.is_webrtc_connected() {
            continue;
        }
        let Some(relay) = source.relay() else {
            continue;
        };
        if source.is_muted() {
            // Drain without forwarding so the queue cannot build up
            relay.drain();
            continue;
        }
        let recipients = state.router.recipients(source, &players);
        if recipients.is_empty() {
            relay.drain();
            continue;
        }
        while let Some(frame) = relay.pop_frame() {
            for &(recipient_id, volume) in &recipients {
                let Some(recipient) = state.registry.get(recipient_id) else {
                    continue;
                };
                let track = match recipient.outbound_track(source.id) {
                    Some(track) => track,
                    None => {
                        // Track map was stale; create on demand
                        ensure_track(&recipient, source.id);
                        match recipient.outbound_track(source.id) {
                            Some(track) => track,
                            None => continue,
                        }
                    }
                };
                let scaled: Vec<f32> = frame.iter().map(|s| s * volume).collect();
                track.queue_frame(scaled);
            }
        }
    }

    // 3. Tear down tracks whose source left the disc.
    for recipient in &players {
        let empty = HashSet::new();
        let sources = in_range.get(&recipient.id).unwrap_or(&empty);
        for source_id in recipient.outbound_sources() {
            if sources.contains(&source_id) {
                continue;
            }
            if let Some(entry) = recipient.remove_outbound_track(source_id) {
                entry.track.stop();
                if let (Some(sender), Some(pc)) = (entry.sender, recipient.peer_connection()) {
                    if let Err(e) = pc.remove_track(&sender).await {
                        tracing::debug!(
                            recipient = recipient.id,
                            source = source_id,
                            error = %e,
                            "remove_track failed"
                        );
                    }
                }
                recipient.mark_needs_renegotiation();
            }
        }
    }
}

/// The 20 ms routing loop.
pub fn spawn_loop(state: Arc<ServerState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ROUTING_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            route_once(&state).await;
        }
    })
}

/// Create this player's outbound tracks for every in-range speaker; called
/// when a session enters the playing state so its first offer already
/// carries the nearby voices.
pub fn seed_initial_tracks(state: &Arc<ServerState>, player: &Arc<Player>) {
    let players = state.registry.snapshot();
    let pos = player.position();
    for source in &players {
        if source.id == player.id || !source.is_webrtc_connected() {
            continue;
        }
        let s_pos = source.position();
        if s_pos.level == pos.level
            && spatial::in_range(
                s_pos.x as i32 - pos.x as i32,
                s_pos.y as i32 - pos.y as i32,
            )
        {
            ensure_track(player, source.id);
        }
    }
    player.mark_needs_renegotiation();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Position;
    use tokio::sync::mpsc;

    fn player(id: u32, level: &str, x: u16, y: u16) -> Arc<Player> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let p = Player::new(
            id,
            format!("p{id}"),
            [id as u8; 32],
            Position {
                level: level.to_string(),
                x,
                y,
            },
            tx,
        );
        p.set_webrtc_connected(true);
        p
    }

    #[test]
    fn in_range_is_symmetric_and_level_scoped() {
        let a = player(1, "main", 0, 0);
        let b = player(2, "main", 5, 0);
        let c = player(3, "dungeon", 0, 0);
        let far = player(4, "main", 30, 30);
        let players = vec![a, b, c, far];

        let in_range = compute_in_range(&players);
        assert!(in_range[&1].contains(&2));
        assert!(in_range[&2].contains(&1));
        assert!(!in_range[&1].contains(&3));
        assert!(!in_range[&1].contains(&4));
        assert!(in_range[&3].is_empty());
    }

    #[test]
    fn disconnected_players_are_skipped() {
        let a = player(1, "main", 0, 0);
        let b = player(2, "main", 1, 0);
        b.set_webrtc_connected(false);
        let players = vec![a, b];

        let in_range = compute_in_range(&players);
        assert!(in_range[&1].is_empty());
        assert!(!in_range.contains_key(&2));
    }

    #[tokio::test]
    async fn ensure_track_marks_renegotiation_once() {
        let a = player(1, "main", 0, 0);
        ensure_track(&a, 2);
        assert!(a.take_needs_renegotiation());
        ensure_track(&a, 2);
        assert!(!a.take_needs_renegotiation());
        assert_eq!(a.outbound_sources(), vec![2]);
    }
}
