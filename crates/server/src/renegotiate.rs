//! SDP renegotiation engine
//!
//! Every 500 ms (and immediately when a session starts playing) each
//! session whose routing set changed gets its pending outbound tracks
//! attached, a fresh offer applied locally, and the `mid -> source` map
//! shipped. `AUDIO_TRACK_MAP` goes out before `WEBRTC_OFFER`: the client's
//! `on_track` fires while applying the offer and must already know where
//! to route the first frame.

use std::collections::BTreeMap;
use std::sync::Arc;

use webrtc::track::track_local::TrackLocal;

use gridvoice_core::constants::timing::RENEGOTIATION_TICK;
use gridvoice_protocol::Message;
use gridvoice_transport::OutboundAudioTrack;

use crate::error::ServerError;
use crate::player::Player;
use crate::state::ServerState;

/// Run one renegotiation for a session if it needs one.
pub async fn renegotiate(player: &Arc<Player>) -> Result<(), ServerError> {
    if !player.is_dc_open() || !player.is_webrtc_connected() {
        // Not ready; leave the flag set for a later tick
        player.mark_needs_renegotiation();
        return Ok(());
    }
    let Some(pc) = player.peer_connection() else {
        return Ok(());
    };

    // 1. Attach tracks created since the last offer and start accepting
    //    their audio.
    for track in player.unattached_tracks() {
        let sender = pc
            .add_track(track.local() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        player.set_track_sender(track.source_id(), sender);
        track.activate();
    }

    // 2. New offer; this assigns MIDs to the transceivers.
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;

    // 3. Walk transceivers and recover each sender's source player.
    let mut map = BTreeMap::new();
    for transceiver in pc.get_transceivers().await {
        let Some(mid) = transceiver.mid() else {
            continue;
        };
        let sender = transceiver.sender().await;
        let Some(track) = sender.track().await else {
            continue;
        };
        if let Some(source_id) = OutboundAudioTrack::source_id_from_track_id(track.id()) {
            map.insert(mid.to_string(), source_id);
        }
    }

    let sdp = pc
        .local_description()
        .await
        .map(|desc| desc.sdp)
        .ok_or(ServerError::SessionClosed("no local description"))?;

    // 4. Map first, then the offer that introduces the MIDs.
    player.send(Message::AudioTrackMap { map });
    player.send(Message::WebRtcOffer { sdp });

    tracing::debug!(player_id = player.id, "renegotiation offer sent");
    Ok(())
}

/// The 500 ms renegotiation loop.
pub fn spawn_loop(state: Arc<ServerState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RENEGOTIATION_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for player in state.registry.snapshot() {
                if player.is_closed() || !player.take_needs_renegotiation() {
                    continue;
                }
                if let Err(e) = renegotiate(&player).await {
                    tracing::warn!(player_id = player.id, error = %e, "renegotiation failed");
                }
            }
        }
    })
}
