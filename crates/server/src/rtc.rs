//! Per-session peer connection setup
//!
//! The client sends its SDP offer over TCP during signalling; the server
//! builds the peer connection, wires the data-channel and track handlers,
//! and answers with its candidate-bearing SDP once ICE gathering finishes.

use std::sync::Arc;

use tokio::sync::mpsc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use gridvoice_core::constants::net::DATA_CHANNEL_LABEL;
use gridvoice_protocol::decode_frame;
use gridvoice_transport::{new_peer_connection, InboundAudioRelay};

use crate::error::ServerError;
use crate::player::Player;
use crate::session::SessionEvent;
use crate::state::ServerState;

/// Create the peer connection for a session and apply the client's offer.
/// Returns the answer SDP with ICE candidates included.
pub async fn setup_peer_connection(
    state: &Arc<ServerState>,
    player: &Arc<Player>,
    offer_sdp: &str,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> Result<String, ServerError> {
    let pc = new_peer_connection(&state.api, &state.rtc).await?;
    player.set_peer_connection(pc.clone());

    {
        let player = player.clone();
        let events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |pc_state: RTCPeerConnectionState| {
            match pc_state {
                RTCPeerConnectionState::Connected => {
                    tracing::debug!(player_id = player.id, "peer connection up");
                    player.set_webrtc_connected(true);
                }
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                    player.set_webrtc_connected(false);
                    let _ = events.send(SessionEvent::PeerFailed);
                }
                _ => {}
            }
            Box::pin(async {})
        }));
    }

    {
        let player = player.clone();
        let events = events.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            if dc.label() != DATA_CHANNEL_LABEL {
                tracing::warn!(
                    player_id = player.id,
                    label = dc.label(),
                    "ignoring unexpected data channel"
                );
                return Box::pin(async {});
            }
            player.set_data_channel(dc.clone());
            wire_data_channel(&dc, player.clone(), events.clone());
            Box::pin(async {})
        }));
    }

    {
        let player = player.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            if track.kind() != RTPCodecType::Audio {
                return Box::pin(async {});
            }
            if player.relay().is_some() {
                tracing::warn!(player_id = player.id, "duplicate inbound audio track");
                return Box::pin(async {});
            }
            tracing::debug!(player_id = player.id, "inbound audio track attached");
            let relay = InboundAudioRelay::new(player.id);
            relay.attach(track);
            player.set_relay(relay);
            Box::pin(async {})
        }));
    }

    let offer = RTCSessionDescription::offer(offer_sdp.to_string())?;
    pc.set_remote_description(offer).await?;

    let answer = pc.create_answer(None).await?;
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await?;
    let _ = gather_complete.recv().await;

    let answer_sdp = pc
        .local_description()
        .await
        .map(|desc| desc.sdp)
        .ok_or(ServerError::SessionClosed("no local description"))?;
    Ok(answer_sdp)
}

fn wire_data_channel(
    dc: &Arc<RTCDataChannel>,
    player: Arc<Player>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    {
        let player = player.clone();
        let events = events.clone();
        dc.on_open(Box::new(move || {
            player.set_dc_open(true);
            let _ = events.send(SessionEvent::DataChannelOpen);
            Box::pin(async {})
        }));
    }

    {
        let player = player.clone();
        let events = events.clone();
        dc.on_message(Box::new(move |message: DataChannelMessage| {
            match decode_frame(&message.data) {
                Ok(decoded) => {
                    let _ = events.send(SessionEvent::Game(decoded));
                }
                Err(e) if e.is_unknown_type() => {
                    tracing::trace!(player_id = player.id, "dropping unknown message type");
                }
                Err(e) => {
                    tracing::warn!(player_id = player.id, error = %e, "malformed data channel frame");
                    let _ = events.send(SessionEvent::ProtocolViolation);
                }
            }
            Box::pin(async {})
        }));
    }

    {
        let player = player.clone();
        let events = events.clone();
        dc.on_close(Box::new(move || {
            player.set_dc_open(false);
            let _ = events.send(SessionEvent::DataChannelClosed);
            Box::pin(async {})
        }));
    }
}
