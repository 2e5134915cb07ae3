//! Per-connection session lifecycle
//!
//! ```text
//! Accepted -> Challenged -> Authenticated -> LevelServed -> SDPExchanged
//!          -> DataChannelOpen -> Playing -> Closed
//! ```
//!
//! The TCP socket only lives through signalling; once the client's data
//! channel opens, the socket is dropped and every message rides the
//! channel. Any unrecoverable error lands in `close_session`, which
//! persists the player's position, tears the transport down, and
//! broadcasts the departure.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use gridvoice_core::constants::timing::{PING_INTERVAL, PONG_TIMEOUT};
use gridvoice_core::crypto;
use gridvoice_protocol::{
    encode_frame, read_message, write_message, AuthCode, Message,
};

use crate::auth;
use crate::levels::MAIN_LEVEL;
use crate::player::{Player, Position};
use crate::renegotiate;
use crate::routing;
use crate::rtc;
use crate::state::ServerState;
use crate::storage::PlayerState;

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything that can wake the session task after signalling.
#[derive(Debug)]
pub enum SessionEvent {
    /// A game message arrived on the data channel
    Game(Message),
    DataChannelOpen,
    DataChannelClosed,
    PeerFailed,
    ProtocolViolation,
    Timeout,
}

/// Drive one client connection from accept to close.
pub async fn handle_connection(state: Arc<ServerState>, socket: TcpStream) {
    let peer_addr = socket.peer_addr().ok();
    let _ = socket.set_nodelay(true);
    let (mut reader, mut writer) = socket.into_split();

    // Accepted -> Challenged
    let nonce = crypto::generate_nonce();
    if write_message(&mut writer, &Message::AuthChallenge { nonce })
        .await
        .is_err()
    {
        return;
    }

    // Challenged -> Authenticated
    let (public_key, signature, name) =
        match timeout(AUTH_TIMEOUT, read_message(&mut reader)).await {
            Ok(Ok(Message::AuthResponse {
                public_key,
                signature,
                name,
            })) => (public_key, signature, name),
            Ok(Ok(other)) => {
                tracing::debug!(?peer_addr, got = ?other.message_type(), "expected AUTH_RESPONSE");
                return;
            }
            Ok(Err(e)) => {
                tracing::debug!(?peer_addr, error = %e, "auth read failed");
                return;
            }
            Err(_) => {
                tracing::debug!(?peer_addr, "auth timed out");
                return;
            }
        };

    let code = auth::decide(&state.store, &nonce, &public_key, &name, &signature);
    if code != AuthCode::Success {
        tracing::info!(?peer_addr, %name, ?code, "authentication rejected");
        let _ = write_message(&mut writer, &Message::AuthResult { code }).await;
        return;
    }

    let position = spawn_position(&state, &name);
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let player = Player::new(
        state.registry.allocate_id(),
        name.clone(),
        public_key,
        position,
        outbox_tx,
    );

    let code = auth::admit(&state.registry, player.clone());
    if code != AuthCode::Success {
        tracing::info!(?peer_addr, %name, ?code, "already connected");
        let _ = write_message(&mut writer, &Message::AuthResult { code }).await;
        return;
    }
    if write_message(&mut writer, &Message::AuthResult { code })
        .await
        .is_err()
    {
        state.registry.remove(player.id);
        return;
    }

    let pos = player.position();
    tracing::info!(
        player_id = player.id,
        %name,
        level = %pos.level,
        x = pos.x,
        y = pos.y,
        "player authenticated"
    );

    let writer_handle = tokio::spawn(writer_task(player.clone(), outbox_rx, writer));

    // Authenticated -> LevelServed
    player.send(server_hello(&state, &player));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let reason = match signalling_phase(&state, &player, &mut reader, &events_tx, &mut events_rx)
        .await
    {
        Ok(()) => {
            // DataChannelOpen -> Playing; the TCP socket has done its job
            drop(reader);
            enter_playing(&state, &player).await;
            let ping_handle = tokio::spawn(ping_task(player.clone(), events_tx.clone()));
            let reason = playing_loop(&state, &player, &mut events_rx).await;
            ping_handle.abort();
            reason
        }
        Err(reason) => reason,
    };

    close_session(&state, &player, reason).await;
    writer_handle.abort();
}

/// Pick the join position: the persisted spot when it is still on a loaded,
/// walkable tile, a fresh `main` spawn otherwise.
fn spawn_position(state: &ServerState, name: &str) -> Position {
    if let Some(saved) = state.store.player_state(name) {
        if state.levels.is_walkable(&saved.level, saved.x, saved.y) {
            return Position {
                level: saved.level,
                x: saved.x,
                y: saved.y,
            };
        }
    }
    let main = state.levels.main_level();
    let (x, y) = main.level.spawn_position(&main.tiles);
    Position {
        level: MAIN_LEVEL.to_string(),
        x,
        y,
    }
}

fn server_hello(state: &ServerState, player: &Player) -> Message {
    let pos = player.position();
    let loaded = state
        .levels
        .get(&pos.level)
        .unwrap_or_else(|| state.levels.main_level());
    Message::ServerHello {
        player_id: player.id,
        width: loaded.level.width,
        height: loaded.level.height,
        spawn_x: pos.x,
        spawn_y: pos.y,
        level_tiles: Bytes::copy_from_slice(loaded.level.wire_tiles()),
        level_name: pos.level,
    }
}

/// Session outbox: TCP during signalling, the data channel afterwards.
async fn writer_task(
    player: Arc<Player>,
    mut outbox: mpsc::UnboundedReceiver<Message>,
    tcp: OwnedWriteHalf,
) {
    let mut tcp = Some(tcp);
    while let Some(message) = outbox.recv().await {
        if player.is_dc_open() {
            if tcp.take().is_some() {
                tracing::debug!(player_id = player.id, "signalling socket closed");
            }
            if let Some(dc) = player.data_channel() {
                if let Err(e) = dc.send(&encode_frame(&message)).await {
                    tracing::debug!(player_id = player.id, error = %e, "data channel send failed");
                }
                continue;
            }
        }
        if let Some(stream) = tcp.as_mut() {
            if write_message(stream, &message).await.is_err() {
                // The read side will notice the broken socket
                tcp = None;
            }
        }
    }
}

/// LevelServed / SDPExchanged: serve level requests and the offer/answer
/// bridge over TCP until the data channel opens.
async fn signalling_phase(
    state: &Arc<ServerState>,
    player: &Arc<Player>,
    reader: &mut OwnedReadHalf,
    events_tx: &mpsc::UnboundedSender<SessionEvent>,
    events_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> Result<(), &'static str> {
    loop {
        tokio::select! {
            incoming = read_message(reader) => {
                match incoming {
                    Ok(Message::WebRtcOffer { sdp }) => {
                        match rtc::setup_peer_connection(state, player, &sdp, events_tx.clone()).await {
                            Ok(answer) => player.send(Message::WebRtcAnswer { sdp: answer }),
                            Err(e) => {
                                tracing::warn!(player_id = player.id, error = %e, "offer handling failed");
                                return Err("webrtc setup failed");
                            }
                        }
                    }
                    Ok(msg @ (Message::LevelManifestRequest { .. }
                        | Message::LevelFilesRequest { .. }
                        | Message::LevelPackRequest { .. })) => {
                        serve_level_request(state, player, msg);
                    }
                    Ok(other) => {
                        tracing::trace!(player_id = player.id, got = ?other.message_type(), "ignored during signalling");
                    }
                    Err(_) => return Err("signalling socket closed"),
                }
            }
            event = events_rx.recv() => {
                match event {
                    Some(SessionEvent::DataChannelOpen) => return Ok(()),
                    Some(SessionEvent::Game(msg)) => {
                        handle_game_message(state, player, msg).await?;
                    }
                    Some(SessionEvent::PeerFailed) => return Err("peer connection failed"),
                    Some(SessionEvent::DataChannelClosed) => return Err("data channel closed"),
                    Some(SessionEvent::ProtocolViolation) => return Err("protocol error"),
                    Some(SessionEvent::Timeout) | None => return Err("session aborted"),
                }
            }
        }
    }
}

/// DataChannelOpen -> Playing: announce the player, refresh everyone's
/// world view, and get the nearby voices flowing.
async fn enter_playing(state: &Arc<ServerState>, player: &Arc<Player>) {
    state.registry.broadcast_except(
        player.id,
        &Message::PlayerJoined {
            player_id: player.id,
            name: player.name.clone(),
        },
    );
    state.router.clear();
    state.registry.broadcast(&state.registry.world_state());

    routing::seed_initial_tracks(state, player);
    if player.take_needs_renegotiation() {
        if let Err(e) = renegotiate::renegotiate(player).await {
            tracing::warn!(player_id = player.id, error = %e, "initial renegotiation failed");
        }
    }
    tracing::info!(player_id = player.id, name = %player.name, "playing");
}

async fn playing_loop(
    state: &Arc<ServerState>,
    player: &Arc<Player>,
    events_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> &'static str {
    while let Some(event) = events_rx.recv().await {
        match event {
            SessionEvent::Game(message) => {
                if let Err(reason) = handle_game_message(state, player, message).await {
                    return reason;
                }
            }
            SessionEvent::DataChannelOpen => {}
            SessionEvent::DataChannelClosed => return "data channel closed",
            SessionEvent::PeerFailed => return "peer connection failed",
            SessionEvent::ProtocolViolation => return "protocol error",
            SessionEvent::Timeout => return "ping timeout",
        }
    }
    "connection closed"
}

/// Handle one game message in the Playing state (level requests are also
/// valid earlier).
pub async fn handle_game_message(
    state: &Arc<ServerState>,
    player: &Arc<Player>,
    message: Message,
) -> Result<(), &'static str> {
    match message {
        Message::PositionUpdate { seq, x, y } => {
            handle_position_update(state, player, seq, x, y).await;
        }
        Message::MuteStatus { muted } => {
            player.set_muted(muted);
            state.router.invalidate(player.id);
            state.registry.broadcast(&state.registry.world_state());
        }
        Message::Pong => player.record_pong(),
        Message::Ping => player.send(Message::Pong),
        Message::WebRtcAnswer { sdp } => {
            let Some(pc) = player.peer_connection() else {
                return Err("answer without peer connection");
            };
            let answer = match RTCSessionDescription::answer(sdp) {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::warn!(player_id = player.id, error = %e, "bad renegotiation answer");
                    return Err("protocol error");
                }
            };
            if let Err(e) = pc.set_remote_description(answer).await {
                tracing::warn!(player_id = player.id, error = %e, "applying answer failed");
            }
        }
        msg @ (Message::LevelManifestRequest { .. }
        | Message::LevelFilesRequest { .. }
        | Message::LevelPackRequest { .. }) => {
            serve_level_request(state, player, msg);
        }
        other => {
            tracing::trace!(player_id = player.id, got = ?other.message_type(), "ignored");
        }
    }
    Ok(())
}

fn serve_level_request(state: &Arc<ServerState>, player: &Arc<Player>, message: Message) {
    match message {
        Message::LevelManifestRequest { level } => {
            player.send(Message::LevelManifest {
                manifest: state.levels.manifest(&level),
            });
        }
        Message::LevelFilesRequest { level, paths } => {
            player.send(Message::LevelFilesData {
                files: state.levels.files(&level, &paths),
            });
        }
        Message::LevelPackRequest { level } => {
            // Legacy unary fetch; nudge clients onto the manifest path
            tracing::warn!(player_id = player.id, %level, "legacy level pack request");
            player.send(Message::LevelPackData { data: Bytes::new() });
        }
        _ => {}
    }
}

async fn handle_position_update(state: &Arc<ServerState>, player: &Arc<Player>, seq: u32, x: u16, y: u16) {
    let pos = player.position();
    let adjacent =
        (x as i32 - pos.x as i32).abs() <= 1 && (y as i32 - pos.y as i32).abs() <= 1;

    if adjacent {
        if let Some(loaded) = state.levels.get(&pos.level) {
            if loaded.level.is_walkable(x, y, &loaded.tiles) {
                player.set_position(x, y);
                if loaded.tiles.is_door(loaded.level.tile_at(x, y)) {
                    if let Some(door) = loaded.level.door_at(x, y).cloned() {
                        return door_transition(state, player, seq, &pos.level, door).await;
                    }
                }
            }
        }
    }

    // Authoritative ack even for rejected moves; the position is unchanged
    // in that case and the client snaps back.
    let now = player.position();
    player.send(Message::PositionAck {
        seq,
        x: now.x,
        y: now.y,
    });
    state.registry.broadcast(&state.registry.world_state());
}

async fn door_transition(
    state: &Arc<ServerState>,
    player: &Arc<Player>,
    seq: u32,
    current_level: &str,
    door: gridvoice_core::level::DoorInfo,
) {
    match door.target_level {
        Some(target) if target != current_level => {
            // Startup validation guarantees the target, but a guard here
            // keeps a bad registry from teleporting players into the void
            if !state.levels.contains(&target) {
                tracing::error!(player_id = player.id, %target, "door to unknown level");
            } else {
                tracing::info!(
                    player_id = player.id,
                    from = current_level,
                    to = %target,
                    "door transition"
                );
                player.send(Message::DoorTransition {
                    level: target.clone(),
                    x: door.target_x,
                    y: door.target_y,
                });
                player.set_level(target, door.target_x, door.target_y);
                state.router.invalidate(player.id);
            }
        }
        _ => {
            // Intra-level teleporter
            player.set_position(door.target_x, door.target_y);
            state.router.invalidate(player.id);
        }
    }

    let now = player.position();
    player.send(Message::PositionAck {
        seq,
        x: now.x,
        y: now.y,
    });
    state.registry.broadcast(&state.registry.world_state());
}

/// Keepalive: ping every 10 s over the data channel, close after 30 s of
/// silence.
async fn ping_task(player: Arc<Player>, events: mpsc::UnboundedSender<SessionEvent>) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if player.pong_age() > PONG_TIMEOUT {
            tracing::info!(player_id = player.id, "ping timeout");
            let _ = events.send(SessionEvent::Timeout);
            return;
        }
        if player.is_dc_open() {
            player.record_ping_sent();
            player.send(Message::Ping);
        }
    }
}

/// Tear a session down exactly once: persist position, stop audio, close
/// the peer connection, remove the player, and announce the departure.
pub async fn close_session(state: &Arc<ServerState>, player: &Arc<Player>, reason: &'static str) {
    if player.mark_closed() {
        return;
    }

    let pos = player.position();
    if let Err(e) = state.store.save_player_state(
        &player.name,
        &PlayerState {
            x: pos.x,
            y: pos.y,
            level: pos.level,
        },
    ) {
        tracing::warn!(player_id = player.id, error = %e, "state persistence failed");
    }

    if let Some(relay) = player.relay() {
        relay.stop();
    }
    for entry in player.take_outbound_tracks() {
        entry.track.stop();
    }
    if let Some(pc) = player.peer_connection() {
        let _ = pc.close().await;
    }

    state.registry.remove(player.id);
    state.router.invalidate(player.id);
    state
        .registry
        .broadcast(&Message::PlayerLeft {
            player_id: player.id,
        });

    tracing::info!(player_id = player.id, name = %player.name, reason, "session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::LevelRegistry;
    use crate::storage::IdentityStore;
    use gridvoice_transport::RtcConfig;
    use tempfile::TempDir;

    const TILES_JSON: &str = r#"{
        "tiles": {
            ".": { "walkable": true, "color": "white" },
            "#": { "walkable": false, "color": "white" },
            "D": { "walkable": true, "color": "yellow", "is_door": true },
            "T": { "walkable": true, "color": "cyan", "is_door": true }
        },
        "default": { "symbol": " ", "walkable": false, "color": "black" }
    }"#;

    fn test_state() -> (TempDir, Arc<ServerState>) {
        let dir = TempDir::new().unwrap();
        let levels_dir = dir.path().join("levels");

        let main = levels_dir.join("main");
        std::fs::create_dir_all(&main).unwrap();
        // Door D at (3,1) leads to dungeon; teleporter T at (1,2) jumps to (3,2)
        std::fs::write(main.join("level.txt"), "#####\n#S.D#\n#T..#\n#####").unwrap();
        std::fs::write(main.join("tiles.json"), TILES_JSON).unwrap();
        std::fs::write(
            main.join("level.json"),
            r#"{ "doors": [
                { "x": 3, "y": 1, "target_level": "dungeon", "target_x": 1, "target_y": 1 },
                { "x": 1, "y": 2, "target_x": 3, "target_y": 2 }
            ] }"#,
        )
        .unwrap();

        let dungeon = levels_dir.join("dungeon");
        std::fs::create_dir_all(&dungeon).unwrap();
        std::fs::write(dungeon.join("level.txt"), "#####\n#S..#\n#####").unwrap();
        std::fs::write(dungeon.join("tiles.json"), TILES_JSON).unwrap();

        let levels = LevelRegistry::load(&levels_dir).unwrap();
        let store = IdentityStore::open(&dir.path().join("data")).unwrap();
        let state = ServerState::new(levels, store, RtcConfig::default()).unwrap();
        (dir, state)
    }

    fn join(
        state: &Arc<ServerState>,
        name: &str,
        x: u16,
        y: u16,
    ) -> (Arc<Player>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = Player::new(
            state.registry.allocate_id(),
            name.to_string(),
            [state.registry.count() as u8 + 1; 32],
            Position {
                level: "main".into(),
                x,
                y,
            },
            tx,
        );
        assert!(state.registry.try_insert(player.clone()));
        (player, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn accepted_move_acks_new_position() {
        let (_dir, state) = test_state();
        let (player, mut rx) = join(&state, "alice", 1, 1);

        handle_position_update(&state, &player, 1, 2, 1).await;

        let messages = drain(&mut rx);
        assert!(matches!(
            messages[0],
            Message::PositionAck { seq: 1, x: 2, y: 1 }
        ));
        assert!(matches!(messages[1], Message::WorldState { .. }));
        let pos = player.position();
        assert_eq!((pos.x, pos.y), (2, 1));
    }

    #[tokio::test]
    async fn wall_move_acks_old_position() {
        let (_dir, state) = test_state();
        let (player, mut rx) = join(&state, "alice", 1, 1);

        handle_position_update(&state, &player, 4, 1, 0).await;

        let messages = drain(&mut rx);
        assert!(matches!(
            messages[0],
            Message::PositionAck { seq: 4, x: 1, y: 1 }
        ));
        assert_eq!(player.position().x, 1);
    }

    #[tokio::test]
    async fn teleport_move_is_rejected() {
        let (_dir, state) = test_state();
        let (player, mut rx) = join(&state, "alice", 1, 1);

        // (3,2) is walkable but two tiles away
        handle_position_update(&state, &player, 9, 3, 2).await;

        let messages = drain(&mut rx);
        assert!(matches!(
            messages[0],
            Message::PositionAck { seq: 9, x: 1, y: 1 }
        ));
    }

    #[tokio::test]
    async fn cross_level_door_sends_transition_then_ack() {
        let (_dir, state) = test_state();
        let (player, mut rx) = join(&state, "alice", 2, 1);

        handle_position_update(&state, &player, 5, 3, 1).await;

        let messages = drain(&mut rx);
        match &messages[0] {
            Message::DoorTransition { level, x, y } => {
                assert_eq!(level, "dungeon");
                assert_eq!((*x, *y), (1, 1));
            }
            other => panic!("expected DoorTransition, got {other:?}"),
        }
        assert!(matches!(
            messages[1],
            Message::PositionAck { seq: 5, x: 1, y: 1 }
        ));
        let pos = player.position();
        assert_eq!(pos.level, "dungeon");
        assert_eq!((pos.x, pos.y), (1, 1));
    }

    #[tokio::test]
    async fn intra_level_teleporter_just_moves() {
        let (_dir, state) = test_state();
        let (player, mut rx) = join(&state, "alice", 1, 1);

        handle_position_update(&state, &player, 2, 1, 2).await;

        let messages = drain(&mut rx);
        // No DoorTransition for a same-level teleporter
        assert!(matches!(
            messages[0],
            Message::PositionAck { seq: 2, x: 3, y: 2 }
        ));
        assert_eq!(player.position().level, "main");
    }

    #[tokio::test]
    async fn mute_updates_flag_and_broadcasts() {
        let (_dir, state) = test_state();
        let (player, mut rx) = join(&state, "alice", 1, 1);

        handle_game_message(&state, &player, Message::MuteStatus { muted: true })
            .await
            .unwrap();
        assert!(player.is_muted());
        let messages = drain(&mut rx);
        match &messages[0] {
            Message::WorldState { players } => assert!(players[0].is_muted),
            other => panic!("expected WorldState, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn level_requests_are_served() {
        let (_dir, state) = test_state();
        let (player, mut rx) = join(&state, "alice", 1, 1);

        handle_game_message(
            &state,
            &player,
            Message::LevelManifestRequest {
                level: "main".into(),
            },
        )
        .await
        .unwrap();
        handle_game_message(
            &state,
            &player,
            Message::LevelFilesRequest {
                level: "main".into(),
                paths: vec!["tiles.json".into()],
            },
        )
        .await
        .unwrap();

        let messages = drain(&mut rx);
        match &messages[0] {
            Message::LevelManifest { manifest } => {
                assert!(manifest.contains_key("level.txt"));
            }
            other => panic!("expected LevelManifest, got {other:?}"),
        }
        match &messages[1] {
            Message::LevelFilesData { files } => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].0, "tiles.json");
            }
            other => panic!("expected LevelFilesData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn legacy_pack_request_gets_empty_reply() {
        let (_dir, state) = test_state();
        let (player, mut rx) = join(&state, "alice", 1, 1);

        handle_game_message(
            &state,
            &player,
            Message::LevelPackRequest {
                level: "main".into(),
            },
        )
        .await
        .unwrap();
        match &drain(&mut rx)[0] {
            Message::LevelPackData { data } => assert!(data.is_empty()),
            other => panic!("expected LevelPackData, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_persists_position_and_announces() {
        let (_dir, state) = test_state();
        state.store.register("alice", &[1u8; 32]).unwrap();
        let (alice, _alice_rx) = join(&state, "alice", 2, 1);
        let (_bob, mut bob_rx) = join(&state, "bob", 1, 1);

        close_session(&state, &alice, "test").await;

        assert!(state.registry.get(alice.id).is_none());
        let saved = state.store.player_state("alice").unwrap();
        assert_eq!((saved.x, saved.y), (2, 1));
        assert_eq!(saved.level, "main");

        let to_bob = drain(&mut bob_rx);
        assert!(to_bob
            .iter()
            .any(|m| matches!(m, Message::PlayerLeft { player_id } if *player_id == alice.id)));
    }

    #[tokio::test]
    async fn spawn_prefers_persisted_position() {
        let (_dir, state) = test_state();
        state.store.register("alice", &[1u8; 32]).unwrap();
        state
            .store
            .save_player_state(
                "alice",
                &PlayerState {
                    x: 2,
                    y: 2,
                    level: "dungeon".into(),
                },
            )
            .unwrap();

        let pos = spawn_position(&state, "alice");
        assert_eq!(pos.level, "dungeon");
        assert_eq!((pos.x, pos.y), (2, 2));
    }

    #[tokio::test]
    async fn spawn_falls_back_when_persisted_spot_is_gone() {
        let (_dir, state) = test_state();
        state.store.register("alice", &[1u8; 32]).unwrap();
        state
            .store
            .save_player_state(
                "alice",
                &PlayerState {
                    x: 0,
                    y: 0,
                    level: "deleted-level".into(),
                },
            )
            .unwrap();

        let pos = spawn_position(&state, "alice");
        assert_eq!(pos.level, "main");
        assert_eq!((pos.x, pos.y), (1, 1));
    }
}
