//! Client session: signalling, WebRTC setup, and the message loop
//!
//! `GameClient::connect` performs the whole handshake: auth over TCP,
//! level sync through the content-addressed cache, then the SDP exchange
//! that brings up the peer connection with the microphone track and the
//! "game" data channel. After the channel opens the TCP socket is dropped
//! and `run` drives everything from data-channel messages and front-end
//! commands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use gridvoice_core::constants::net::DATA_CHANNEL_LABEL;
use gridvoice_core::crypto::Keypair;
use gridvoice_core::level::Level;
use gridvoice_protocol::{
    encode_frame, read_message, write_message, AuthCode, Message,
};
use gridvoice_transport::{build_api, new_peer_connection, OutboundAudioTrack, RtcConfig};

use crate::cache::LevelCache;
use crate::error::ClientError;
use crate::playback::{AudioPlayback, AudioSinkFactory};
use crate::prediction::Prediction;
use crate::world::{self, ClientWorld};

pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub identity: Keypair,
    /// Root of the on-disk level cache (usually `~/.gridvoice/cache`)
    pub cache_root: PathBuf,
    pub sink_factory: Arc<dyn AudioSinkFactory>,
    pub ice_servers: Vec<String>,
}

/// Front-end commands into the running client.
#[derive(Debug)]
pub enum ClientCommand {
    Move { dx: i32, dy: i32 },
    SetMuted(bool),
    /// One 20 ms captured microphone frame
    Microphone(Vec<f32>),
    Quit,
}

/// Cheap cloneable handle for the front-end.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    pub fn move_by(&self, dx: i32, dy: i32) {
        let _ = self.commands.send(ClientCommand::Move { dx, dy });
    }

    pub fn set_muted(&self, muted: bool) {
        let _ = self.commands.send(ClientCommand::SetMuted(muted));
    }

    pub fn microphone(&self, frame: Vec<f32>) {
        let _ = self.commands.send(ClientCommand::Microphone(frame));
    }

    pub fn quit(&self) {
        let _ = self.commands.send(ClientCommand::Quit);
    }
}

enum ClientEvent {
    Server(Message),
    DataChannelOpen,
    DataChannelClosed,
    PeerFailed,
}

struct PendingLevelFetch {
    level: String,
    x: u16,
    y: u16,
    manifest: Option<std::collections::BTreeMap<String, (String, u64)>>,
}

pub struct GameClient {
    pub player_id: u32,
    name: String,
    world: Arc<RwLock<ClientWorld>>,
    prediction: Mutex<Prediction>,
    playback: Arc<AudioPlayback>,
    cache: LevelCache,
    pc: Arc<RTCPeerConnection>,
    dc: Arc<webrtc::data_channel::RTCDataChannel>,
    dc_open: Arc<AtomicBool>,
    mic: Arc<OutboundAudioTrack>,
    muted: AtomicBool,
    track_map: Arc<RwLock<HashMap<String, u32>>>,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
    commands_rx: mpsc::UnboundedReceiver<ClientCommand>,
    pending_fetch: Option<PendingLevelFetch>,
    /// Broadcasts that arrived on TCP while we waited for specific replies
    deferred: Vec<Message>,
    /// Keeps the signalling socket open until the data channel takes over
    tcp_write: Option<OwnedWriteHalf>,
}

impl GameClient {
    /// Connect, authenticate, sync the level, and establish WebRTC.
    pub async fn connect(config: ClientConfig) -> Result<(Self, ClientHandle), ClientError> {
        let socket = TcpStream::connect((config.host.as_str(), config.port)).await?;
        let _ = socket.set_nodelay(true);
        let (mut reader, mut writer) = socket.into_split();
        let mut deferred = Vec::new();

        // Challenge/response
        let nonce = match read_message(&mut reader).await? {
            Message::AuthChallenge { nonce } => nonce,
            other => {
                tracing::warn!(got = ?other.message_type(), "expected AUTH_CHALLENGE");
                return Err(ClientError::ConnectionLost);
            }
        };
        let signature = config.identity.sign_challenge(&nonce, &config.name);
        write_message(
            &mut writer,
            &Message::AuthResponse {
                public_key: config.identity.public_bytes(),
                signature,
                name: config.name.clone(),
            },
        )
        .await?;
        match read_message(&mut reader).await? {
            Message::AuthResult {
                code: AuthCode::Success,
            } => {}
            Message::AuthResult { code } => return Err(ClientError::Auth(code)),
            other => {
                tracing::warn!(got = ?other.message_type(), "expected AUTH_RESULT");
                return Err(ClientError::ConnectionLost);
            }
        }

        // SERVER_HELLO carries our id, spawn, and the raw grid
        let (player_id, spawn_x, spawn_y, level_name, width, height, level_tiles) =
            read_until(&mut reader, &mut deferred, |msg| match msg {
                Message::ServerHello {
                    player_id,
                    width,
                    height,
                    spawn_x,
                    spawn_y,
                    level_tiles,
                    level_name,
                } => Ok((player_id, spawn_x, spawn_y, level_name, width, height, level_tiles)),
                other => Err(other),
            })
            .await?;
        // Sanity-check the wire grid even though the full pack replaces it
        Level::from_wire(width, height, &level_tiles)
            .map_err(|e| ClientError::Level(e.to_string()))?;
        tracing::info!(player_id, level = %level_name, x = spawn_x, y = spawn_y, "joined");

        // Content-addressed level sync; the full pack replaces the bare
        // wire grid (it adds tiles.json and door metadata)
        let cache = LevelCache::open(&config.cache_root)?;
        write_message(
            &mut writer,
            &Message::LevelManifestRequest {
                level: level_name.clone(),
            },
        )
        .await?;
        let manifest = read_until(&mut reader, &mut deferred, |msg| match msg {
            Message::LevelManifest { manifest } => Ok(manifest),
            other => Err(other),
        })
        .await?;
        if manifest.is_empty() {
            return Err(ClientError::Level(format!(
                "server has no files for level '{level_name}'"
            )));
        }
        let missing = cache.missing(&manifest);
        let files = if missing.is_empty() {
            Vec::new()
        } else {
            write_message(
                &mut writer,
                &Message::LevelFilesRequest {
                    level: level_name.clone(),
                    paths: missing,
                },
            )
            .await?;
            read_until(&mut reader, &mut deferred, |msg| match msg {
                Message::LevelFilesData { files } => Ok(files),
                other => Err(other),
            })
            .await?
        };
        let level_dir = cache.materialize(&level_name, &manifest, &files)?;
        let (level, tiles) = world::load_level_dir(&level_dir)?;

        let world = Arc::new(RwLock::new(ClientWorld::new(
            level_name, level, tiles, spawn_x, spawn_y,
        )));
        let playback = Arc::new(AudioPlayback::new(config.sink_factory.clone()));
        let track_map: Arc<RwLock<HashMap<String, u32>>> = Arc::new(RwLock::new(HashMap::new()));

        // Peer connection with mic track and the "game" data channel
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let api = build_api()?;
        let mut rtc = RtcConfig::default();
        if !config.ice_servers.is_empty() {
            rtc.ice_servers = config.ice_servers.clone();
        }
        let pc = new_peer_connection(&api, &rtc).await?;

        let mic = OutboundAudioTrack::spawn(player_id)?;
        pc.add_track(mic.local() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        mic.activate();

        let dc = pc.create_data_channel(DATA_CHANNEL_LABEL, None).await?;
        let dc_open = Arc::new(AtomicBool::new(false));
        {
            let events = events_tx.clone();
            let dc_open = dc_open.clone();
            dc.on_open(Box::new(move || {
                dc_open.store(true, Ordering::Release);
                let _ = events.send(ClientEvent::DataChannelOpen);
                Box::pin(async {})
            }));
        }
        {
            let events = events_tx.clone();
            dc.on_message(Box::new(move |message: DataChannelMessage| {
                match gridvoice_protocol::decode_frame(&message.data) {
                    Ok(decoded) => {
                        let _ = events.send(ClientEvent::Server(decoded));
                    }
                    Err(e) if e.is_unknown_type() => {
                        tracing::trace!("dropping unknown message type");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed frame from server");
                    }
                }
                Box::pin(async {})
            }));
        }
        {
            let events = events_tx.clone();
            dc.on_close(Box::new(move || {
                let _ = events.send(ClientEvent::DataChannelClosed);
                Box::pin(async {})
            }));
        }

        {
            let events = events_tx.clone();
            pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    let _ = events.send(ClientEvent::PeerFailed);
                }
                Box::pin(async {})
            }));
        }

        // Incoming tracks: one per nearby speaker, routed by MID
        {
            let playback = playback.clone();
            let track_map = track_map.clone();
            pc.on_track(Box::new(move |track, _receiver, transceiver| {
                let playback = playback.clone();
                let track_map = track_map.clone();
                Box::pin(async move {
                    let Some(mid) = transceiver.mid() else {
                        return;
                    };
                    let mid = mid.to_string();
                    tracing::debug!(%mid, "incoming audio track");
                    spawn_track_reader(track, mid, playback, track_map);
                })
            }));
        }

        // Offer with gathered candidates, answer over TCP
        let offer = pc.create_offer(None).await?;
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await?;
        let _ = gather_complete.recv().await;
        let offer_sdp = pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .ok_or(ClientError::ConnectionLost)?;
        write_message(&mut writer, &Message::WebRtcOffer { sdp: offer_sdp }).await?;

        let answer_sdp = read_until(&mut reader, &mut deferred, |msg| match msg {
            Message::WebRtcAnswer { sdp } => Ok(sdp),
            other => Err(other),
        })
        .await?;
        pc.set_remote_description(RTCSessionDescription::answer(answer_sdp)?)
            .await?;

        // The server keeps using TCP until the channel opens; drain it in
        // the background
        {
            let events = events_tx.clone();
            tokio::spawn(async move {
                loop {
                    match read_message(&mut reader).await {
                        Ok(msg) => {
                            let _ = events.send(ClientEvent::Server(msg));
                        }
                        Err(_) => break,
                    }
                }
            });
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let client = Self {
            player_id,
            name: config.name,
            world,
            prediction: Mutex::new(Prediction::new()),
            playback,
            cache,
            pc,
            dc,
            dc_open,
            mic,
            muted: AtomicBool::new(false),
            track_map,
            events_rx,
            commands_rx,
            pending_fetch: None,
            deferred,
            tcp_write: Some(writer),
        };
        Ok((
            client,
            ClientHandle {
                commands: commands_tx,
            },
        ))
    }

    /// A read-only handle on the world for rendering front-ends.
    pub fn world(&self) -> Arc<RwLock<ClientWorld>> {
        self.world.clone()
    }

    /// Drive the session until quit or disconnect.
    pub async fn run(mut self) -> Result<(), ClientError> {
        for message in std::mem::take(&mut self.deferred) {
            self.handle_server_message(message).await?;
        }
        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(ClientEvent::Server(message)) => {
                        self.handle_server_message(message).await?;
                    }
                    Some(ClientEvent::DataChannelOpen) => {
                        tracing::info!("data channel open, signalling socket retired");
                        self.tcp_write = None;
                    }
                    Some(ClientEvent::DataChannelClosed) | Some(ClientEvent::PeerFailed) | None => {
                        self.shutdown().await;
                        return Err(ClientError::ConnectionLost);
                    }
                },
                command = self.commands_rx.recv() => match command {
                    Some(ClientCommand::Move { dx, dy }) => self.try_move(dx, dy).await?,
                    Some(ClientCommand::SetMuted(muted)) => self.apply_mute(muted).await?,
                    Some(ClientCommand::Microphone(frame)) => {
                        if !self.muted.load(Ordering::Acquire) {
                            self.mic.queue_frame(frame);
                        }
                    }
                    Some(ClientCommand::Quit) | None => {
                        self.shutdown().await;
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        if self.dc_open.load(Ordering::Acquire) {
            self.dc
                .send(&encode_frame(message))
                .await
                .map_err(|_| ClientError::ConnectionLost)?;
            return Ok(());
        }
        if let Some(writer) = self.tcp_write.as_mut() {
            write_message(writer, message).await?;
            return Ok(());
        }
        Err(ClientError::ConnectionLost)
    }

    async fn try_move(&mut self, dx: i32, dy: i32) -> Result<(), ClientError> {
        let (seq, nx, ny) = {
            let mut world = self.world.write();
            let nx = world.x.saturating_add_signed(dx as i16);
            let ny = world.y.saturating_add_signed(dy as i16);
            if (nx, ny) == (world.x, world.y) || !world.is_walkable(nx, ny) {
                return Ok(());
            }
            let (seq, _) = self.prediction.lock().predict((world.x, world.y), dx, dy);
            world.x = nx;
            world.y = ny;
            (seq, nx, ny)
        };
        self.send(&Message::PositionUpdate { seq, x: nx, y: ny })
            .await
    }

    async fn apply_mute(&mut self, muted: bool) -> Result<(), ClientError> {
        self.muted.store(muted, Ordering::Release);
        self.send(&Message::MuteStatus { muted }).await
    }

    async fn handle_server_message(&mut self, message: Message) -> Result<(), ClientError> {
        match message {
            Message::WorldState { players } => {
                let (my_pos, my_level) = {
                    let mut world = self.world.write();
                    world.apply_world_state(players.clone());
                    // Only adopt the server's view of us when nothing is
                    // in flight, otherwise we rubber-band mid-move
                    if !self.prediction.lock().has_pending() {
                        let me = world
                            .players
                            .get(&self.player_id)
                            .map(|me| (me.x, me.y));
                        if let Some((x, y)) = me {
                            world.x = x;
                            world.y = y;
                        }
                    }
                    ((world.x, world.y), world.level_name.clone())
                };
                self.playback
                    .update_positions(self.player_id, my_pos, &my_level, &players);
            }
            Message::PositionAck { seq, x, y } => {
                let mut world = self.world.write();
                let reconciled = {
                    let view = &*world;
                    self.prediction
                        .lock()
                        .reconcile(seq, (x, y), |tx, ty| view.is_walkable(tx, ty))
                };
                world.x = reconciled.0;
                world.y = reconciled.1;
            }
            Message::PlayerJoined { player_id, name } => {
                tracing::info!(player_id, %name, "player joined");
            }
            Message::PlayerLeft { player_id } => {
                self.world.write().remove_player(player_id);
                self.playback.remove_player(player_id);
            }
            Message::DoorTransition { level, x, y } => {
                tracing::info!(%level, x, y, "door transition");
                self.prediction.lock().clear();
                self.pending_fetch = Some(PendingLevelFetch {
                    level: level.clone(),
                    x,
                    y,
                    manifest: None,
                });
                self.send(&Message::LevelManifestRequest { level }).await?;
            }
            Message::LevelManifest { manifest } => {
                let Some(fetch) = self.pending_fetch.as_mut() else {
                    return Ok(());
                };
                if manifest.is_empty() {
                    let level = fetch.level.clone();
                    self.pending_fetch = None;
                    return Err(ClientError::Level(format!(
                        "server has no files for level '{level}'"
                    )));
                }
                let missing = self.cache.missing(&manifest);
                let level = fetch.level.clone();
                fetch.manifest = Some(manifest);
                if missing.is_empty() {
                    self.finish_level_fetch(Vec::new())?;
                } else {
                    self.send(&Message::LevelFilesRequest {
                        level,
                        paths: missing,
                    })
                    .await?;
                }
            }
            Message::LevelFilesData { files } => {
                if self.pending_fetch.is_some() {
                    self.finish_level_fetch(files)?;
                }
            }
            Message::AudioTrackMap { map } => {
                tracing::debug!(tracks = map.len(), "audio track map updated");
                *self.track_map.write() = map.into_iter().collect();
            }
            Message::WebRtcOffer { sdp } => {
                // Renegotiation: the server added or removed our tracks
                self.pc
                    .set_remote_description(RTCSessionDescription::offer(sdp)?)
                    .await?;
                let answer = self.pc.create_answer(None).await?;
                self.pc.set_local_description(answer.clone()).await?;
                self.send(&Message::WebRtcAnswer { sdp: answer.sdp }).await?;
            }
            Message::Ping => self.send(&Message::Pong).await?,
            other => {
                tracing::trace!(got = ?other.message_type(), "ignored message");
            }
        }
        Ok(())
    }

    fn finish_level_fetch(
        &mut self,
        files: Vec<(String, bytes::Bytes)>,
    ) -> Result<(), ClientError> {
        let Some(fetch) = self.pending_fetch.take() else {
            return Ok(());
        };
        let Some(manifest) = fetch.manifest else {
            return Ok(());
        };
        let dir = self.cache.materialize(&fetch.level, &manifest, &files)?;
        let (level, tiles) = world::load_level_dir(&dir)?;
        self.world
            .write()
            .switch_level(fetch.level.clone(), level, tiles, fetch.x, fetch.y);
        tracing::info!(level = %fetch.level, "level loaded");
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.playback.stop_all();
        self.mic.stop();
        let _ = self.pc.close().await;
        tracing::info!(name = %self.name, "client shut down");
    }
}

/// Read TCP messages until `matcher` accepts one; everything else is
/// deferred and replayed once the main loop starts.
async fn read_until<T>(
    reader: &mut OwnedReadHalf,
    deferred: &mut Vec<Message>,
    mut matcher: impl FnMut(Message) -> Result<T, Message>,
) -> Result<T, ClientError> {
    loop {
        let message = read_message(reader).await?;
        match matcher(message) {
            Ok(value) => return Ok(value),
            Err(other) => deferred.push(other),
        }
    }
}

/// Decode a remote speaker's track and feed the playback engine, routing
/// by the MID announced in `AUDIO_TRACK_MAP`.
fn spawn_track_reader(
    track: Arc<webrtc::track::track_remote::TrackRemote>,
    mid: String,
    playback: Arc<AudioPlayback>,
    track_map: Arc<RwLock<HashMap<String, u32>>>,
) {
    tokio::spawn(async move {
        let decoder = match gridvoice_transport::OpusDecoder::new() {
            Ok(decoder) => decoder,
            Err(e) => {
                tracing::error!(error = %e, "decoder init failed");
                return;
            }
        };
        loop {
            match track.read_rtp().await {
                Ok((packet, _)) => {
                    if packet.payload.is_empty() {
                        continue;
                    }
                    let pcm = match decoder.decode(&packet.payload) {
                        Ok(pcm) => pcm,
                        Err(_) => match decoder.decode_plc() {
                            Ok(pcm) => pcm,
                            Err(_) => continue,
                        },
                    };
                    // The map is sent before the offer that creates this
                    // track, so the lookup normally succeeds immediately
                    let source = track_map.read().get(&mid).copied();
                    if let Some(source_id) = source {
                        playback.feed(source_id, &pcm);
                    }
                }
                Err(_) => {
                    tracing::debug!(%mid, "remote track ended");
                    break;
                }
            }
        }
    });
}
