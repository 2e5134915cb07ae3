//! WebRTC API construction
//!
//! One `API` instance is built per process and shared by every peer
//! connection. Only Opus is registered; this system carries voice, nothing
//! else.

use std::sync::Arc;
use std::time::Duration;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};

use crate::error::TransportError;

const ICE_DISCONNECTED_TIMEOUT: Duration = Duration::from_secs(5);
const ICE_FAILED_TIMEOUT: Duration = Duration::from_secs(25);
const ICE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// ICE configuration for a peer connection.
#[derive(Debug, Clone)]
pub struct RtcConfig {
    /// STUN/TURN URLs; empty means host candidates only (LAN play)
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// The Opus capability used for every audio track and codec registration.
pub fn opus_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

/// Build a WebRTC API with Opus registered and default interceptors.
pub fn build_api() -> Result<API, TransportError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: opus_codec_capability(),
            payload_type: 111,
            stats_id: String::new(),
        },
        RTPCodecType::Audio,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| TransportError::Connection(e.to_string()))?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_timeouts(
        Some(ICE_DISCONNECTED_TIMEOUT),
        Some(ICE_FAILED_TIMEOUT),
        Some(ICE_KEEPALIVE_INTERVAL),
    );

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

/// Create a peer connection from the shared API.
pub async fn new_peer_connection(
    api: &API,
    config: &RtcConfig,
) -> Result<Arc<RTCPeerConnection>, TransportError> {
    let rtc_config = RTCConfiguration {
        ice_servers: config
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };
    Ok(Arc::new(api.new_peer_connection(rtc_config).await?))
}
