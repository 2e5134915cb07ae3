//! Opus encode/decode for 20 ms mono frames at 48 kHz

use audiopus::coder::{Decoder, Encoder};
use audiopus::packet::Packet;
use audiopus::{Application, Bitrate, Channels, SampleRate};
use std::convert::TryInto;
use parking_lot::Mutex;

use gridvoice_core::constants::audio::{FRAME_SIZE, OPUS_BITRATE};

use crate::error::TransportError;

/// Recommended maximum size of one encoded Opus packet.
const MAX_PACKET: usize = 4000;

/// Mono voice encoder at 48 kHz.
pub struct OpusEncoder {
    inner: Mutex<Encoder>,
}

impl OpusEncoder {
    pub fn new() -> Result<Self, TransportError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)?;
        encoder.set_bitrate(Bitrate::BitsPerSecond(OPUS_BITRATE))?;
        Ok(Self {
            inner: Mutex::new(encoder),
        })
    }

    /// Encode one PCM frame into an Opus packet.
    pub fn encode(&self, pcm: &[f32]) -> Result<Vec<u8>, TransportError> {
        let mut output = vec![0u8; MAX_PACKET];
        let written = self.inner.lock().encode_float(pcm, &mut output[..])?;
        output.truncate(written);
        Ok(output)
    }
}

/// Mono voice decoder at 48 kHz with packet-loss concealment.
pub struct OpusDecoder {
    inner: Mutex<Decoder>,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            inner: Mutex::new(Decoder::new(SampleRate::Hz48000, Channels::Mono)?),
        })
    }

    /// Decode one Opus packet into PCM samples.
    pub fn decode(&self, packet: &[u8]) -> Result<Vec<f32>, TransportError> {
        let mut pcm = vec![0.0f32; FRAME_SIZE];
        let packet: Packet<'_> = packet.try_into()?;
        let decoded = self
            .inner
            .lock()
            .decode_float(Some(packet), (&mut pcm[..]).try_into()?, false)?;
        pcm.truncate(decoded);
        Ok(pcm)
    }

    /// Conceal a lost packet.
    pub fn decode_plc(&self) -> Result<Vec<f32>, TransportError> {
        let mut pcm = vec![0.0f32; FRAME_SIZE];
        let decoded =
            self.inner
                .lock()
                .decode_float(None::<Packet<'_>>, (&mut pcm[..]).try_into()?, false)?;
        pcm.truncate(decoded);
        Ok(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_frame() {
        let encoder = OpusEncoder::new().unwrap();
        let decoder = OpusDecoder::new().unwrap();

        let pcm: Vec<f32> = (0..FRAME_SIZE)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let packet = encoder.encode(&pcm).unwrap();
        assert!(!packet.is_empty());
        assert!(packet.len() < pcm.len() * 4);

        let decoded = decoder.decode(&packet).unwrap();
        assert_eq!(decoded.len(), FRAME_SIZE);
    }

    #[test]
    fn plc_produces_a_frame() {
        let decoder = OpusDecoder::new().unwrap();
        let concealed = decoder.decode_plc().unwrap();
        assert_eq!(concealed.len(), FRAME_SIZE);
    }

    #[test]
    fn wrong_frame_size_is_an_error() {
        let encoder = OpusEncoder::new().unwrap();
        // Opus only accepts 2.5/5/10/20/40/60 ms frames
        assert!(encoder.encode(&[0.0f32; 123]).is_err());
    }
}
