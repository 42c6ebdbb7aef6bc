//! Fixed-size voice packet framing.
//!
//! [`PacketFramer`] turns arbitrarily sized device buffers into a stream of
//! 20 ms, 16 kHz, mono PCM16 [`VoicePacket`]s.  Samples that do not fill a
//! whole packet are carried over to the next call, so packet boundaries are
//! exact no matter what buffer size the sound card picks.

use crate::audio::pcm::{encode_base64, f32_to_pcm16_bytes, pcm16_bytes_to_f32};
use crate::audio::resample::{stereo_to_mono, Decimator};

/// Wire sample rate of outbound voice packets.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Duration of one outbound voice packet.
pub const FRAME_MS: u32 = 20;

/// Samples per voice packet (20 ms @ 16 kHz).
pub const FRAME_SAMPLES: usize = (TARGET_SAMPLE_RATE * FRAME_MS / 1000) as usize;

// ---------------------------------------------------------------------------
// VoicePacket
// ---------------------------------------------------------------------------

/// One 20 ms mono PCM16 frame at 16 kHz, immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct VoicePacket {
    pcm: Vec<u8>,
}

impl VoicePacket {
    fn from_samples(samples: &[f32]) -> Self {
        debug_assert_eq!(samples.len(), FRAME_SAMPLES);
        Self {
            pcm: f32_to_pcm16_bytes(samples),
        }
    }

    /// Little-endian PCM16 payload (`FRAME_SAMPLES * 2` bytes).
    pub fn pcm_bytes(&self) -> &[u8] {
        &self.pcm
    }

    /// Base64 text as carried in `input.audio_chunk`.
    pub fn to_base64(&self) -> String {
        encode_base64(&self.pcm)
    }

    /// Samples decoded back to `f32`.
    pub fn samples(&self) -> Vec<f32> {
        pcm16_bytes_to_f32(&self.pcm)
    }

    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }
}

// ---------------------------------------------------------------------------
// PacketFramer
// ---------------------------------------------------------------------------

/// Downmix → decimate → frame.
pub struct PacketFramer {
    channels: u16,
    decimator: Decimator,
    /// Decimated samples not yet forming a complete packet.
    carry: Vec<f32>,
}

impl PacketFramer {
    /// Framer for a device delivering `channels` interleaved channels at
    /// `source_rate` Hz.
    pub fn new(source_rate: u32, channels: u16) -> Self {
        Self {
            channels,
            decimator: Decimator::new(source_rate, TARGET_SAMPLE_RATE),
            carry: Vec::with_capacity(FRAME_SAMPLES * 2),
        }
    }

    /// Push one device buffer; returns every packet it completes, in capture
    /// order.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<VoicePacket> {
        let mono = stereo_to_mono(interleaved, self.channels);
        self.decimator.process(&mono, &mut self.carry);

        let complete = self.carry.len() / FRAME_SAMPLES;
        if complete == 0 {
            return Vec::new();
        }

        let packets = self
            .carry
            .chunks_exact(FRAME_SAMPLES)
            .map(VoicePacket::from_samples)
            .collect();
        self.carry.drain(..complete * FRAME_SAMPLES);
        packets
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::decode_base64_payload;

    #[test]
    fn frame_constants() {
        assert_eq!(FRAME_SAMPLES, 320);
    }

    #[test]
    fn odd_device_buffers_produce_exact_packets() {
        let mut framer = PacketFramer::new(48_000, 1);
        let mut packets = Vec::new();
        // 1 s of audio in 441-sample device buffers (not a multiple of 960).
        let mut fed = 0;
        while fed < 48_000 {
            let n = 441.min(48_000 - fed);
            packets.extend(framer.push(&vec![0.1_f32; n]));
            fed += n;
        }
        assert_eq!(packets.len(), 50);
        assert!(packets.iter().all(|p| p.sample_count() == FRAME_SAMPLES));
        assert!(framer.push(&[0.1_f32; 957]).is_empty(), "no leftover carry");
    }

    #[test]
    fn stereo_input_is_downmixed_before_framing() {
        let mut framer = PacketFramer::new(16_000, 2);
        let interleaved: Vec<f32> = (0..FRAME_SAMPLES).flat_map(|_| [0.5_f32, -0.5]).collect();
        let packets = framer.push(&interleaved);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].samples().iter().all(|s| s.abs() < 1e-4));
    }

    #[test]
    fn carryover_completes_the_next_packet() {
        let mut framer = PacketFramer::new(16_000, 1);
        assert!(framer.push(&vec![0.0_f32; 300]).is_empty());
        let packets = framer.push(&vec![0.0_f32; 20]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].sample_count(), FRAME_SAMPLES);
    }

    #[test]
    fn wire_packets_decode_back_to_capture_duration() {
        // 1.234 s captured at 44.1 kHz.
        let captured_secs = 1.234;
        let input = vec![0.2_f32; (44_100.0 * captured_secs) as usize];
        let mut framer = PacketFramer::new(44_100, 1);
        let packets: Vec<VoicePacket> =
            input.chunks(512).flat_map(|c| framer.push(c)).collect();

        let mut samples = 0;
        for packet in &packets {
            let decoded = decode_base64_payload(&packet.to_base64(), TARGET_SAMPLE_RATE).unwrap();
            assert_eq!(decoded.samples.len(), FRAME_SAMPLES);
            samples += decoded.samples.len();
        }

        let decoded_secs = samples as f64 / TARGET_SAMPLE_RATE as f64;
        assert!((captured_secs - decoded_secs).abs() <= FRAME_MS as f64 / 1000.0);
    }
}
