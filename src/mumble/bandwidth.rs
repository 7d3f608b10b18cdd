//! Outgoing-audio bitrate negotiation.
//!
//! Mumble servers admission-control audio streams by the bandwidth the
//! stream would consume as IP/UDP, not by the raw bitrate. These functions
//! reproduce the server's arithmetic so the client never sends a stream the
//! server would refuse.

use crate::mumble::codec::SAMPLE_RATE;

/// Bitrate used when neither the embedder nor the server constrains one.
pub const DEFAULT_BITRATE: u32 = 40_000;

/// IP + UDP + crypt overhead plus the voice header bytes of every packet.
const PACKET_OVERHEAD_BYTES: u32 = 20 + 8 + 4 + 1 + 4;

/// Bandwidth in bits/s the server accounts for a stream of `bitrate` bits/s
/// cut into packets of `samples_per_packet` samples.
pub fn enforceable_bandwidth(bitrate: u32, samples_per_packet: u32, has_position: bool) -> u32 {
    let codec_header = (samples_per_packet / 480).max(4);
    let position = if has_position { 12 } else { 0 };
    let packet_bytes = PACKET_OVERHEAD_BYTES + codec_header + position;
    let packets_per_second = f64::from(SAMPLE_RATE) / f64::from(samples_per_packet);
    (f64::from(packet_bytes) * 8.0 * packets_per_second + f64::from(bitrate)).round() as u32
}

/// Highest bitrate that still fits under the server's bandwidth cap.
pub fn max_bitrate(samples_per_packet: u32, has_position: bool, max_bandwidth: u32) -> u32 {
    max_bandwidth.saturating_sub(enforceable_bandwidth(0, samples_per_packet, has_position))
}

/// The embedder's preferred bitrate, falling back to the cap-derived
/// maximum and finally to [`DEFAULT_BITRATE`].
pub fn preferred_bitrate(
    preferred: Option<u32>,
    samples_per_packet: u32,
    has_position: bool,
    max_bandwidth: Option<u32>,
) -> u32 {
    match (preferred, max_bandwidth) {
        (Some(bitrate), _) => bitrate,
        (None, Some(cap)) => max_bitrate(samples_per_packet, has_position, cap),
        (None, None) => DEFAULT_BITRATE,
    }
}

/// Bitrate actually used: the preference when the server admits it, the
/// cap-derived maximum otherwise.
pub fn actual_bitrate(
    preferred: Option<u32>,
    samples_per_packet: u32,
    has_position: bool,
    max_bandwidth: Option<u32>,
) -> u32 {
    let bitrate = preferred_bitrate(preferred, samples_per_packet, has_position, max_bandwidth);
    match max_bandwidth {
        Some(cap) if enforceable_bandwidth(bitrate, samples_per_packet, has_position) > cap => {
            max_bitrate(samples_per_packet, has_position, cap)
        }
        _ => bitrate,
    }
}
