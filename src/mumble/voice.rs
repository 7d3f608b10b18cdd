use std::marker::PhantomData;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use mumble_protocol_2x::voice::{Clientbound, Serverbound, VoicePacket, VoicePacketPayload};

use crate::mumble::codec::{
    BlackHoleSink, Codec, CodecAdapter, DecoderSink, EncoderSink, VoiceFrame, VoiceTarget,
};
use crate::mumble::events::ClientEvent;

/// Upper bound on loss markers injected per gap. Holes of 100 ms or more
/// are treated as a fresh burst rather than backfilled.
pub const MAX_LOST_FRAMES: u64 = 10;

/// A voice packet received from the server, after the external voice codec.
///
/// `seq_num` counts 10 ms frames regardless of codec, which is what lets
/// the engine detect loss without decoding.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingVoice {
    pub seq_num: u64,
    /// Raw codec id; unknown values surface as an `UnknownCodec` event.
    pub codec: u8,
    /// Raw target label (normal/shout/whisper/loopback).
    pub target: u8,
    /// Session of the speaking user.
    pub source: u32,
    pub frames: Vec<Bytes>,
    pub position: Option<[f32; 3]>,
    pub end: bool,
}

impl IncomingVoice {
    /// Maps a tunneled wire packet into the engine's packet contract.
    /// Voice pings carry no audio and map to nothing.
    pub fn from_wire(packet: VoicePacket<Clientbound>) -> Option<IncomingVoice> {
        match packet {
            VoicePacket::Ping { .. } => None,
            VoicePacket::Audio {
                target,
                session_id,
                seq_num,
                payload,
                position_info,
                ..
            } => {
                let (codec, frames, end) = match payload {
                    VoicePacketPayload::CeltAlpha(frames) => {
                        let (frames, end) = strip_terminator(frames);
                        (Codec::CeltAlpha.id(), frames, end)
                    }
                    VoicePacketPayload::Speex(frames) => {
                        let (frames, end) = strip_terminator(frames);
                        (Codec::Speex.id(), frames, end)
                    }
                    VoicePacketPayload::CeltBeta(frames) => {
                        let (frames, end) = strip_terminator(frames);
                        (Codec::CeltBeta.id(), frames, end)
                    }
                    VoicePacketPayload::Opus(frame, end) => {
                        let frames = if frame.is_empty() { Vec::new() } else { vec![frame] };
                        (Codec::Opus.id(), frames, end)
                    }
                    _ => return None,
                };
                Some(IncomingVoice {
                    seq_num,
                    codec,
                    target,
                    source: session_id,
                    frames,
                    position: position_info.as_ref().and_then(decode_position),
                    end,
                })
            }
        }
    }
}

/// A voice packet to be emitted, before the external voice codec.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingVoice {
    pub seq_num: u64,
    pub codec: Codec,
    /// Addressing mode 0..=31; 0 is normal, 31 loopback.
    pub mode: u8,
    pub frames: Vec<Bytes>,
    pub position: Option<[f32; 3]>,
    pub end: bool,
}

impl OutgoingVoice {
    /// Builds the wire packet for tunneling through the data channel.
    pub(crate) fn into_wire(self) -> VoicePacket<Serverbound> {
        let OutgoingVoice {
            seq_num,
            codec,
            mode,
            mut frames,
            position,
            end,
        } = self;
        let payload = match codec {
            Codec::Opus => {
                let frame = frames.into_iter().next().unwrap_or_default();
                VoicePacketPayload::Opus(frame, end)
            }
            // Frame-based codecs signal end-of-transmission with an empty
            // terminator frame.
            Codec::CeltAlpha | Codec::CeltBeta | Codec::Speex => {
                if end {
                    frames.push(Bytes::new());
                }
                match codec {
                    Codec::CeltAlpha => VoicePacketPayload::CeltAlpha(frames),
                    Codec::CeltBeta => VoicePacketPayload::CeltBeta(frames),
                    _ => VoicePacketPayload::Speex(frames),
                }
            }
        };
        VoicePacket::Audio {
            _dst: PhantomData,
            target: mode & 0b1_1111,
            session_id: (),
            seq_num,
            payload,
            position_info: position.map(encode_position),
        }
    }
}

fn strip_terminator(mut frames: Vec<Bytes>) -> (Vec<Bytes>, bool) {
    let end = frames.last().map_or(false, |frame| frame.is_empty());
    if end {
        frames.pop();
    }
    (frames, end)
}

fn decode_position(bytes: &Bytes) -> Option<[f32; 3]> {
    if bytes.len() < 12 {
        return None;
    }
    let mut values = [0.0f32; 3];
    for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
        *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Some(values)
}

fn encode_position(position: [f32; 3]) -> Bytes {
    let mut buf = BytesMut::with_capacity(12);
    for value in position {
        buf.put_f32_le(value);
    }
    buf.freeze()
}

/// Per-user reassembly state: the active transmission's decoder sink, its
/// position in 10 ms frame units and the idle deadline.
pub(crate) struct VoiceReceiver {
    session: u32,
    sink: Option<Box<dyn DecoderSink>>,
    last_seq: u64,
    idle_deadline: Option<Instant>,
}

impl VoiceReceiver {
    pub fn new(session: u32) -> Self {
        Self {
            session,
            sink: None,
            last_seq: 0,
            idle_deadline: None,
        }
    }

    pub fn handle_packet(
        &mut self,
        packet: &IncomingVoice,
        codec: Codec,
        now: Instant,
        timeout: Duration,
        mut adapter: Option<&mut (dyn CodecAdapter + 'static)>,
        events: &mut Vec<ClientEvent>,
    ) {
        // An embedder-side close is observed lazily; the next packet then
        // starts a fresh transmission.
        if self.sink.as_ref().is_some_and(|sink| sink.is_closed()) {
            self.sink = None;
            self.idle_deadline = None;
        }

        let target = VoiceTarget::from_id(packet.target);

        if !packet.frames.is_empty() {
            let duration: u64 = match adapter.as_ref() {
                Some(adapter) => packet
                    .frames
                    .iter()
                    .map(|frame| u64::from(adapter.frame_duration_ms(codec, frame)) / 10)
                    .sum(),
                None => packet.frames.len() as u64,
            };
            let duration = duration.max(1);

            if self.sink.is_some() {
                if self.last_seq > packet.seq_num {
                    // Late packet within an active transmission.
                    return;
                }
                if self.last_seq < packet.seq_num.saturating_sub(duration) {
                    let gap = packet.seq_num - self.last_seq - 1;
                    let missing = gap.min(MAX_LOST_FRAMES);
                    if let Some(sink) = self.sink.as_mut() {
                        for _ in 0..missing {
                            sink.write(VoiceFrame {
                                target,
                                codec,
                                frame: None,
                                position: packet.position,
                            });
                        }
                    }
                }
            }

            if self.sink.is_none() {
                let sink: Box<dyn DecoderSink> = match adapter.as_mut() {
                    Some(adapter) => adapter.create_decoder_sink(self.session),
                    None => Box::new(BlackHoleSink),
                };
                self.sink = Some(sink);
                events.push(ClientEvent::VoiceStart {
                    session: self.session,
                });
            }

            if let Some(sink) = self.sink.as_mut() {
                for frame in &packet.frames {
                    sink.write(VoiceFrame {
                        target,
                        codec,
                        frame: Some(frame.clone()),
                        position: packet.position,
                    });
                }
            }

            self.idle_deadline = Some(now + timeout);
            self.last_seq = packet.seq_num + duration - 1;
        }

        if packet.end && self.sink.is_some() {
            self.finish(events);
        }
    }

    /// Ends the active transmission, draining the decoder sink.
    pub fn finish(&mut self, events: &mut Vec<ClientEvent>) {
        self.idle_deadline = None;
        if let Some(mut sink) = self.sink.take() {
            sink.end();
            events.push(ClientEvent::VoiceEnd {
                session: self.session,
            });
        }
    }

    pub fn tick(&mut self, now: Instant, events: &mut Vec<ClientEvent>) {
        if self.idle_deadline.is_some_and(|deadline| deadline <= now) {
            self.finish(events);
        }
    }
}

/// Outgoing transmission handle returned by
/// [`create_voice_stream`](crate::mumble::MumbleClient::create_voice_stream).
/// PCM written through the client is encoded by the codec adapter and
/// packetized with a monotonically increasing sequence number.
pub struct VoiceSender {
    pub(crate) mode: u8,
    pub(crate) codec: Codec,
    pub(crate) encoder: Option<Box<dyn EncoderSink>>,
    pub(crate) seq_num: u64,
    pub(crate) samples_per_packet: u32,
    pub(crate) finished: bool,
}

impl VoiceSender {
    pub(crate) fn new(
        mode: u8,
        codec: Codec,
        encoder: Option<Box<dyn EncoderSink>>,
        samples_per_packet: u32,
    ) -> Self {
        Self {
            mode,
            codec,
            encoder,
            seq_num: 0,
            samples_per_packet,
            finished: false,
        }
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }

    pub fn finished(&self) -> bool {
        self.finished
    }
}
