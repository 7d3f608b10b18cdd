use bytes::Bytes;

/// Audio sample rate fixed by the Mumble protocol.
pub const SAMPLE_RATE: u32 = 48_000;

/// Voice-packet codec tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    CeltAlpha,
    Speex,
    CeltBeta,
    Opus,
}

impl Codec {
    /// Maps a wire codec id to a known codec. Id 1 is the voice ping and
    /// never carries audio.
    pub fn from_id(id: u8) -> Option<Codec> {
        match id {
            0 => Some(Codec::CeltAlpha),
            2 => Some(Codec::Speex),
            3 => Some(Codec::CeltBeta),
            4 => Some(Codec::Opus),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Codec::CeltAlpha => 0,
            Codec::Speex => 2,
            Codec::CeltBeta => 3,
            Codec::Opus => 4,
        }
    }
}

/// Addressing label of a received transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceTarget {
    Normal,
    Shout,
    Whisper,
    Loopback,
}

impl VoiceTarget {
    pub fn from_id(id: u8) -> VoiceTarget {
        match id {
            1 => VoiceTarget::Shout,
            2 => VoiceTarget::Whisper,
            31 => VoiceTarget::Loopback,
            _ => VoiceTarget::Normal,
        }
    }
}

/// One entry on a decoded-frame sink. `frame: None` marks a frame the
/// network lost; decoders use it for loss concealment.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceFrame {
    pub target: VoiceTarget,
    pub codec: Codec,
    pub frame: Option<Bytes>,
    pub position: Option<[f32; 3]>,
}

/// Per-transmission sink for encoded frames, created by the codec adapter.
///
/// `is_closed` lets the embedder tear a transmission down from its side:
/// once it reports true the engine drops its reference and the next packet
/// starts a fresh transmission.
pub trait DecoderSink {
    fn write(&mut self, frame: VoiceFrame);
    fn end(&mut self);
    fn is_closed(&self) -> bool {
        false
    }
}

/// PCM handed to an encoder sink, interleaved `f32` samples.
#[derive(Clone, Copy, Debug)]
pub struct EncodeRequest<'a> {
    pub pcm: &'a [f32],
    pub channels: u8,
    /// Bitrate the bandwidth negotiation settled on for this chunk.
    pub bitrate: Option<u32>,
}

/// One encoded frame produced by an encoder sink.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedFrame {
    pub data: Bytes,
    /// Samples (per channel) the frame covers, used to advance `seq_num`.
    pub samples: u32,
}

/// Per-stream encoder created by the codec adapter.
pub trait EncoderSink {
    fn encode(&mut self, request: EncodeRequest<'_>) -> Vec<EncodedFrame>;
    /// Drains buffered audio at end of input.
    fn finish(&mut self) -> Vec<EncodedFrame>;
}

/// Contract the core consumes for codec work. Implementations must ignore
/// unknown codecs rather than fail.
pub trait CodecAdapter {
    /// CELT bitstream version constants advertised in `Authenticate`.
    fn celt_versions(&self) -> Vec<i32> {
        Vec::new()
    }

    /// Whether Opus is advertised in `Authenticate`.
    fn opus(&self) -> bool {
        false
    }

    fn create_decoder_sink(&mut self, session: u32) -> Box<dyn DecoderSink + 'static>;

    fn create_encoder_sink(&mut self, codec: Codec) -> Box<dyn EncoderSink + 'static>;

    /// Duration of one encoded frame in milliseconds, a multiple of 10.
    fn frame_duration_ms(&self, codec: Codec, frame: &[u8]) -> u32;
}

/// Stands in for a decoder sink when no codec adapter is configured:
/// discards writes but still honors `end`.
#[derive(Debug, Default)]
pub(crate) struct BlackHoleSink;

impl DecoderSink for BlackHoleSink {
    fn write(&mut self, _frame: VoiceFrame) {}

    fn end(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::{BlackHoleSink, Codec, DecoderSink, VoiceFrame, VoiceTarget};

    /// Codec ids round-trip, and the voice-ping id maps to no codec.
    #[test]
    fn codec_ids_round_trip() {
        // Arrange
        let codecs = [Codec::CeltAlpha, Codec::Speex, Codec::CeltBeta, Codec::Opus];
        // Act
        // Assert
        for codec in codecs {
            assert_eq!(Codec::from_id(codec.id()), Some(codec));
        }
        assert_eq!(Codec::from_id(1), None);
        assert_eq!(Codec::from_id(7), None);
    }

    /// Target labels map per the protocol, defaulting to normal.
    #[test]
    fn voice_target_labels() {
        // Arrange
        // Act
        // Assert
        assert_eq!(VoiceTarget::from_id(0), VoiceTarget::Normal);
        assert_eq!(VoiceTarget::from_id(1), VoiceTarget::Shout);
        assert_eq!(VoiceTarget::from_id(2), VoiceTarget::Whisper);
        assert_eq!(VoiceTarget::from_id(31), VoiceTarget::Loopback);
        assert_eq!(VoiceTarget::from_id(5), VoiceTarget::Normal);
    }

    /// The black-hole sink accepts writes and end without effect.
    #[test]
    fn black_hole_sink_discards() {
        // Arrange
        let mut sink = BlackHoleSink;
        // Act
        sink.write(VoiceFrame {
            target: VoiceTarget::Normal,
            codec: Codec::Opus,
            frame: None,
            position: None,
        });
        sink.end();
        // Assert
        assert!(!sink.is_closed());
    }
}
