pub mod bandwidth;
pub mod client;
pub mod codec;
pub mod config;
pub mod control;
pub mod events;
pub mod ping;
pub mod state;
pub mod voice;

pub use client::{ChannelEdit, ConnState, MumbleClient};
pub use codec::{
    Codec, CodecAdapter, DecoderSink, EncodeRequest, EncodedFrame, EncoderSink, VoiceFrame,
    VoiceTarget, SAMPLE_RATE,
};
pub use config::{MumbleConfig, DEFAULT_PORT};
#[cfg(feature = "tls")]
pub use control::tls_connect;
pub use control::{BlockingControlTransport, DataChannel, VoiceChannel, PROTOCOL_VERSION};
pub use events::{ClientEvent, Denial, RejectKind, Rejection, ServerVersion, TextMessageEvent};
pub use ping::RttEstimate;
pub use state::{Channel, ChannelChanges, User, UserChanges, World};
pub use voice::{IncomingVoice, OutgoingVoice, VoiceSender, MAX_LOST_FRAMES};
