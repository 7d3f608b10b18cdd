use crate::error::ClientError;
use crate::mumble::state::{ChannelChanges, UserChanges};

/// Server software version, as reported in the `Version` exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub release: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
}

/// Why the server refused the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectKind {
    None,
    WrongVersion,
    InvalidUsername,
    WrongUserPassword,
    WrongServerPassword,
    UsernameInUse,
    ServerFull,
    NoCertificate,
    AuthenticatorFail,
    Other(i32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub kind: Option<RejectKind>,
    pub reason: Option<String>,
}

/// A `PermissionDenied` message, dispatched by kind. Entity ids are only
/// present when the referenced user or channel is known to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Denial {
    Text { reason: Option<String> },
    Permission { session: Option<u32>, channel_id: Option<u32>, permission: Option<u32> },
    SuperUser,
    ChannelName { name: Option<String> },
    TextTooLong,
    TemporaryChannel,
    MissingCertificate { session: Option<u32> },
    UserName { name: Option<String> },
    ChannelFull,
    NestingLimit,
}

/// A text message received on the data channel. Target lists are filtered
/// to ids the client knows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMessageEvent {
    pub sender: Option<u32>,
    pub message: String,
    pub users: Vec<u32>,
    pub channels: Vec<u32>,
    pub trees: Vec<u32>,
}

/// Observable events, delivered in the order the triggering packets were
/// dispatched. Entities are referenced by id and resolved through the
/// client's indices.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// Handshake finished; the model is synchronized.
    Connected,
    /// Terminal; emitted exactly once.
    Disconnected,
    /// The server refused the connection. Followed by `Disconnected`.
    Rejected(Rejection),
    /// Fatal error. Followed by `Disconnected`.
    Error(ClientError),
    NewChannel { channel_id: u32 },
    ChannelUpdate { channel_id: u32, changes: ChannelChanges },
    ChannelRemoved { channel_id: u32 },
    NewUser { session: u32 },
    UserUpdate { session: u32, actor: Option<u32>, changes: UserChanges },
    UserRemoved { session: u32, actor: Option<u32>, reason: Option<String>, ban: bool },
    Denied(Denial),
    Message(TextMessageEvent),
    DataPing { rtt_ms: u64 },
    UnknownCodec { codec: u8 },
    /// A user started transmitting; frames flow into the decoder sink the
    /// codec adapter created for this transmission.
    VoiceStart { session: u32 },
    /// The transmission ended (end flag, idle timeout or teardown).
    VoiceEnd { session: u32 },
}
